use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::constants::{KDF_CONTEXT_ACCOUNT_THREAD, KDF_CONTEXT_DB_KEY};
use crate::crypto::SymmetricKey;
use crate::error::IdentityError;
use crate::types::{ThreadId, UserId};

/// An Ed25519 identity. Accounts use it as their address; threads use one as
/// the source of their id.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

/// Serializable format for storing/exporting identity
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub secret_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Restore identity from a serialized export
    pub fn from_export(export: &IdentityExport) -> Self {
        Self::from_secret_bytes(&export.secret_key)
    }

    /// The account address (public key)
    pub fn user_id(&self) -> UserId {
        UserId(self.signing_key.verifying_key().to_bytes())
    }

    /// The thread id this identity stands for, when it is a thread key.
    pub fn thread_id(&self) -> ThreadId {
        ThreadId(self.signing_key.verifying_key().to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The X25519 secret matching this identity's Montgomery public key.
    /// Used to open boxes sealed to the account address.
    pub fn x25519_secret(&self) -> x25519_dalek::StaticSecret {
        x25519_dalek::StaticSecret::from(self.signing_key.to_scalar_bytes())
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: *self.signing_key.as_bytes(),
            public_key: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Derive a database encryption key from the identity using BLAKE3
    pub fn derive_db_key(&self) -> [u8; 32] {
        blake3::derive_key(KDF_CONTEXT_DB_KEY, self.signing_key.as_bytes())
    }

    /// Content key of the account thread, stable across reinstalls.
    pub fn derive_account_thread_key(&self) -> SymmetricKey {
        blake3::derive_key(KDF_CONTEXT_ACCOUNT_THREAD, self.signing_key.as_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id().short())
            .finish_non_exhaustive()
    }
}

/// Parse a hex address and check that it is a valid Ed25519 public key.
pub fn parse_address(s: &str) -> Result<UserId, IdentityError> {
    let id = UserId::from_hex(s).map_err(|_| IdentityError::InvalidKeyBytes)?;
    VerifyingKey::from_bytes(&id.0).map_err(|_| IdentityError::InvalidKeyBytes)?;
    Ok(id)
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let signature = Signature::from_slice(signature).map_err(|_| IdentityError::BadSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| IdentityError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let id = Identity::generate();
        let export = id.to_export();
        let restored = Identity::from_export(&export);
        assert_eq!(id.user_id(), restored.user_id());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"thread block header";
        let signature = id.sign(message).to_bytes();

        assert!(verify_signature(&id.public_key_bytes(), message, &signature).is_ok());
        assert!(verify_signature(&id.public_key_bytes(), b"wrong", &signature).is_err());
        assert!(verify_signature(&id.public_key_bytes(), message, &signature[..10]).is_err());
    }

    #[test]
    fn test_thread_id_matches_public_key() {
        let id = Identity::generate();
        assert_eq!(id.thread_id().0, id.public_key_bytes());
    }

    #[test]
    fn test_parse_address() {
        let id = Identity::generate();
        assert_eq!(parse_address(&id.user_id().to_hex()).unwrap(), id.user_id());
        assert!(parse_address("not-hex").is_err());
    }

    #[test]
    fn test_account_thread_key_deterministic() {
        let id = Identity::generate();
        assert_eq!(id.derive_account_thread_key(), id.derive_account_thread_key());
        assert_ne!(id.derive_account_thread_key(), id.derive_db_key());
    }
}
