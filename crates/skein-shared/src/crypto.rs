use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::VerifyingKey;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_SEALED_BOX, NONCE_SIZE, PUBKEY_SIZE};
use crate::error::CryptoError;
use crate::identity::Identity;
use crate::types::UserId;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Parse a 32-byte key from a byte slice (e.g. an out-of-band invite key).
pub fn key_from_slice(bytes: &[u8]) -> Result<SymmetricKey, CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)
}

// BLAKE3 KDF with domain separation, binding both public halves of the exchange
fn sealed_box_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEALED_BOX);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    *hasher.finalize().as_bytes()
}

/// Encrypt to a recipient's Ed25519 address.
///
/// The address is mapped to its X25519 form and an ephemeral Diffie-Hellman
/// exchange yields a one-time symmetric key. Output: ephemeral pubkey ||
/// nonce || ciphertext.
pub fn seal(recipient: &UserId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let recipient_x = VerifyingKey::from_bytes(&recipient.0)
        .map_err(|_| CryptoError::InvalidRecipient)?
        .to_montgomery();
    let recipient_pub = PublicKey::from(recipient_x.to_bytes());

    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient_pub);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidRecipient);
    }

    let key = sealed_box_key(shared.as_bytes(), ephemeral_pub.as_bytes(), recipient_pub.as_bytes());
    let ciphertext = encrypt(&key, plaintext)?;

    let mut output = Vec::with_capacity(PUBKEY_SIZE + ciphertext.len());
    output.extend_from_slice(ephemeral_pub.as_bytes());
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Open a box produced by [`seal`] for this identity.
pub fn open(identity: &Identity, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < PUBKEY_SIZE + NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (ephemeral_bytes, ciphertext) = data.split_at(PUBKEY_SIZE);
    let ephemeral: [u8; 32] = ephemeral_bytes
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let ephemeral_pub = PublicKey::from(ephemeral);

    let secret = identity.x25519_secret();
    let own_pub = PublicKey::from(&secret);
    let shared = secret.diffie_hellman(&ephemeral_pub);
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed);
    }

    let key = sealed_box_key(shared.as_bytes(), &ephemeral, own_pub.as_bytes());
    decrypt(&key, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key();
        let plaintext = b"a block body";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_symmetric_key();
        let key2 = generate_symmetric_key();

        let encrypted = encrypt(&key1, b"Secret message").unwrap();
        assert!(decrypt(&key2, &encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_symmetric_key();

        let mut encrypted = encrypt(&key, b"Important data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(decrypt(&key, &encrypted).is_err());
    }

    #[test]
    fn test_empty_data_fails() {
        let key = generate_symmetric_key();
        assert!(decrypt(&key, &[]).is_err());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let recipient = Identity::generate();
        let sealed = seal(&recipient.user_id(), b"thread key material").unwrap();
        assert_eq!(open(&recipient, &sealed).unwrap(), b"thread key material");
    }

    #[test]
    fn test_open_with_other_identity_fails() {
        let recipient = Identity::generate();
        let stranger = Identity::generate();
        let sealed = seal(&recipient.user_id(), b"for your eyes only").unwrap();
        assert!(open(&stranger, &sealed).is_err());
    }

    #[test]
    fn test_open_truncated_fails() {
        let recipient = Identity::generate();
        let sealed = seal(&recipient.user_id(), b"x").unwrap();
        assert!(open(&recipient, &sealed[..40]).is_err());
    }

    #[test]
    fn test_key_from_slice() {
        assert!(key_from_slice(&[1u8; 32]).is_ok());
        assert!(key_from_slice(&[1u8; 31]).is_err());
    }
}
