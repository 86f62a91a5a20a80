use serde::{Deserialize, Serialize};

use crate::block::{BlockEnvelope, Contact};
use crate::crypto::{self, SymmetricKey};
use crate::identity::Identity;
use crate::policy::{Sharing, SharingPolicy, ThreadType};
use crate::types::{BlockId, ThreadId, UserId};

/// Everything a peer needs to load a thread it was invited to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub id: ThreadId,
    /// Secret of the thread's signing identity. Its public half is `id`.
    pub sk: [u8; 32],
    pub content_key: SymmetricKey,
    /// Local key handle chosen by the initiator.
    pub key: String,
    pub name: String,
    pub schema: Option<String>,
    pub initiator: UserId,
    pub thread_type: ThreadType,
    pub sharing: Sharing,
    pub members: Vec<UserId>,
    pub heads: Vec<BlockId>,
}

impl ThreadSnapshot {
    pub fn policy(&self) -> SharingPolicy {
        SharingPolicy {
            initiator: self.initiator,
            thread_type: self.thread_type,
            sharing: self.sharing,
            members: self.members.clone(),
        }
    }

    /// Check that the secret really belongs to the claimed thread id.
    pub fn validate(&self) -> Result<(), InviteError> {
        if Identity::from_secret_bytes(&self.sk).thread_id() != self.id {
            return Err(InviteError::ThreadMismatch);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ThreadSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSnapshot")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("name", &self.name)
            .field("initiator", &self.initiator.short())
            .field("thread_type", &self.thread_type)
            .field("sharing", &self.sharing)
            .field("members", &self.members.len())
            .finish_non_exhaustive()
    }
}

/// Body of an INVITE block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteBody {
    pub thread: ThreadSnapshot,
    pub inviter: Contact,
}

/// Out-of-band handle for an external invite: where the ciphertext lives and
/// the key that opens it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInvite {
    pub address: String,
    pub key: SymmetricKey,
}

impl ExternalInvite {
    /// Encode as a base64url string (copiable link code).
    pub fn encode(&self) -> Result<String, InviteError> {
        let bytes = bincode::serialize(self).map_err(|_| InviteError::InvalidFormat)?;
        Ok(base64_url_encode(&bytes))
    }

    pub fn decode(code: &str) -> Result<Self, InviteError> {
        let bytes = base64_url_decode(code)?;
        bincode::deserialize(&bytes).map_err(|_| InviteError::InvalidFormat)
    }
}

/// Encrypt a whole encoded invite envelope under a fresh random key.
pub fn seal_external(envelope: &BlockEnvelope) -> Result<(Vec<u8>, SymmetricKey), InviteError> {
    let bytes = envelope.encode().map_err(|_| InviteError::InvalidFormat)?;
    let key = crypto::generate_symmetric_key();
    let ciphertext = crypto::encrypt(&key, &bytes).map_err(|_| InviteError::Undecryptable)?;
    Ok((ciphertext, key))
}

/// Inverse of [`seal_external`].
pub fn open_external(data: &[u8], key: &SymmetricKey) -> Result<BlockEnvelope, InviteError> {
    let bytes = crypto::decrypt(key, data).map_err(|_| InviteError::Undecryptable)?;
    BlockEnvelope::decode(&bytes).map_err(|_| InviteError::InvalidFormat)
}

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("Invalid invite format")]
    InvalidFormat,

    #[error("Invite could not be decrypted")]
    Undecryptable,

    #[error("Thread secret does not match thread id")]
    ThreadMismatch,

    #[error("Base64 decode error")]
    Base64Decode,
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, InviteError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|_| InviteError::Base64Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockBody, BodyCipher};
    use chrono::Utc;

    fn snapshot(thread: &Identity, initiator: UserId) -> ThreadSnapshot {
        ThreadSnapshot {
            id: thread.thread_id(),
            sk: *thread.secret_bytes(),
            content_key: crypto::generate_symmetric_key(),
            key: "holiday".into(),
            name: "Holiday".into(),
            schema: None,
            initiator,
            thread_type: ThreadType::Open,
            sharing: Sharing::InviteOnly,
            members: vec![initiator],
            heads: vec![],
        }
    }

    fn invite_body(inviter: &Identity, thread: &Identity) -> BlockBody {
        BlockBody::Invite(InviteBody {
            thread: snapshot(thread, inviter.user_id()),
            inviter: Contact {
                id: inviter.user_id(),
                name: "alice".into(),
                avatar: None,
                updated: Utc::now(),
            },
        })
    }

    #[test]
    fn test_snapshot_validate() {
        let thread = Identity::generate();
        let mut snap = snapshot(&thread, Identity::generate().user_id());
        snap.validate().unwrap();

        snap.id = Identity::generate().thread_id();
        assert!(matches!(snap.validate(), Err(InviteError::ThreadMismatch)));
    }

    #[test]
    fn test_targeted_invite_only_opens_for_recipient() {
        let inviter = Identity::generate();
        let recipient = Identity::generate();
        let thread = Identity::generate();

        let envelope = BlockEnvelope::create(
            &inviter,
            thread.thread_id(),
            vec![],
            &invite_body(&inviter, &thread),
            BodyCipher::Recipient(&recipient.user_id()),
        )
        .unwrap();

        match envelope.open_sealed_body(&recipient).unwrap() {
            BlockBody::Invite(body) => assert_eq!(body.thread.id, thread.thread_id()),
            other => panic!("unexpected body {other:?}"),
        }
        assert!(envelope.open_sealed_body(&Identity::generate()).is_err());
    }

    #[test]
    fn test_external_invite_roundtrip() {
        let inviter = Identity::generate();
        let thread = Identity::generate();
        let envelope = BlockEnvelope::create(
            &inviter,
            thread.thread_id(),
            vec![],
            &invite_body(&inviter, &thread),
            BodyCipher::Plain,
        )
        .unwrap();

        let (ciphertext, key) = seal_external(&envelope).unwrap();
        let opened = open_external(&ciphertext, &key).unwrap();
        assert_eq!(opened, envelope);

        let wrong = crypto::generate_symmetric_key();
        assert!(matches!(open_external(&ciphertext, &wrong), Err(InviteError::Undecryptable)));
    }

    #[test]
    fn test_external_link_code_roundtrip() {
        let link = ExternalInvite {
            address: "abc123".into(),
            key: [7u8; 32],
        };
        let code = link.encode().unwrap();
        assert_eq!(ExternalInvite::decode(&code).unwrap(), link);
        assert!(ExternalInvite::decode("!!!").is_err());
    }
}
