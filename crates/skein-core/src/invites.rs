//! Checks applied to an invite before any state is touched.
//!
//! Targeted and external invites end up in the same place: an INVITE
//! envelope whose body carries a thread snapshot. Every failure to open or
//! decode one is reported as [`CoreError::InvalidThreadBlock`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use skein_shared::block::{BlockBody, Contact};
use skein_shared::crypto::SymmetricKey;
use skein_shared::invite::{open_external, InviteBody};
use skein_shared::{BlockEnvelope, BlockId, BlockType, Identity, UserId};
use skein_store::ThreadInvite;

use crate::error::CoreError;

/// A pending invite as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InviteInfo {
    pub id: BlockId,
    pub name: String,
    pub inviter: Contact,
    pub date: DateTime<Utc>,
}

impl InviteInfo {
    /// Combine a stored invite with what we know about its sender.
    pub fn new(invite: &ThreadInvite, known: Option<Contact>) -> Self {
        Self {
            id: invite.id,
            name: invite.name.clone(),
            inviter: fresher(known, invite.inviter.clone()),
            date: invite.date,
        }
    }
}

/// The newer of two views of the same contact. Ties keep the carried one.
pub(crate) fn fresher(stored: Option<Contact>, carried: Contact) -> Contact {
    match stored {
        Some(stored) if stored.updated > carried.updated => stored,
        _ => carried,
    }
}

/// Decode an envelope received on our inbox topic.
pub(crate) fn decode(data: &[u8]) -> Result<BlockEnvelope, CoreError> {
    let envelope = BlockEnvelope::decode(data).map_err(malformed)?;
    if envelope.block_type != BlockType::Invite {
        return Err(CoreError::BlockWrongType {
            expected: BlockType::Invite,
            actual: envelope.block_type,
        });
    }
    Ok(envelope)
}

/// Open a targeted invite sealed to `identity`.
pub(crate) fn open_targeted(envelope: &BlockEnvelope, identity: &Identity) -> Result<BlockBody, CoreError> {
    envelope.open_sealed_body(identity).map_err(malformed)
}

/// Open an external invite with the key handed out of band.
pub(crate) fn open_external_invite(data: &[u8], key: &SymmetricKey) -> Result<(BlockEnvelope, BlockBody), CoreError> {
    let envelope = open_external(data, key).map_err(malformed)?;
    let body = envelope.plain_body().map_err(malformed)?;
    Ok((envelope, body))
}

/// Everything that must hold before an invite may create a thread.
///
/// The signature must verify, the signer must be the inviter the body
/// names, the snapshot must belong to the envelope's thread, and the inviter
/// must be allowed to share that thread with `local`.
pub(crate) fn verify(envelope: &BlockEnvelope, body: BlockBody, local: &UserId) -> Result<InviteBody, CoreError> {
    if envelope.block_type != BlockType::Invite {
        return Err(CoreError::BlockWrongType {
            expected: BlockType::Invite,
            actual: envelope.block_type,
        });
    }
    let BlockBody::Invite(invite) = body else {
        return Err(CoreError::BlockWrongType {
            expected: BlockType::Invite,
            actual: body.block_type(),
        });
    };

    envelope.verify().map_err(malformed)?;

    let inviter = invite.inviter.id;
    if envelope.author != Some(inviter) {
        return Err(CoreError::InvalidThreadBlock(
            "invite is not signed by its inviter".into(),
        ));
    }
    if envelope.thread_id != invite.thread.id {
        return Err(CoreError::InvalidThreadBlock(
            "invite snapshot belongs to another thread".into(),
        ));
    }
    invite.thread.validate().map_err(malformed)?;

    if !invite.thread.policy().shareable(&inviter, local) {
        return Err(CoreError::NotShareable);
    }
    Ok(invite)
}

fn malformed(e: impl std::fmt::Display) -> CoreError {
    CoreError::InvalidThreadBlock(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skein_shared::block::BodyCipher;
    use skein_shared::crypto::generate_symmetric_key;
    use skein_shared::invite::{seal_external, ThreadSnapshot};
    use skein_shared::{Sharing, ThreadType};

    fn contact(id: &Identity, updated: DateTime<Utc>) -> Contact {
        Contact {
            id: id.user_id(),
            name: "inviter".into(),
            avatar: None,
            updated,
        }
    }

    fn snapshot(initiator: &Identity, thread_type: ThreadType, sharing: Sharing) -> ThreadSnapshot {
        let sk = Identity::generate();
        ThreadSnapshot {
            id: sk.thread_id(),
            sk: *sk.secret_bytes(),
            content_key: generate_symmetric_key(),
            key: "shared".into(),
            name: "Shared".into(),
            schema: None,
            initiator: initiator.user_id(),
            thread_type,
            sharing,
            members: vec![],
            heads: vec![],
        }
    }

    fn invite(author: &Identity, snapshot: ThreadSnapshot, cipher: BodyCipher<'_>) -> BlockEnvelope {
        let body = BlockBody::Invite(InviteBody {
            thread: snapshot.clone(),
            inviter: contact(author, Utc::now()),
        });
        BlockEnvelope::create(author, snapshot.id, vec![], &body, cipher).unwrap()
    }

    #[test]
    fn test_targeted_invite_verifies() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let snap = snapshot(&alice, ThreadType::Open, Sharing::InviteOnly);
        let envelope = invite(&alice, snap.clone(), BodyCipher::Recipient(&bob.user_id()));

        let data = envelope.encode().unwrap();
        let decoded = decode(&data).unwrap();
        let body = open_targeted(&decoded, &bob).unwrap();
        let invite = verify(&decoded, body, &bob.user_id()).unwrap();
        assert_eq!(invite.thread.content_key, snap.content_key);

        // somebody else's inbox
        let eve = Identity::generate();
        assert!(matches!(
            open_targeted(&decoded, &eve),
            Err(CoreError::InvalidThreadBlock(_))
        ));
    }

    #[test]
    fn test_invite_from_non_sharer_is_refused() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        // only the initiator may share a read-only thread
        let snap = snapshot(&alice, ThreadType::ReadOnly, Sharing::Shared);
        let mallory = Identity::generate();
        let envelope = invite(&mallory, snap, BodyCipher::Recipient(&bob.user_id()));
        let body = open_targeted(&envelope, &bob).unwrap();

        assert!(matches!(
            verify(&envelope, body, &bob.user_id()),
            Err(CoreError::NotShareable)
        ));
    }

    #[test]
    fn test_forged_snapshot_is_refused() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut snap = snapshot(&alice, ThreadType::Open, Sharing::Shared);
        snap.sk = *Identity::generate().secret_bytes();
        let envelope = invite(&alice, snap, BodyCipher::Recipient(&bob.user_id()));
        let body = open_targeted(&envelope, &bob).unwrap();

        assert!(matches!(
            verify(&envelope, body, &bob.user_id()),
            Err(CoreError::InvalidThreadBlock(_))
        ));
    }

    #[test]
    fn test_external_invite_needs_its_key() {
        let alice = Identity::generate();
        let snap = snapshot(&alice, ThreadType::Open, Sharing::Shared);
        let envelope = invite(&alice, snap, BodyCipher::Plain);
        let (ciphertext, key) = seal_external(&envelope).unwrap();

        let (opened, body) = open_external_invite(&ciphertext, &key).unwrap();
        let reader = Identity::generate().user_id();
        verify(&opened, body, &reader).unwrap();

        let wrong = generate_symmetric_key();
        assert!(matches!(
            open_external_invite(&ciphertext, &wrong),
            Err(CoreError::InvalidThreadBlock(_))
        ));
    }

    #[test]
    fn test_fresher_contact_wins() {
        let alice = Identity::generate();
        let now = Utc::now();
        let mut stored = contact(&alice, now + Duration::seconds(5));
        stored.name = "renamed".into();
        let carried = contact(&alice, now);

        assert_eq!(fresher(Some(stored.clone()), carried.clone()).name, "renamed");
        stored.updated = now - Duration::seconds(5);
        assert_eq!(fresher(Some(stored), carried.clone()).name, "inviter");
        assert_eq!(fresher(None, carried).name, "inviter");
    }
}
