//! Thread block wire format.
//!
//! A [`BlockEnvelope`] carries routing metadata in the clear (thread, type,
//! parents, author, date) and an opaque body. The body is a bincode-encoded
//! [`BlockBody`] encrypted with the thread content key, or sealed to a single
//! recipient for invites. The block id is the BLAKE3 hash of the encoded
//! envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{FLAG_TARGET_PREFIX, IGNORE_TARGET_PREFIX, MAX_BLOCK_SIZE};
use crate::crypto::{self, SymmetricKey};
use crate::error::{CodecError, SkeinError};
use crate::identity::{verify_signature, Identity};
use crate::invite::InviteBody;
use crate::types::{BlockId, ThreadId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Invite,
    Join,
    Leave,
    Announce,
    Message,
    Files,
    Comment,
    Like,
    Flag,
    Ignore,
    Merge,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invite => "invite",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Announce => "announce",
            Self::Message => "message",
            Self::Files => "files",
            Self::Comment => "comment",
            Self::Like => "like",
            Self::Flag => "flag",
            Self::Ignore => "ignore",
            Self::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "invite" => Self::Invite,
            "join" => Self::Join,
            "leave" => Self::Leave,
            "announce" => Self::Announce,
            "message" => Self::Message,
            "files" => Self::Files,
            "comment" => Self::Comment,
            "like" => Self::Like,
            "flag" => Self::Flag,
            "ignore" => Self::Ignore,
            "merge" => Self::Merge,
            _ => return None,
        })
    }

    /// Flags and ignores point at another block and may not be pointed at.
    pub fn is_moderation(&self) -> bool {
        matches!(self, Self::Flag | Self::Ignore)
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public profile of a peer, carried in joins, announces and invites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinBody {
    pub contact: Contact,
    /// The peer whose invite was accepted, if any.
    pub inviter: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceBody {
    pub contact: Contact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesBody {
    /// Content address of the file set.
    pub target: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentBody {
    pub target: BlockId,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetBody {
    pub target: BlockId,
}

/// Decrypted, type-specific block payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockBody {
    Invite(InviteBody),
    Join(JoinBody),
    Leave,
    Announce(AnnounceBody),
    Message(MessageBody),
    Files(FilesBody),
    Comment(CommentBody),
    Like(TargetBody),
    Flag(TargetBody),
    Ignore(TargetBody),
}

impl BlockBody {
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Invite(_) => BlockType::Invite,
            Self::Join(_) => BlockType::Join,
            Self::Leave => BlockType::Leave,
            Self::Announce(_) => BlockType::Announce,
            Self::Message(_) => BlockType::Message,
            Self::Files(_) => BlockType::Files,
            Self::Comment(_) => BlockType::Comment,
            Self::Like(_) => BlockType::Like,
            Self::Flag(_) => BlockType::Flag,
            Self::Ignore(_) => BlockType::Ignore,
        }
    }

    /// The stored target string of the block, if it points somewhere.
    pub fn target(&self) -> Option<String> {
        match self {
            Self::Files(f) => Some(f.target.clone()),
            Self::Comment(c) => Some(c.target.to_hex()),
            Self::Like(t) => Some(t.target.to_hex()),
            Self::Flag(t) => Some(flag_target(&t.target)),
            Self::Ignore(t) => Some(ignore_target(&t.target)),
            _ => None,
        }
    }

    /// The stored text of the block, if any.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Message(m) => Some(m.body.clone()),
            Self::Files(f) => Some(f.caption.clone()),
            Self::Comment(c) => Some(c.body.clone()),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(data)?)
    }
}

pub fn flag_target(id: &BlockId) -> String {
    format!("{FLAG_TARGET_PREFIX}{id}")
}

pub fn ignore_target(id: &BlockId) -> String {
    format!("{IGNORE_TARGET_PREFIX}{id}")
}

/// How a body is protected inside the envelope.
pub enum BodyCipher<'a> {
    /// Thread content key.
    Thread(&'a SymmetricKey),
    /// Sealed to one recipient address (targeted invites).
    Recipient(&'a UserId),
    /// Left in the clear; only for envelopes that are themselves encrypted
    /// as a whole (external invites).
    Plain,
}

/// The signed portion of an envelope.
#[derive(Serialize)]
struct SignedHeader<'a> {
    thread_id: &'a ThreadId,
    block_type: BlockType,
    parents: &'a [BlockId],
    author: &'a Option<UserId>,
    date: &'a DateTime<Utc>,
    body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEnvelope {
    pub thread_id: ThreadId,
    pub block_type: BlockType,
    pub parents: Vec<BlockId>,
    /// Absent only on merge blocks.
    pub author: Option<UserId>,
    pub date: DateTime<Utc>,
    pub body: Vec<u8>,
    pub signature: Vec<u8>,
}

impl BlockEnvelope {
    /// Build, encrypt and sign a new authored block.
    pub fn create(
        author: &Identity,
        thread_id: ThreadId,
        parents: Vec<BlockId>,
        body: &BlockBody,
        cipher: BodyCipher<'_>,
    ) -> Result<Self, SkeinError> {
        let plaintext = body.to_bytes()?;
        let body_bytes = match cipher {
            BodyCipher::Thread(key) => crypto::encrypt(key, &plaintext)?,
            BodyCipher::Recipient(recipient) => crypto::seal(recipient, &plaintext)?,
            BodyCipher::Plain => plaintext,
        };

        let mut envelope = Self {
            thread_id,
            block_type: body.block_type(),
            parents,
            author: Some(author.user_id()),
            date: Utc::now(),
            body: body_bytes,
            signature: Vec::new(),
        };
        let signature = author.sign(&envelope.signing_bytes()?);
        envelope.signature = signature.to_bytes().to_vec();
        Ok(envelope)
    }

    /// Build the synthetic merge block over `parents`.
    ///
    /// Merges carry no author, body or signature, and their parents are
    /// sorted, so every peer merging the same heads at the same date derives
    /// the same id.
    pub fn merge(thread_id: ThreadId, mut parents: Vec<BlockId>, date: DateTime<Utc>) -> Self {
        parents.sort();
        parents.dedup();
        Self {
            thread_id,
            block_type: BlockType::Merge,
            parents,
            author: None,
            date,
            body: Vec::new(),
            signature: Vec::new(),
        }
    }

    fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let header = SignedHeader {
            thread_id: &self.thread_id,
            block_type: self.block_type,
            parents: &self.parents,
            author: &self.author,
            date: &self.date,
            body: &self.body,
        };
        Ok(bincode::serialize(&header)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > MAX_BLOCK_SIZE {
            return Err(CodecError::TooLarge {
                size: bytes.len(),
                max: MAX_BLOCK_SIZE,
            });
        }
        Ok(bytes)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(CodecError::TooLarge {
                size: data.len(),
                max: MAX_BLOCK_SIZE,
            });
        }
        Ok(bincode::deserialize(data)?)
    }

    /// Content address of the encoded envelope.
    pub fn id(&self) -> Result<BlockId, CodecError> {
        Ok(BlockId::of(&self.encode()?))
    }

    /// Check structural validity and the author's signature.
    pub fn verify(&self) -> Result<(), SkeinError> {
        if self.block_type == BlockType::Merge {
            let sorted = self.parents.windows(2).all(|w| w[0] < w[1]);
            if self.parents.len() < 2 || !sorted {
                return Err(CodecError::Malformed("merge needs two or more sorted parents".into()).into());
            }
            if self.author.is_some() || !self.body.is_empty() || !self.signature.is_empty() {
                return Err(CodecError::Malformed("merge must be anonymous and empty".into()).into());
            }
            return Ok(());
        }

        let author = self
            .author
            .ok_or_else(|| CodecError::Malformed(format!("{} block without author", self.block_type)))?;
        verify_signature(&author.0, &self.signing_bytes()?, &self.signature)?;
        Ok(())
    }

    /// Decrypt and decode a body protected with the thread key.
    pub fn open_body(&self, key: &SymmetricKey) -> Result<BlockBody, SkeinError> {
        let plaintext = crypto::decrypt(key, &self.body)?;
        self.decode_body(&plaintext)
    }

    /// Decrypt and decode a body sealed to `identity`.
    pub fn open_sealed_body(&self, identity: &Identity) -> Result<BlockBody, SkeinError> {
        let plaintext = crypto::open(identity, &self.body)?;
        self.decode_body(&plaintext)
    }

    /// Decode a body that travels in the clear.
    pub fn plain_body(&self) -> Result<BlockBody, SkeinError> {
        self.decode_body(&self.body)
    }

    fn decode_body(&self, plaintext: &[u8]) -> Result<BlockBody, SkeinError> {
        let body = BlockBody::from_bytes(plaintext)?;
        if body.block_type() != self.block_type {
            return Err(CodecError::Malformed(format!(
                "envelope says {}, body is {}",
                self.block_type,
                body.block_type()
            ))
            .into());
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_symmetric_key;

    fn message(text: &str) -> BlockBody {
        BlockBody::Message(MessageBody { body: text.into() })
    }

    #[test]
    fn test_create_verify_open() {
        let author = Identity::generate();
        let key = generate_symmetric_key();
        let thread = Identity::generate().thread_id();

        let envelope =
            BlockEnvelope::create(&author, thread, vec![], &message("hello"), BodyCipher::Thread(&key))
                .unwrap();

        envelope.verify().unwrap();
        assert_eq!(envelope.author, Some(author.user_id()));
        assert_eq!(envelope.open_body(&key).unwrap(), message("hello"));
    }

    #[test]
    fn test_every_body_type_survives_encryption() {
        let author = Identity::generate();
        let key = generate_symmetric_key();
        let thread = Identity::generate().thread_id();
        let target = BlockId([9u8; 32]);
        let contact = Contact {
            id: author.user_id(),
            name: "ada".into(),
            avatar: None,
            updated: Utc::now(),
        };

        let bodies = vec![
            BlockBody::Join(JoinBody { contact: contact.clone(), inviter: None }),
            BlockBody::Leave,
            BlockBody::Announce(AnnounceBody { contact }),
            message("hi"),
            BlockBody::Files(FilesBody { target: "abc".into(), caption: "pics".into() }),
            BlockBody::Comment(CommentBody { target, body: "nice".into() }),
            BlockBody::Like(TargetBody { target }),
            BlockBody::Flag(TargetBody { target }),
            BlockBody::Ignore(TargetBody { target }),
        ];

        for body in bodies {
            let envelope =
                BlockEnvelope::create(&author, thread, vec![], &body, BodyCipher::Thread(&key)).unwrap();
            let decoded = BlockEnvelope::decode(&envelope.encode().unwrap()).unwrap();
            assert_eq!(decoded.open_body(&key).unwrap(), body);
        }
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let author = Identity::generate();
        let thread = Identity::generate().thread_id();
        let envelope = BlockEnvelope::create(
            &author,
            thread,
            vec![],
            &message("secret"),
            BodyCipher::Thread(&generate_symmetric_key()),
        )
        .unwrap();

        assert!(envelope.open_body(&generate_symmetric_key()).is_err());
    }

    #[test]
    fn test_tampered_header_fails_verification() {
        let author = Identity::generate();
        let key = generate_symmetric_key();
        let thread = Identity::generate().thread_id();
        let mut envelope =
            BlockEnvelope::create(&author, thread, vec![], &message("x"), BodyCipher::Thread(&key)).unwrap();

        envelope.parents.push(BlockId([1u8; 32]));
        assert!(envelope.verify().is_err());
    }

    #[test]
    fn test_type_tag_mismatch_rejected() {
        let author = Identity::generate();
        let key = generate_symmetric_key();
        let thread = Identity::generate().thread_id();
        let mut envelope =
            BlockEnvelope::create(&author, thread, vec![], &message("x"), BodyCipher::Thread(&key)).unwrap();

        envelope.block_type = BlockType::Comment;
        assert!(envelope.open_body(&key).is_err());
    }

    #[test]
    fn test_merge_id_is_deterministic() {
        let thread = Identity::generate().thread_id();
        let a = BlockId([1u8; 32]);
        let b = BlockId([2u8; 32]);
        let date = Utc::now();

        let m1 = BlockEnvelope::merge(thread, vec![a, b], date);
        let m2 = BlockEnvelope::merge(thread, vec![b, a], date);

        assert_eq!(m1.id().unwrap(), m2.id().unwrap());
        m1.verify().unwrap();
    }

    #[test]
    fn test_merge_with_one_parent_rejected() {
        let thread = Identity::generate().thread_id();
        let merge = BlockEnvelope::merge(thread, vec![BlockId([1u8; 32])], Utc::now());
        assert!(merge.verify().is_err());
    }

    #[test]
    fn test_targets_are_prefixed() {
        let id = BlockId([5u8; 32]);
        let flag = BlockBody::Flag(TargetBody { target: id });
        assert_eq!(flag.target().unwrap(), format!("flag-{}", id.to_hex()));
        assert!(BlockType::Ignore.is_moderation());
        assert!(!BlockType::Comment.is_moderation());
    }
}
