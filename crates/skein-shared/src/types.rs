use serde::{Deserialize, Serialize};

use crate::error::CodecError;

fn decode_32(s: &str) -> Result<[u8; 32], CodecError> {
    let bytes = hex::decode(s.trim()).map_err(|e| CodecError::InvalidId(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| CodecError::InvalidId(format!("expected 32 bytes, got {}", b.len())))
}

// User identity = Ed25519 public key (32 bytes). Doubles as the account address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub [u8; 32]);

impl UserId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        decode_32(s).map(Self)
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    /// Gossip topic carrying invites addressed to this user.
    pub fn to_inbox_topic(&self) -> String {
        format!("skein:inbox:{}", self.to_hex())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Thread id = Ed25519 public key of the thread's own signing identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub [u8; 32]);

impl ThreadId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        decode_32(s).map(Self)
    }

    pub fn to_topic(&self) -> String {
        format!("skein:thread:{}", self.to_hex())
    }

    /// Inverse of [`ThreadId::to_topic`].
    pub fn from_topic(topic: &str) -> Option<Self> {
        topic
            .strip_prefix("skein:thread:")
            .and_then(|hex| Self::from_hex(hex).ok())
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Content address of an encoded block envelope (BLAKE3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    /// Hash arbitrary bytes into a content address.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        decode_32(s).map(Self)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Content address string for any blob handed to the network.
pub fn content_address(data: &[u8]) -> String {
    BlockId::of(data).to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_hex_roundtrip() {
        let id = UserId([7u8; 32]);
        assert_eq!(UserId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(UserId::from_hex("abcd").is_err());
        assert!(BlockId::from_hex("zz").is_err());
    }

    #[test]
    fn test_thread_topic_roundtrip() {
        let id = ThreadId([3u8; 32]);
        assert_eq!(ThreadId::from_topic(&id.to_topic()), Some(id));
        assert_eq!(ThreadId::from_topic("skein:inbox:00"), None);
    }

    #[test]
    fn test_content_address_matches_block_id() {
        let data = b"some block";
        assert_eq!(content_address(data), BlockId::of(data).to_hex());
    }
}
