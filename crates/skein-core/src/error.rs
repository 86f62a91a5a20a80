use thiserror::Error;

use skein_net::NetError;
use skein_shared::{BlockType, CodecError, SkeinError};
use skein_store::StoreError;

/// Coarse classification of a [`CoreError`], used to decide whether a caller
/// should retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The sharing policy forbids the operation. Never retried.
    PolicyDenied,
    /// A thread, invite or block is absent.
    NotFound,
    /// Bad payload, failed decryption or an unexpected type tag.
    Malformed,
    /// Network or datastore trouble that may clear up.
    Transient,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Thread not found")]
    ThreadNotFound,

    #[error("Thread invite not found")]
    ThreadInviteNotFound,

    #[error("Block not found")]
    BlockNotFound,

    #[error("Invalid thread block: {0}")]
    InvalidThreadBlock(String),

    #[error("Wrong block type: expected {expected}, got {actual}")]
    BlockWrongType { expected: BlockType, actual: BlockType },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Thread is not shareable")]
    NotShareable,

    #[error("Thread is not readable")]
    NotReadable,

    #[error("Thread is not writable")]
    NotWritable,

    #[error("Thread is not annotatable")]
    NotAnnotatable,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] SkeinError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Background worker has stopped")]
    ChannelClosed,
}

impl From<CodecError> for CoreError {
    fn from(e: CodecError) -> Self {
        CoreError::Protocol(SkeinError::Codec(e))
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotShareable | Self::NotReadable | Self::NotWritable | Self::NotAnnotatable => {
                ErrorKind::PolicyDenied
            }
            Self::ThreadNotFound | Self::ThreadInviteNotFound | Self::BlockNotFound => {
                ErrorKind::NotFound
            }
            Self::Store(StoreError::NotFound) => ErrorKind::NotFound,
            Self::Network(NetError::NotFound(_)) => ErrorKind::NotFound,
            Self::InvalidThreadBlock(_)
            | Self::BlockWrongType { .. }
            | Self::InvalidTarget(_)
            | Self::InvalidArgument(_)
            | Self::Protocol(_) => ErrorKind::Malformed,
            Self::Store(_) | Self::Network(_) | Self::ChannelClosed => ErrorKind::Transient,
        }
    }

    /// Whether the same operation may succeed later. A block the network
    /// could not find yet counts, since a peer may still publish it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            other => other.kind() == ErrorKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn policy_errors_are_final() {
        for e in [CoreError::NotShareable, CoreError::NotReadable, CoreError::NotWritable] {
            assert_eq!(e.kind(), ErrorKind::PolicyDenied);
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn network_not_found_is_retryable() {
        let e = CoreError::Network(NetError::NotFound("abc".into()));
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(e.is_retryable());

        let e = CoreError::Network(NetError::Timeout(Duration::from_secs(1)));
        assert_eq!(e.kind(), ErrorKind::Transient);
        assert!(e.is_retryable());
    }

    #[test]
    fn decode_failures_are_malformed() {
        let e: CoreError = CodecError::Malformed("x".into()).into();
        assert_eq!(e.kind(), ErrorKind::Malformed);
        assert!(!CoreError::BlockNotFound.is_retryable());
    }
}
