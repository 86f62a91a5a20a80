use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum NetError {
    #[error("Content not found: {0}")]
    NotFound(String),

    #[error("Network request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Swarm command channel closed")]
    ChannelClosed,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Replication failed: {0}")]
    Replication(String),
}

impl NetError {
    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NetError::Publish(_))
    }
}
