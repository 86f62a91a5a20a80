//! # skein-store
//!
//! Local storage for skein threads, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for threads,
//! blocks, peers, invites, contacts, notifications and queued cafe requests.
//! Thread secrets are stored as written; protecting the file at rest is left
//! to the host.

pub mod backup;
pub mod blocks;
pub mod cafe_requests;
pub mod contacts;
pub mod database;
pub mod invites;
pub mod migrations;
pub mod models;
pub mod notifications;
pub mod peers;
pub mod threads;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use skein_shared::{BlockId, BlockType, Identity, Sharing, ThreadId, ThreadType, UserId};

    use crate::models::{BlockRecord, ThreadRecord, ThreadState};

    pub fn sample_thread(key: &str) -> ThreadRecord {
        let thread = Identity::generate();
        ThreadRecord {
            id: thread.thread_id(),
            key: key.to_string(),
            sk: *thread.secret_bytes(),
            content_key: [7u8; 32],
            name: format!("{key} thread"),
            schema: None,
            initiator: Identity::generate().user_id(),
            thread_type: ThreadType::Open,
            sharing: Sharing::Shared,
            members: vec![],
            state: ThreadState::Loaded,
            heads: vec![],
        }
    }

    pub fn sample_block(
        thread_id: ThreadId,
        seed: u8,
        block_type: BlockType,
        parents: Vec<BlockId>,
    ) -> BlockRecord {
        BlockRecord {
            id: BlockId([seed; 32]),
            thread_id,
            author: Some(UserId([seed; 32])),
            block_type,
            date: Utc.timestamp_opt(1_700_000_000 + seed as i64, 0).unwrap(),
            parents,
            target: None,
            body: Some(format!("body {seed}")),
        }
    }
}
