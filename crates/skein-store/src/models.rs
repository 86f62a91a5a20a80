//! Domain model structs persisted in the local database.
//!
//! Ids, keys and addresses are stored as hex text; lists of ids as JSON
//! arrays of hex strings; dates as RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skein_shared::error::CodecError;
use skein_shared::{BlockId, BlockType, Sharing, SharingPolicy, ThreadId, ThreadType, UserId};

pub use skein_shared::block::Contact;

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    Loading,
    Loaded,
    Leaving,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Leaving => "leaving",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "loading" => Some(Self::Loading),
            "loaded" => Some(Self::Loaded),
            "leaving" => Some(Self::Leaving),
            _ => None,
        }
    }
}

/// A thread the local account belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    /// Public key of the thread's signing identity.
    pub id: ThreadId,
    /// Unique local key handle.
    pub key: String,
    /// Secret of the thread's signing identity.
    pub sk: [u8; 32],
    /// Symmetric content key for block bodies.
    pub content_key: [u8; 32],
    pub name: String,
    /// Content address of the schema, if any.
    pub schema: Option<String>,
    pub initiator: UserId,
    pub thread_type: ThreadType,
    pub sharing: Sharing,
    /// Allow-list; empty admits anyone.
    pub members: Vec<UserId>,
    pub state: ThreadState,
    /// Current heads. Exactly one after reconciliation.
    pub heads: Vec<BlockId>,
}

impl ThreadRecord {
    pub fn policy(&self) -> SharingPolicy {
        SharingPolicy {
            initiator: self.initiator,
            thread_type: self.thread_type,
            sharing: self.sharing,
            members: self.members.clone(),
        }
    }
}

impl std::fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("name", &self.name)
            .field("thread_type", &self.thread_type)
            .field("sharing", &self.sharing)
            .field("state", &self.state)
            .field("heads", &self.heads)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// An applied block with its decrypted, indexable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: BlockId,
    pub thread_id: ThreadId,
    /// `None` only for merges.
    pub author: Option<UserId>,
    pub block_type: BlockType,
    pub date: DateTime<Utc>,
    pub parents: Vec<BlockId>,
    /// Target string (`flag-<id>`, `ignore-<id>`, a block id or a content
    /// address), depending on the type.
    pub target: Option<String>,
    /// Text body or caption.
    pub body: Option<String>,
}

// ---------------------------------------------------------------------------
// Thread peer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Invited,
    Welcomed,
    Left,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Welcomed => "welcomed",
            Self::Left => "left",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invited" => Some(Self::Invited),
            "welcomed" => Some(Self::Welcomed),
            "left" => Some(Self::Left),
            _ => None,
        }
    }
}

/// Membership record of a remote peer in one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadPeer {
    pub id: UserId,
    pub thread_id: ThreadId,
    pub state: PeerState,
    /// Last block seen from this peer.
    pub last_head: Option<BlockId>,
}

// ---------------------------------------------------------------------------
// Thread invite
// ---------------------------------------------------------------------------

/// A received targeted invite waiting for the user to accept or ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInvite {
    /// Id of the invite block.
    pub id: BlockId,
    /// The encoded envelope, body still sealed to us.
    pub block: Vec<u8>,
    pub name: String,
    pub inviter: Contact,
    pub date: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    InviteReceived,
    PeerJoined,
    PeerLeft,
    MessageAdded,
    FilesAdded,
    CommentAdded,
    LikeAdded,
    FlagAdded,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InviteReceived => "invite_received",
            Self::PeerJoined => "peer_joined",
            Self::PeerLeft => "peer_left",
            Self::MessageAdded => "message_added",
            Self::FilesAdded => "files_added",
            Self::CommentAdded => "comment_added",
            Self::LikeAdded => "like_added",
            Self::FlagAdded => "flag_added",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "invite_received" => Self::InviteReceived,
            "peer_joined" => Self::PeerJoined,
            "peer_left" => Self::PeerLeft,
            "message_added" => Self::MessageAdded,
            "files_added" => Self::FilesAdded,
            "comment_added" => Self::CommentAdded,
            "like_added" => Self::LikeAdded,
            "flag_added" => Self::FlagAdded,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    /// Who caused it.
    pub actor: UserId,
    /// Thread name at the time.
    pub subject: String,
    pub subject_id: ThreadId,
    pub block_id: Option<BlockId>,
    pub target: Option<String>,
    pub kind: NotificationType,
    pub body: String,
    pub read: bool,
}

// ---------------------------------------------------------------------------
// Cafe request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CafeRequestKind {
    Store,
    Unstore,
}

impl CafeRequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Unstore => "unstore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "store" => Some(Self::Store),
            "unstore" => Some(Self::Unstore),
            _ => None,
        }
    }
}

/// A pending replication request for the outbox worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CafeRequest {
    pub id: Uuid,
    /// Content address to replicate.
    pub target: String,
    pub kind: CafeRequestKind,
    pub date: DateTime<Utc>,
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

pub(crate) fn bad_column<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

pub(crate) fn time_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| bad_column(idx, e))
}

pub(crate) fn id_column<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> std::result::Result<T, CodecError>,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).map_err(|e| bad_column(idx, e))
}

pub(crate) fn opt_id_column<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> std::result::Result<T, CodecError>,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse(&s).map_err(|e| bad_column(idx, e))).transpose()
}

pub(crate) fn enum_column<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| bad_column(idx, format!("unknown value {s:?}")))
}

pub(crate) fn key_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<[u8; 32]> {
    let s: String = row.get(idx)?;
    let bytes = hex::decode(&s).map_err(|e| bad_column(idx, e))?;
    bytes
        .try_into()
        .map_err(|_| bad_column(idx, "expected 32 bytes"))
}

/// Encode a list of ids as a JSON array of hex strings.
pub(crate) fn ids_to_json<T: std::fmt::Display>(ids: &[T]) -> String {
    let hexes: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    serde_json::to_string(&hexes).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn ids_column<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> std::result::Result<T, CodecError>,
) -> rusqlite::Result<Vec<T>> {
    let s: String = row.get(idx)?;
    let hexes: Vec<String> = serde_json::from_str(&s).map_err(|e| bad_column(idx, e))?;
    hexes
        .iter()
        .map(|h| parse(h).map_err(|e| bad_column(idx, e)))
        .collect()
}
