//! v001 -- Initial schema creation.
//!
//! Creates the thread tables: `threads`, `blocks`, `thread_peers`,
//! `thread_invites` and `contacts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Threads
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS threads (
    id          TEXT PRIMARY KEY NOT NULL,   -- hex ed25519 pubkey of the thread identity
    key         TEXT NOT NULL UNIQUE,        -- local key handle
    sk          TEXT NOT NULL,               -- hex thread signing secret
    content_key TEXT NOT NULL,               -- hex symmetric key
    name        TEXT NOT NULL,
    schema      TEXT,                        -- content address
    initiator   TEXT NOT NULL,               -- hex address
    type        TEXT NOT NULL,
    sharing     TEXT NOT NULL,
    members     TEXT NOT NULL,               -- JSON array of hex addresses
    state       TEXT NOT NULL,
    heads       TEXT NOT NULL                -- JSON array of hex block ids
);

-- ----------------------------------------------------------------
-- Blocks
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blocks (
    id        TEXT PRIMARY KEY NOT NULL,     -- hex BLAKE3 of the encoded envelope
    thread_id TEXT NOT NULL,
    author    TEXT,                          -- NULL for merges
    type      TEXT NOT NULL,
    date      TEXT NOT NULL,                 -- RFC-3339
    parents   TEXT NOT NULL,                 -- JSON array of hex block ids
    target    TEXT,
    body      TEXT,

    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_blocks_thread_date ON blocks(thread_id, date DESC);
CREATE INDEX IF NOT EXISTS idx_blocks_target ON blocks(target);

-- ----------------------------------------------------------------
-- Thread peers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS thread_peers (
    id        TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    state     TEXT NOT NULL,
    last_head TEXT,

    PRIMARY KEY (id, thread_id),
    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Pending thread invites
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS thread_invites (
    id      TEXT PRIMARY KEY NOT NULL,       -- invite block id
    block   BLOB NOT NULL,                   -- encoded envelope
    name    TEXT NOT NULL,
    inviter TEXT NOT NULL,                   -- JSON contact
    date    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id      TEXT PRIMARY KEY NOT NULL,       -- hex address
    name    TEXT NOT NULL,
    avatar  TEXT,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);
"#;

/// Apply the migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
