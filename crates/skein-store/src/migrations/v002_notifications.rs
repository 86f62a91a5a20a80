//! v002 -- Notifications and the cafe request queue.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    date       TEXT NOT NULL,
    actor      TEXT NOT NULL,
    subject    TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    block_id   TEXT,
    target     TEXT,
    type       TEXT NOT NULL,
    body       TEXT NOT NULL,
    read       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_notifications_date ON notifications(date DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_block ON notifications(block_id);

CREATE TABLE IF NOT EXISTS cafe_requests (
    id       TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    target   TEXT NOT NULL,
    kind     TEXT NOT NULL,
    date     TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,

    UNIQUE (target, kind)
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
