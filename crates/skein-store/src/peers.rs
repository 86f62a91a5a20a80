//! Thread membership records.

use rusqlite::params;

use skein_shared::{BlockId, ThreadId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{enum_column, id_column, opt_id_column, PeerState, ThreadPeer};

impl Database {
    /// Insert or replace the membership record of `peer.id` in its thread.
    pub fn upsert_thread_peer(&self, peer: &ThreadPeer) -> Result<()> {
        self.conn().execute(
            "INSERT INTO thread_peers (id, thread_id, state, last_head)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id, thread_id) DO UPDATE SET
                 state = excluded.state,
                 last_head = COALESCE(excluded.last_head, thread_peers.last_head)",
            params![
                peer.id.to_hex(),
                peer.thread_id.to_hex(),
                peer.state.as_str(),
                peer.last_head.map(|h| h.to_hex()),
            ],
        )?;
        Ok(())
    }

    pub fn get_thread_peer(&self, thread: &ThreadId, id: &UserId) -> Result<Option<ThreadPeer>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, thread_id, state, last_head FROM thread_peers
             WHERE thread_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query_map(params![thread.to_hex(), id.to_hex()], row_to_peer)?;
        let first = rows.next().transpose()?;
        Ok(first)
    }

    /// Peers of a thread that have not left.
    pub fn list_thread_peers(&self, thread: &ThreadId) -> Result<Vec<ThreadPeer>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, thread_id, state, last_head FROM thread_peers
             WHERE thread_id = ?1 AND state != 'left'
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![thread.to_hex()], row_to_peer)?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }

    pub fn count_thread_peers(&self, thread: &ThreadId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM thread_peers WHERE thread_id = ?1 AND state != 'left'",
            params![thread.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn set_thread_peer_state(&self, thread: &ThreadId, id: &UserId, state: PeerState) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE thread_peers SET state = ?1 WHERE thread_id = ?2 AND id = ?3",
            params![state.as_str(), thread.to_hex(), id.to_hex()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_thread_peer_head(&self, thread: &ThreadId, id: &UserId, head: &BlockId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE thread_peers SET last_head = ?1 WHERE thread_id = ?2 AND id = ?3",
            params![head.to_hex(), thread.to_hex(), id.to_hex()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadPeer> {
    Ok(ThreadPeer {
        id: id_column(row, 0, UserId::from_hex)?,
        thread_id: id_column(row, 1, ThreadId::from_hex)?,
        state: enum_column(row, 2, PeerState::parse)?,
        last_head: opt_id_column(row, 3, BlockId::from_hex)?,
    })
}
