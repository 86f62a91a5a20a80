//! CRUD operations for [`ThreadRecord`] rows.

use rusqlite::params;

use skein_shared::{BlockId, Sharing, ThreadId, ThreadType, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{
    enum_column, id_column, ids_column, ids_to_json, key_column, ThreadRecord, ThreadState,
};

const THREAD_COLUMNS: &str =
    "id, key, sk, content_key, name, schema, initiator, type, sharing, members, state, heads";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_thread(&self, thread: &ThreadRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO threads (id, key, sk, content_key, name, schema, initiator, type, sharing, members, state, heads)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                thread.id.to_hex(),
                thread.key,
                hex::encode(thread.sk),
                hex::encode(thread.content_key),
                thread.name,
                thread.schema,
                thread.initiator.to_hex(),
                thread.thread_type.as_str(),
                thread.sharing.as_str(),
                ids_to_json(&thread.members),
                thread.state.as_str(),
                ids_to_json(&thread.heads),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_thread(&self, id: &ThreadId) -> Result<ThreadRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id.to_hex()],
                row_to_thread,
            )
            .map_err(not_found)
    }

    pub fn get_thread_by_key(&self, key: &str) -> Result<ThreadRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE key = ?1"),
                params![key],
                row_to_thread,
            )
            .map_err(not_found)
    }

    pub fn has_thread(&self, id: &ThreadId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM threads WHERE id = ?1",
            params![id.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All threads, ordered by name.
    pub fn list_threads(&self) -> Result<Vec<ThreadRecord>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {THREAD_COLUMNS} FROM threads ORDER BY name ASC"))?;
        let rows = stmt.query_map([], row_to_thread)?;

        let mut threads = Vec::new();
        for row in rows {
            threads.push(row?);
        }
        Ok(threads)
    }

    pub fn count_threads(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn update_thread_heads(&self, id: &ThreadId, heads: &[BlockId]) -> Result<()> {
        self.conn().execute(
            "UPDATE threads SET heads = ?1 WHERE id = ?2",
            params![ids_to_json(heads), id.to_hex()],
        )?;
        Ok(())
    }

    pub fn update_thread_members(&self, id: &ThreadId, members: &[UserId]) -> Result<()> {
        self.conn().execute(
            "UPDATE threads SET members = ?1 WHERE id = ?2",
            params![ids_to_json(members), id.to_hex()],
        )?;
        Ok(())
    }

    pub fn update_thread_state(&self, id: &ThreadId, state: ThreadState) -> Result<()> {
        self.conn().execute(
            "UPDATE threads SET state = ?1 WHERE id = ?2",
            params![state.as_str(), id.to_hex()],
        )?;
        Ok(())
    }

    pub fn update_thread_name(&self, id: &ThreadId, name: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE threads SET name = ?1 WHERE id = ?2",
            params![name, id.to_hex()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a thread together with its blocks and peers.
    pub fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM threads WHERE id = ?1", params![id.to_hex()])?;
        Ok(affected > 0)
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRecord> {
    Ok(ThreadRecord {
        id: id_column(row, 0, ThreadId::from_hex)?,
        key: row.get(1)?,
        sk: key_column(row, 2)?,
        content_key: key_column(row, 3)?,
        name: row.get(4)?,
        schema: row.get(5)?,
        initiator: id_column(row, 6, UserId::from_hex)?,
        thread_type: enum_column(row, 7, ThreadType::parse)?,
        sharing: enum_column(row, 8, Sharing::parse)?,
        members: ids_column(row, 9, UserId::from_hex)?,
        state: enum_column(row, 10, ThreadState::parse)?,
        heads: ids_column(row, 11, BlockId::from_hex)?,
    })
}
