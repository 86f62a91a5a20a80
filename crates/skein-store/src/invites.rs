//! Pending targeted invites.

use rusqlite::params;

use skein_shared::BlockId;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{bad_column, id_column, time_column, Contact, ThreadInvite};

impl Database {
    pub fn insert_thread_invite(&self, invite: &ThreadInvite) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO thread_invites (id, block, name, inviter, date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                invite.id.to_hex(),
                invite.block,
                invite.name,
                serde_json::to_string(&invite.inviter)?,
                invite.date.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_thread_invite(&self, id: &BlockId) -> Result<ThreadInvite> {
        self.conn()
            .query_row(
                "SELECT id, block, name, inviter, date FROM thread_invites WHERE id = ?1",
                params![id.to_hex()],
                row_to_invite,
            )
            .map_err(not_found)
    }

    /// Pending invites, newest first.
    pub fn list_thread_invites(&self) -> Result<Vec<ThreadInvite>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, block, name, inviter, date FROM thread_invites ORDER BY date DESC",
        )?;
        let rows = stmt.query_map([], row_to_invite)?;

        let mut invites = Vec::new();
        for row in rows {
            invites.push(row?);
        }
        Ok(invites)
    }

    pub fn delete_thread_invite(&self, id: &BlockId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM thread_invites WHERE id = ?1",
            params![id.to_hex()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadInvite> {
    let inviter_json: String = row.get(3)?;
    let inviter: Contact = serde_json::from_str(&inviter_json).map_err(|e| bad_column(3, e))?;

    Ok(ThreadInvite {
        id: id_column(row, 0, BlockId::from_hex)?,
        block: row.get(1)?,
        name: row.get(2)?,
        inviter,
        date: time_column(row, 4)?,
    })
}
