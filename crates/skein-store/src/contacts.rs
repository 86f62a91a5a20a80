//! Known peer profiles.

use chrono::Utc;
use rusqlite::params;

use skein_shared::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{id_column, time_column, Contact};

impl Database {
    /// Insert a contact, or refresh it when `contact.updated` is newer than
    /// the stored copy. Returns whether anything changed.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT INTO contacts (id, name, avatar, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 avatar = excluded.avatar,
                 updated = excluded.updated
             WHERE excluded.updated > contacts.updated",
            params![
                contact.id.to_hex(),
                contact.name,
                contact.avatar,
                Utc::now().to_rfc3339(),
                contact.updated.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn get_contact(&self, id: &UserId) -> Result<Option<Contact>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, avatar, updated FROM contacts WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id.to_hex()], row_to_contact)?;
        let first = rows.next().transpose()?;
        Ok(first)
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, avatar, updated FROM contacts ORDER BY name ASC")?;
        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    pub fn count_contacts(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn delete_contact(&self, id: &UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM contacts WHERE id = ?1", params![id.to_hex()])?;
        Ok(affected > 0)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: id_column(row, 0, UserId::from_hex)?,
        name: row.get(1)?,
        avatar: row.get(2)?,
        updated: time_column(row, 3)?,
    })
}
