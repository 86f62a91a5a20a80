//! Local notifications.

use rusqlite::params;
use uuid::Uuid;

use skein_shared::{BlockId, ThreadId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{bad_column, enum_column, id_column, opt_id_column, time_column, Notification, NotificationType};

impl Database {
    pub fn insert_notification(&self, n: &Notification) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notifications (id, date, actor, subject, subject_id, block_id, target, type, body, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                n.id.to_string(),
                n.date.to_rfc3339(),
                n.actor.to_hex(),
                n.subject,
                n.subject_id.to_hex(),
                n.block_id.map(|b| b.to_hex()),
                n.target,
                n.kind.as_str(),
                n.body,
                n.read,
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn list_notifications(&self, limit: u32) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, date, actor, subject, subject_id, block_id, target, type, body, read
             FROM notifications ORDER BY date DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    pub fn count_unread_notifications(&self) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE read = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn read_notification(&self, id: &Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn read_all_notifications(&self) -> Result<u64> {
        let affected = self
            .conn()
            .execute("UPDATE notifications SET read = 1 WHERE read = 0", [])?;
        Ok(affected as u64)
    }

    /// Drop every notification about `block`, e.g. a consumed invite.
    pub fn delete_notifications_for_block(&self, block: &BlockId) -> Result<u64> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE block_id = ?1",
            params![block.to_hex()],
        )?;
        Ok(affected as u64)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| bad_column(0, e))?;

    Ok(Notification {
        id,
        date: time_column(row, 1)?,
        actor: id_column(row, 2, UserId::from_hex)?,
        subject: row.get(3)?,
        subject_id: id_column(row, 4, ThreadId::from_hex)?,
        block_id: opt_id_column(row, 5, BlockId::from_hex)?,
        target: row.get(6)?,
        kind: enum_column(row, 7, NotificationType::parse)?,
        body: row.get(8)?,
        read: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn notification(block: BlockId) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            date: Utc::now(),
            actor: UserId([1u8; 32]),
            subject: "Holiday".into(),
            subject_id: ThreadId([2u8; 32]),
            block_id: Some(block),
            target: None,
            kind: NotificationType::InviteReceived,
            body: "invited you to join".into(),
            read: false,
        }
    }

    #[test]
    fn insert_read_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let block = BlockId([3u8; 32]);
        let n = notification(block);
        db.insert_notification(&n).unwrap();
        db.insert_notification(&notification(BlockId([4u8; 32]))).unwrap();

        assert_eq!(db.count_unread_notifications().unwrap(), 2);
        assert!(db.read_notification(&n.id).unwrap());
        assert_eq!(db.count_unread_notifications().unwrap(), 1);

        assert_eq!(db.delete_notifications_for_block(&block).unwrap(), 1);
        let remaining = db.list_notifications(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].block_id, Some(BlockId([4u8; 32])));
    }
}
