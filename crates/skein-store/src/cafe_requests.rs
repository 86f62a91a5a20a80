//! Persistent queue behind the outbox.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::{bad_column, enum_column, time_column, CafeRequest, CafeRequestKind};

impl Database {
    /// Queue `target` for replication. Returns `false` when an identical
    /// request is already pending.
    pub fn enqueue_cafe_request(&self, target: &str, kind: CafeRequestKind) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO cafe_requests (id, target, kind, date, attempts)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                Uuid::new_v4().to_string(),
                target,
                kind.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Oldest first.
    pub fn list_cafe_requests(&self, limit: u32) -> Result<Vec<CafeRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, target, kind, date, attempts FROM cafe_requests
             ORDER BY date ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    pub fn count_cafe_requests(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM cafe_requests", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn delete_cafe_request(&self, id: &Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM cafe_requests WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn bump_cafe_request_attempts(&self, id: &Uuid) -> Result<()> {
        self.conn().execute(
            "UPDATE cafe_requests SET attempts = attempts + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<CafeRequest> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| bad_column(0, e))?;

    Ok(CafeRequest {
        id,
        target: row.get(1)?,
        kind: enum_column(row, 2, CafeRequestKind::parse)?,
        date: time_column(row, 3)?,
        attempts: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_deduplicates_by_target_and_kind() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.enqueue_cafe_request("abc", CafeRequestKind::Store).unwrap());
        assert!(!db.enqueue_cafe_request("abc", CafeRequestKind::Store).unwrap());
        assert!(db.enqueue_cafe_request("abc", CafeRequestKind::Unstore).unwrap());
        assert_eq!(db.count_cafe_requests().unwrap(), 2);
    }

    #[test]
    fn attempts_and_delete() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue_cafe_request("abc", CafeRequestKind::Store).unwrap();

        let req = db.list_cafe_requests(10).unwrap().remove(0);
        db.bump_cafe_request_attempts(&req.id).unwrap();
        assert_eq!(db.list_cafe_requests(10).unwrap()[0].attempts, 1);

        assert!(db.delete_cafe_request(&req.id).unwrap());
        assert_eq!(db.count_cafe_requests().unwrap(), 0);
    }
}
