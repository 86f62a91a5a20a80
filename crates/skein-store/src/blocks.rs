//! CRUD operations for applied [`BlockRecord`] rows.

use rusqlite::{params, params_from_iter, types::Value};

use skein_shared::{BlockId, BlockType, ThreadId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{enum_column, id_column, ids_column, ids_to_json, opt_id_column, time_column, BlockRecord};

const BLOCK_COLUMNS: &str = "id, thread_id, author, type, date, parents, target, body";

/// Filter for ordered block listings. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct BlockQuery {
    pub thread: Option<ThreadId>,
    /// Empty means every type.
    pub types: Vec<BlockType>,
    /// Only blocks strictly older than this one.
    pub before: Option<BlockId>,
    /// Only blocks pointing at this target string.
    pub target: Option<String>,
    pub limit: u32,
}

impl Database {
    pub fn insert_block(&self, block: &BlockRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO blocks (id, thread_id, author, type, date, parents, target, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                block.id.to_hex(),
                block.thread_id.to_hex(),
                block.author.map(|a| a.to_hex()),
                block.block_type.as_str(),
                block.date.to_rfc3339(),
                ids_to_json(&block.parents),
                block.target,
                block.body,
            ],
        )?;
        Ok(())
    }

    pub fn get_block(&self, id: &BlockId) -> Result<BlockRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id = ?1"),
                params![id.to_hex()],
                row_to_block,
            )
            .map_err(not_found)
    }

    pub fn has_block(&self, id: &BlockId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM blocks WHERE id = ?1",
            params![id.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// The first block pointing at `target`, e.g. an `ignore-<id>` string.
    pub fn find_block_by_target(&self, target: &str) -> Result<Option<BlockRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE target = ?1 ORDER BY date ASC LIMIT 1"
        ))?;
        let mut rows = stmt.query_map(params![target], row_to_block)?;
        let first = rows.next().transpose()?;
        Ok(first)
    }

    pub fn list_blocks(&self, query: &BlockQuery) -> Result<Vec<BlockRecord>> {
        let (clause, values) = where_clause(query);
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks {clause} ORDER BY date DESC, id DESC LIMIT {}",
            query.limit
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_block)?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    /// Count blocks matching the thread and type filters of `query`.
    pub fn count_blocks(&self, query: &BlockQuery) -> Result<u64> {
        let (clause, values) = where_clause(query);
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM blocks {clause}"),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Distinct authors who wrote into a thread.
    pub fn list_block_authors(&self, thread: &ThreadId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT author FROM blocks WHERE thread_id = ?1 AND author IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![thread.to_hex()], |row| {
            id_column(row, 0, UserId::from_hex)
        })?;

        let mut authors = Vec::new();
        for row in rows {
            authors.push(row?);
        }
        Ok(authors)
    }
}

fn where_clause(query: &BlockQuery) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(thread) = &query.thread {
        values.push(Value::Text(thread.to_hex()));
        conditions.push(format!("thread_id = ?{}", values.len()));
    }

    if !query.types.is_empty() {
        let mut slots = Vec::new();
        for t in &query.types {
            values.push(Value::Text(t.as_str().to_string()));
            slots.push(format!("?{}", values.len()));
        }
        conditions.push(format!("type IN ({})", slots.join(", ")));
    }

    if let Some(target) = &query.target {
        values.push(Value::Text(target.clone()));
        conditions.push(format!("target = ?{}", values.len()));
    }

    if let Some(before) = &query.before {
        values.push(Value::Text(before.to_hex()));
        conditions.push(format!(
            "date < (SELECT date FROM blocks WHERE id = ?{})",
            values.len()
        ));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), values)
    }
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRecord> {
    Ok(BlockRecord {
        id: id_column(row, 0, BlockId::from_hex)?,
        thread_id: id_column(row, 1, ThreadId::from_hex)?,
        author: opt_id_column(row, 2, UserId::from_hex)?,
        block_type: enum_column(row, 3, BlockType::parse)?,
        date: time_column(row, 4)?,
        parents: ids_column(row, 5, BlockId::from_hex)?,
        target: row.get(6)?,
        body: row.get(7)?,
    })
}
