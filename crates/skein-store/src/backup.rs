use serde::{Deserialize, Serialize};

use skein_shared::{BlockId, BlockType, Sharing, ThreadId, ThreadType, UserId};

use crate::blocks::BlockQuery;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{BlockRecord, Contact, ThreadRecord, ThreadState};

/// Full backup payload, serialized to JSON and encrypted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPayload {
    /// RFC 3339 timestamp of when the backup was created
    pub created_at: String,
    /// App version that produced the backup
    pub version: String,
    pub threads: Vec<BackupThread>,
    pub blocks: Vec<BlockRecord>,
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupThread {
    pub id: String,
    pub key: String,
    pub sk_hex: String,
    pub content_key_hex: String,
    pub name: String,
    pub schema: Option<String>,
    pub initiator: String,
    pub thread_type: ThreadType,
    pub sharing: Sharing,
    pub members: Vec<String>,
    pub heads: Vec<String>,
}

impl From<&ThreadRecord> for BackupThread {
    fn from(t: &ThreadRecord) -> Self {
        Self {
            id: t.id.to_hex(),
            key: t.key.clone(),
            sk_hex: hex::encode(t.sk),
            content_key_hex: hex::encode(t.content_key),
            name: t.name.clone(),
            schema: t.schema.clone(),
            initiator: t.initiator.to_hex(),
            thread_type: t.thread_type,
            sharing: t.sharing,
            members: t.members.iter().map(|m| m.to_hex()).collect(),
            heads: t.heads.iter().map(|h| h.to_hex()).collect(),
        }
    }
}

impl BackupThread {
    pub fn to_record(&self) -> Result<ThreadRecord> {
        let invalid = |e: skein_shared::CodecError| StoreError::InvalidValue(e.to_string());
        Ok(ThreadRecord {
            id: ThreadId::from_hex(&self.id).map_err(invalid)?,
            key: self.key.clone(),
            sk: decode_key(&self.sk_hex)?,
            content_key: decode_key(&self.content_key_hex)?,
            name: self.name.clone(),
            schema: self.schema.clone(),
            initiator: UserId::from_hex(&self.initiator).map_err(invalid)?,
            thread_type: self.thread_type,
            sharing: self.sharing,
            members: self
                .members
                .iter()
                .map(|m| UserId::from_hex(m))
                .collect::<std::result::Result<_, _>>()
                .map_err(invalid)?,
            state: ThreadState::Loaded,
            heads: self
                .heads
                .iter()
                .map(|h| BlockId::from_hex(h))
                .collect::<std::result::Result<_, _>>()
                .map_err(invalid)?,
        })
    }
}

fn decode_key(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s).map_err(|e| StoreError::InvalidValue(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidValue("expected 32-byte key".into()))
}

impl Database {
    /// Export all threads, their blocks and contacts into a serializable struct.
    pub fn export_backup(&self) -> Result<BackupPayload> {
        let threads = self.list_threads()?;

        let mut blocks = Vec::new();
        for thread in &threads {
            let query = BlockQuery {
                thread: Some(thread.id),
                limit: u32::MAX,
                ..Default::default()
            };
            blocks.extend(self.list_blocks(&query)?);
        }

        Ok(BackupPayload {
            created_at: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            threads: threads.iter().map(BackupThread::from).collect(),
            blocks,
            contacts: self.list_contacts()?,
        })
    }

    /// Import a backup payload, merging with existing data (INSERT OR IGNORE).
    pub fn import_backup(&self, payload: &BackupPayload) -> Result<ImportStats> {
        let mut stats = ImportStats::default();

        self.atomically(|db| {
            for t in &payload.threads {
                let record = t.to_record()?;
                if db.has_thread(&record.id)? {
                    continue;
                }
                db.insert_thread(&record)?;
                stats.threads_imported += 1;
            }

            // Oldest first so parents land before children.
            let mut blocks: Vec<&BlockRecord> = payload.blocks.iter().collect();
            blocks.sort_by_key(|b| b.date);
            for block in blocks {
                if block.block_type == BlockType::Invite || db.has_block(&block.id)? {
                    continue;
                }
                if !db.has_thread(&block.thread_id)? {
                    continue;
                }
                db.insert_block(block)?;
                stats.blocks_imported += 1;
            }

            for contact in &payload.contacts {
                if db.upsert_contact(contact)? {
                    stats.contacts_imported += 1;
                }
            }
            Ok::<_, StoreError>(())
        })?;

        Ok(stats)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImportStats {
    pub threads_imported: usize,
    pub blocks_imported: usize,
    pub contacts_imported: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_block, sample_thread};

    #[test]
    fn export_import_roundtrip() {
        let source = Database::open_in_memory().unwrap();
        let thread = sample_thread("t");
        source.insert_thread(&thread).unwrap();
        source
            .insert_block(&sample_block(thread.id, 1, BlockType::Join, vec![]))
            .unwrap();
        source
            .insert_block(&sample_block(thread.id, 2, BlockType::Message, vec![BlockId([1u8; 32])]))
            .unwrap();

        let payload = source.export_backup().unwrap();
        let json = serde_json::to_string(&payload).unwrap();
        let payload: BackupPayload = serde_json::from_str(&json).unwrap();

        let target = Database::open_in_memory().unwrap();
        let stats = target.import_backup(&payload).unwrap();
        assert_eq!(stats.threads_imported, 1);
        assert_eq!(stats.blocks_imported, 2);
        assert_eq!(target.get_thread(&thread.id).unwrap(), thread);

        // second import is a no-op
        let stats = target.import_backup(&payload).unwrap();
        assert_eq!(stats.threads_imported, 0);
        assert_eq!(stats.blocks_imported, 0);
    }
}
