//! Collaborators shared by the node and every loaded thread.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use skein_net::{ContentNetwork, NetError};
use skein_shared::block::Contact;
use skein_shared::{BlockId, BlockType, Identity, ThreadId, UserId};
use skein_store::Database;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::outbox::Outbox;

/// The datastore handle shared between the engine and the outbox worker.
/// Never hold the guard across an `.await`.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock the datastore. A poisoned lock is recovered: an open transaction is
/// rolled back when its guard unwinds.
pub fn lock_db(db: &SharedDatabase) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UpdateKind {
    ThreadAdded,
    ThreadRemoved,
    BlockAdded { block: BlockId, block_type: BlockType },
}

/// Change notice broadcast to UI listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadUpdate {
    pub id: ThreadId,
    pub key: String,
    pub name: String,
    pub kind: UpdateKind,
}

pub struct Services {
    pub identity: Identity,
    pub network: Arc<dyn ContentNetwork>,
    pub outbox: Arc<dyn Outbox>,
    pub config: CoreConfig,
    db: SharedDatabase,
    profile: Mutex<Contact>,
    updates: broadcast::Sender<ThreadUpdate>,
}

impl Services {
    pub fn new(
        identity: Identity,
        db: SharedDatabase,
        network: Arc<dyn ContentNetwork>,
        outbox: Arc<dyn Outbox>,
        config: CoreConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);
        let profile = Contact {
            id: identity.user_id(),
            name: config.display_name.clone(),
            avatar: None,
            updated: Utc::now(),
        };
        Self {
            identity,
            network,
            outbox,
            config,
            db,
            profile: Mutex::new(profile),
            updates,
        }
    }

    pub fn address(&self) -> UserId {
        self.identity.user_id()
    }

    /// The local account as peers see it.
    pub fn profile(&self) -> Contact {
        self.profile
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_profile(&self, name: &str, avatar: Option<String>) -> Contact {
        let mut profile = self
            .profile
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        profile.name = name.trim().to_string();
        profile.avatar = avatar;
        profile.updated = Utc::now();
        profile.clone()
    }

    pub fn db(&self) -> MutexGuard<'_, Database> {
        lock_db(&self.db)
    }

    /// Run `f` against the datastore in one transaction.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let db = self.db();
        db.atomically(f)
    }

    /// Fetch content by address, bounded by the configured timeout.
    pub async fn fetch(&self, address: &str) -> Result<Vec<u8>, CoreError> {
        let limit = self.config.fetch_timeout;
        match tokio::time::timeout(limit, self.network.fetch(address, limit)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(NetError::Timeout(limit).into()),
        }
    }

    /// Publish, tolerating a network with nobody listening. The content is
    /// already addressable, so peers can still fetch it later.
    pub async fn publish(&self, topic: &str, data: Vec<u8>) {
        if let Err(e) = self.network.publish(topic, data).await {
            warn!(topic = %topic, error = %e, "publish failed");
        }
    }

    pub fn send_update(&self, update: ThreadUpdate) {
        // no subscribers is fine
        if self.updates.send(update).is_err() {
            debug!("no update listeners");
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ThreadUpdate> {
        self.updates.subscribe()
    }
}
