//! The engine entry point: thread lifecycle, invites, inbound routing and
//! read-side queries for one local account.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use skein_net::{ContentNetwork, InboundMessage, TopicKind};
use skein_shared::block::{BlockBody, Contact};
use skein_shared::constants::INTERNAL_THREAD_KEYS;
use skein_shared::crypto::{generate_symmetric_key, SymmetricKey};
use skein_shared::identity::parse_address;
use skein_shared::invite::ThreadSnapshot;
use skein_shared::{
    BlockEnvelope, BlockId, BlockType, Identity, Sharing, ThreadId, ThreadType, UserId,
};
use skein_store::backup::{BackupPayload, ImportStats};
use skein_store::blocks::BlockQuery;
use skein_store::{
    BlockRecord, CafeRequestKind, Notification, NotificationType, StoreError, ThreadInvite,
    ThreadRecord, ThreadState,
};

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::feed::{self, FeedItem, FeedRequest, Projector};
use crate::invites::{self, InviteInfo};
use crate::outbox::Outbox;
use crate::registry::ThreadRegistry;
use crate::services::{Services, SharedDatabase, ThreadUpdate, UpdateKind};
use crate::thread::{fetch_chain, Applied, Thread};

const CAMERA_ROLL_SCHEMA: &str = r#"{"name":"camera_roll","pin":true,"mill":"/blob"}"#;
const MEDIA_SCHEMA: &str = r#"{"name":"media","pin":true,"mill":"/image/resize","opts":{"width":"1600"}}"#;

/// Where the schema of a new thread comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// Already stored at this content address.
    Address(String),
    /// Inline schema document.
    Json(String),
    Preset(SchemaPreset),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaPreset {
    CameraRoll,
    Media,
}

impl SchemaPreset {
    fn json(self) -> &'static str {
        match self {
            Self::CameraRoll => CAMERA_ROLL_SCHEMA,
            Self::Media => MEDIA_SCHEMA,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddThreadConfig {
    /// Local handle. Empty picks a random one.
    pub key: String,
    pub name: String,
    pub schema: Option<SchemaSource>,
    pub thread_type: ThreadType,
    pub sharing: Sharing,
    /// Hex addresses. Empty admits anyone the type and sharing allow.
    pub members: Vec<String>,
}

impl AddThreadConfig {
    pub fn new(name: &str, thread_type: ThreadType, sharing: Sharing) -> Self {
        Self {
            key: String::new(),
            name: name.to_string(),
            schema: None,
            thread_type,
            sharing,
            members: Vec::new(),
        }
    }
}

/// A thread with its head resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub id: ThreadId,
    pub key: String,
    pub name: String,
    pub schema: Option<String>,
    pub initiator: UserId,
    pub thread_type: ThreadType,
    pub sharing: Sharing,
    pub members: Vec<UserId>,
    pub head: Option<BlockId>,
    pub head_block: Option<BlockRecord>,
    pub head_user: Option<Contact>,
    pub block_count: u64,
    /// Remote peers plus ourselves.
    pub peer_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub address: UserId,
    pub thread_count: usize,
    pub block_count: u64,
    pub contact_count: u64,
}

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Block {
        thread: ThreadId,
        id: BlockId,
        applied: Applied,
    },
    /// A targeted invite was stored for the user to accept.
    Invite(BlockId),
    /// Not for us, or for a thread we do not have.
    Ignored,
}

#[derive(Clone)]
pub struct Node {
    services: Arc<Services>,
    registry: Arc<ThreadRegistry>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address().short())
            .field("threads", &self.registry.len())
            .finish()
    }
}

impl Node {
    /// Load every stored thread and subscribe to its topic and to our inbox.
    pub async fn open(
        identity: Identity,
        db: SharedDatabase,
        network: Arc<dyn ContentNetwork>,
        outbox: Arc<dyn Outbox>,
        config: CoreConfig,
    ) -> Result<Self, CoreError> {
        let services = Arc::new(Services::new(identity, db, network, outbox, config));
        let node = Self {
            services,
            registry: Arc::new(ThreadRegistry::new()),
        };

        let records = node.services.db().list_threads()?;
        for record in records {
            let thread = Arc::new(Thread::new(node.services.clone(), record));
            node.services.network.subscribe(&thread.topic()).await?;
            node.registry.add(thread);
        }
        let inbox = node.address().to_inbox_topic();
        node.services.network.subscribe(&inbox).await?;

        // requests left over from the last run
        node.services.outbox.flush();

        info!(
            address = %node.address().short(),
            threads = node.registry.len(),
            "node opened"
        );
        Ok(node)
    }

    pub fn address(&self) -> UserId {
        self.services.address()
    }

    pub fn profile(&self) -> Contact {
        self.services.profile()
    }

    pub(crate) fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Change our name and avatar, and announce it to every thread.
    pub async fn set_profile(&self, name: &str, avatar: Option<String>) -> Result<Contact, CoreError> {
        let profile = self.services.set_profile(name, avatar);
        for thread in self.registry.snapshot() {
            if let Err(e) = thread.add_announce().await {
                warn!(thread = %thread.id(), error = %e, "announce failed");
            }
        }
        Ok(profile)
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ThreadUpdate> {
        self.services.subscribe_updates()
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    /// Create a thread we initiate, and join it.
    pub async fn add_thread(&self, config: AddThreadConfig) -> Result<Arc<Thread>, CoreError> {
        let key = match config.key.trim() {
            "" => Uuid::new_v4().to_string(),
            key => key.to_string(),
        };
        if self.registry.get_by_key(&key).is_some() {
            return Err(CoreError::InvalidArgument(format!("thread key {key:?} is taken")));
        }
        let members = parse_members(&config.members)?;
        let schema = self.resolve_schema(config.schema).await?;

        let sk = Identity::generate();
        let record = ThreadRecord {
            id: sk.thread_id(),
            key,
            sk: *sk.secret_bytes(),
            content_key: generate_symmetric_key(),
            name: config.name.trim().to_string(),
            schema,
            initiator: self.address(),
            thread_type: config.thread_type,
            sharing: config.sharing,
            members,
            state: ThreadState::Loaded,
            heads: Vec::new(),
        };
        let thread = self.install(record).await?;
        thread.join(None).await?;

        info!(thread = %thread.id(), key = %thread.key(), "thread created");
        Ok(thread)
    }

    /// The private thread keyed by our own address. Its keys derive from the
    /// account secret, so it is the same thread on every device.
    pub async fn add_account_thread(&self) -> Result<Arc<Thread>, CoreError> {
        let identity = &self.services.identity;
        if let Some(thread) = self.registry.get(&identity.thread_id()) {
            return Ok(thread);
        }

        let record = ThreadRecord {
            id: identity.thread_id(),
            key: self.address().to_hex(),
            sk: *identity.secret_bytes(),
            content_key: identity.derive_account_thread_key(),
            name: "account".into(),
            schema: None,
            initiator: self.address(),
            thread_type: ThreadType::Private,
            sharing: Sharing::NotShared,
            members: Vec::new(),
            state: ThreadState::Loaded,
            heads: Vec::new(),
        };
        let thread = self.install(record).await?;
        thread.join(None).await?;
        Ok(thread)
    }

    /// Load a thread from a snapshot we hold ourselves, e.g. a backup, and
    /// follow its heads.
    pub async fn add_or_update_thread(&self, snapshot: ThreadSnapshot) -> Result<Arc<Thread>, CoreError> {
        snapshot
            .validate()
            .map_err(|e| CoreError::InvalidThreadBlock(e.to_string()))?;
        let local = self.address();
        if !snapshot.policy().shareable(&local, &local) {
            return Err(CoreError::NotShareable);
        }

        let thread = match self.registry.get(&snapshot.id) {
            Some(thread) => thread,
            None => {
                let record = self.record_from_snapshot(&snapshot, ThreadState::Loaded);
                self.install(record).await?
            }
        };
        thread.follow(&snapshot.heads).await?;
        Ok(thread)
    }

    /// Leave and forget a thread. Returns the id of the LEAVE block.
    pub async fn remove_thread(&self, id: &ThreadId) -> Result<BlockId, CoreError> {
        let thread = self.thread(id)?;
        self.services.db().update_thread_state(id, ThreadState::Leaving)?;
        let leave = thread.leave().await?;

        if let Err(e) = self.services.network.unsubscribe(&thread.topic()).await {
            warn!(thread = %id, error = %e, "unsubscribe failed");
        }
        self.services.db().delete_thread(id)?;
        self.registry.remove(id);
        self.send_update(&thread, UpdateKind::ThreadRemoved);

        info!(thread = %id, leave = %leave, "thread removed");
        Ok(leave)
    }

    /// Loaded threads, without the account thread and internal ones.
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        let account = self.address().to_hex();
        self.registry
            .snapshot()
            .into_iter()
            .filter(|t| t.key() != account && !INTERNAL_THREAD_KEYS.contains(&t.key()))
            .collect()
    }

    pub fn thread(&self, id: &ThreadId) -> Result<Arc<Thread>, CoreError> {
        self.registry.get(id).ok_or(CoreError::ThreadNotFound)
    }

    pub fn thread_by_key(&self, key: &str) -> Result<Arc<Thread>, CoreError> {
        self.registry.get_by_key(key).ok_or(CoreError::ThreadNotFound)
    }

    pub fn thread_view(&self, id: &ThreadId) -> Result<ThreadView, CoreError> {
        let record = self.thread(id)?.record();
        let profile = self.services.profile();
        let db = self.services.db();

        let head = record.heads.first().copied();
        let head_block = match head {
            Some(head) => match db.get_block(&head) {
                Ok(block) => Some(block),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        let head_user = match head_block.as_ref().and_then(|b| b.author) {
            Some(author) if author == profile.id => Some(profile),
            Some(author) => db.get_contact(&author)?,
            None => None,
        };
        let block_count = db.count_blocks(&BlockQuery {
            thread: Some(record.id),
            ..Default::default()
        })?;
        let peer_count = db.count_thread_peers(&record.id)? + 1;

        Ok(ThreadView {
            id: record.id,
            key: record.key,
            name: record.name,
            schema: record.schema,
            initiator: record.initiator,
            thread_type: record.thread_type,
            sharing: record.sharing,
            members: record.members,
            head,
            head_block,
            head_user,
            block_count,
            peer_count,
        })
    }

    // ------------------------------------------------------------------
    // Invites
    // ------------------------------------------------------------------

    /// Pending targeted invites, newest first.
    pub fn invites(&self) -> Result<Vec<InviteInfo>, CoreError> {
        let db = self.services.db();
        let mut infos = Vec::new();
        for invite in db.list_thread_invites()? {
            let known = db.get_contact(&invite.inviter.id)?;
            infos.push(InviteInfo::new(&invite, known));
        }
        Ok(infos)
    }

    pub fn invite_info(&self, id: &BlockId) -> Result<InviteInfo, CoreError> {
        let db = self.services.db();
        let invite = stored_invite(db.get_thread_invite(id))?;
        let known = db.get_contact(&invite.inviter.id)?;
        Ok(InviteInfo::new(&invite, known))
    }

    /// Accept a stored targeted invite. The invite is consumed.
    pub async fn accept_invite(&self, id: &BlockId) -> Result<ThreadId, CoreError> {
        let invite = stored_invite(self.services.db().get_thread_invite(id))?;
        let envelope = invites::decode(&invite.block)?;
        let body = invites::open_targeted(&envelope, &self.services.identity)?;
        let thread = self.handle_invite(envelope, body).await?;

        self.services.transaction(|db| {
            db.delete_thread_invite(id)?;
            db.delete_notifications_for_block(id)?;
            Ok(())
        })?;
        Ok(thread)
    }

    /// Accept an invite published at `address` and sealed with `key`.
    pub async fn accept_external_invite(&self, address: &str, key: &SymmetricKey) -> Result<ThreadId, CoreError> {
        let data = self.services.fetch(address).await?;
        let (envelope, body) = invites::open_external_invite(&data, key)?;
        self.handle_invite(envelope, body).await
    }

    /// Drop a stored invite without joining.
    pub fn ignore_invite(&self, id: &BlockId) -> Result<(), CoreError> {
        self.services.transaction(|db| {
            if !db.delete_thread_invite(id)? {
                return Err(CoreError::ThreadInviteNotFound);
            }
            db.delete_notifications_for_block(id)?;
            Ok(())
        })?;
        debug!(invite = %id, "invite ignored");
        Ok(())
    }

    /// Create the thread an invite describes, load its history and join.
    /// Nothing is written until the invite and the history behind it have
    /// been checked.
    async fn handle_invite(&self, envelope: BlockEnvelope, body: BlockBody) -> Result<ThreadId, CoreError> {
        let invite = invites::verify(&envelope, body, &self.address())?;
        let snapshot = invite.thread;
        if let Some(existing) = self.registry.get(&snapshot.id) {
            debug!(thread = %existing.id(), "invite for a thread we already have");
            return Ok(existing.id());
        }

        let chain = fetch_chain(&self.services, snapshot.id, &snapshot.heads).await?;

        let record = self.record_from_snapshot(&snapshot, ThreadState::Loading);
        let inviter = invite.inviter;
        // the row is the claim; a concurrent accept of the same thread backs off here
        let created = self.services.transaction(|db| {
            match db.get_thread(&record.id) {
                Ok(_) => return Ok(false),
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
            db.insert_thread(&record)?;
            db.upsert_contact(&inviter)?;
            Ok(true)
        })?;
        if !created {
            debug!(thread = %snapshot.id, "thread loaded by a concurrent accept");
            return Ok(snapshot.id);
        }

        let thread = Arc::new(Thread::new(self.services.clone(), record));
        if !self.registry.add(thread.clone()) {
            if let Some(existing) = self.registry.get(&snapshot.id) {
                return Ok(existing.id());
            }
            let deleted = self.services.db().delete_thread(&snapshot.id);
            if let Err(e) = deleted {
                warn!(thread = %snapshot.id, error = %e, "failed to delete thread");
            }
            return Err(CoreError::InvalidArgument(format!(
                "thread key {:?} is already in use",
                thread.key()
            )));
        }

        if let Err(e) = self.bootstrap(&thread, chain, &snapshot.heads, inviter.id).await {
            warn!(thread = %thread.id(), error = %e, "failed to load invited thread");
            self.discard(&thread).await;
            return Err(e);
        }

        self.send_update(&thread, UpdateKind::ThreadAdded);
        info!(
            thread = %thread.id(),
            inviter = %inviter.id.short(),
            "joined thread from invite"
        );
        Ok(thread.id())
    }

    async fn bootstrap(
        &self,
        thread: &Thread,
        chain: Vec<crate::thread::Fetched>,
        heads: &[BlockId],
        inviter: UserId,
    ) -> Result<(), CoreError> {
        self.services.network.subscribe(&thread.topic()).await?;
        thread.bootstrap(chain, heads, inviter).await?;
        self.services
            .db()
            .update_thread_state(&thread.id(), ThreadState::Loaded)?;
        thread.reload()
    }

    async fn discard(&self, thread: &Thread) {
        self.registry.remove(&thread.id());
        if let Err(e) = self.services.network.unsubscribe(&thread.topic()).await {
            debug!(thread = %thread.id(), error = %e, "unsubscribe failed");
        }
        let deleted = self.services.db().delete_thread(&thread.id());
        if let Err(e) = deleted {
            warn!(thread = %thread.id(), error = %e, "failed to delete thread");
        }
    }

    /// Store an invite from our inbox until the user decides.
    fn receive_invite(&self, data: &[u8]) -> Result<BlockId, CoreError> {
        let envelope = invites::decode(data)?;
        let body = invites::open_targeted(&envelope, &self.services.identity)?;
        let invite = invites::verify(&envelope, body, &self.address())?;
        let id = BlockId::of(data);

        let stored = ThreadInvite {
            id,
            block: data.to_vec(),
            name: invite.thread.name.clone(),
            inviter: invite.inviter.clone(),
            date: envelope.date,
        };
        let notification = Notification {
            id: Uuid::new_v4(),
            date: envelope.date,
            actor: invite.inviter.id,
            subject: invite.thread.name.clone(),
            subject_id: invite.thread.id,
            block_id: Some(id),
            target: None,
            kind: NotificationType::InviteReceived,
            body: "invited you to join".into(),
            read: false,
        };

        let fresh = self.services.transaction(|db| {
            if db.get_thread_invite(&id).is_ok() {
                return Ok(false);
            }
            db.insert_thread_invite(&stored)?;
            db.insert_notification(&notification)?;
            Ok(true)
        })?;
        if fresh {
            info!(invite = %id, thread = %invite.thread.id, inviter = %invite.inviter.id.short(), "invite received");
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Route one message from a subscribed topic.
    pub async fn handle_message(&self, message: InboundMessage) -> Result<Inbound, CoreError> {
        match TopicKind::classify(&message.topic) {
            TopicKind::Thread(thread_id) => {
                // e.g. a block still in flight after the thread was removed
                let thread = self.registry.get(&thread_id).ok_or(CoreError::ThreadNotFound)?;
                let envelope = BlockEnvelope::decode(&message.data)?;
                let id = BlockId::of(&message.data);
                let applied = thread.handle_block(envelope, message.data).await?;
                Ok(Inbound::Block {
                    thread: thread_id,
                    id,
                    applied,
                })
            }
            TopicKind::Inbox(user) if user == self.address() => {
                self.receive_invite(&message.data).map(Inbound::Invite)
            }
            _ => {
                trace!(topic = %message.topic, "message on foreign topic");
                Ok(Inbound::Ignored)
            }
        }
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub fn block(&self, id: &BlockId) -> Result<BlockRecord, CoreError> {
        match self.services.db().get_block(id) {
            Ok(block) => Ok(block),
            Err(StoreError::NotFound) => Err(CoreError::BlockNotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn thread_of(&self, block: &BlockId) -> Result<Arc<Thread>, CoreError> {
        let block = self.block(block)?;
        self.thread(&block.thread_id)
    }

    pub async fn add_comment_to_block(&self, block: &BlockId, body: &str) -> Result<BlockId, CoreError> {
        self.thread_of(block)?.add_comment(*block, body).await
    }

    pub async fn add_like_to_block(&self, block: &BlockId) -> Result<BlockId, CoreError> {
        self.thread_of(block)?.add_like(*block).await
    }

    pub async fn add_flag_to_block(&self, block: &BlockId) -> Result<BlockId, CoreError> {
        self.thread_of(block)?.add_flag(*block).await
    }

    pub async fn add_ignore_to_block(&self, block: &BlockId) -> Result<BlockId, CoreError> {
        self.thread_of(block)?.add_ignore(*block).await
    }

    // ------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------

    pub fn feed(&self, request: &FeedRequest) -> Result<Vec<FeedItem>, CoreError> {
        let profile = self.services.profile();
        let db = self.services.db();
        Ok(feed::feed(&db, &profile, request)?.items)
    }

    pub fn messages(
        &self,
        offset: Option<BlockId>,
        limit: u32,
        thread: Option<ThreadId>,
    ) -> Result<Vec<FeedItem>, CoreError> {
        let profile = self.services.profile();
        let db = self.services.db();
        let page = Projector::new(&db, &profile).page(thread, &[BlockType::Message], offset, limit, false)?;
        Ok(page.items)
    }

    /// Stream a feed page by page. `request.limit` caps the total, zero
    /// streams everything. Dropping the receiver stops the producer.
    pub fn feed_stream(&self, request: FeedRequest) -> mpsc::Receiver<Result<FeedItem, CoreError>> {
        let buffer = self.services.config.stream_buffer.max(1);
        let (tx, rx) = mpsc::channel(buffer);
        let services = self.services.clone();

        tokio::spawn(async move {
            let total = request.limit;
            let mut sent = 0u32;
            let mut before = request.offset;
            loop {
                let page_size = match total {
                    0 => buffer as u32,
                    total => (total - sent).min(buffer as u32),
                };
                let page = {
                    let profile = services.profile();
                    let db = services.db();
                    Projector::new(&db, &profile).page(
                        request.thread,
                        feed::feed_types(request.mode),
                        before,
                        page_size,
                        request.mode == feed::FeedMode::Annotated,
                    )
                };
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                for item in page.items {
                    if tx.send(Ok(item)).await.is_err() {
                        debug!("feed stream receiver dropped");
                        return;
                    }
                    sent += 1;
                }
                match page.next {
                    Some(next) if total == 0 || sent < total => before = Some(next),
                    _ => return,
                }
            }
        });
        rx
    }

    // ------------------------------------------------------------------
    // Notifications, contacts, summary
    // ------------------------------------------------------------------

    pub fn notifications(&self, limit: u32) -> Result<Vec<Notification>, CoreError> {
        Ok(self.services.db().list_notifications(limit)?)
    }

    pub fn read_notification(&self, id: &Uuid) -> Result<bool, CoreError> {
        Ok(self.services.db().read_notification(id)?)
    }

    pub fn read_all_notifications(&self) -> Result<u64, CoreError> {
        Ok(self.services.db().read_all_notifications()?)
    }

    pub fn contacts(&self) -> Result<Vec<Contact>, CoreError> {
        Ok(self.services.db().list_contacts()?)
    }

    pub fn contact(&self, id: &UserId) -> Result<Option<Contact>, CoreError> {
        Ok(self.services.db().get_contact(id)?)
    }

    pub fn summary(&self) -> Result<Summary, CoreError> {
        let thread_count = self.threads().len();
        let db = self.services.db();
        Ok(Summary {
            address: self.address(),
            thread_count,
            block_count: db.count_blocks(&BlockQuery::default())?,
            contact_count: db.count_contacts()?,
        })
    }

    // ------------------------------------------------------------------
    // Backup
    // ------------------------------------------------------------------

    pub fn export_backup(&self) -> Result<BackupPayload, CoreError> {
        Ok(self.services.db().export_backup()?)
    }

    /// Import a backup and load the threads it added.
    pub async fn import_backup(&self, payload: &BackupPayload) -> Result<ImportStats, CoreError> {
        let stats = self.services.db().import_backup(payload)?;
        let records = self.services.db().list_threads()?;
        for record in records {
            if self.registry.contains(&record.id) {
                continue;
            }
            let thread = Arc::new(Thread::new(self.services.clone(), record));
            if !self.registry.add(thread.clone()) {
                warn!(thread = %thread.id(), key = %thread.key(), "imported thread clashes with a loaded one");
                continue;
            }
            self.services.network.subscribe(&thread.topic()).await?;
            self.send_update(&thread, UpdateKind::ThreadAdded);
        }
        info!(
            threads = stats.threads_imported,
            blocks = stats.blocks_imported,
            contacts = stats.contacts_imported,
            "backup imported"
        );
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Persist a new thread record, load it and subscribe to its topic.
    async fn install(&self, record: ThreadRecord) -> Result<Arc<Thread>, CoreError> {
        self.services.db().insert_thread(&record)?;
        let thread = Arc::new(Thread::new(self.services.clone(), record));
        if !self.registry.add(thread.clone()) {
            self.services.db().delete_thread(&thread.id())?;
            return Err(CoreError::InvalidArgument(format!(
                "thread {} is already loaded",
                thread.id()
            )));
        }
        self.services.network.subscribe(&thread.topic()).await?;
        self.send_update(&thread, UpdateKind::ThreadAdded);
        Ok(thread)
    }

    fn record_from_snapshot(&self, snapshot: &ThreadSnapshot, state: ThreadState) -> ThreadRecord {
        // the initiator's key handle may clash with one of ours
        let key = if self.registry.get_by_key(&snapshot.key).is_some() || snapshot.key.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            snapshot.key.clone()
        };
        ThreadRecord {
            id: snapshot.id,
            key,
            sk: snapshot.sk,
            content_key: snapshot.content_key,
            name: snapshot.name.clone(),
            schema: snapshot.schema.clone(),
            initiator: snapshot.initiator,
            thread_type: snapshot.thread_type,
            sharing: snapshot.sharing,
            members: snapshot.members.clone(),
            state,
            heads: Vec::new(),
        }
    }

    async fn resolve_schema(&self, source: Option<SchemaSource>) -> Result<Option<String>, CoreError> {
        let json = match source {
            None => return Ok(None),
            Some(SchemaSource::Address(address)) => return Ok(Some(address.trim().to_string())),
            Some(SchemaSource::Json(json)) => json,
            Some(SchemaSource::Preset(preset)) => preset.json().to_string(),
        };
        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|e| CoreError::InvalidArgument(format!("invalid schema: {e}")))?;

        let address = self.services.network.add(json.into_bytes(), true).await?;
        self.services.outbox.enqueue(&address, CafeRequestKind::Store)?;
        self.services.outbox.flush();
        debug!(schema = %address, "schema stored");
        Ok(Some(address))
    }

    fn send_update(&self, thread: &Thread, kind: UpdateKind) {
        self.services.send_update(ThreadUpdate {
            id: thread.id(),
            key: thread.key().to_string(),
            name: thread.name(),
            kind,
        });
    }
}

fn stored_invite(result: Result<ThreadInvite, StoreError>) -> Result<ThreadInvite, CoreError> {
    match result {
        Ok(invite) => Ok(invite),
        Err(StoreError::NotFound) => Err(CoreError::ThreadInviteNotFound),
        Err(e) => Err(e.into()),
    }
}

/// Validate and deduplicate member addresses, keeping their order.
fn parse_members(members: &[String]) -> Result<Vec<UserId>, CoreError> {
    let mut parsed: Vec<UserId> = Vec::with_capacity(members.len());
    for member in members {
        let id = parse_address(member)
            .map_err(|e| CoreError::InvalidArgument(format!("bad member address {member:?}: {e}")))?;
        if !parsed.contains(&id) {
            parsed.push(id);
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPeer;

    #[test]
    fn test_parse_members_dedupes_and_validates() {
        let a = Identity::generate().user_id().to_hex();
        let b = Identity::generate().user_id().to_hex();
        let parsed = parse_members(&[a.clone(), b.clone(), a.clone()]).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].to_hex(), a);

        assert!(matches!(
            parse_members(&["nope".to_string()]),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_add_thread_and_view() {
        let peer = TestPeer::new("a").await;
        let node = &peer.node;

        let mut config = AddThreadConfig::new("  Trip  ", ThreadType::Open, Sharing::Shared);
        config.key = "trip".into();
        config.schema = Some(SchemaSource::Preset(SchemaPreset::CameraRoll));
        let thread = node.add_thread(config.clone()).await.unwrap();
        assert_eq!(thread.name(), "Trip");

        let schema = thread.record().schema.unwrap();
        assert!(peer.hub.has_content(&schema));

        let view = node.thread_view(&thread.id()).unwrap();
        assert_eq!(view.block_count, 1);
        assert_eq!(view.peer_count, 1);
        assert_eq!(view.head_block.unwrap().block_type, BlockType::Join);
        assert_eq!(view.head_user.unwrap().id, node.address());

        // key handles are unique
        assert!(matches!(
            node.add_thread(config).await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_account_thread_is_hidden_and_stable() {
        let peer = TestPeer::new("a").await;
        let first = peer.node.add_account_thread().await.unwrap();
        let again = peer.node.add_account_thread().await.unwrap();
        assert_eq!(first.id(), again.id());
        assert_eq!(first.id(), peer.node.services.identity.thread_id());
        assert!(peer.node.threads().is_empty());
        assert_eq!(peer.node.summary().unwrap().thread_count, 0);
    }

    #[tokio::test]
    async fn test_remove_thread_forgets_everything() {
        let peer = TestPeer::new("a").await;
        let node = &peer.node;
        let thread = node
            .add_thread(AddThreadConfig::new("tmp", ThreadType::Open, Sharing::Shared))
            .await
            .unwrap();
        let id = thread.id();
        let mut updates = node.subscribe_updates();

        let leave = node.remove_thread(&id).await.unwrap();
        assert!(peer.hub.has_content(&leave.to_hex()));
        assert!(matches!(node.thread(&id), Err(CoreError::ThreadNotFound)));
        assert!(node.block(&leave).is_err());

        let mut kinds = Vec::new();
        while let Ok(update) = updates.try_recv() {
            kinds.push(update.kind);
        }
        assert_eq!(kinds.last(), Some(&UpdateKind::ThreadRemoved));
    }

    #[tokio::test]
    async fn test_feed_stream_stops_at_limit() {
        let peer = TestPeer::new("a").await;
        let thread = peer
            .node
            .add_thread(AddThreadConfig::new("chat", ThreadType::Open, Sharing::Shared))
            .await
            .unwrap();
        for i in 0..5 {
            thread.add_message(&format!("m{i}")).await.unwrap();
        }

        let mut rx = peer.node.feed_stream(FeedRequest {
            thread: Some(thread.id()),
            limit: 3,
            ..Default::default()
        });
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item.unwrap());
        }
        assert_eq!(items.len(), 3);

        let all = peer.node.messages(None, 10, Some(thread.id())).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_block_for_removed_thread_is_not_found() {
        let peer = TestPeer::new("a").await;
        let thread = peer
            .node
            .add_thread(AddThreadConfig::new("gone", ThreadType::Open, Sharing::Shared))
            .await
            .unwrap();
        let message = thread.add_message("late").await.unwrap();
        let data = peer
            .network
            .fetch(&message.to_hex(), std::time::Duration::from_secs(1))
            .await
            .unwrap();
        peer.node.remove_thread(&thread.id()).await.unwrap();

        let late = InboundMessage {
            topic: thread.topic(),
            data,
        };
        assert!(matches!(
            peer.node.handle_message(late).await,
            Err(CoreError::ThreadNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unknown_invite_cannot_be_accepted() {
        let peer = TestPeer::new("a").await;
        let missing = BlockId([8u8; 32]);
        assert!(matches!(
            peer.node.accept_invite(&missing).await,
            Err(CoreError::ThreadInviteNotFound)
        ));
        assert!(matches!(
            peer.node.ignore_invite(&missing),
            Err(CoreError::ThreadInviteNotFound)
        ));
    }
}
