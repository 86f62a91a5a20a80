//! A loaded thread.
//!
//! Outbound commits and inbound application both take the thread's own
//! lock, so one thread mutates serially while other threads proceed in
//! parallel. Every mutation is written to the datastore first; the cached
//! record is then reloaded from it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use skein_shared::block::{
    BlockBody, BodyCipher, CommentBody, FilesBody, JoinBody, MessageBody, TargetBody,
};
use skein_shared::invite::{seal_external, ExternalInvite, InviteBody, ThreadSnapshot};
use skein_shared::{
    BlockEnvelope, BlockId, BlockType, Sharing, SharingPolicy, SkeinError, ThreadId, ThreadType,
    UserId,
};
use skein_store::{CafeRequestKind, Database, PeerState, ThreadPeer, ThreadRecord};

use crate::error::CoreError;
use crate::handlers::{self, BlockContext, Effect};
use crate::merge::{self, Reconciled};
use crate::services::{Services, ThreadUpdate, UpdateKind};

/// How an inbound block changed the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Already stored; nothing happened.
    Duplicate,
    /// Stored, but the heads already covered it.
    Unchanged,
    /// Stored and now the only head.
    FastForward,
    /// Stored, and a merge with the given id became the head.
    Merged(BlockId),
}

/// A verified block fetched from the network, not yet applied.
pub(crate) struct Fetched {
    pub id: BlockId,
    pub envelope: BlockEnvelope,
    pub data: Vec<u8>,
}

pub struct Thread {
    services: Arc<Services>,
    id: ThreadId,
    key: String,
    record: RwLock<ThreadRecord>,
    lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Thread {
    pub(crate) fn new(services: Arc<Services>, record: ThreadRecord) -> Self {
        Self {
            services,
            id: record.id,
            key: record.key.clone(),
            record: RwLock::new(record),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn record(&self) -> ThreadRecord {
        self.read().clone()
    }

    pub fn policy(&self) -> SharingPolicy {
        self.read().policy()
    }

    pub fn heads(&self) -> Vec<BlockId> {
        self.read().heads.clone()
    }

    /// The head, once reconciled to a single block.
    pub fn head(&self) -> Option<BlockId> {
        self.read().heads.first().copied()
    }

    pub fn topic(&self) -> String {
        self.id.to_topic()
    }

    /// Remote peers that have not left.
    pub fn peers(&self) -> Result<Vec<ThreadPeer>, CoreError> {
        Ok(self.services.db().list_thread_peers(&self.id)?)
    }

    /// Everything an invitee needs to load this thread.
    pub fn snapshot(&self) -> ThreadSnapshot {
        let r = self.record();
        ThreadSnapshot {
            id: r.id,
            sk: r.sk,
            content_key: r.content_key,
            key: r.key,
            name: r.name,
            schema: r.schema,
            initiator: r.initiator,
            thread_type: r.thread_type,
            sharing: r.sharing,
            members: r.members,
            heads: r.heads,
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    pub async fn join(&self, inviter: Option<UserId>) -> Result<BlockId, CoreError> {
        let body = BlockBody::Join(JoinBody {
            contact: self.services.profile(),
            inviter,
        });
        self.commit(body).await
    }

    pub async fn leave(&self) -> Result<BlockId, CoreError> {
        self.commit(BlockBody::Leave).await
    }

    /// Tell the thread about our current name and avatar.
    pub async fn add_announce(&self) -> Result<BlockId, CoreError> {
        let body = BlockBody::Announce(skein_shared::block::AnnounceBody {
            contact: self.services.profile(),
        });
        self.commit(body).await
    }

    pub async fn add_message(&self, body: &str) -> Result<BlockId, CoreError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::InvalidArgument("message is empty".into()));
        }
        self.commit(BlockBody::Message(MessageBody { body: body.to_string() }))
            .await
    }

    /// Add a file set that is already stored at `target`.
    pub async fn add_files(&self, target: &str, caption: &str) -> Result<BlockId, CoreError> {
        let body = BlockBody::Files(FilesBody {
            target: target.trim().to_string(),
            caption: caption.trim().to_string(),
        });
        self.commit(body).await
    }

    pub async fn add_comment(&self, target: BlockId, body: &str) -> Result<BlockId, CoreError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::InvalidArgument("comment is empty".into()));
        }
        self.commit(BlockBody::Comment(CommentBody {
            target,
            body: body.to_string(),
        }))
        .await
    }

    pub async fn add_like(&self, target: BlockId) -> Result<BlockId, CoreError> {
        self.commit(BlockBody::Like(TargetBody { target })).await
    }

    pub async fn add_flag(&self, target: BlockId) -> Result<BlockId, CoreError> {
        self.commit(BlockBody::Flag(TargetBody { target })).await
    }

    pub async fn add_ignore(&self, target: BlockId) -> Result<BlockId, CoreError> {
        self.commit(BlockBody::Ignore(TargetBody { target })).await
    }

    /// Send a targeted invite, sealed to `invitee` and published on its
    /// inbox topic.
    ///
    /// The initiator may invite someone outside a non-empty member list; the
    /// list is widened first. The change travels in the snapshot and reaches
    /// the other members with the invitee's join.
    pub async fn add_invite(&self, invitee: UserId) -> Result<BlockId, CoreError> {
        let _guard = self.lock.lock().await;
        let local = self.services.address();
        if invitee == local {
            return Err(CoreError::InvalidArgument("cannot invite yourself".into()));
        }

        let policy = self.policy();
        if !policy.shareable(&local, &invitee) {
            self.widen_members(&policy, invitee)?;
        }

        let body = BlockBody::Invite(InviteBody {
            thread: self.snapshot(),
            inviter: self.services.profile(),
        });
        let envelope = BlockEnvelope::create(
            &self.services.identity,
            self.id,
            self.heads(),
            &body,
            BodyCipher::Recipient(&invitee),
        )?;
        let data = envelope.encode()?;
        let id = BlockId::of(&data);

        self.services.db().upsert_thread_peer(&ThreadPeer {
            id: invitee,
            thread_id: self.id,
            state: PeerState::Invited,
            last_head: None,
        })?;

        let address = self.services.network.add(data.clone(), true).await?;
        self.services.outbox.enqueue(&address, CafeRequestKind::Store)?;
        self.services.publish(&invitee.to_inbox_topic(), data).await;
        self.services.outbox.flush();

        info!(thread = %self.id, invitee = %invitee.short(), invite = %id, "invite sent");
        Ok(id)
    }

    /// Create an invite anyone holding the returned key can open.
    pub async fn add_external_invite(&self) -> Result<ExternalInvite, CoreError> {
        let _guard = self.lock.lock().await;
        let local = self.services.address();
        let policy = self.policy();
        if policy.thread_type == ThreadType::Private
            || policy.sharing == Sharing::NotShared
            || !policy.shareable(&local, &local)
        {
            return Err(CoreError::NotShareable);
        }

        let body = BlockBody::Invite(InviteBody {
            thread: self.snapshot(),
            inviter: self.services.profile(),
        });
        let envelope = BlockEnvelope::create(
            &self.services.identity,
            self.id,
            self.heads(),
            &body,
            BodyCipher::Plain,
        )?;
        let (ciphertext, key) = seal_external(&envelope).map_err(SkeinError::from)?;

        let address = self.services.network.add(ciphertext, true).await?;
        self.services.outbox.enqueue(&address, CafeRequestKind::Store)?;
        self.services.outbox.flush();

        info!(thread = %self.id, address = %address, "external invite created");
        Ok(ExternalInvite { address, key })
    }

    fn widen_members(&self, policy: &SharingPolicy, invitee: UserId) -> Result<(), CoreError> {
        let local = self.services.address();
        if !policy.can_extend_members(&local) || policy.is_member(&invitee) {
            return Err(CoreError::NotShareable);
        }
        let widened = policy.with_member(invitee);
        if !widened.shareable(&local, &invitee) {
            return Err(CoreError::NotShareable);
        }

        self.services
            .db()
            .update_thread_members(&self.id, &widened.members)?;
        self.reload()?;
        info!(
            thread = %self.id,
            member = %invitee.short(),
            members = widened.members.len(),
            "member list widened for invite"
        );
        Ok(())
    }

    async fn commit(&self, body: BlockBody) -> Result<BlockId, CoreError> {
        let _guard = self.lock.lock().await;
        self.commit_locked(body).await
    }

    /// Append a block authored by us on top of the current heads.
    async fn commit_locked(&self, body: BlockBody) -> Result<BlockId, CoreError> {
        let record = self.record();
        let envelope = BlockEnvelope::create(
            &self.services.identity,
            self.id,
            record.heads.clone(),
            &body,
            BodyCipher::Thread(&record.content_key),
        )?;
        let data = envelope.encode()?;
        let id = BlockId::of(&data);

        let ctx = BlockContext {
            id,
            envelope: &envelope,
            body: Some(&body),
            thread: &record,
            local: self.services.address(),
        };
        let effects = self.services.transaction(|db| {
            let effects = handlers::apply(&ctx, db)?;
            db.update_thread_heads(&self.id, &[id])?;
            Ok(effects)
        })?;
        self.reload()?;

        self.run_effects(effects).await;
        self.distribute(&data).await?;
        self.announce_block(id, envelope.block_type);

        debug!(thread = %self.id, block = %id, block_type = %envelope.block_type, "block committed");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Apply a block received on the thread topic, fetching any parents we
    /// lack first.
    pub(crate) async fn handle_block(
        &self,
        envelope: BlockEnvelope,
        data: Vec<u8>,
    ) -> Result<Applied, CoreError> {
        if envelope.thread_id != self.id {
            return Err(CoreError::InvalidThreadBlock("block belongs to another thread".into()));
        }
        if envelope.block_type == BlockType::Invite {
            return Err(CoreError::InvalidThreadBlock(
                "invites do not belong to thread history".into(),
            ));
        }
        let id = BlockId::of(&data);

        let _guard = self.lock.lock().await;
        let known = self.services.db().has_block(&id)?;
        if known {
            trace!(thread = %self.id, block = %id, "duplicate block");
            return Ok(Applied::Duplicate);
        }
        envelope.verify()?;

        let chain = fetch_chain(&self.services, self.id, &envelope.parents).await?;
        if !chain.is_empty() {
            debug!(thread = %self.id, block = %id, missing = chain.len(), "fetched missing parents");
        }
        self.apply_chain(chain).await?;

        self.apply(id, &envelope, &data, true).await
    }

    /// Fetch and apply the history behind `heads`, then move the heads
    /// forward to them.
    pub(crate) async fn follow(&self, heads: &[BlockId]) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let chain = fetch_chain(&self.services, self.id, heads).await?;
        self.apply_chain(chain).await?;

        for head in heads {
            let record = self.record();
            let local = self.services.address();
            let (_, merged) = self
                .services
                .transaction(|db| reconcile_heads(db, &record, *head, local))?;
            self.reload()?;
            if let Some((merge_id, data)) = merged {
                self.distribute(&data).await?;
                self.announce_block(merge_id, BlockType::Merge);
            }
        }
        Ok(())
    }

    /// Load the history an invite pointed at, then join.
    pub(crate) async fn bootstrap(
        &self,
        chain: Vec<Fetched>,
        heads: &[BlockId],
        inviter: UserId,
    ) -> Result<BlockId, CoreError> {
        let _guard = self.lock.lock().await;
        self.apply_chain(chain).await?;

        self.services.transaction(|db| {
            let mut present = Vec::new();
            for head in heads {
                if db.has_block(head)? {
                    present.push(*head);
                }
            }
            db.update_thread_heads(&self.id, &present)?;
            // no welcome needed, our join follows
            db.upsert_thread_peer(&ThreadPeer {
                id: inviter,
                thread_id: self.id,
                state: PeerState::Welcomed,
                last_head: None,
            })?;
            Ok(())
        })?;
        self.reload()?;

        let join = BlockBody::Join(JoinBody {
            contact: self.services.profile(),
            inviter: Some(inviter),
        });
        self.commit_locked(join).await
    }

    async fn apply_chain(&self, chain: Vec<Fetched>) -> Result<(), CoreError> {
        for block in chain {
            let known = self.services.db().has_block(&block.id)?;
            if known {
                continue;
            }
            self.apply(block.id, &block.envelope, &block.data, false).await?;
        }
        Ok(())
    }

    /// Open, check and store one block. With `advance`, reconcile the heads
    /// against it.
    async fn apply(
        &self,
        id: BlockId,
        envelope: &BlockEnvelope,
        data: &[u8],
        advance: bool,
    ) -> Result<Applied, CoreError> {
        let record = self.record();
        let body = match envelope.block_type {
            BlockType::Merge => None,
            _ => Some(envelope.open_body(&record.content_key)?),
        };
        let local = self.services.address();
        let ctx = BlockContext {
            id,
            envelope,
            body: body.as_ref(),
            thread: &record,
            local,
        };

        let (effects, applied, merged) = self.services.transaction(|db| {
            let effects = handlers::apply(&ctx, db)?;
            if let Some(author) = envelope.author {
                if author != local {
                    db.set_thread_peer_head(&record.id, &author, &id)?;
                }
            }
            if !advance {
                return Ok((effects, Applied::Unchanged, None));
            }
            // the handler may have widened the member list
            let current = db.get_thread(&record.id)?;
            let (applied, merged) = reconcile_heads(db, &current, id, local)?;
            Ok((effects, applied, merged))
        })?;
        self.reload()?;

        // keep a copy so peers can fetch it from us
        if let Err(e) = self.services.network.add(data.to_vec(), true).await {
            warn!(thread = %self.id, block = %id, error = %e, "failed to store block content");
        }
        self.run_effects(effects).await;
        self.announce_block(id, envelope.block_type);

        if let Some((merge_id, merge_data)) = merged {
            self.distribute(&merge_data).await?;
            self.announce_block(merge_id, BlockType::Merge);
            info!(thread = %self.id, merge = %merge_id, "heads merged");
        }

        debug!(thread = %self.id, block = %id, block_type = %envelope.block_type, outcome = ?applied, "block applied");
        Ok(applied)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Store, pin, queue for replication and publish an encoded block.
    async fn distribute(&self, data: &[u8]) -> Result<(), CoreError> {
        let address = self.services.network.add(data.to_vec(), true).await?;
        self.services.outbox.enqueue(&address, CafeRequestKind::Store)?;
        self.services.publish(&self.topic(), data.to_vec()).await;
        self.services.outbox.flush();
        Ok(())
    }

    async fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Pin(address) => {
                    if let Err(e) = self.services.network.pin(&address).await {
                        warn!(thread = %self.id, address = %address, error = %e, "pin failed");
                    }
                }
                Effect::Unpin(address) => {
                    if let Err(e) = self.services.network.unpin(&address).await {
                        warn!(thread = %self.id, address = %address, error = %e, "unpin failed");
                    }
                    if let Err(e) = self.services.outbox.enqueue(&address, CafeRequestKind::Unstore) {
                        warn!(thread = %self.id, address = %address, error = %e, "failed to queue unstore");
                    }
                }
            }
        }
    }

    fn announce_block(&self, block: BlockId, block_type: BlockType) {
        self.services.send_update(ThreadUpdate {
            id: self.id,
            key: self.key.clone(),
            name: self.name(),
            kind: UpdateKind::BlockAdded { block, block_type },
        });
    }

    pub(crate) fn reload(&self) -> Result<(), CoreError> {
        let fresh = self.services.db().get_thread(&self.id)?;
        *self
            .record
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ThreadRecord> {
        self.record.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Move the heads of `record` past the stored block `id`, merging when the
/// histories diverge.
fn reconcile_heads(
    db: &Database,
    record: &ThreadRecord,
    id: BlockId,
    local: UserId,
) -> Result<(Applied, Option<(BlockId, Vec<u8>)>), CoreError> {
    match merge::reconcile(db, &record.heads, &id)? {
        Reconciled::Unchanged => Ok((Applied::Unchanged, None)),
        Reconciled::FastForward => {
            db.update_thread_heads(&record.id, &[id])?;
            Ok((Applied::FastForward, None))
        }
        Reconciled::Merge { parents } => {
            let mut dates = Vec::with_capacity(parents.len());
            for parent in &parents {
                dates.push(db.get_block(parent)?.date);
            }
            let date = merge::merge_date(dates).unwrap_or_else(Utc::now);
            let envelope = BlockEnvelope::merge(record.id, parents, date);
            let data = envelope.encode()?;
            let merge_id = BlockId::of(&data);

            if !db.has_block(&merge_id)? {
                let ctx = BlockContext {
                    id: merge_id,
                    envelope: &envelope,
                    body: None,
                    thread: record,
                    local,
                };
                handlers::apply(&ctx, db)?;
            }
            db.update_thread_heads(&record.id, &[merge_id])?;
            Ok((Applied::Merged(merge_id), Some((merge_id, data))))
        }
    }
}

/// Fetch every block behind `parents` that is not stored yet. Each one is
/// checked against its address and signature. Nothing is applied; the
/// result is ordered so parents come before children.
pub(crate) async fn fetch_chain(
    services: &Services,
    thread: ThreadId,
    parents: &[BlockId],
) -> Result<Vec<Fetched>, CoreError> {
    let mut pending: Vec<BlockId> = parents.to_vec();
    let mut fetched: HashMap<BlockId, Fetched> = HashMap::new();

    while let Some(id) = pending.pop() {
        if fetched.contains_key(&id) {
            continue;
        }
        let known = services.db().has_block(&id)?;
        if known {
            continue;
        }

        let data = services.fetch(&id.to_hex()).await?;
        if BlockId::of(&data) != id {
            return Err(CoreError::InvalidThreadBlock(format!(
                "content fetched for {id} does not match its address"
            )));
        }
        let envelope = BlockEnvelope::decode(&data)?;
        envelope.verify()?;
        if envelope.thread_id != thread {
            return Err(CoreError::InvalidThreadBlock(format!(
                "parent {id} belongs to another thread"
            )));
        }

        pending.extend(envelope.parents.iter().copied());
        fetched.insert(id, Fetched { id, envelope, data });
    }

    Ok(parents_first(fetched))
}

fn parents_first(mut fetched: HashMap<BlockId, Fetched>) -> Vec<Fetched> {
    let mut roots: Vec<BlockId> = fetched.keys().copied().collect();
    roots.sort();

    let mut order = Vec::with_capacity(fetched.len());
    let mut visited = HashSet::new();
    for root in roots {
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            if let Some(block) = fetched.get(&id) {
                for parent in &block.envelope.parents {
                    if fetched.contains_key(parent) && !visited.contains(parent) {
                        stack.push((*parent, false));
                    }
                }
            }
        }
    }

    order.into_iter().filter_map(|id| fetched.remove(&id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_record, TestPeer};
    use skein_shared::crypto::generate_symmetric_key;
    use skein_shared::Identity;

    fn chain_block(author: &Identity, thread: ThreadId, parents: Vec<BlockId>) -> Fetched {
        let key = generate_symmetric_key();
        let envelope = BlockEnvelope::create(
            author,
            thread,
            parents,
            &BlockBody::Leave,
            BodyCipher::Thread(&key),
        )
        .unwrap();
        let data = envelope.encode().unwrap();
        Fetched {
            id: BlockId::of(&data),
            envelope,
            data,
        }
    }

    #[test]
    fn test_parents_first_orders_chain() {
        let author = Identity::generate();
        let thread = Identity::generate().thread_id();
        let a = chain_block(&author, thread, vec![]);
        let b = chain_block(&author, thread, vec![a.id]);
        let c = chain_block(&author, thread, vec![b.id, BlockId([0u8; 32])]);
        let (ia, ib, ic) = (a.id, b.id, c.id);

        let map = HashMap::from([(ic, c), (ia, a), (ib, b)]);
        let order: Vec<BlockId> = parents_first(map).into_iter().map(|f| f.id).collect();
        assert_eq!(order, vec![ia, ib, ic]);
    }

    #[tokio::test]
    async fn test_commit_advances_head() {
        let peer = TestPeer::new("a").await;
        let record = new_record(&peer.services, "notes");
        peer.services.db().insert_thread(&record).unwrap();
        let thread = Thread::new(peer.services.clone(), record);

        let first = thread.join(None).await.unwrap();
        assert_eq!(thread.heads(), vec![first]);

        let second = thread.add_message("hello").await.unwrap();
        assert_eq!(thread.heads(), vec![second]);
        let stored = peer.services.db().get_block(&second).unwrap();
        assert_eq!(stored.parents, vec![first]);
        assert_eq!(stored.body.as_deref(), Some("hello"));
        assert!(peer.hub.has_content(&second.to_hex()));

        assert!(matches!(
            thread.add_message("   ").await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_commit_keeps_head() {
        let peer = TestPeer::new("a").await;
        let record = new_record(&peer.services, "notes");
        peer.services.db().insert_thread(&record).unwrap();
        let thread = Thread::new(peer.services.clone(), record);
        let head = thread.join(None).await.unwrap();

        let err = thread.add_flag(BlockId([5u8; 32])).await.unwrap_err();
        assert!(matches!(err, CoreError::BlockNotFound));
        assert_eq!(thread.heads(), vec![head]);
    }

    #[tokio::test]
    async fn test_external_invite_refused_for_private_thread() {
        let peer = TestPeer::new("a").await;
        let mut record = new_record(&peer.services, "secret");
        record.thread_type = ThreadType::Private;
        peer.services.db().insert_thread(&record).unwrap();
        let thread = Thread::new(peer.services.clone(), record);

        assert!(matches!(
            thread.add_external_invite().await,
            Err(CoreError::NotShareable)
        ));
    }
}
