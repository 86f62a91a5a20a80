//! The content-network capability used by the thread engine, and an
//! in-process implementation of it.
//!
//! Blocks, invites and schemas are opaque byte blobs addressed by the hex
//! BLAKE3 hash of their content. Fan-out happens over named topics.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use skein_shared::types::content_address;

use crate::error::NetError;

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ContentNetwork: Send + Sync {
    /// Store `data` locally and return its content address.
    async fn add(&self, data: Vec<u8>, pin: bool) -> Result<String, NetError>;

    /// Fetch content by address, giving up after `timeout`.
    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Vec<u8>, NetError>;

    /// Fan `data` out to every other subscriber of `topic`.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), NetError>;

    async fn subscribe(&self, topic: &str) -> Result<(), NetError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError>;

    async fn pin(&self, address: &str) -> Result<(), NetError>;

    async fn unpin(&self, address: &str) -> Result<(), NetError>;

    /// Push content to always-on peers so it outlives this node.
    async fn replicate(&self, address: &str) -> Result<(), NetError>;
}

// ---------------------------------------------------------------------------
// In-process hub
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HubState {
    content: HashMap<String, Vec<u8>>,
    replicated: HashSet<String>,
    peers: Vec<HubPeer>,
}

struct HubPeer {
    name: String,
    topics: HashSet<String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

/// Shared medium connecting [`MemoryNetwork`] handles in one process.
///
/// Content added by any handle is fetchable by all of them. Published
/// messages reach every other handle subscribed to the topic, in publish
/// order.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new node. The receiver yields messages for its subscriptions.
    pub fn connect(&self, name: &str) -> (MemoryNetwork, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        state.peers.push(HubPeer {
            name: name.to_string(),
            topics: HashSet::new(),
            tx,
        });

        let network = MemoryNetwork {
            name: name.to_string(),
            hub: self.clone(),
            pins: Arc::new(Mutex::new(HashSet::new())),
            offline: Arc::new(Mutex::new(false)),
        };
        (network, rx)
    }

    /// Whether `address` was pushed with [`ContentNetwork::replicate`].
    pub fn is_replicated(&self, address: &str) -> bool {
        lock(&self.state).replicated.contains(address)
    }

    pub fn has_content(&self, address: &str) -> bool {
        lock(&self.state).content.contains_key(address)
    }
}

/// One node's view of a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryNetwork {
    name: String,
    hub: MemoryHub,
    pins: Arc<Mutex<HashSet<String>>>,
    offline: Arc<Mutex<bool>>,
}

impl MemoryNetwork {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate losing connectivity: fetch and replicate fail until restored.
    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }

    pub fn is_pinned(&self, address: &str) -> bool {
        lock(&self.pins).contains(address)
    }

    fn ensure_online(&self) -> Result<(), NetError> {
        if *lock(&self.offline) {
            return Err(NetError::Timeout(Duration::ZERO));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentNetwork for MemoryNetwork {
    async fn add(&self, data: Vec<u8>, pin: bool) -> Result<String, NetError> {
        let address = content_address(&data);
        lock(&self.hub.state).content.insert(address.clone(), data);
        if pin {
            lock(&self.pins).insert(address.clone());
        }
        trace!(node = %self.name, address = %address, "content added");
        Ok(address)
    }

    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Vec<u8>, NetError> {
        self.ensure_online().map_err(|_| NetError::Timeout(timeout))?;
        lock(&self.hub.state)
            .content
            .get(address)
            .cloned()
            .ok_or_else(|| NetError::NotFound(address.to_string()))
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), NetError> {
        let state = lock(&self.hub.state);
        let mut delivered = 0usize;
        for peer in state.peers.iter() {
            if peer.name == self.name || !peer.topics.contains(topic) {
                continue;
            }
            // a dropped receiver is a node that went away
            if peer
                .tx
                .send(InboundMessage {
                    topic: topic.to_string(),
                    data: data.clone(),
                })
                .is_ok()
            {
                delivered += 1;
            }
        }
        debug!(node = %self.name, topic = %topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), NetError> {
        let mut state = lock(&self.hub.state);
        if let Some(peer) = state.peers.iter_mut().find(|p| p.name == self.name) {
            peer.topics.insert(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError> {
        let mut state = lock(&self.hub.state);
        if let Some(peer) = state.peers.iter_mut().find(|p| p.name == self.name) {
            peer.topics.remove(topic);
        }
        Ok(())
    }

    async fn pin(&self, address: &str) -> Result<(), NetError> {
        lock(&self.pins).insert(address.to_string());
        Ok(())
    }

    async fn unpin(&self, address: &str) -> Result<(), NetError> {
        lock(&self.pins).remove(address);
        Ok(())
    }

    async fn replicate(&self, address: &str) -> Result<(), NetError> {
        self.ensure_online()
            .map_err(|_| NetError::Replication(format!("{} is offline", self.name)))?;
        let mut state = lock(&self.hub.state);
        if !state.content.contains_key(address) {
            return Err(NetError::NotFound(address.to_string()));
        }
        state.replicated.insert(address.to_string());
        Ok(())
    }
}

// A poisoned hub only means a test panicked while holding it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
