//! Main swarm orchestration with tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated tokio task. External code
//! communicates with it through typed command and notification channels.
//! [`SwarmNetwork`] wraps the command side as a [`ContentNetwork`]: gossip
//! topics carry fan-out and Kademlia records carry fetch-by-address.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{gossipsub, identify, kad, multiaddr::Protocol, swarm::SwarmEvent, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use skein_shared::constants::DEFAULT_QUIC_PORT;
use skein_shared::types::content_address;

use crate::behaviour::SkeinEvent;
use crate::error::NetError;
use crate::network::{ContentNetwork, InboundMessage};
use crate::transport::build_swarm;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    /// Dial a remote peer at the given multiaddr.
    Dial(Multiaddr),
    /// Publish a message on a GossipSub topic.
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Subscribe(String),
    Unsubscribe(String),
    /// Store a record. With `replicate`, also push it to the closest peers.
    PutRecord {
        key: String,
        value: Vec<u8>,
        replicate: bool,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    /// Look a record up in the DHT.
    GetRecord {
        key: String,
        reply: oneshot::Sender<Result<Vec<u8>, NetError>>,
    },
    RemoveRecord(String),
    /// Request a snapshot of currently connected peers.
    GetPeers(oneshot::Sender<Vec<PeerId>>),
    /// Gracefully shut down the swarm.
    Shutdown,
}

/// Notifications sent *from* the swarm task to the application.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected { peer_id: PeerId, address: Multiaddr },
    PeerDisconnected { peer_id: PeerId },
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

/// Configuration for spawning the swarm.
pub struct SwarmConfig {
    pub listen_addrs: Vec<Multiaddr>,
    /// Peers to dial and seed Kademlia with on startup.
    pub bootstrap: Vec<Multiaddr>,
}

impl SwarmConfig {
    /// Listen on QUIC, IPv4 and IPv6, on `port`.
    pub fn with_port(port: u16) -> Self {
        let v4 = Multiaddr::empty()
            .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
            .with(Protocol::Udp(port))
            .with(Protocol::QuicV1);
        let v6 = Multiaddr::empty()
            .with(Protocol::Ip6(Ipv6Addr::UNSPECIFIED))
            .with(Protocol::Udp(port))
            .with(Protocol::QuicV1);
        Self {
            listen_addrs: vec![v4, v6],
            bootstrap: Vec::new(),
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_QUIC_PORT)
    }
}

enum PendingQuery {
    Get {
        key: String,
        reply: oneshot::Sender<Result<Vec<u8>, NetError>>,
    },
    Put {
        reply: oneshot::Sender<Result<(), NetError>>,
    },
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    for addr in &config.listen_addrs {
        swarm.listen_on(addr.clone())?;
    }
    info!(peer_id = %local_peer_id, addrs = ?config.listen_addrs, "Swarm listening");

    for addr in &config.bootstrap {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer");
            continue;
        }
        if let Some(peer_id) = extract_peer_id(addr) {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, addr.clone());
        }
        debug!(addr = %addr, "Dialing bootstrap peer");
    }
    if !config.bootstrap.is_empty() {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "Kademlia bootstrap failed to start");
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        let mut pending: HashMap<kad::QueryId, PendingQuery> = HashMap::new();

        loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                error!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(SwarmCommand::Publish { topic, data, reply }) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            let result = match swarm.behaviour_mut().gossipsub.publish(gossipsub_topic, data) {
                                Ok(_) => Ok(()),
                                // nobody listening yet; peers catch up through parent fetches
                                Err(gossipsub::PublishError::InsufficientPeers)
                                | Err(gossipsub::PublishError::Duplicate) => {
                                    debug!(topic = %topic, "Publish had no recipients");
                                    Ok(())
                                }
                                Err(e) => {
                                    error!(topic = %topic, error = %e, "Publish failed");
                                    Err(NetError::Publish(e.to_string()))
                                }
                            };
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::Subscribe(topic)) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            if let Err(e) = swarm.behaviour_mut().gossipsub.subscribe(&gossipsub_topic) {
                                error!(topic = %topic, error = %e, "Subscribe failed");
                            }
                        }
                        Some(SwarmCommand::Unsubscribe(topic)) => {
                            let gossipsub_topic = gossipsub::IdentTopic::new(&topic);
                            swarm.behaviour_mut().gossipsub.unsubscribe(&gossipsub_topic);
                        }
                        Some(SwarmCommand::PutRecord { key, value, replicate, reply }) => {
                            let record = kad::Record::new(kad::RecordKey::new(&key), value);
                            if replicate {
                                match swarm.behaviour_mut().kademlia.put_record(record, kad::Quorum::One) {
                                    Ok(query_id) => {
                                        pending.insert(query_id, PendingQuery::Put { reply });
                                    }
                                    Err(e) => {
                                        let _ = reply.send(Err(NetError::Replication(e.to_string())));
                                    }
                                }
                            } else {
                                use libp2p::kad::store::RecordStore;
                                let result = swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .store_mut()
                                    .put(record)
                                    .map_err(|e| NetError::Replication(e.to_string()));
                                let _ = reply.send(result);
                            }
                        }
                        Some(SwarmCommand::GetRecord { key, reply }) => {
                            let query_id = swarm
                                .behaviour_mut()
                                .kademlia
                                .get_record(kad::RecordKey::new(&key));
                            pending.insert(query_id, PendingQuery::Get { key, reply });
                        }
                        Some(SwarmCommand::RemoveRecord(key)) => {
                            swarm.behaviour_mut().kademlia.remove_record(&kad::RecordKey::new(&key));
                        }
                        Some(SwarmCommand::GetPeers(reply)) => {
                            let peers = swarm.connected_peers().copied().collect();
                            let _ = reply.send(peers);
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                // --- Swarm events ---
                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(SkeinEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let _ = notif_tx
                                .send(SwarmNotification::MessageReceived {
                                    source: message.source,
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(SkeinEvent::Kademlia(
                            kad::Event::OutboundQueryProgressed { id, result, .. },
                        )) => {
                            on_query_progressed(&mut swarm, &mut pending, id, result);
                        }

                        SwarmEvent::Behaviour(SkeinEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = ?info.protocol_version,
                                "Identify: received info from peer"
                            );
                            for addr in &info.listen_addrs {
                                swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .add_address(&peer_id, addr.clone());
                            }
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let addr = endpoint.get_remote_address().clone();
                            info!(peer = %peer_id, addr = %addr, "Peer connected");
                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected { peer_id, address: addr })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}

fn on_query_progressed(
    swarm: &mut libp2p::Swarm<crate::behaviour::SkeinBehaviour>,
    pending: &mut HashMap<kad::QueryId, PendingQuery>,
    id: kad::QueryId,
    result: kad::QueryResult,
) {
    match result {
        kad::QueryResult::GetRecord(Ok(kad::GetRecordOk::FoundRecord(peer_record))) => {
            if let Some(PendingQuery::Get { reply, .. }) = pending.remove(&id) {
                let _ = reply.send(Ok(peer_record.record.value));
            }
            // one copy is enough
            if let Some(mut query) = swarm.behaviour_mut().kademlia.query_mut(&id) {
                query.finish();
            }
        }
        kad::QueryResult::GetRecord(Ok(kad::GetRecordOk::FinishedWithNoAdditionalRecord { .. })) => {
            if let Some(PendingQuery::Get { key, reply }) = pending.remove(&id) {
                let _ = reply.send(Err(NetError::NotFound(key)));
            }
        }
        kad::QueryResult::GetRecord(Err(e)) => {
            debug!(error = %e, "Record lookup failed");
            if let Some(PendingQuery::Get { key, reply }) = pending.remove(&id) {
                let _ = reply.send(Err(NetError::NotFound(key)));
            }
        }
        kad::QueryResult::PutRecord(result) => {
            if let Some(PendingQuery::Put { reply }) = pending.remove(&id) {
                let _ = reply.send(
                    result
                        .map(|_| ())
                        .map_err(|e| NetError::Replication(e.to_string())),
                );
            }
        }
        other => {
            debug!(result = ?other, "Kademlia query progressed");
        }
    }
}

/// Extract a `PeerId` from a multiaddr, if one is present.
fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| {
        if let Protocol::P2p(peer_id) = p {
            Some(peer_id)
        } else {
            None
        }
    })
}

// ---------------------------------------------------------------------------
// ContentNetwork over the swarm
// ---------------------------------------------------------------------------

/// [`ContentNetwork`] backed by a running swarm task.
#[derive(Clone)]
pub struct SwarmNetwork {
    cmd_tx: mpsc::Sender<SwarmCommand>,
    local: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pins: Arc<Mutex<HashSet<String>>>,
}

impl SwarmNetwork {
    /// Spawn the swarm and bridge its gossip messages into an inbound stream.
    pub async fn start(
        keypair: libp2p::identity::Keypair,
        config: SwarmConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<InboundMessage>, PeerId)> {
        let (cmd_tx, mut notif_rx, peer_id) = spawn_swarm(keypair, config).await?;
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(notification) = notif_rx.recv().await {
                match notification {
                    SwarmNotification::MessageReceived { topic, data, .. } => {
                        if inbound_tx.send(InboundMessage { topic, data }).await.is_err() {
                            break;
                        }
                    }
                    SwarmNotification::PeerConnected { peer_id, .. } => {
                        debug!(peer = %peer_id, "peer online");
                    }
                    SwarmNotification::PeerDisconnected { peer_id } => {
                        debug!(peer = %peer_id, "peer offline");
                    }
                }
            }
            debug!("Swarm bridge finished");
        });

        let network = Self {
            cmd_tx,
            local: Arc::new(Mutex::new(HashMap::new())),
            pins: Arc::new(Mutex::new(HashSet::new())),
        };
        Ok((network, inbound_rx, peer_id))
    }

    pub async fn connected_peers(&self) -> Result<Vec<PeerId>, NetError> {
        let (tx, rx) = oneshot::channel();
        self.send(SwarmCommand::GetPeers(tx)).await?;
        rx.await.map_err(|_| NetError::ChannelClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SwarmCommand::Shutdown).await;
    }

    async fn send(&self, cmd: SwarmCommand) -> Result<(), NetError> {
        self.cmd_tx.send(cmd).await.map_err(|_| NetError::ChannelClosed)
    }

    async fn put_record(&self, key: &str, value: Vec<u8>, replicate: bool) -> Result<(), NetError> {
        let (tx, rx) = oneshot::channel();
        self.send(SwarmCommand::PutRecord {
            key: key.to_string(),
            value,
            replicate,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| NetError::ChannelClosed)?
    }
}

#[async_trait]
impl ContentNetwork for SwarmNetwork {
    async fn add(&self, data: Vec<u8>, pin: bool) -> Result<String, NetError> {
        let address = content_address(&data);
        lock(&self.local).insert(address.clone(), data.clone());
        if pin {
            lock(&self.pins).insert(address.clone());
        }
        self.put_record(&address, data, false).await?;
        Ok(address)
    }

    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Vec<u8>, NetError> {
        if let Some(data) = lock(&self.local).get(address).cloned() {
            return Ok(data);
        }

        let (tx, rx) = oneshot::channel();
        self.send(SwarmCommand::GetRecord {
            key: address.to_string(),
            reply: tx,
        })
        .await?;

        let data = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| NetError::Timeout(timeout))?
            .map_err(|_| NetError::ChannelClosed)??;

        if content_address(&data) != address {
            warn!(address = %address, "Record content does not match its address");
            return Err(NetError::NotFound(address.to_string()));
        }
        lock(&self.local).insert(address.to_string(), data.clone());
        Ok(data)
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), NetError> {
        let (tx, rx) = oneshot::channel();
        self.send(SwarmCommand::Publish {
            topic: topic.to_string(),
            data,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| NetError::ChannelClosed)?
    }

    async fn subscribe(&self, topic: &str) -> Result<(), NetError> {
        debug!(topic = %topic, "Subscribing to topic");
        self.send(SwarmCommand::Subscribe(topic.to_string())).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError> {
        self.send(SwarmCommand::Unsubscribe(topic.to_string())).await
    }

    async fn pin(&self, address: &str) -> Result<(), NetError> {
        lock(&self.pins).insert(address.to_string());
        Ok(())
    }

    async fn unpin(&self, address: &str) -> Result<(), NetError> {
        let was_pinned = lock(&self.pins).remove(address);
        if was_pinned {
            lock(&self.local).remove(address);
            self.send(SwarmCommand::RemoveRecord(address.to_string())).await?;
        }
        Ok(())
    }

    async fn replicate(&self, address: &str) -> Result<(), NetError> {
        let data = lock(&self.local)
            .get(address)
            .cloned()
            .ok_or_else(|| NetError::NotFound(address.to_string()))?;
        self.put_record(address, data, true).await
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
