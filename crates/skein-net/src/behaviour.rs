//! Composed libp2p `NetworkBehaviour` for skein nodes.
//!
//! Combines GossipSub (block and invite fan-out), Kademlia (peer discovery
//! and content records) and Identify (protocol negotiation).

use libp2p::{
    gossipsub, identify,
    kad::{self, store::MemoryStore},
    swarm::NetworkBehaviour,
};

/// All sub-behaviours are driven by the single swarm event loop.
/// Construction is handled by [`super::transport::build_swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "SkeinEvent")]
pub struct SkeinBehaviour {
    /// Pub/sub for thread topics and account inboxes
    pub gossipsub: gossipsub::Behaviour,
    /// DHT holding content-addressed blocks as records
    pub kademlia: kad::Behaviour<MemoryStore>,
    /// Protocol identification and listen address exchange
    pub identify: identify::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum SkeinEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for SkeinEvent {
    fn from(event: gossipsub::Event) -> Self {
        SkeinEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for SkeinEvent {
    fn from(event: kad::Event) -> Self {
        SkeinEvent::Kademlia(event)
    }
}

impl From<identify::Event> for SkeinEvent {
    fn from(event: identify::Event) -> Self {
        SkeinEvent::Identify(event)
    }
}
