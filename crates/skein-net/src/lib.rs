// Content network for skein threads: a capability trait plus an in-process
// hub and a libp2p implementation (QUIC + GossipSub + Kademlia records).

pub mod behaviour;
pub mod error;
pub mod network;
pub mod swarm;
pub mod topics;
pub mod transport;

pub use behaviour::{SkeinBehaviour, SkeinEvent};
pub use error::NetError;
pub use network::{ContentNetwork, InboundMessage, MemoryHub, MemoryNetwork};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNetwork, SwarmNotification};
pub use topics::TopicKind;
pub use transport::build_swarm;
