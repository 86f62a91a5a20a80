#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use skein_core::{CafeOutbox, CoreConfig, Inbound, Node, OutboxConfig};
use skein_net::{InboundMessage, MemoryHub, MemoryNetwork};
use skein_shared::Identity;
use skein_store::Database;

pub struct Peer {
    pub node: Node,
    pub identity: Identity,
    pub network: MemoryNetwork,
    pub inbound: mpsc::UnboundedReceiver<InboundMessage>,
    pub outbox: Arc<CafeOutbox>,
}

pub async fn peer(hub: &MemoryHub, name: &str) -> Peer {
    let db = Database::open_in_memory().unwrap();
    peer_with(hub, name, Identity::generate(), db).await
}

pub async fn peer_at(hub: &MemoryHub, name: &str, identity: Identity, path: &Path) -> Peer {
    let db = Database::open_at(path).unwrap();
    peer_with(hub, name, identity, db).await
}

async fn peer_with(hub: &MemoryHub, name: &str, identity: Identity, db: Database) -> Peer {
    let (network, inbound) = hub.connect(name);
    let db = Arc::new(Mutex::new(db));
    let shared = Arc::new(network.clone());
    let outbox = CafeOutbox::spawn(db.clone(), shared.clone(), OutboxConfig::default());
    let config = CoreConfig {
        display_name: name.to_string(),
        ..CoreConfig::default()
    };
    let node = Node::open(identity.clone(), db, shared, outbox.clone(), config)
        .await
        .unwrap();
    Peer {
        node,
        identity,
        network,
        inbound,
        outbox,
    }
}

impl Peer {
    /// Handle every message delivered so far, in order.
    pub async fn drain(&mut self) -> Vec<Inbound> {
        let mut handled = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            handled.push(self.node.handle_message(message).await.unwrap());
        }
        handled
    }
}
