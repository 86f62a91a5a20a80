//! Thread engine: encrypted multi-writer block graphs replicated over a
//! content-addressed network.

pub mod config;
pub mod error;
pub mod feed;
mod handlers;
pub mod invites;
pub mod logging;
pub mod merge;
pub mod node;
pub mod outbox;
pub mod registry;
pub mod services;
pub mod sync;
pub mod thread;

pub use config::{CoreConfig, NodeConfig, OutboxConfig};
pub use error::{CoreError, ErrorKind};
pub use feed::{FeedItem, FeedKind, FeedMode, FeedRequest, User};
pub use invites::InviteInfo;
pub use logging::LogHandle;
pub use node::{AddThreadConfig, Inbound, Node, SchemaPreset, SchemaSource, Summary, ThreadView};
pub use outbox::{CafeOutbox, Outbox};
pub use registry::ThreadRegistry;
pub use services::{lock_db, SharedDatabase, ThreadUpdate, UpdateKind};
pub use thread::{Applied, Thread};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;

    use skein_net::{InboundMessage, MemoryHub, MemoryNetwork};
    use skein_shared::crypto::generate_symmetric_key;
    use skein_shared::{Identity, Sharing, ThreadType};
    use skein_store::{Database, ThreadRecord, ThreadState};

    use crate::config::{CoreConfig, OutboxConfig};
    use crate::node::Node;
    use crate::outbox::CafeOutbox;
    use crate::services::Services;

    /// A node on an in-process hub with an in-memory datastore.
    pub struct TestPeer {
        pub node: Node,
        pub services: Arc<Services>,
        pub hub: MemoryHub,
        pub network: MemoryNetwork,
        pub inbound: mpsc::UnboundedReceiver<InboundMessage>,
    }

    impl TestPeer {
        pub async fn new(name: &str) -> Self {
            Self::on(&MemoryHub::new(), name).await
        }

        pub async fn on(hub: &MemoryHub, name: &str) -> Self {
            let (network, inbound) = hub.connect(name);
            let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
            let shared = Arc::new(network.clone());
            let outbox = CafeOutbox::spawn(db.clone(), shared.clone(), OutboxConfig::default());
            let config = CoreConfig {
                display_name: name.to_string(),
                ..CoreConfig::default()
            };
            let node = Node::open(Identity::generate(), db, shared, outbox, config)
                .await
                .unwrap();
            Self {
                services: node.services().clone(),
                node,
                hub: hub.clone(),
                network,
                inbound,
            }
        }
    }

    /// A fresh Open/Shared thread initiated by the local account.
    pub fn new_record(services: &Services, key: &str) -> ThreadRecord {
        let sk = Identity::generate();
        ThreadRecord {
            id: sk.thread_id(),
            key: key.to_string(),
            sk: *sk.secret_bytes(),
            content_key: generate_symmetric_key(),
            name: key.to_string(),
            schema: None,
            initiator: services.address(),
            thread_type: ThreadType::Open,
            sharing: Sharing::Shared,
            members: Vec::new(),
            state: ThreadState::Loaded,
            heads: Vec::new(),
        }
    }
}
