//! # skein-node
//!
//! Headless thread node. Opens the local datastore, joins the libp2p swarm
//! and keeps every known thread in sync until interrupted.

mod keys;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use libp2p::Multiaddr;
use tracing::{info, warn};

use skein_core::logging::{self, DEFAULT_DIRECTIVE};
use skein_core::{sync, CafeOutbox, Node, NodeConfig};
use skein_net::{SwarmConfig, SwarmNetwork};
use skein_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    let _log = logging::init(DEFAULT_DIRECTIVE)?;
    info!("Starting skein node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 2. Account and datastore
    // -----------------------------------------------------------------------
    let data_dir = keys::data_dir(config.data_dir.as_deref())?;
    let identity = keys::load_identity(config.account_seed, &data_dir)?;
    let db = Database::open_in_dir(&data_dir).context("opening datastore")?;
    let db = Arc::new(Mutex::new(db));

    // -----------------------------------------------------------------------
    // 3. Swarm
    // -----------------------------------------------------------------------
    let swarm_config = SwarmConfig {
        listen_addrs: vec![config.listen_addr.parse::<Multiaddr>()?],
        bootstrap: parse_bootstrap(&config.bootstrap),
    };
    let keypair = keys::libp2p_keypair(&identity)?;
    let (network, inbound, peer_id) = SwarmNetwork::start(keypair, swarm_config).await?;
    info!(peer_id = %peer_id, "Swarm started");

    // -----------------------------------------------------------------------
    // 4. Thread engine
    // -----------------------------------------------------------------------
    let shared = Arc::new(network.clone());
    let outbox = CafeOutbox::spawn(db.clone(), shared.clone(), config.outbox());
    let node = Node::open(identity, db, shared, outbox.clone(), config.core()).await?;
    let account = node.add_account_thread().await?;
    info!(
        address = %node.address(),
        account_thread = %account.id(),
        "Node ready"
    );

    // -----------------------------------------------------------------------
    // 5. Run until the swarm closes or Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        _ = sync::run(node.clone(), sync::from_receiver(inbound)) => {
            warn!("Inbound stream closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    outbox.shutdown().await;
    network.shutdown().await;
    Ok(())
}

fn parse_bootstrap(list: &[String]) -> Vec<Multiaddr> {
    list.iter()
        .filter_map(|addr| match addr.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(addr = %addr, error = %e, "Skipping bad bootstrap address");
                None
            }
        })
        .collect()
}
