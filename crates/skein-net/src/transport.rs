use libp2p::identity::Keypair;
use tracing::info;

use crate::behaviour::SkeinBehaviour;

/// Build a QUIC swarm with the skein behaviour.
///
/// Gossip message ids are the BLAKE3 hash of the payload, so the same block
/// published by two peers is deduplicated by the mesh.
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<libp2p::Swarm<SkeinBehaviour>> {
    use std::time::Duration;

    use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
    use libp2p::kad::{
        self,
        store::{MemoryStore, MemoryStoreConfig},
    };
    use libp2p::{identify, SwarmBuilder};

    use skein_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};

    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> std::result::Result<SkeinBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            let local_peer_id = key.public().to_peer_id();

            let message_id_fn = |message: &gossipsub::Message| {
                MessageId::from(blake3::hash(&message.data).to_hex().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_MESSAGE_SIZE)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("GossipSub config: {e}").into()
                })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                format!("GossipSub init: {e}").into()
            })?;

            // blocks travel as records, so lift the small default limits
            let store = MemoryStore::with_config(
                local_peer_id,
                MemoryStoreConfig {
                    max_value_bytes: MAX_MESSAGE_SIZE,
                    ..Default::default()
                },
            );
            let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
            kad_config.set_max_packet_size(MAX_MESSAGE_SIZE);
            let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify_config =
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60));
            let identify = identify::Behaviour::new(identify_config);

            Ok(SkeinBehaviour {
                gossipsub,
                kademlia,
                identify,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(
        peer_id = %swarm.local_peer_id(),
        "Built skein swarm with QUIC transport"
    );

    Ok(swarm)
}
