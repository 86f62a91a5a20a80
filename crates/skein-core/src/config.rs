//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a node can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use skein_shared::constants::{DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_QUIC_PORT};

/// Full node configuration.
#[derive(Clone)]
pub struct NodeConfig {
    /// Directory holding the database and the account key.
    /// Env: `SKEIN_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// libp2p multiaddr to listen on (QUIC).
    /// Env: `SKEIN_LISTEN_ADDR`
    /// Default: `/ip4/0.0.0.0/udp/4001/quic-v1`
    pub listen_addr: String,

    /// Comma-separated multiaddrs dialed on startup.
    /// Env: `SKEIN_BOOTSTRAP`
    /// Default: none.
    pub bootstrap: Vec<String>,

    /// Upper bound on a single block or invite fetch.
    /// Env: `SKEIN_FETCH_TIMEOUT_SECS`
    /// Default: `60`
    pub fetch_timeout: Duration,

    /// Pending flush signals the outbox worker will buffer.
    /// Env: `SKEIN_OUTBOX_CAPACITY`
    /// Default: `32`
    pub outbox_capacity: usize,

    /// Failed replication attempts before a request is dropped.
    /// Env: `SKEIN_OUTBOX_RETRIES`
    /// Default: `8`
    pub outbox_retries: u32,

    /// 32-byte account secret, hex encoded.
    /// Env: `SKEIN_ACCOUNT_SEED`
    /// Default: none (a key file in the data dir is used instead).
    pub account_seed: Option<[u8; 32]>,

    /// Name announced to peers.
    /// Env: `SKEIN_DISPLAY_NAME`
    /// Default: empty.
    pub display_name: String,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("data_dir", &self.data_dir)
            .field("listen_addr", &self.listen_addr)
            .field("bootstrap", &self.bootstrap)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("outbox_capacity", &self.outbox_capacity)
            .field("outbox_retries", &self.outbox_retries)
            .field("account_seed", &self.account_seed.map(|_| "<redacted>"))
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            listen_addr: format!("/ip4/0.0.0.0/udp/{DEFAULT_QUIC_PORT}/quic-v1"),
            bootstrap: Vec::new(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            outbox_capacity: 32,
            outbox_retries: 8,
            account_seed: None,
            display_name: String::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`NodeConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("SKEIN_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(addr) = lookup("SKEIN_LISTEN_ADDR") {
            if addr.starts_with('/') {
                config.listen_addr = addr;
            } else {
                tracing::warn!(value = %addr, "Invalid SKEIN_LISTEN_ADDR, using default");
            }
        }

        if let Some(list) = lookup("SKEIN_BOOTSTRAP") {
            config.bootstrap = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(val) = lookup("SKEIN_FETCH_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.fetch_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid SKEIN_FETCH_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("SKEIN_OUTBOX_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbox_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid SKEIN_OUTBOX_CAPACITY, using default"),
            }
        }

        if let Some(val) = lookup("SKEIN_OUTBOX_RETRIES") {
            match val.parse::<u32>() {
                Ok(n) => config.outbox_retries = n,
                Err(_) => tracing::warn!(value = %val, "Invalid SKEIN_OUTBOX_RETRIES, using default"),
            }
        }

        if let Some(seed) = lookup("SKEIN_ACCOUNT_SEED") {
            match parse_seed(&seed) {
                Ok(bytes) => config.account_seed = Some(bytes),
                Err(e) => tracing::warn!(error = %e, "Invalid SKEIN_ACCOUNT_SEED, ignoring"),
            }
        }

        if let Some(name) = lookup("SKEIN_DISPLAY_NAME") {
            config.display_name = name.trim().to_string();
        }

        // RUST_LOG is read by the EnvFilter in `logging`.

        config
    }

    /// The subset the thread engine needs.
    pub fn core(&self) -> CoreConfig {
        CoreConfig {
            fetch_timeout: self.fetch_timeout,
            display_name: self.display_name.clone(),
            ..CoreConfig::default()
        }
    }

    pub fn outbox(&self) -> OutboxConfig {
        OutboxConfig {
            capacity: self.outbox_capacity,
            max_retries: self.outbox_retries,
            ..OutboxConfig::default()
        }
    }
}

/// Settings of the thread engine.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub fetch_timeout: Duration,
    pub display_name: String,
    /// Items buffered ahead of a slow feed stream consumer.
    pub stream_buffer: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            display_name: String::new(),
            stream_buffer: 16,
        }
    }
}

/// Settings of the outbox worker.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub capacity: usize,
    pub max_retries: u32,
    /// Delay before the first retry. Doubles per failed attempt.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Requests handled per flush pass.
    pub batch_size: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            max_retries: 8,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            batch_size: 64,
        }
    }
}

fn parse_seed(hex_seed: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_seed.trim()).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::from_lookup(lookup(&[]));
        assert_eq!(config.fetch_timeout, Duration::from_secs(60));
        assert!(config.listen_addr.ends_with("/quic-v1"));
        assert!(config.account_seed.is_none());
    }

    #[test]
    fn test_values_are_read() {
        let seed = "ab".repeat(32);
        let config = NodeConfig::from_lookup(lookup(&[
            ("SKEIN_FETCH_TIMEOUT_SECS", "5"),
            ("SKEIN_BOOTSTRAP", "/ip4/1.2.3.4/udp/4001/quic-v1, ,/ip4/5.6.7.8/udp/4001/quic-v1"),
            ("SKEIN_ACCOUNT_SEED", seed.as_str()),
            ("SKEIN_DISPLAY_NAME", "  ada "),
        ]));
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.bootstrap.len(), 2);
        assert_eq!(config.account_seed, Some([0xab; 32]));
        assert_eq!(config.core().display_name, "ada");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("SKEIN_FETCH_TIMEOUT_SECS", "soon"),
            ("SKEIN_OUTBOX_CAPACITY", "0"),
            ("SKEIN_ACCOUNT_SEED", "abcd"),
            ("SKEIN_LISTEN_ADDR", "localhost:4001"),
        ]));
        assert_eq!(config.fetch_timeout, Duration::from_secs(60));
        assert_eq!(config.outbox().capacity, 32);
        assert!(config.account_seed.is_none());
        assert_eq!(config.listen_addr, NodeConfig::default().listen_addr);
    }
}
