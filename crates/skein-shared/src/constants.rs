/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/skein/1.0.0";

/// Application name
pub const APP_NAME: &str = "skein";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum encoded envelope size in bytes (256 KiB)
pub const MAX_BLOCK_SIZE: usize = 262_144;

/// Maximum GossipSub message size in bytes (512 KiB)
pub const MAX_MESSAGE_SIZE: usize = 524_288;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4001;

/// Default timeout for fetching a block or invite from the network
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Prefix of a flag block target
pub const FLAG_TARGET_PREFIX: &str = "flag-";

/// Prefix of an ignore block target
pub const IGNORE_TARGET_PREFIX: &str = "ignore-";

/// Thread keys reserved for internal threads, hidden from listings
pub const INTERNAL_THREAD_KEYS: &[&str] = &["avatars"];

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SEALED_BOX: &str = "skein-sealed-box-v1";
pub const KDF_CONTEXT_ACCOUNT_THREAD: &str = "skein-account-thread-key-v1";
pub const KDF_CONTEXT_DB_KEY: &str = "skein-db-key-v1";
pub const KDF_CONTEXT_LIBP2P_KEYPAIR: &str = "skein-libp2p-keypair-v1";
