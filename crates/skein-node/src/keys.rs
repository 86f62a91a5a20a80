//! Account key handling for the node binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use directories::ProjectDirs;
use tracing::info;

use skein_shared::constants::KDF_CONTEXT_LIBP2P_KEYPAIR;
use skein_shared::Identity;

const KEY_FILE: &str = "account.key";

/// The configured data directory, or the platform default.
pub fn data_dir(configured: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }
    let dirs = ProjectDirs::from("org", "skein", "skein")
        .ok_or_else(|| anyhow!("no home directory to place node data in"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Load the account from `seed`, or from the key file in `dir`.
/// A missing key file is created with a fresh account.
pub fn load_identity(seed: Option<[u8; 32]>, dir: &Path) -> anyhow::Result<Identity> {
    if let Some(seed) = seed {
        return Ok(Identity::from_secret_bytes(&seed));
    }

    let path = dir.join(KEY_FILE);
    if path.exists() {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let bytes: [u8; 32] = hex::decode(text.trim())
            .context("account key is not hex")?
            .try_into()
            .map_err(|b: Vec<u8>| anyhow!("account key has {} bytes, expected 32", b.len()))?;
        return Ok(Identity::from_secret_bytes(&bytes));
    }

    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let identity = Identity::generate();
    fs::write(&path, hex::encode(identity.secret_bytes()))
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "created new account key");
    Ok(identity)
}

/// Derive the libp2p keypair from the account secret, so the peer id is
/// stable across restarts.
pub fn libp2p_keypair(identity: &Identity) -> anyhow::Result<libp2p::identity::Keypair> {
    // ed25519_from_bytes wants the 32-byte seed followed by the public key
    let seed = blake3::derive_key(KDF_CONTEXT_LIBP2P_KEYPAIR, identity.secret_bytes());
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&seed);
    bytes[32..].copy_from_slice(signing_key.verifying_key().as_bytes());
    libp2p::identity::Keypair::ed25519_from_bytes(bytes)
        .map_err(|e| anyhow!("failed to build libp2p keypair: {e}"))
}
