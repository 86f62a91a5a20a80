use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkeinError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invite error: {0}")]
    Invite(#[from] crate::invite::InviteError),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Recipient key is not a valid ed25519 point")]
    InvalidRecipient,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    BadSignature,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Envelope too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}
