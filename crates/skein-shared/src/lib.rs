//! Shared protocol primitives for skein threads: identities, thread keys,
//! the block envelope codec, invites and the sharing policy.

pub mod block;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod invite;
pub mod policy;
pub mod types;

pub use block::{BlockBody, BlockEnvelope, BlockType};
pub use error::{CodecError, CryptoError, IdentityError, SkeinError};
pub use identity::Identity;
pub use policy::{Sharing, SharingPolicy, ThreadType};
pub use types::{BlockId, ThreadId, UserId};
