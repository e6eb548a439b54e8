//! liberty-core: shared library for ssh-liberty-bridge.
//!
//! Provides identity and membership-key handling, the destination address
//! policy, SSH banner parsing, tunnel request types and the shared state
//! store (Redis, plus an in-memory implementation).

pub mod banner;
pub mod error;
pub mod identity;
pub mod policy;
pub mod store;
pub mod tunnel;

// Re-export commonly used items at crate root.
pub use banner::{identification_line, parse_remote_banner, SSH_VERSION_PREFIX};
pub use error::{BridgeError, BridgeResult};
pub use identity::{is_valid_identity, membership_key};
pub use policy::is_public_destination;
pub use store::{MemoryStore, RedisStore, StateStore, StoreKeys};
pub use tunnel::{RejectKind, TunnelRejection, TunnelRequest};
