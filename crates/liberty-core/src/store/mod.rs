//! Shared state store abstraction.
//!
//! The gateway keeps three pieces of shared state outside the process:
//!
//! - the allow-list of membership keys (a set),
//! - live connection counts per identity (a hash),
//! - cumulative usage in bytes per identity (a hash).
//!
//! Every operation here is atomic on the store side. Check-then-increment
//! sequences are not, and must be serialized by the caller.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::BridgeResult;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`StateStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = BridgeResult<T>> + Send + 'a>>;

/// Store key names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    /// Set of `identity::credential` membership keys.
    pub users: String,
    /// Hash of identity to open session count.
    pub connections: String,
    /// Hash of identity to transferred bytes.
    pub usage: String,
}

impl StoreKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            users: format!("{prefix}:users"),
            connections: format!("{prefix}:connections"),
            usage: format!("{prefix}:users-usage"),
        }
    }
}

/// Keys used by the provisioning tooling: `ssh-server:*`.
impl Default for StoreKeys {
    fn default() -> Self {
        Self::with_prefix("ssh-server")
    }
}

/// Operations the gateway performs against the shared store.
pub trait StateStore: Send + Sync {
    /// Check that the store is reachable.
    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Whether `membership_key` is in the allow-list.
    fn is_member<'a>(&'a self, membership_key: &'a str) -> StoreFuture<'a, bool>;

    /// Current open session count for `identity`. Missing or unparseable
    /// entries read as zero.
    fn connection_count<'a>(&'a self, identity: &'a str) -> StoreFuture<'a, i64>;

    /// Atomically add `delta` to the session count, returning the new value.
    fn add_connections<'a>(&'a self, identity: &'a str, delta: i64) -> StoreFuture<'a, i64>;

    /// Atomically add `bytes` to the usage counter, returning the new value.
    fn add_usage<'a>(&'a self, identity: &'a str, bytes: u64) -> StoreFuture<'a, i64>;

    /// Drop every session count. Run once at startup, before accepting.
    fn reset_connections(&self) -> StoreFuture<'_, ()>;
}
