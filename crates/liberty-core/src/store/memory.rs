//! In-process [`StateStore`] used in tests and local runs.
//!
//! Every operation yields to the scheduler before touching state, so
//! interleavings between concurrent callers look like they would against a
//! remote store.

use super::{StateStore, StoreFuture};
use crate::error::{BridgeError, BridgeResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    members: HashSet<String>,
    connections: HashMap<String, i64>,
    usage: HashMap<String, i64>,
}

/// Memory-backed store. Can be switched to "unreachable" to exercise
/// fail-closed paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unreachable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a membership key to the allow-list.
    pub async fn allow(&self, membership_key: impl Into<String>) {
        self.tables.lock().await.members.insert(membership_key.into());
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Raw session count, without the zero default applied by the trait.
    pub async fn raw_connections(&self, identity: &str) -> Option<i64> {
        self.tables.lock().await.connections.get(identity).copied()
    }

    /// Recorded usage for `identity` (zero if none).
    pub async fn usage(&self, identity: &str) -> i64 {
        self.tables
            .lock()
            .await
            .usage
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    async fn reachable(&self) -> BridgeResult<()> {
        tokio::task::yield_now().await;
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BridgeError::Store("connection refused".to_string()));
        }
        Ok(())
    }
}

impl StateStore for MemoryStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.reachable())
    }

    fn is_member<'a>(&'a self, membership_key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.reachable().await?;
            Ok(self.tables.lock().await.members.contains(membership_key))
        })
    }

    fn connection_count<'a>(&'a self, identity: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            self.reachable().await?;
            Ok(self.raw_connections(identity).await.unwrap_or(0))
        })
    }

    fn add_connections<'a>(&'a self, identity: &'a str, delta: i64) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            self.reachable().await?;
            let mut tables = self.tables.lock().await;
            let count = tables.connections.entry(identity.to_string()).or_insert(0);
            *count += delta;
            Ok(*count)
        })
    }

    fn add_usage<'a>(&'a self, identity: &'a str, bytes: u64) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            self.reachable().await?;
            let mut tables = self.tables.lock().await;
            let total = tables.usage.entry(identity.to_string()).or_insert(0);
            *total = total.saturating_add(i64::try_from(bytes).unwrap_or(i64::MAX));
            Ok(*total)
        })
    }

    fn reset_connections(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.reachable().await?;
            self.tables.lock().await.connections.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_membership() {
        let store = MemoryStore::new();
        store.allow("a::key").await;
        assert!(store.is_member("a::key").await.unwrap());
        assert!(!store.is_member("b::key").await.unwrap());
    }

    #[tokio::test]
    async fn test_counts_default_to_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.connection_count("x").await.unwrap(), 0);
        assert_eq!(store.add_connections("x", 1).await.unwrap(), 1);
        assert_eq!(store.add_connections("x", -1).await.unwrap(), 0);
        store.add_connections("y", 2).await.unwrap();
        store.reset_connections().await.unwrap();
        assert_eq!(store.raw_connections("y").await, None);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let store = MemoryStore::new();
        store.set_unreachable(true);
        assert!(store.ping().await.is_err());
        assert!(store.is_member("a").await.is_err());
        store.set_unreachable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_usage_accumulates() {
        let store = MemoryStore::new();
        store.add_usage("x", 10).await.unwrap();
        store.add_usage("x", 32).await.unwrap();
        assert_eq!(store.usage("x").await, 42);
    }
}
