//! Redis-backed [`StateStore`].

use super::{StateStore, StoreFuture, StoreKeys};
use crate::error::BridgeResult;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

/// Store client over a multiplexed, auto-reconnecting Redis connection.
///
/// Cloning is cheap; all clones share the same connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: StoreKeys,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (`redis://…` or `rediss://…`).
    pub async fn connect(url: &str, keys: StoreKeys) -> BridgeResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(users = %keys.users, "connected to redis");
        Ok(Self { conn, keys })
    }
}

impl StateStore for RedisStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
    }

    fn is_member<'a>(&'a self, membership_key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let present: bool = conn.sismember(&self.keys.users, membership_key).await?;
            Ok(present)
        })
    }

    fn connection_count<'a>(&'a self, identity: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn.hget(&self.keys.connections, identity).await?;
            Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0))
        })
    }

    fn add_connections<'a>(&'a self, identity: &'a str, delta: i64) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let count: i64 = conn.hincr(&self.keys.connections, identity, delta).await?;
            Ok(count)
        })
    }

    fn add_usage<'a>(&'a self, identity: &'a str, bytes: u64) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let total: i64 = conn.hincr(&self.keys.usage, identity, bytes).await?;
            Ok(total)
        })
    }

    fn reset_connections(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: () = conn.del(&self.keys.connections).await?;
            Ok(())
        })
    }
}
