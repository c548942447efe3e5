use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::info;

use super::OrderedStore;
use crate::QueueResult;

/// [`OrderedStore`] on Redis: string keys for bodies, sorted sets for indices.
///
/// `ZREM` reports how many members it removed, which is the remove-if-present
/// primitive the claim protocol relies on.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://localhost:6379/0`)
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to redis job store");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl OrderedStore for RedisStore {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn next_sequence(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1u64).await?)
    }

    async fn index_add(&self, index: &str, member: &str, score: i64) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(index, member, score).await?;
        Ok(())
    }

    async fn index_head(&self, index: &str) -> QueueResult<Option<(String, i64)>> {
        let mut conn = self.conn.clone();
        let head: Vec<(String, f64)> = conn.zrange_withscores(index, 0, 0).await?;
        Ok(head
            .into_iter()
            .next()
            .map(|(member, score)| (member, score as i64)))
    }

    async fn index_remove(&self, index: &str, member: &str) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(index, member).await?;
        Ok(removed > 0)
    }

    async fn set_add(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }
}
