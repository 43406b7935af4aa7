//! Key-value capability shared by the revocation list, the read cache and the
//! tombstone store.
//!
//! Every operation is atomic at single-key granularity; `set_many_ex` is the
//! only multi-key write and is applied as one unit.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Store `value` under `key`, expiring after `ttl_secs` (minimum one second).
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()>;

    /// Store several `(key, value, ttl_secs)` entries atomically.
    async fn set_many_ex(&self, entries: &[(String, String, u64)]) -> anyhow::Result<()>;

    /// Returns `true` if a key was removed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Keys matching a glob pattern. Only the trailing `*` form
    /// (`prefix:*`) is relied on by callers.
    async fn keys_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

/// Redis-backed store. Expiry is handled by Redis itself.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KeyValueStore for RedisKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1)).await?;
        Ok(())
    }

    async fn set_many_ex(&self, entries: &[(String, String, u64)]) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        // MULTI/EXEC so both halves of a pair land together
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value, ttl_secs) in entries {
            pipe.set_ex(key, value, (*ttl_secs).max(1)).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn keys_matching(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        // SCAN rather than KEYS so a large keyspace does not block the server
        let mut conn = self.conn.clone();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists::<_, bool>(key).await?)
    }
}

/// Match `key` against the subset of glob syntax the services use:
/// an exact key, or a prefix followed by a single trailing `*`.
pub(crate) fn glob_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}
