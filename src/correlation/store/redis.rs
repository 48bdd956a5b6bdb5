use crate::correlation::store::{CorrelationStore, PutOutcome, Result};
use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};
use std::sync::LazyLock;
use std::time::Duration;

// One hash tag keeps every key of the store in the same cluster slot, so the
// scripts below may touch an entry and the index together.
const KEY_PREFIX: &str = "eidas:correlation:{pending}:";
const INDEX_KEY: &str = "eidas:correlation:{pending}:index";

// KEYS: entry, index. ARGV: data, ttl in ms, max entries.
// Returns 1 when stored, 0 for a live duplicate, -1 when full.
static PUT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local time = redis.call('TIME')
        local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
        redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', now)
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return 0
        end
        if redis.call('ZCARD', KEYS[2]) >= tonumber(ARGV[3]) then
            return -1
        end
        redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
        redis.call('ZADD', KEYS[2], now + tonumber(ARGV[2]), KEYS[1])
        return 1
        ",
    )
});

// KEYS: entry, index
static GET_AND_REMOVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local value = redis.call('GETDEL', KEYS[1])
        redis.call('ZREM', KEYS[2], KEYS[1])
        return value
        ",
    )
});

// KEYS: index. Returns the number of index members dropped.
static DELETE_EXPIRED: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local time = redis.call('TIME')
        local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
        return redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now)
        ",
    )
});

/// A Redis correlation store.
///
/// Entries expire through Redis key TTLs. A sorted set indexes the pending
/// IDs by expiry, in server time, and bounds how many may be live. Every
/// operation is a single script, so the limit holds and consumption stays
/// at-most-once across engine instances sharing the server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Creates a new Redis store from a connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn key(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}

#[async_trait]
impl CorrelationStore for RedisStore {
    async fn put(
        &self,
        id: &str,
        data: &[u8],
        ttl: Duration,
        max_entries: usize,
    ) -> Result<PutOutcome> {
        let mut conn = self.conn.clone();
        let reply: i64 = PUT
            .key(key(id))
            .key(INDEX_KEY)
            .arg(data)
            .arg(ttl.as_millis().max(1) as u64)
            .arg(max_entries)
            .invoke_async(&mut conn)
            .await?;
        Ok(match reply {
            1 => PutOutcome::Stored,
            0 => PutOutcome::Duplicate,
            _ => PutOutcome::Full,
        })
    }

    async fn get_and_remove(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let result: Option<Vec<u8>> = GET_AND_REMOVE
            .key(key(id))
            .key(INDEX_KEY)
            .invoke_async(&mut conn)
            .await?;
        Ok(result)
    }

    /// The entries themselves are gone once their TTL passes; this drops
    /// their index members.
    async fn delete_expired(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = DELETE_EXPIRED
            .key(INDEX_KEY)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        self.delete_expired().await?;
        let mut conn = self.conn.clone();
        let count: usize = redis::cmd("ZCARD")
            .arg(INDEX_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}
