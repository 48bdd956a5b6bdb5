use ::redis::RedisError;
use async_trait::async_trait;
use color_eyre::Report;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

pub(crate) type Result<T> = std::result::Result<T, CorrelationStoreError>;

/// Error type for correlation store backends.
#[derive(Debug)]
pub struct CorrelationStoreError {
    error: Report,
}

impl CorrelationStoreError {
    pub fn msg<T>(message: T) -> Self
    where
        T: fmt::Debug + fmt::Display + Send + Sync + 'static,
    {
        Self {
            error: Report::msg(message),
        }
    }
}

impl StdError for CorrelationStoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for CorrelationStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl From<RedisError> for CorrelationStoreError {
    fn from(error: RedisError) -> Self {
        Self {
            error: Report::new(error),
        }
    }
}

/// Result of [`CorrelationStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// A live entry already exists under the ID and was left untouched
    Duplicate,
    /// `max_entries` live entries are pending
    Full,
}

/// Storage backend for pending request contexts.
///
/// `put` and `get_and_remove` are atomic with respect to each other: for a
/// given ID at most one `get_and_remove` ever returns the stored value.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Store `data` under `id` for `ttl`, unless `max_entries` live entries
    /// are already pending. Expired entries never count against the limit.
    async fn put(
        &self,
        id: &str,
        data: &[u8],
        ttl: Duration,
        max_entries: usize,
    ) -> Result<PutOutcome>;

    /// Remove and return the entry stored under `id`, if it is still live.
    async fn get_and_remove(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Evict entries whose TTL has elapsed. Returns how many were removed.
    async fn delete_expired(&self) -> Result<usize>;

    /// Number of live entries.
    async fn count(&self) -> Result<usize>;
}
