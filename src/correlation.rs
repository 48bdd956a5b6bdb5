//! Correlation & Anti-Replay Store: keeps the context of every request sent
//! onward until the matching response consumes it, at most once.

mod manager;
mod skew;
pub mod store;

pub use manager::{CorrelationManager, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
pub use skew::{SkewError, validate_skew};
pub use store::{CorrelationStore, CorrelationStoreError, MemoryStore, PutOutcome, RedisStore};

#[derive(thiserror::Error, Debug)]
pub enum CorrelationError {
    #[error("No pending request {0}: unknown, already answered or expired")]
    NotFound(String),

    #[error("Request {0} is already pending")]
    Duplicate(String),

    #[error("Maximum number of pending requests reached")]
    MaxEntries,

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] CorrelationStoreError),
}
