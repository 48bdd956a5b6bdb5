use super::{CorrelationError, CorrelationStore, PutOutcome};
use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

type Result<T> = std::result::Result<T, CorrelationError>;

#[derive(Debug, Serialize, Deserialize)]
struct CorrelationEntry<T> {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    context: T,
}

/// Keeps request contexts until their response arrives.
#[derive(Clone)]
pub struct CorrelationManager {
    store: Arc<dyn CorrelationStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
}

impl std::fmt::Debug for CorrelationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationManager")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl CorrelationManager {
    /// Creates a manager over `store`.
    ///
    /// Entries expire after 5 minutes and at most 100,000 may be pending.
    /// Use [with_ttl][wt] and [with_max_entries][wme] to change that.
    ///
    /// [wt]: Self::with_ttl
    /// [wme]: Self::with_max_entries
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// When this many requests are pending, new ones are refused until some
    /// are consumed or expire.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records the context of a request that was sent onward.
    pub async fn put(&self, request_id: &str, context: &impl Serialize) -> Result<()> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let entry = CorrelationEntry {
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            context,
        };
        let bytes = serde_json::to_vec(&entry)?;

        match self
            .store
            .put(request_id, &bytes, self.ttl, self.max_entries)
            .await?
        {
            PutOutcome::Stored => {
                debug!(request_id, "Stored request context");
                Ok(())
            }
            PutOutcome::Duplicate => {
                warn!(request_id, "Request ID is already pending");
                Err(CorrelationError::Duplicate(request_id.to_string()))
            }
            PutOutcome::Full => {
                warn!(request_id, max_entries = self.max_entries, "Correlation store is full");
                Err(CorrelationError::MaxEntries)
            }
        }
    }

    /// Consumes the context stored for `request_id`. A second call for the
    /// same ID fails with [`CorrelationError::NotFound`].
    pub async fn get_and_remove<T: DeserializeOwned>(&self, request_id: &str) -> Result<T> {
        let Some(bytes) = self.store.get_and_remove(request_id).await? else {
            warn!(request_id, "No pending request for response");
            return Err(CorrelationError::NotFound(request_id.to_string()));
        };

        let entry: CorrelationEntry<T> = serde_json::from_slice(&bytes)?;
        if entry.expires_at <= self.clock.now() {
            warn!(request_id, created_at = %entry.created_at, "Pending request expired");
            return Err(CorrelationError::NotFound(request_id.to_string()));
        }
        debug!(request_id, "Consumed request context");
        Ok(entry.context)
    }

    /// Evicts entries whose TTL has elapsed.
    pub async fn delete_expired(&self) -> Result<usize> {
        let removed = self.store.delete_expired().await?;
        if removed > 0 {
            debug!(removed, "Evicted expired correlation entries");
        }
        Ok(removed)
    }

    /// Runs [delete_expired][de] every `period`. Never returns; spawn it.
    ///
    /// [de]: Self::delete_expired
    pub async fn sweep_expired(self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = self.delete_expired().await {
                error!(%err, "Correlation sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::correlation::MemoryStore;
    use crate::correlation::store::MockCorrelationStore;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Context {
        issuer: String,
        level: u8,
    }

    fn context() -> Context {
        Context {
            issuer: "https://sp.example/metadata".into(),
            level: 3,
        }
    }

    fn manager(clock: Arc<ManualClock>) -> CorrelationManager {
        CorrelationManager::new(Arc::new(MemoryStore::new(clock.clone())))
            .with_clock(clock)
            .with_ttl(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_consumed_exactly_once() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(clock);

        manager.put("_req", &context()).await.unwrap();
        let stored: Context = manager.get_and_remove("_req").await.unwrap();
        assert_eq!(stored, context());

        let again = manager.get_and_remove::<Context>("_req").await;
        assert!(matches!(again, Err(CorrelationError::NotFound(id)) if id == "_req"));
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_ids() {
        let manager = manager(Arc::new(ManualClock::new(Utc::now())));
        assert!(matches!(
            manager.get_and_remove::<Context>("_never").await,
            Err(CorrelationError::NotFound(_))
        ));

        manager.put("_req", &context()).await.unwrap();
        assert!(matches!(
            manager.put("_req", &context()).await,
            Err(CorrelationError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(clock.clone());

        manager.put("_late", &context()).await.unwrap();
        manager.put("_sweep", &context()).await.unwrap();
        clock.advance(chrono::Duration::seconds(61));

        assert!(matches!(
            manager.get_and_remove::<Context>("_late").await,
            Err(CorrelationError::NotFound(_))
        ));
        assert_eq!(manager.delete_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_max_entries() {
        let manager = manager(Arc::new(ManualClock::new(Utc::now()))).with_max_entries(1);
        manager.put("_one", &context()).await.unwrap();
        assert!(matches!(
            manager.put("_two", &context()).await,
            Err(CorrelationError::MaxEntries)
        ));
    }

    #[tokio::test]
    async fn test_expired_entries_do_not_fill_the_store() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = manager(clock.clone()).with_max_entries(1);

        manager.put("_old", &context()).await.unwrap();
        clock.advance(chrono::Duration::seconds(120));
        manager.put("_new", &context()).await.unwrap();

        let stored: Context = manager.get_and_remove("_new").await.unwrap();
        assert_eq!(stored, context());
    }

    #[tokio::test]
    async fn test_store_limits_passed_through() {
        let mut store = MockCorrelationStore::new();
        store
            .expect_put()
            .withf(|id, _, ttl, max| {
                id == "_req" && *ttl == Duration::from_secs(30) && *max == 7
            })
            .times(1)
            .returning(|_, _, _, _| Ok(PutOutcome::Stored));

        let manager = CorrelationManager::new(Arc::new(store))
            .with_ttl(Duration::from_secs(30))
            .with_max_entries(7);
        manager.put("_req", &context()).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error() {
        let mut store = MockCorrelationStore::new();
        store
            .expect_get_and_remove()
            .returning(|_| Ok(Some(b"not json".to_vec())));

        let manager = CorrelationManager::new(Arc::new(store));
        assert!(matches!(
            manager.get_and_remove::<Context>("_req").await,
            Err(CorrelationError::SerdeJson(_))
        ));
    }
}
