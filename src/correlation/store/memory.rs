use crate::clock::{Clock, SystemClock};
use crate::correlation::store::{CorrelationStore, CorrelationStoreError, PutOutcome, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// An in-memory correlation store.
///
/// Entries live in a sharded map; removal is atomic per key, so a concurrent
/// `get_and_remove` race has exactly one winner. A slot is reserved on an
/// atomic counter before an entry is inserted, so concurrent puts never
/// exceed the limit.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
    /// Entries in the map, live or not
    len: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            len: Arc::new(AtomicUsize::new(0)),
            clock,
        }
    }

    fn try_reserve(&self, max_entries: usize) -> bool {
        self.len
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_entries).then_some(n + 1)
            })
            .is_ok()
    }

    /// Reserve a slot, evicting expired entries when the store looks full
    fn reserve(&self, max_entries: usize, now: DateTime<Utc>) -> bool {
        if self.try_reserve(max_entries) {
            return true;
        }
        self.purge(now);
        self.try_reserve(max_entries)
    }

    fn release(&self) {
        self.len.fetch_sub(1, Ordering::SeqCst);
    }

    fn purge(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.expires_at > now;
            if !live {
                removed += 1;
            }
            live
        });
        self.len.fetch_sub(removed, Ordering::SeqCst);
        removed
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn put(
        &self,
        id: &str,
        data: &[u8],
        ttl: Duration,
        max_entries: usize,
    ) -> Result<PutOutcome> {
        let ttl = chrono::Duration::from_std(ttl).map_err(CorrelationStoreError::msg)?;
        let now = self.clock.now();
        if !self.reserve(max_entries, now) {
            return Ok(PutOutcome::Full);
        }

        let entry = StoredEntry {
            data: data.to_vec(),
            expires_at: now + ttl,
        };
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                // the slot is already counted
                self.release();
                if occupied.get().expires_at > now {
                    return Ok(PutOutcome::Duplicate);
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(PutOutcome::Stored)
    }

    async fn get_and_remove(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let Some((_, entry)) = self.entries.remove(id) else {
            return Ok(None);
        };
        self.release();
        if entry.expires_at > self.clock.now() {
            Ok(Some(entry.data))
        } else {
            Ok(None)
        }
    }

    async fn delete_expired(&self) -> Result<usize> {
        Ok(self.purge(self.clock.now()))
    }

    async fn count(&self) -> Result<usize> {
        let now = self.clock.now();
        Ok(self.entries.iter().filter(|e| e.expires_at > now).count())
    }
}
