use std::sync::Arc;

use chrono::Utc;
use eidas_engine::clock::ManualClock;
use eidas_engine::correlation::{CorrelationError, CorrelationManager, MemoryStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pending {
    relay_state: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_consumers_have_one_winner() {
    let manager = Arc::new(CorrelationManager::new(Arc::new(MemoryStore::default())));
    manager
        .put("_R1", &Pending { relay_state: "rs".into() })
        .await
        .unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_and_remove::<Pending>("_R1").await })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(pending) => {
                assert_eq!(pending.relay_state, "rs");
                winners += 1;
            }
            Err(CorrelationError::NotFound(id)) => assert_eq!(id, "_R1"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_unclaimed_entries_swept_after_ttl() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let manager = CorrelationManager::new(Arc::new(MemoryStore::new(clock.clone())))
        .with_clock(clock.clone())
        .with_ttl(std::time::Duration::from_secs(60));

    for id in ["_a", "_b", "_c"] {
        manager.put(id, &Pending { relay_state: id.into() }).await.unwrap();
    }
    clock.advance(chrono::Duration::seconds(61));

    assert_eq!(manager.delete_expired().await.unwrap(), 3);
    assert!(matches!(
        manager.get_and_remove::<Pending>("_a").await,
        Err(CorrelationError::NotFound(_))
    ));
}
