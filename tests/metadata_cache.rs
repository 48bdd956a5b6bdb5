mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use eidas_engine::clock::{Clock, ManualClock};
use eidas_engine::engine::EngineInstance;
use eidas_engine::metadata::{MetadataError, MetadataResolver};

fn publisher(pki: &Pki, clock: &ManualClock) -> Arc<EngineInstance> {
    let mut settings = proxy_settings(pki);
    settings.metadata_validity = Duration::minutes(10);
    Arc::new(EngineInstance::new(settings, clock.now()).unwrap())
}

fn resolver(pki: &Pki, fetcher: MockFetcher, clock: Arc<ManualClock>) -> MetadataResolver {
    MetadataResolver::new(
        Arc::new(fetcher),
        pki.trust(),
        url_policy(),
        clock,
        std::time::Duration::from_secs(5),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_fetch() {
    let pki = Pki::new();
    let clock = Arc::new(ManualClock::new(now_millis()));
    let instance = publisher(&pki, &clock);
    let publish_clock = clock.clone();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(1).returning(move |_| {
        std::thread::sleep(std::time::Duration::from_millis(50));
        instance
            .generate_metadata(publish_clock.now())
            .map_err(|e| MetadataError::Parse(e.to_string()))
    });
    let resolver = Arc::new(resolver(&pki, fetcher, clock));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.get_entity_descriptor(PROXY_METADATA).await })
        })
        .collect();
    for task in tasks {
        let params = task.await.unwrap().unwrap();
        assert_eq!(params.entity_id, PROXY_METADATA);
    }
}

#[tokio::test]
async fn test_refetched_after_valid_until() {
    let pki = Pki::new();
    let clock = Arc::new(ManualClock::new(now_millis()));
    let instance = publisher(&pki, &clock);
    let publish_clock = clock.clone();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(2).returning(move |_| {
        instance
            .generate_metadata(publish_clock.now())
            .map_err(|e| MetadataError::Parse(e.to_string()))
    });
    let resolver = resolver(&pki, fetcher, clock.clone());

    let first = resolver.get_entity_descriptor(PROXY_METADATA).await.unwrap();
    let cached = resolver.get_entity_descriptor(PROXY_METADATA).await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));

    clock.advance(Duration::minutes(11));
    let refreshed = resolver.get_entity_descriptor(PROXY_METADATA).await.unwrap();
    assert!(refreshed.valid_until > first.valid_until);
    resolver.get_response_signature_certificate(PROXY_METADATA).await.unwrap();
}

#[tokio::test]
async fn test_partner_without_sp_role_has_no_encryption_certificate() {
    let pki = Pki::new();
    let clock = Arc::new(ManualClock::new(now_millis()));
    let instance = publisher(&pki, &clock);
    let publish_clock = clock.clone();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(1).returning(move |_| {
        instance
            .generate_metadata(publish_clock.now())
            .map_err(|e| MetadataError::Parse(e.to_string()))
    });
    let resolver = resolver(&pki, fetcher, clock);

    assert!(matches!(
        resolver.get_encryption_certificate(PROXY_METADATA).await,
        Err(MetadataError::MissingRole { .. })
    ));
}
