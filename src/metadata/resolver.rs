use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use openssl::x509::X509;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::parser::{MetadataParameters, RoleDescriptor, parse_metadata};
use super::trust::{MetadataTrust, UrlPolicy, validate_url};
use super::{MetadataError, MetadataFetcher, Result};
use crate::clock::Clock;

type SharedResult = Result<Arc<MetadataParameters>>;

/// Resolves partner metadata with a per-URL cache.
///
/// Concurrent misses for the same URL share one fetch. An entry is served
/// only while its `validUntil` lies in the future; an expired entry is
/// dropped and fetched again, and a failing fetch is reported instead of
/// serving the stale document.
pub struct MetadataResolver {
    fetcher: Arc<dyn MetadataFetcher>,
    trust: MetadataTrust,
    url_policy: UrlPolicy,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    cache: DashMap<String, Arc<MetadataParameters>>,
    in_flight: DashMap<String, Arc<OnceCell<SharedResult>>>,
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("url_policy", &self.url_policy)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl MetadataResolver {
    pub fn new(
        fetcher: Arc<dyn MetadataFetcher>,
        trust: MetadataTrust,
        url_policy: UrlPolicy,
        clock: Arc<dyn Clock>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            trust,
            url_policy,
            clock,
            fetch_timeout,
            cache: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Validated metadata of the partner publishing at `url`
    pub async fn get_entity_descriptor(&self, url: &str) -> Result<Arc<MetadataParameters>> {
        let url = validate_url(url, &self.url_policy)?.to_string();
        if let Some(cached) = self.cached(&url) {
            debug!(url, "Metadata cache hit");
            return Ok(cached);
        }
        debug!(url, "Metadata cache miss");

        let cell = self
            .in_flight
            .entry(url.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let result = cell
            .get_or_init(|| async {
                // A fetch that completed while this caller was queued
                if let Some(cached) = self.cached(&url) {
                    return Ok(cached);
                }
                self.load(&url).await
            })
            .await
            .clone();
        self.in_flight.remove_if(&url, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    /// Signing certificate of the SP role, used to validate requests
    pub async fn get_request_signature_certificate(&self, url: &str) -> Result<X509> {
        let params = self.get_entity_descriptor(url).await?;
        first_certificate(url, params.sp.as_ref(), "SP", "signing", |role| {
            &role.signing_certificates
        })
    }

    /// Signing certificate of the IDP role, used to validate responses
    pub async fn get_response_signature_certificate(&self, url: &str) -> Result<X509> {
        let params = self.get_entity_descriptor(url).await?;
        first_certificate(url, params.idp.as_ref(), "IDP", "signing", |role| {
            &role.signing_certificates
        })
    }

    /// Encryption certificate of the SP role, the recipient of responses
    pub async fn get_encryption_certificate(&self, url: &str) -> Result<X509> {
        let params = self.get_entity_descriptor(url).await?;
        first_certificate(url, params.sp.as_ref(), "SP", "encryption", |role| {
            &role.encryption_certificates
        })
    }

    /// Drop the cached entry of `url`. A URL the policy rejects has no entry.
    pub fn invalidate(&self, url: &str) {
        let Ok(url) = validate_url(url, &self.url_policy) else {
            return;
        };
        let url = url.to_string();
        if self.cache.remove(&url).is_some() {
            info!(url, "Invalidated cached metadata");
        }
    }

    /// Fetch `url` again regardless of the cache. On failure a still-valid
    /// cached entry is kept and the error returned.
    pub async fn refresh(&self, url: &str) -> Result<Arc<MetadataParameters>> {
        let url = validate_url(url, &self.url_policy)?.to_string();
        match self.load(&url).await {
            Ok(params) => Ok(params),
            Err(e) => {
                if self.cached(&url).is_some() {
                    warn!(url, error = %e, "Metadata refresh failed, keeping cached entry");
                }
                Err(e)
            }
        }
    }

    fn cached(&self, url: &str) -> Option<Arc<MetadataParameters>> {
        let now = self.clock.now();
        let entry = self.cache.get(url).map(|entry| entry.value().clone())?;
        if entry.is_valid_at(now) {
            return Some(entry);
        }
        self.cache
            .remove_if(url, |_, current| Arc::ptr_eq(current, &entry));
        info!(url, valid_until = %entry.valid_until, "Cached metadata expired");
        None
    }

    async fn load(&self, url: &str) -> SharedResult {
        let xml = match timeout(self.fetch_timeout, self.fetcher.fetch(url)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url, "Metadata fetch timed out");
                return Err(MetadataError::Timeout(url.to_string()));
            }
        };

        let now = self.clock.now();
        let signer = self.trust.verify(&xml, url, now).inspect_err(|e| {
            warn!(url, error = %e, "Rejected metadata");
        })?;
        let mut params = parse_metadata(&xml, url)?;
        if !params.is_valid_at(now) {
            warn!(url, valid_until = %params.valid_until, "Fetched metadata is already expired");
            return Err(MetadataError::Expired(url.to_string()));
        }
        params.signer = Some(signer);

        let params = Arc::new(params);
        self.cache.insert(url.to_string(), params.clone());
        info!(url, entity_id = %params.entity_id, "Cached partner metadata");
        Ok(params)
    }
}

fn first_certificate(
    url: &str,
    role: Option<&RoleDescriptor>,
    role_name: &'static str,
    usage: &'static str,
    certificates: impl Fn(&RoleDescriptor) -> &Vec<X509>,
) -> Result<X509> {
    let role = role.ok_or_else(|| MetadataError::MissingRole {
        url: url.to_string(),
        role: role_name,
    })?;
    certificates(role)
        .first()
        .cloned()
        .ok_or_else(|| MetadataError::MissingCertificate {
            url: url.to_string(),
            role: role_name,
            usage,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::credential::{CertificatePolicy, Credential, test_support};
    use crate::metadata::{Endpoint, MetadataGenerator, MockMetadataFetcher, RoleConfig, BINDING_HTTP_POST};
    use crate::xml::SignatureConfig;
    use chrono::Utc;

    const URL: &str = "https://proxy.example/metadata";

    fn signed_metadata(signer: &Credential, valid_for: chrono::Duration) -> String {
        let mut generator = MetadataGenerator::new(URL, valid_for);
        generator.idp = Some(RoleConfig {
            signing_certificate: signer.certificate().to_owned(),
            encryption_certificate: None,
            endpoints: vec![Endpoint {
                binding: BINDING_HTTP_POST.into(),
                location: "https://proxy.example/sso".into(),
            }],
            name_id_formats: vec![],
            requests_signed: true,
            want_assertions_signed: false,
        });
        generator
            .generate(signer, &SignatureConfig::default(), Utc::now())
            .unwrap()
    }

    fn resolver(fetcher: MockMetadataFetcher, signer: &Credential, clock: Arc<ManualClock>) -> MetadataResolver {
        let trust = MetadataTrust {
            anchors: vec![signer.certificate().to_owned()],
            self_signed_whitelist: vec![URL.into()],
            ..Default::default()
        };
        MetadataResolver::new(
            Arc::new(fetcher),
            trust,
            UrlPolicy::default(),
            clock,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_cache_hit_then_refetch_after_expiry() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher
            .expect_fetch()
            .times(2)
            .returning(move |_| Ok(xml.clone()));

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let resolver = resolver(fetcher, &signer, clock.clone());

        resolver.get_entity_descriptor(URL).await.unwrap();
        resolver.get_entity_descriptor(URL).await.unwrap();
        let cert = resolver.get_response_signature_certificate(URL).await.unwrap();
        assert_eq!(cert.to_der().unwrap(), signer.certificate().to_der().unwrap());

        // validUntil has passed: the expired entry is refetched, and the
        // refetched document is itself expired now
        clock.advance(chrono::Duration::hours(2));
        assert!(matches!(
            resolver.get_entity_descriptor(URL).await,
            Err(MetadataError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_self_signed_signer_must_be_whitelisted() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher.expect_fetch().returning(move |_| Ok(xml.clone()));

        let trust = MetadataTrust {
            anchors: vec![signer.certificate().to_owned()],
            ..Default::default()
        };
        let resolver = MetadataResolver::new(
            Arc::new(fetcher),
            trust,
            UrlPolicy::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_secs(5),
        );
        assert!(matches!(
            resolver.get_entity_descriptor(URL).await,
            Err(MetadataError::Untrusted(_))
        ));
    }

    #[tokio::test]
    async fn test_untrusted_signer() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let anchor = test_support::credential("anchor", test_support::rsa_key(), -1, 30, 2);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher.expect_fetch().returning(move |_| Ok(xml.clone()));

        let resolver = resolver(fetcher, &anchor, Arc::new(ManualClock::new(Utc::now())));
        assert!(matches!(
            resolver.get_entity_descriptor(URL).await,
            Err(MetadataError::Untrusted(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_valid_entry() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        let mut seq = mockall::Sequence::new();
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(xml.clone()));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|url| {
                Err(MetadataError::Fetch {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                })
            });

        let resolver = resolver(fetcher, &signer, Arc::new(ManualClock::new(Utc::now())));
        resolver.get_entity_descriptor(URL).await.unwrap();
        assert!(resolver.refresh(URL).await.is_err());
        // served from cache, no third fetch
        assert!(resolver.get_entity_descriptor(URL).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalidate_forces_fetch() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher
            .expect_fetch()
            .times(2)
            .returning(move |_| Ok(xml.clone()));

        let resolver = resolver(fetcher, &signer, Arc::new(ManualClock::new(Utc::now())));
        resolver.get_entity_descriptor(URL).await.unwrap();
        resolver.invalidate(URL);
        resolver.get_entity_descriptor(URL).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_origin_only_url() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher
            .expect_fetch()
            .times(2)
            .returning(move |_| Ok(xml.clone()));

        let trust = MetadataTrust {
            anchors: vec![signer.certificate().to_owned()],
            self_signed_whitelist: vec!["https://proxy.example".into()],
            ..Default::default()
        };
        let resolver = MetadataResolver::new(
            Arc::new(fetcher),
            trust,
            UrlPolicy::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_secs(5),
        );
        resolver.get_entity_descriptor("https://proxy.example").await.unwrap();
        resolver.get_entity_descriptor("https://PROXY.example/").await.unwrap();
        resolver.invalidate("https://proxy.example");
        resolver.get_entity_descriptor("https://proxy.example").await.unwrap();
    }

    #[tokio::test]
    async fn test_whitelisted_self_signed_signer_with_strict_policy() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher.expect_fetch().returning(move |_| Ok(xml.clone()));

        // the policy the configuration defaults to
        let policy = CertificatePolicy {
            check_validity_period: true,
            disallow_self_signed: true,
        };
        let trust = MetadataTrust {
            anchors: vec![signer.certificate().to_owned()],
            self_signed_whitelist: vec![URL.into()],
            certificate_policy: policy,
            ..Default::default()
        };
        let resolver = MetadataResolver::new(
            Arc::new(fetcher),
            trust,
            UrlPolicy::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_secs(5),
        );
        let params = resolver.get_entity_descriptor(URL).await.unwrap();
        assert_eq!(params.entity_id, URL);
    }

    #[tokio::test]
    async fn test_whitelisted_self_signed_signer_must_be_in_validity_period() {
        let signer = test_support::credential("md", test_support::rsa_key(), -30, -1, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher.expect_fetch().returning(move |_| Ok(xml.clone()));

        let trust = MetadataTrust {
            anchors: vec![signer.certificate().to_owned()],
            self_signed_whitelist: vec![URL.into()],
            certificate_policy: CertificatePolicy {
                check_validity_period: true,
                disallow_self_signed: true,
            },
            ..Default::default()
        };
        let resolver = MetadataResolver::new(
            Arc::new(fetcher),
            trust,
            UrlPolicy::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_secs(5),
        );
        assert!(matches!(
            resolver.get_entity_descriptor(URL).await,
            Err(MetadataError::Untrusted(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_role() {
        let signer = test_support::credential("md", test_support::rsa_key(), -1, 30, 1);
        let xml = signed_metadata(&signer, chrono::Duration::hours(1));
        let mut fetcher = MockMetadataFetcher::new();
        fetcher.expect_fetch().returning(move |_| Ok(xml.clone()));

        let resolver = resolver(fetcher, &signer, Arc::new(ManualClock::new(Utc::now())));
        assert!(matches!(
            resolver.get_request_signature_certificate(URL).await,
            Err(MetadataError::MissingRole { role: "SP", .. })
        ));
    }
}
