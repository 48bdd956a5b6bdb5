use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use openssl::x509::X509;
use tracing::{info, warn};

use super::{EngineInstance, InstanceSettings, NodeEndpoints, ProtocolEngine};
use crate::clock::Clock;
use crate::config::{Config, CorrelationBackend, InstanceConfig, read};
use crate::correlation::{CorrelationManager, CorrelationStore, MemoryStore, RedisStore};
use crate::credential::{CertificatePolicy, CredentialError, KeyStore};
use crate::error::ConfigurationError;
use crate::metadata::{
    HttpMetadataFetcher, MetadataResolver, MetadataTrust, ProtocolVersion, UrlPolicy,
};
use crate::xml::algorithms::{
    DataEncryptionAlgorithm, DigestAlgorithm, KeyTransportAlgorithm, SignatureAlgorithm,
};
use crate::xml::{DecryptionPolicy, EncryptionConfig, SignatureConfig};

type Result<T> = std::result::Result<T, ConfigurationError>;

/// The engines of this process, keyed by instance name. Built once at
/// start-up and handed to whoever needs an engine.
#[derive(Debug, Default)]
pub struct EngineSet {
    engines: HashMap<String, Arc<ProtocolEngine>>,
}

impl EngineSet {
    pub fn new(engines: impl IntoIterator<Item = ProtocolEngine>) -> Self {
        Self {
            engines: engines
                .into_iter()
                .map(|engine| (engine.instance().name().to_string(), Arc::new(engine)))
                .collect(),
        }
    }

    /// Build the metadata resolver, the correlation store and every
    /// configured instance. Key material is read here.
    ///
    /// # Errors
    /// The first instance that fails to load, an unreadable trust anchor or an
    /// unreachable Redis backend.
    pub async fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let metadata = Arc::new(metadata_resolver(config, clock.clone())?);
        let correlation = Arc::new(correlation_manager(config, clock.clone()).await?);

        let mut engines = Vec::with_capacity(config.instances.len());
        for (name, instance_config) in &config.instances {
            let settings = instance_settings(name, instance_config, config)?;
            let instance = EngineInstance::new(settings, clock.now())?;
            engines.push(ProtocolEngine::new(
                Arc::new(instance),
                metadata.clone(),
                correlation.clone(),
                clock.clone(),
            ));
        }
        if engines.is_empty() {
            warn!("No engine instances configured");
        }
        Ok(Self::new(engines))
    }

    pub fn get(&self, name: &str) -> Result<Arc<ProtocolEngine>> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownInstance(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

fn invalid(instance: &str, reason: impl ToString) -> ConfigurationError {
    ConfigurationError::Invalid {
        instance: instance.to_string(),
        reason: reason.to_string(),
    }
}

fn metadata_resolver(config: &Config, clock: Arc<dyn Clock>) -> Result<MetadataResolver> {
    let settings = &config.metadata;
    let timeout = Duration::from_millis(settings.fetch_timeout_ms);

    let mut anchors = Vec::new();
    for path in &settings.trust_anchors {
        let certificates = X509::stack_from_pem(&read(path)?).map_err(CredentialError::from)?;
        if certificates.is_empty() {
            return Err(invalid("metadata", format!("no certificate in {path}")));
        }
        anchors.extend(certificates);
    }
    info!(anchors = anchors.len(), "Loaded metadata trust anchors");

    let trust = MetadataTrust {
        anchors,
        self_signed_whitelist: settings.self_signed_whitelist.clone(),
        signature: SignatureConfig::default(),
        certificate_policy: CertificatePolicy {
            check_validity_period: settings.check_validity_period,
            disallow_self_signed: settings.disallow_self_signed,
        },
    };
    let url_policy = UrlPolicy {
        https_only: settings.https_only,
        whitelist_enabled: settings.whitelist_enabled,
        whitelist: settings.whitelist.clone(),
    };
    let fetcher = HttpMetadataFetcher::new(timeout, settings.max_size_bytes)
        .map_err(|e| invalid("metadata", e))?;
    Ok(MetadataResolver::new(
        Arc::new(fetcher),
        trust,
        url_policy,
        clock,
        timeout,
    ))
}

async fn correlation_manager(config: &Config, clock: Arc<dyn Clock>) -> Result<CorrelationManager> {
    let settings = &config.correlation;
    let store: Arc<dyn CorrelationStore> = match settings.backend {
        CorrelationBackend::Memory => Arc::new(MemoryStore::new(clock.clone())),
        CorrelationBackend::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| invalid("correlation", "redis backend without redis.uri"))?;
            let conn = redis.start().await.map_err(|e| invalid("correlation", e))?;
            Arc::new(RedisStore::new(conn))
        }
    };

    let manager = CorrelationManager::new(store)
        .with_ttl(Duration::from_secs(settings.ttl_secs))
        .with_max_entries(settings.max_entries)
        .with_clock(clock);
    if settings.sweep_interval_secs > 0 {
        tokio::spawn(
            manager
                .clone()
                .sweep_expired(Duration::from_secs(settings.sweep_interval_secs)),
        );
    }
    info!(backend = ?settings.backend, ttl_secs = settings.ttl_secs, "Correlation store ready");
    Ok(manager)
}

fn instance_settings(name: &str, config: &InstanceConfig, root: &Config) -> Result<InstanceSettings> {
    let signing = config.signing.load()?;
    let decryption = config
        .decryption
        .iter()
        .map(|key| key.load())
        .collect::<Result<Vec<_>>>()?;

    let mut settings = InstanceSettings::new(name, config.entity_id.clone(), signing);
    settings.country_code = config.country_code.clone();
    settings.decryption = KeyStore::new(decryption);

    if !config.signature_whitelist.is_empty() {
        settings.signature.whitelist = config
            .signature_whitelist
            .iter()
            .map(|uri| SignatureAlgorithm::from_uri(uri))
            .collect::<crate::xml::Result<_>>()?;
    }
    if let Some(uri) = &config.signature_algorithm {
        settings.signature.algorithm = SignatureAlgorithm::from_uri(uri)?;
    }
    if let Some(uri) = &config.digest_algorithm {
        settings.signature.digest = DigestAlgorithm::from_uri(uri)?;
    }

    let mut encryption = EncryptionConfig::default();
    if let Some(uri) = &config.data_encryption_algorithm {
        encryption.data_algorithm = DataEncryptionAlgorithm::from_uri(uri)?;
    }
    if let Some(uri) = &config.key_transport_algorithm {
        encryption.key_transport = KeyTransportAlgorithm::from_uri(uri)?;
    }
    settings.encryption = encryption;

    let mut decryption_policy = DecryptionPolicy {
        check_validity_period: root.metadata.check_validity_period,
        ..DecryptionPolicy::default()
    };
    if !config.allowed_data_encryption_algorithms.is_empty() {
        decryption_policy.allowed_data_algorithms = config
            .allowed_data_encryption_algorithms
            .iter()
            .map(|uri| DataEncryptionAlgorithm::from_uri(uri))
            .collect::<crate::xml::Result<_>>()?;
    }
    settings.decryption_policy = decryption_policy;
    settings.certificate_policy = CertificatePolicy {
        check_validity_period: root.metadata.check_validity_period,
        disallow_self_signed: root.metadata.disallow_self_signed,
    };

    settings.protocol_versions = config
        .protocol_versions
        .iter()
        .map(|v| ProtocolVersion::from_str(v).map_err(|e| invalid(name, e)))
        .collect::<Result<_>>()?;
    settings.before_skew = ChronoDuration::milliseconds(config.before_skew_ms);
    settings.after_skew = ChronoDuration::milliseconds(config.after_skew_ms);
    settings.require_signed_assertions = config.require_signed_assertions;
    settings.sign_assertions = config.sign_assertions;
    settings.validate_ip = config.validate_ip;
    settings.encrypt_responses = config.encrypt_responses;
    settings.response_encryption_mandatory = config.response_encryption_mandatory;
    settings.max_message_size = config.max_message_size;
    settings.sp_type = config.sp_type;
    settings.endpoints = NodeEndpoints {
        assertion_consumer_service_url: config.assertion_consumer_service_url.clone(),
        single_sign_on_service_url: config.single_sign_on_service_url.clone(),
    };
    settings.metadata_validity = ChronoDuration::seconds(config.metadata_validity_secs);
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::credential::test_support::{certificate, rsa_key};
    use std::path::Path;

    fn write_key(dir: &Path, name: &str) -> (String, String) {
        let key = rsa_key();
        let cert = certificate(&key, name, 1, -1, 365);
        let key_path = dir.join(format!("{name}.key.pem"));
        let cert_path = dir.join(format!("{name}.crt.pem"));
        std::fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        std::fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
        (
            key_path.to_string_lossy().into_owned(),
            cert_path.to_string_lossy().into_owned(),
        )
    }

    fn config_with(vars: &[(String, String)]) -> Config {
        Config::load_with_sources(Some(vars.iter().cloned().collect())).unwrap()
    }

    fn instance_vars(name: &str, key: &str, cert: &str) -> Vec<(String, String)> {
        let prefix = format!("instances.{name}");
        vec![
            (format!("{prefix}.entity_id"), format!("https://{name}.example/metadata")),
            (format!("{prefix}.signing.path"), key.into()),
            (format!("{prefix}.signing.certificate"), cert.into()),
            (format!("{prefix}.signing.alias"), "sign".into()),
            (format!("{prefix}.signing.format"), "pem".into()),
            (format!("{prefix}.after_skew_ms"), "2000".into()),
            ("correlation.sweep_interval_secs".into(), "0".into()),
        ]
    }

    #[tokio::test]
    async fn test_engines_built_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let (key, cert) = write_key(dir.path(), "connector");
        let config = config_with(&instance_vars("connector", &key, &cert));

        let set = EngineSet::from_config(&config, Arc::new(SystemClock)).await.unwrap();
        assert_eq!(set.len(), 1);
        let engine = set.get("connector").unwrap();
        let settings = engine.instance().settings();
        assert_eq!(settings.entity_id, "https://connector.example/metadata");
        assert_eq!(settings.after_skew, ChronoDuration::seconds(2));
        assert!(matches!(
            set.get("proxy"),
            Err(ConfigurationError::UnknownInstance(_))
        ));
    }

    #[tokio::test]
    async fn test_disallowed_algorithm_fails_start_up() {
        let dir = tempfile::tempdir().unwrap();
        let (key, cert) = write_key(dir.path(), "connector");
        let mut vars = instance_vars("connector", &key, &cert);
        vars.push((
            "instances.connector.signature_algorithm".into(),
            SignatureAlgorithm::RsaSha256.uri().into(),
        ));
        let config = config_with(&vars);

        let err = EngineSet::from_config(&config, Arc::new(SystemClock)).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::Xml(_)));
    }

    #[tokio::test]
    async fn test_redis_backend_requires_uri() {
        let config = config_with(&[("correlation.backend".into(), "redis".into())]);
        let err = EngineSet::from_config(&config, Arc::new(SystemClock)).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_missing_trust_anchor_reported() {
        let mut config = config_with(&[]);
        config.metadata.trust_anchors = vec!["/nonexistent/anchor.pem".into()];
        let err = EngineSet::from_config(&config, Arc::new(SystemClock)).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::Io { .. }));
    }
}
