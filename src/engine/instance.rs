use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::credential::{CertificatePolicy, Credential, KeyStore};
use crate::error::{ConfigurationError, Result};
use crate::metadata::{
    BINDING_HTTP_POST, Endpoint, MetadataGenerator, MetadataParameters, ProtocolVersion, RoleConfig,
};
use crate::model::{AttributeRegistry, NameIdFormat, SpType};
use crate::protocol::MAX_MESSAGE_SIZE;
use crate::xml::{DecryptionPolicy, EncryptionConfig, SignatureConfig};

/// Endpoints this node publishes in its own metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeEndpoints {
    /// Where responses are received (Connector role)
    pub assertion_consumer_service_url: Option<String>,
    /// Where requests are received (ProxyService role)
    pub single_sign_on_service_url: Option<String>,
}

/// Raw input for [`EngineInstance::new`]
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub name: String,
    /// URL of this node's metadata, used as the Issuer of its messages
    pub entity_id: String,
    pub country_code: Option<String>,
    pub signing: Credential,
    pub decryption: KeyStore,
    pub signature: SignatureConfig,
    pub encryption: EncryptionConfig,
    pub decryption_policy: DecryptionPolicy,
    pub certificate_policy: CertificatePolicy,
    pub protocol_versions: Vec<ProtocolVersion>,
    pub before_skew: Duration,
    pub after_skew: Duration,
    pub require_signed_assertions: bool,
    pub sign_assertions: bool,
    pub validate_ip: bool,
    pub encrypt_responses: bool,
    pub response_encryption_mandatory: bool,
    pub max_message_size: usize,
    pub sp_type: Option<SpType>,
    pub endpoints: NodeEndpoints,
    pub metadata_validity: Duration,
    pub registry: AttributeRegistry,
}

impl InstanceSettings {
    /// Settings with the defaults of an eIDAS 1.2 node
    pub fn new(name: impl Into<String>, entity_id: impl Into<String>, signing: Credential) -> Self {
        Self {
            name: name.into(),
            entity_id: entity_id.into(),
            country_code: None,
            signing,
            decryption: KeyStore::default(),
            signature: SignatureConfig::default(),
            encryption: EncryptionConfig::default(),
            decryption_policy: DecryptionPolicy::default(),
            certificate_policy: CertificatePolicy {
                check_validity_period: true,
                disallow_self_signed: false,
            },
            protocol_versions: vec![ProtocolVersion::new(1, 2)],
            before_skew: Duration::zero(),
            after_skew: Duration::zero(),
            require_signed_assertions: true,
            sign_assertions: true,
            validate_ip: false,
            encrypt_responses: true,
            response_encryption_mandatory: true,
            max_message_size: MAX_MESSAGE_SIZE,
            sp_type: None,
            endpoints: NodeEndpoints::default(),
            metadata_validity: Duration::days(1),
            registry: AttributeRegistry::eidas(),
        }
    }
}

/// One named, immutable engine configuration
#[derive(Debug)]
pub struct EngineInstance {
    settings: InstanceSettings,
}

impl EngineInstance {
    /// Validate `settings` at `now` and freeze them.
    ///
    /// # Errors
    /// A signing algorithm outside the whitelist, a signing key that does not
    /// fit the algorithm, a signing certificate outside its validity period
    /// or mandatory encryption with encryption switched off.
    pub fn new(settings: InstanceSettings, now: DateTime<Utc>) -> std::result::Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::Invalid {
            instance: settings.name.clone(),
            reason,
        };

        if settings.name.trim().is_empty() {
            return Err(invalid("instance name is empty".into()));
        }
        if settings.entity_id.trim().is_empty() {
            return Err(invalid("entity id is empty".into()));
        }
        settings.signature.check()?;

        let key_algorithm = settings.signing.key_algorithm();
        let expected = settings.signature.algorithm.key_algorithm();
        if key_algorithm != expected {
            return Err(invalid(format!(
                "signing key is {key_algorithm} but {} needs {expected}",
                settings.signature.algorithm
            )));
        }

        let local_policy = CertificatePolicy {
            check_validity_period: settings.certificate_policy.check_validity_period,
            disallow_self_signed: false,
        };
        local_policy.check(settings.signing.certificate(), now)?;

        if settings.response_encryption_mandatory && !settings.encrypt_responses {
            return Err(invalid("response encryption is mandatory but disabled".into()));
        }
        if settings.before_skew < Duration::zero() || settings.after_skew < Duration::zero() {
            return Err(invalid("clock skew must not be negative".into()));
        }

        info!(
            instance = settings.name,
            entity_id = settings.entity_id,
            algorithm = %settings.signature.algorithm,
            decryption_keys = settings.decryption.entries().len(),
            "Engine instance configured"
        );
        Ok(Self { settings })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &InstanceSettings {
        &self.settings
    }

    /// Whether `rsa-oaep-mgf1p` key transport is still acceptable from the
    /// partner described by `partner`
    pub fn legacy_key_transport_allowed(&self, partner: &MetadataParameters) -> bool {
        partner
            .highest_protocol_version()
            .is_some_and(|version| version < ProtocolVersion::new(1, 4))
    }

    /// Requests from a partner below protocol version 1.2 use the pre-1.2
    /// request layout
    pub fn is_legacy_partner(&self, partner: &MetadataParameters) -> bool {
        partner
            .highest_protocol_version()
            .is_some_and(|version| version < ProtocolVersion::new(1, 2))
    }

    /// This node's signed metadata document
    pub fn generate_metadata(&self, now: DateTime<Utc>) -> Result<String> {
        let settings = &self.settings;
        let signing_certificate = settings.signing.certificate().to_owned();
        let encryption_certificate = settings
            .decryption
            .entries()
            .first()
            .map(|entry| entry.certificate().to_owned());
        let role = |location: &str| RoleConfig {
            signing_certificate: signing_certificate.clone(),
            encryption_certificate: encryption_certificate.clone(),
            endpoints: vec![Endpoint {
                binding: BINDING_HTTP_POST.into(),
                location: location.into(),
            }],
            name_id_formats: [
                NameIdFormat::Persistent,
                NameIdFormat::Transient,
                NameIdFormat::Unspecified,
            ]
            .iter()
            .map(|format| format.uri().to_string())
            .collect(),
            requests_signed: true,
            want_assertions_signed: settings.require_signed_assertions,
        };

        let generator = MetadataGenerator {
            entity_id: settings.entity_id.clone(),
            valid_for: settings.metadata_validity,
            protocol_versions: settings.protocol_versions.clone(),
            sp_type: settings.sp_type,
            sp: settings.endpoints.assertion_consumer_service_url.as_deref().map(role),
            idp: settings.endpoints.single_sign_on_service_url.as_deref().map(role),
        };
        Ok(generator.generate(&settings.signing, &settings.signature, now)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::test_support::{credential, ec_key, rsa_key};
    use crate::metadata::parse_metadata;
    use crate::xml::algorithms::SignatureAlgorithm;

    fn settings() -> InstanceSettings {
        InstanceSettings::new(
            "connector",
            "https://connector.example/metadata",
            credential("sign", rsa_key(), -1, 365, 1),
        )
    }

    #[test]
    fn test_valid_settings_accepted() {
        let instance = EngineInstance::new(settings(), Utc::now()).unwrap();
        assert_eq!(instance.name(), "connector");
    }

    #[test]
    fn test_algorithm_outside_whitelist_rejected() {
        let mut settings = settings();
        settings.signature.algorithm = SignatureAlgorithm::RsaSha256;
        assert!(matches!(
            EngineInstance::new(settings, Utc::now()),
            Err(ConfigurationError::Xml(_))
        ));
    }

    #[test]
    fn test_key_algorithm_mismatch_rejected() {
        let mut settings = settings();
        settings.signing = credential("sign", ec_key(), -1, 365, 1);
        assert!(matches!(
            EngineInstance::new(settings, Utc::now()),
            Err(ConfigurationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_expired_signing_certificate_rejected() {
        let mut settings = settings();
        settings.signing = credential("sign", rsa_key(), -30, -1, 1);
        assert!(matches!(
            EngineInstance::new(settings, Utc::now()),
            Err(ConfigurationError::Credential(_))
        ));
    }

    #[test]
    fn test_mandatory_encryption_needs_encryption() {
        let mut settings = settings();
        settings.encrypt_responses = false;
        assert!(EngineInstance::new(settings, Utc::now()).is_err());
    }

    #[test]
    fn test_key_transport_rule_follows_partner_versions() {
        let instance = EngineInstance::new(settings(), Utc::now()).unwrap();
        let mut partner = MetadataParameters {
            entity_id: "https://proxy.example/metadata".into(),
            valid_until: Utc::now(),
            protocol_versions: vec![],
            sp_type: None,
            sp: None,
            idp: None,
            signer: None,
        };
        assert!(!instance.legacy_key_transport_allowed(&partner));
        assert!(!instance.is_legacy_partner(&partner));

        partner.protocol_versions = vec![ProtocolVersion::new(1, 1), ProtocolVersion::new(1, 2)];
        assert!(instance.legacy_key_transport_allowed(&partner));
        assert!(!instance.is_legacy_partner(&partner));

        partner.protocol_versions = vec![ProtocolVersion::new(1, 1)];
        assert!(instance.is_legacy_partner(&partner));

        partner.protocol_versions.push(ProtocolVersion::new(1, 4));
        assert!(!instance.legacy_key_transport_allowed(&partner));
    }

    #[test]
    fn test_generated_metadata_parses() {
        let mut settings = settings();
        settings.endpoints.assertion_consumer_service_url = Some("https://connector.example/acs".into());
        settings.decryption = KeyStore::new(vec![credential("enc", rsa_key(), -1, 365, 2)]);
        let instance = EngineInstance::new(settings, Utc::now()).unwrap();

        let xml = instance.generate_metadata(Utc::now()).unwrap();
        let params = parse_metadata(&xml, "test").unwrap();
        assert_eq!(params.entity_id, "https://connector.example/metadata");
        let sp = params.sp.unwrap();
        assert_eq!(sp.endpoint(BINDING_HTTP_POST), Some("https://connector.example/acs"));
        assert_eq!(sp.encryption_certificates.len(), 1);
        assert!(params.idp.is_none());
    }
}
