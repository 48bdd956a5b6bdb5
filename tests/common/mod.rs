#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use eidas_engine::clock::{Clock, ManualClock};
use eidas_engine::correlation::{CorrelationManager, MemoryStore};
use eidas_engine::credential::{CertificatePolicy, Credential, KeyStore};
use eidas_engine::engine::{EngineInstance, InstanceSettings, ProtocolEngine};
use eidas_engine::metadata::{
    MetadataError, MetadataFetcher, MetadataResolver, MetadataTrust, UrlPolicy,
};
use eidas_engine::model::{
    AttributeMap, AttributeRegistry, AttributeValue, AuthenticationRequest,
    AuthenticationResponse, LevelOfAssurance, NameIdFormat, RequestCore, RequestFields,
    ResponseFields, SpType,
};
use eidas_engine::xml::SignatureConfig;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509, X509Builder, X509Name, X509NameBuilder};

pub const CONNECTOR_METADATA: &str = "https://connector.example/metadata";
pub const CONNECTOR_ACS: &str = "https://connector.example/acs";
pub const PROXY_METADATA: &str = "https://proxy.example/metadata";
pub const PROXY_SSO: &str = "https://proxy.example/sso";

// Mock implementation of MetadataFetcher counting network calls
mockall::mock! {
    pub Fetcher {}

    #[async_trait]
    impl MetadataFetcher for Fetcher {
        async fn fetch(&self, url: &str) -> Result<String, MetadataError>;
    }
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(cn: &str) -> X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("C", "EU").unwrap();
    name.append_entry_by_text("O", "eIDAS test federation").unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    name.build()
}

fn builder(subject: &X509Name, key: &PKey<Private>, from_days: i64, to_days: i64) -> X509Builder {
    let now = Utc::now().timestamp();
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(now + from_days * 86_400).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(now + to_days * 86_400).unwrap())
        .unwrap();
    builder
}

/// A throwaway CA issuing every certificate of a test federation
pub struct Pki {
    key: PKey<Private>,
    pub ca: X509,
}

impl Pki {
    pub fn new() -> Self {
        let key = rsa_key();
        let subject = name("eIDAS Test CA");
        let mut builder = builder(&subject, &key, -1, 3650);
        builder.set_issuer_name(&subject).unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(KeyUsage::new().key_cert_sign().crl_sign().build().unwrap())
            .unwrap();
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(ski).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        Self {
            key,
            ca: builder.build(),
        }
    }

    /// Leaf certificate for `key`, valid from `from_days` to `to_days` relative to now
    pub fn issue(&self, cn: &str, key: &PKey<Private>, from_days: i64, to_days: i64) -> X509 {
        let mut builder = builder(&name(cn), key, from_days, to_days);
        builder.set_issuer_name(self.ca.subject_name()).unwrap();
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(Some(&self.ca), None))
            .unwrap();
        builder.append_extension(ski).unwrap();
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    pub fn credential(&self, alias: &str, key: PKey<Private>) -> Credential {
        self.credential_valid(alias, key, -1, 365)
    }

    pub fn credential_valid(
        &self,
        alias: &str,
        key: PKey<Private>,
        from_days: i64,
        to_days: i64,
    ) -> Credential {
        let cert = self.issue(alias, &key, from_days, to_days);
        Credential::from_pem(
            alias,
            &cert.to_pem().unwrap(),
            &key.private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap()
    }

    pub fn trust(&self) -> MetadataTrust {
        MetadataTrust {
            anchors: vec![self.ca.clone()],
            self_signed_whitelist: vec![],
            signature: SignatureConfig::default(),
            certificate_policy: CertificatePolicy {
                check_validity_period: true,
                disallow_self_signed: true,
            },
        }
    }
}

pub fn url_policy() -> UrlPolicy {
    UrlPolicy {
        https_only: true,
        whitelist_enabled: false,
        whitelist: vec![],
    }
}

/// Wall-clock instant truncated to the millisecond precision of the wire
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn connector_settings(pki: &Pki) -> InstanceSettings {
    let mut settings = InstanceSettings::new(
        "connector",
        CONNECTOR_METADATA,
        pki.credential("connector-sign", rsa_key()),
    );
    settings.decryption = KeyStore::new(vec![pki.credential("connector-enc", rsa_key())]);
    settings.endpoints.assertion_consumer_service_url = Some(CONNECTOR_ACS.into());
    settings.sp_type = Some(SpType::Public);
    settings.certificate_policy.disallow_self_signed = true;
    settings.before_skew = Duration::seconds(2);
    settings.after_skew = Duration::seconds(2);
    settings
}

pub fn proxy_settings(pki: &Pki) -> InstanceSettings {
    let mut settings = InstanceSettings::new(
        "proxy",
        PROXY_METADATA,
        pki.credential("proxy-sign", rsa_key()),
    );
    settings.decryption = KeyStore::new(vec![pki.credential("proxy-enc", rsa_key())]);
    settings.endpoints.single_sign_on_service_url = Some(PROXY_SSO.into());
    settings.certificate_policy.disallow_self_signed = true;
    settings
}

/// A Connector and a ProxyService trusting each other through the same CA,
/// publishing their metadata through a mocked fetcher
pub struct Federation {
    pub clock: Arc<ManualClock>,
    pub connector: ProtocolEngine,
    pub proxy: ProtocolEngine,
    metadata: Arc<MetadataResolver>,
    pub correlation: Arc<CorrelationManager>,
    published: Arc<RwLock<HashMap<String, Arc<EngineInstance>>>>,
    fetches: Arc<Mutex<HashMap<String, usize>>>,
}

impl Federation {
    pub fn new(pki: &Pki, connector: InstanceSettings, proxy: InstanceSettings) -> Self {
        let clock = Arc::new(ManualClock::new(now_millis()));
        let now = clock.now();
        let connector = Arc::new(EngineInstance::new(connector, now).unwrap());
        let proxy = Arc::new(EngineInstance::new(proxy, now).unwrap());

        let published: Arc<RwLock<HashMap<String, Arc<EngineInstance>>>> = Arc::new(RwLock::new(
            [
                (CONNECTOR_METADATA.to_string(), connector.clone()),
                (PROXY_METADATA.to_string(), proxy.clone()),
            ]
            .into(),
        ));
        let fetches: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let mut fetcher = MockFetcher::new();
        {
            let published = published.clone();
            let fetches = fetches.clone();
            let clock = clock.clone();
            fetcher.expect_fetch().returning(move |url| {
                *fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;
                let instance = published
                    .read()
                    .unwrap()
                    .get(url)
                    .cloned()
                    .ok_or_else(|| MetadataError::Fetch {
                        url: url.to_string(),
                        reason: "HTTP status 404".into(),
                    })?;
                instance
                    .generate_metadata(clock.now())
                    .map_err(|e| MetadataError::Parse(e.to_string()))
            });
        }

        let metadata = Arc::new(MetadataResolver::new(
            Arc::new(fetcher),
            pki.trust(),
            url_policy(),
            clock.clone(),
            std::time::Duration::from_secs(5),
        ));
        let correlation = Arc::new(
            CorrelationManager::new(Arc::new(MemoryStore::new(clock.clone())))
                .with_clock(clock.clone()),
        );

        Self {
            connector: ProtocolEngine::new(connector, metadata.clone(), correlation.clone(), clock.clone()),
            proxy: ProtocolEngine::new(proxy, metadata.clone(), correlation.clone(), clock.clone()),
            clock,
            metadata,
            correlation,
            published,
            fetches,
        }
    }

    /// An engine sharing the federation's metadata cache and correlation
    /// store whose metadata is not published
    pub fn unpublished_engine(&self, settings: InstanceSettings) -> ProtocolEngine {
        let instance = Arc::new(EngineInstance::new(settings, self.clock.now()).unwrap());
        self.engine(instance)
    }

    /// Replace the ProxyService with one built from `settings` and publish
    /// its metadata. Cached copies of the old metadata stay in place.
    pub fn rotate_proxy(&mut self, settings: InstanceSettings) {
        let instance = Arc::new(EngineInstance::new(settings, self.clock.now()).unwrap());
        self.published
            .write()
            .unwrap()
            .insert(PROXY_METADATA.to_string(), instance.clone());
        self.proxy = self.engine(instance);
    }

    fn engine(&self, instance: Arc<EngineInstance>) -> ProtocolEngine {
        ProtocolEngine::new(
            instance,
            self.metadata.clone(),
            self.correlation.clone(),
            self.clock.clone(),
        )
    }

    /// Number of metadata downloads of `url` so far
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

fn definition(friendly_name: &str) -> eidas_engine::model::AttributeDefinition {
    AttributeRegistry::eidas()
        .get_by_friendly_name(friendly_name)
        .cloned()
        .unwrap()
}

pub fn request(id: &str, loa: LevelOfAssurance) -> AuthenticationRequest {
    let attributes = AttributeMap::new()
        .with(definition("PersonIdentifier"), vec![])
        .unwrap()
        .with(definition("FamilyName"), vec![])
        .unwrap();
    let core = RequestCore::new(RequestFields {
        id: id.into(),
        issuer: CONNECTOR_METADATA.into(),
        destination: PROXY_SSO.into(),
        level_of_assurance: loa.uri().into(),
        requested_attributes: attributes,
        citizen_country_code: Some("BE".into()),
        provider_name: Some("Demo SP".into()),
        name_id_format: Some(NameIdFormat::Persistent.uri().into()),
        assertion_consumer_service_url: Some(CONNECTOR_ACS.into()),
        ..Default::default()
    })
    .unwrap();
    AuthenticationRequest::eidas(core, Some(SpType::Public), None).unwrap()
}

pub fn success_response(
    request: &AuthenticationRequest,
    loa: LevelOfAssurance,
    issue_instant: DateTime<Utc>,
) -> AuthenticationResponse {
    let mut fields = ResponseFields::new(
        format!("_{}", uuid::Uuid::new_v4()),
        request.id(),
        PROXY_METADATA,
        issue_instant,
    );
    fields.subject = Some("BE/BE/0123456789".into());
    fields.subject_name_id_format = Some(NameIdFormat::Persistent);
    fields.level_of_assurance = Some(loa.uri().into());
    fields.audience = Some(CONNECTOR_METADATA.into());
    fields.subject_ip_address = Some("192.0.2.10".into());
    fields.not_on_or_after = Some(issue_instant + Duration::minutes(5));
    fields.attributes = AttributeMap::new()
        .with(
            definition("PersonIdentifier"),
            vec![AttributeValue::Text("BE/BE/0123456789".into())],
        )
        .unwrap()
        .with(
            definition("FamilyName"),
            vec![AttributeValue::Text("Peeters".into())],
        )
        .unwrap();
    AuthenticationResponse::success(fields).unwrap()
}

/// Flip one character of the first signature value in `xml`
pub fn tamper_signature(xml: &str) -> String {
    let start = xml.find("SignatureValue>").unwrap() + "SignatureValue>".len();
    let mut bytes = xml.as_bytes().to_vec();
    bytes[start] = if bytes[start] == b'A' { b'B' } else { b'A' };
    String::from_utf8(bytes).unwrap()
}
