use std::{collections::HashMap, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use redis::{
    Client as RedisClient, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::ConfigurationError;
use crate::model::SpType;
use crate::protocol::MAX_MESSAGE_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub light_token: Option<LightTokenConfig>,
    #[serde(default)]
    pub instances: HashMap<String, InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub fetch_timeout_ms: u64,
    /// Largest metadata document accepted from a partner
    pub max_size_bytes: usize,
    pub https_only: bool,
    pub whitelist_enabled: bool,
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// PEM files holding the certificates trusted to sign partner metadata
    #[serde(default)]
    pub trust_anchors: Vec<String>,
    /// Metadata URLs whose self-signed signing certificate is accepted
    #[serde(default)]
    pub self_signed_whitelist: Vec<String>,
    pub check_validity_period: bool,
    pub disallow_self_signed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Zero disables the background sweep
    pub sweep_interval_secs: u64,
    pub backend: CorrelationBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub uri: SecretString,
}

impl RedisConfig {
    /// Establishes a new Redis connection based on the provided URI.
    ///
    /// - To enable TLS, the URI must use the `rediss://` scheme.
    /// - To enable insecure TLS, the URI must use the `rediss://` scheme and end with `/#insecure`.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn start(&self) -> RedisResult<ConnectionManager> {
        let client = RedisClient::open(self.uri.expose_secret())?;
        let config = ConnectionManagerConfig::new().set_connection_timeout(Duration::from_secs(60));
        client.get_connection_manager_with_config(config).await
    }
}

/// Shared secret of the light-token channel to the specific module
#[derive(Debug, Clone, Deserialize)]
pub struct LightTokenConfig {
    pub issuer: String,
    pub secret: SecretString,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    #[default]
    Pkcs12,
    Pem,
}

/// Reference to one private-key entry
#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    /// PKCS#12 keystore, or the PEM private key
    pub path: String,
    /// PEM certificate, required for the `pem` format
    #[serde(default)]
    pub certificate: Option<String>,
    pub alias: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub format: KeyFormat,
}

impl KeyConfig {
    /// Read the key entry from disk.
    ///
    /// # Errors
    /// Unreadable files, a wrong password or a key that does not match its
    /// certificate.
    pub fn load(&self) -> Result<Credential, ConfigurationError> {
        let key = read(&self.path)?;
        let credential = match self.format {
            KeyFormat::Pkcs12 => {
                let password = self.password.as_ref().map_or("", |p| p.expose_secret());
                Credential::from_pkcs12(&self.alias, &key, password)?
            }
            KeyFormat::Pem => {
                let path = self.certificate.as_deref().ok_or_else(|| ConfigurationError::Invalid {
                    instance: self.alias.clone(),
                    reason: "a PEM key needs a certificate".into(),
                })?;
                Credential::from_pem(&self.alias, &read(path)?, &key)?
            }
        };
        Ok(credential)
    }
}

pub(crate) fn read(path: &str) -> Result<Vec<u8>, ConfigurationError> {
    std::fs::read(path).map_err(|source| ConfigurationError::Io {
        path: path.to_string(),
        source,
    })
}

fn yes() -> bool {
    true
}

fn default_protocol_versions() -> Vec<String> {
    vec!["1.2".to_string()]
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_metadata_validity_secs() -> i64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    pub entity_id: String,
    #[serde(default)]
    pub country_code: Option<String>,
    pub signing: KeyConfig,
    #[serde(default)]
    pub decryption: Vec<KeyConfig>,

    #[serde(default)]
    pub signature_algorithm: Option<String>,
    #[serde(default)]
    pub digest_algorithm: Option<String>,
    /// Empty keeps the built-in whitelist
    #[serde(default)]
    pub signature_whitelist: Vec<String>,
    #[serde(default)]
    pub data_encryption_algorithm: Option<String>,
    #[serde(default)]
    pub key_transport_algorithm: Option<String>,
    #[serde(default)]
    pub allowed_data_encryption_algorithms: Vec<String>,

    #[serde(default = "default_protocol_versions")]
    pub protocol_versions: Vec<String>,
    #[serde(default)]
    pub before_skew_ms: i64,
    #[serde(default)]
    pub after_skew_ms: i64,

    #[serde(default = "yes")]
    pub require_signed_assertions: bool,
    #[serde(default = "yes")]
    pub sign_assertions: bool,
    #[serde(default)]
    pub validate_ip: bool,
    #[serde(default = "yes")]
    pub encrypt_responses: bool,
    #[serde(default = "yes")]
    pub response_encryption_mandatory: bool,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default)]
    pub sp_type: Option<SpType>,
    #[serde(default)]
    pub assertion_consumer_service_url: Option<String>,
    #[serde(default)]
    pub single_sign_on_service_url: Option<String>,
    #[serde(default = "default_metadata_validity_secs")]
    pub metadata_validity_secs: i64,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("metadata.fetch_timeout_ms", 10_000)?
            .set_default("metadata.max_size_bytes", 1_048_576)?
            .set_default("metadata.https_only", true)?
            .set_default("metadata.whitelist_enabled", false)?
            .set_default("metadata.check_validity_period", true)?
            .set_default("metadata.disallow_self_signed", true)?
            .set_default("correlation.ttl_secs", 300)?
            .set_default("correlation.max_entries", 100_000)?
            .set_default("correlation.sweep_interval_secs", 60)?
            .set_default("correlation.backend", "memory")?
            .add_source(File::with_name("config/settings").required(false));

        // Explicit values replace the process environment so tests stay isolated
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // e.g. APP_CORRELATION__BACKEND or APP_REDIS__URI
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
