use super::{Result, TransportError};
use crate::clock::Clock;
use crate::crypto::{HashAlg, constant_time_eq};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

pub const MAX_LIGHT_TOKEN_SIZE: usize = 1024;

const SEPARATOR: char = '|';
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %3f";

/// Reference to a light request or response parked in the shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightToken {
    pub id: String,
    pub issuer: String,
    pub created_on: DateTime<Utc>,
}

impl LightToken {
    /// A fresh token with a random ID, truncated to millisecond precision.
    pub fn generate(issuer: impl Into<String>, clock: &dyn Clock) -> Self {
        let now = clock.now();
        let created_on = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issuer: issuer.into(),
            created_on,
        }
    }

    fn timestamp(&self) -> String {
        self.created_on.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Encodes light tokens as `issuer|id|timestamp|digest`, the digest being the
/// base64 SHA-256 of `id|issuer|timestamp|secret`.
pub struct LightTokenCodec {
    secret: SecretString,
}

impl std::fmt::Debug for LightTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightTokenCodec").finish_non_exhaustive()
    }
}

impl LightTokenCodec {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn digest(&self, id: &str, issuer: &str, timestamp: &str) -> Result<String> {
        let input = format!(
            "{id}{SEPARATOR}{issuer}{SEPARATOR}{timestamp}{SEPARATOR}{}",
            self.secret.expose_secret()
        );
        Ok(STANDARD.encode(HashAlg::Sha256.hash(input)?))
    }

    pub fn encode(&self, token: &LightToken) -> Result<String> {
        if token.id.trim().is_empty()
            || token.issuer.trim().is_empty()
            || token.id.contains(SEPARATOR)
            || token.issuer.contains(SEPARATOR)
        {
            return Err(TransportError::LightTokenParse);
        }
        let timestamp = token.timestamp();
        let digest = self.digest(&token.id, &token.issuer, &timestamp)?;
        let encoded = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{timestamp}{SEPARATOR}{digest}",
            token.issuer, token.id
        );
        if encoded.len() > MAX_LIGHT_TOKEN_SIZE {
            return Err(TransportError::LightTokenParse);
        }
        Ok(encoded)
    }

    /// Base64 form, as carried in the `token` form field.
    pub fn encode_base64(&self, token: &LightToken) -> Result<String> {
        Ok(STANDARD.encode(self.encode(token)?))
    }

    pub fn decode(&self, encoded: &str) -> Result<LightToken> {
        if encoded.len() > MAX_LIGHT_TOKEN_SIZE {
            return Err(TransportError::LightTokenParse);
        }
        let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
        let [issuer, id, timestamp, digest] = parts[..] else {
            return Err(TransportError::LightTokenParse);
        };
        if issuer.trim().is_empty() || id.trim().is_empty() || digest.is_empty() {
            return Err(TransportError::LightTokenParse);
        }
        let created_on = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|_| TransportError::LightTokenParse)?
            .and_utc();

        let expected = self.digest(id, issuer, timestamp)?;
        if !constant_time_eq(expected.as_bytes(), digest.as_bytes()) {
            tracing::warn!(id, issuer, "Light token digest mismatch");
            return Err(TransportError::LightTokenDigest);
        }
        Ok(LightToken {
            id: id.to_string(),
            issuer: issuer.to_string(),
            created_on,
        })
    }

    pub fn decode_base64(&self, encoded: &str) -> Result<LightToken> {
        if encoded.len() > MAX_LIGHT_TOKEN_SIZE / 3 * 4 + 4 {
            return Err(TransportError::LightTokenParse);
        }
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| TransportError::LightTokenParse)?;
        let text = String::from_utf8(bytes).map_err(|_| TransportError::LightTokenParse)?;
        self.decode(&text)
    }
}
