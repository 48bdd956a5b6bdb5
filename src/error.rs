//! Engine-level error taxonomy. Every failure a caller can observe falls into
//! exactly one category; the module errors stay available as the source.

use crate::correlation::{CorrelationError, SkewError};
use crate::credential::CredentialError;
use crate::metadata::MetadataError;
use crate::model::StatusCode;
use crate::protocol::ValidationError;
use crate::transport::TransportError;
use thiserror::Error;

/// Bad or missing key material, disallowed algorithms, unreadable settings.
/// Raised at start-up.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Instance {instance}: {reason}")]
    Invalid { instance: String, reason: String },

    #[error("Unknown engine instance: {0}")]
    UnknownInstance(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Xml(#[from] crate::xml::Error),

    #[error(transparent)]
    Settings(#[from] config::ConfigError),
}

/// Signature, decryption and certificate failures
#[derive(Error, Debug)]
pub enum CryptographicError {
    #[error("Signature validation failed: {0}")]
    Signature(#[source] crate::xml::Error),

    #[error("Signing failed: {0}")]
    Signing(#[source] crate::xml::Error),

    #[error("Encryption failed: {0}")]
    Encryption(#[source] crate::xml::Error),

    #[error("Decryption failed: {0}")]
    Decryption(#[source] crate::xml::Error),

    #[error("Certificate rejected: {0}")]
    Certificate(#[from] CredentialError),

    #[error("Assertion {0} is not signed")]
    UnsignedAssertion(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cryptographic error: {0}")]
    Cryptographic(#[from] CryptographicError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("Time skew error: {0}")]
    TimeSkew(#[from] SkewError),
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        EngineError::Validation(ValidationError::Malformed(err.to_string()))
    }
}

impl EngineError {
    /// Top-level SAML status for an error response reporting this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_)
            | EngineError::Cryptographic(_)
            | EngineError::Correlation(_)
            | EngineError::TimeSkew(_) => StatusCode::Requester,
            EngineError::Configuration(_) | EngineError::Metadata(_) => StatusCode::Responder,
        }
    }

    /// Stable machine-readable code, safe to show to end users
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "samlengine.configuration.error",
            EngineError::Validation(_) => "message.validation.error",
            EngineError::Cryptographic(CryptographicError::Signature(_))
            | EngineError::Cryptographic(CryptographicError::UnsignedAssertion(_)) => {
                "invalid.signature.error"
            }
            EngineError::Cryptographic(CryptographicError::Decryption(_)) => {
                "message.decryption.error"
            }
            EngineError::Cryptographic(_) => "message.cryptographic.error",
            EngineError::Metadata(_) => "message.metadata.error",
            EngineError::Correlation(_) => "message.correlation.error",
            EngineError::TimeSkew(_) => "message.timeskew.error",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_codes() {
        let validation = EngineError::from(ValidationError::Required("ID"));
        assert_eq!(validation.status_code(), StatusCode::Requester);
        assert_eq!(validation.error_code(), "message.validation.error");

        let metadata = EngineError::from(MetadataError::Timeout("https://x".into()));
        assert_eq!(metadata.status_code(), StatusCode::Responder);

        let replay = EngineError::from(CorrelationError::NotFound("_r".into()));
        assert_eq!(replay.status_code(), StatusCode::Requester);
        assert_eq!(replay.error_code(), "message.correlation.error");

        let signature =
            EngineError::from(CryptographicError::Signature(crate::xml::Error::InvalidSignature));
        assert_eq!(signature.error_code(), "invalid.signature.error");
    }

    #[test]
    fn test_transport_errors_are_validation_errors() {
        let err = EngineError::from(TransportError::LightTokenParse);
        assert!(matches!(err, EngineError::Validation(ValidationError::Malformed(_))));
    }
}
