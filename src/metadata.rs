//! Metadata Trust Resolver: fetches a partner's signed SAML metadata, checks
//! its signature against the configured trust anchors and caches the result
//! until its `validUntil` instant.

mod fetcher;
mod generator;
mod parser;
mod resolver;
mod trust;

pub use fetcher::{HttpMetadataFetcher, MetadataFetcher};
pub use generator::{MetadataGenerator, RoleConfig};
pub use parser::{Endpoint, MetadataParameters, ProtocolVersion, RoleDescriptor, parse_metadata};
pub use resolver::MetadataResolver;
pub use trust::{MetadataTrust, UrlPolicy, validate_url};

#[cfg(test)]
pub use fetcher::MockMetadataFetcher;

use thiserror::Error;

pub const PROTOCOL_VERSION_ATTRIBUTE: &str =
    "http://eidas.europa.eu/entity-attributes/protocol-version";

pub const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// Cached results are shared between concurrent callers, so the error is
/// `Clone` and carries its causes as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Invalid metadata source: {0}")]
    InvalidSource(String),

    #[error("Failed to fetch metadata from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Timed out fetching metadata from {0}")]
    Timeout(String),

    #[error("Malformed metadata: {0}")]
    Parse(String),

    #[error("Metadata of {0} carries no validUntil")]
    MissingValidUntil(String),

    #[error("Metadata of {0} is expired")]
    Expired(String),

    #[error("Metadata signature is invalid: {0}")]
    Signature(String),

    #[error("Metadata signer is not trusted: {0}")]
    Untrusted(String),

    #[error("Metadata of {url} has no {role} role")]
    MissingRole { url: String, role: &'static str },

    #[error("Metadata of {url} has no {usage} certificate for the {role} role")]
    MissingCertificate {
        url: String,
        role: &'static str,
        usage: &'static str,
    },
}

impl From<crate::xml::Error> for MetadataError {
    fn from(err: crate::xml::Error) -> Self {
        MetadataError::Signature(err.to_string())
    }
}

impl From<quick_xml::DeError> for MetadataError {
    fn from(err: quick_xml::DeError) -> Self {
        MetadataError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
