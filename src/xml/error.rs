use crate::credential::CredentialError;
use openssl::error::ErrorStack;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML processing error: {0}")]
    Xml(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::crypto::Error),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Algorithm not allowed: {0}")]
    DisallowedAlgorithm(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Document is not signed")]
    SignatureMissing,

    #[error("Signature reference '{actual}' does not point at the signed element '{expected}'")]
    ReferenceMismatch { expected: String, actual: String },

    #[error("Digest value does not match the signed content")]
    DigestMismatch,

    #[error("Signature value is invalid")]
    InvalidSignature,

    #[error("Signing certificate is not one of the trusted certificates")]
    UntrustedCertificate,

    #[error("Key type mismatch: {algorithm} requires an {expected} key, got {actual}")]
    KeyTypeMismatch {
        algorithm: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid data: {0}")]
    Invalid(String),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<quick_xml::DeError> for Error {
    fn from(err: quick_xml::DeError) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<quick_xml::SeError> for Error {
    fn from(err: quick_xml::SeError) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Utf8(err.utf8_error())
    }
}

impl From<quick_xml::escape::EscapeError> for Error {
    fn from(err: quick_xml::escape::EscapeError) -> Self {
        Error::Xml(err.to_string())
    }
}
