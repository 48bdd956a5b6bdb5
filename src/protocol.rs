//! Message Marshaller/Validator: converts authentication requests and
//! responses to and from their SAML wire form and enforces the structural and
//! field constraints of the eIDAS SAML profile.

mod marshal;
mod schema;
mod validate;
mod wire;

pub use marshal::{
    ResponseEnvelope, ResponseHeader, marshal_request, marshal_response, read_request_issuer,
    read_response_header, unmarshal_request, unmarshal_response,
};
pub use schema::{MessageKind, check_schema};
pub use validate::{
    validate_assertion_wire, validate_consent, validate_request_wire, validate_response_wire,
    validate_size,
};
pub use wire::{AssertionXml, AuthnRequestXml, ResponseXml};

use crate::model::ModelError;
use thiserror::Error;

/// Upper bound of a serialized message accepted for processing
pub const MAX_MESSAGE_SIZE: usize = 131_072;

pub const SAML_VERSION: &str = "2.0";

pub const CONSENT_ALLOWED_VALUES: [&str; 7] = [
    "urn:oasis:names:tc:SAML:2.0:consent:obtained",
    "urn:oasis:names:tc:SAML:2.0:consent:prior",
    "urn:oasis:names:tc:SAML:2.0:consent:current-implicit",
    "urn:oasis:names:tc:SAML:2.0:consent:current-explicit",
    "urn:oasis:names:tc:SAML:2.0:consent:unspecified",
    "urn:oasis:names:tc:SAML:2.0:consent:unavailable",
    "urn:oasis:names:tc:SAML:2.0:consent:inapplicable",
];

pub const NAME_FORMAT_URI: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";
pub const ENTITY_FORMAT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:entity";
pub const BEARER_METHOD: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// A message rejected by the marshaller or one of the validators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("{0} is invalid.")]
    Invalid(&'static str),

    #[error("SAML {0} exceeds max size.")]
    TooLarge(&'static str),

    #[error("Consent is invalid")]
    Consent,

    #[error("Number of {element} {count} in {parent} differs from number of allowed ones:{allowed}.")]
    Cardinality {
        element: &'static str,
        parent: &'static str,
        count: usize,
        allowed: usize,
    },

    #[error("schema.validation.error: {0}")]
    Schema(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid value for attribute {name}: {reason}")]
    AttributeValue { name: String, reason: String },

    #[error("{field} mismatch: expected {expected}, got {actual}")]
    Mismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Level of assurance {granted} does not satisfy the requested {requested}")]
    LevelOfAssurance { requested: String, granted: String },

    #[error("Assertion is not valid at {0}")]
    Conditions(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<quick_xml::DeError> for ValidationError {
    fn from(e: quick_xml::DeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<quick_xml::SeError> for ValidationError {
    fn from(e: quick_xml::SeError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<crate::xml::Error> for ValidationError {
    fn from(e: crate::xml::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ValidationError>;
