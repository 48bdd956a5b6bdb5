//! Immutable value types for eIDAS authentication requests and responses.
//!
//! Every constructor validates the complete value at once and either returns a
//! fully formed instance or a [`ModelError`].

mod attribute;
mod loa;
mod request;
mod response;

pub use attribute::{
    AttributeDefinition, AttributeMap, AttributeRegistry, AttributeValue, Gender, PersonType,
    PostalAddress, ValueKind, is_latin_script,
};
pub use loa::{LevelOfAssurance, LoaComparison, NameIdFormat, SpType};
pub use request::{AuthenticationRequest, EidasRequest, LegacyRequest, RequestCore, RequestFields};
pub use response::{AuthenticationResponse, ResponseFields, ResponseStatus, StatusCode};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Invalid level of assurance: {0}")]
    InvalidLevelOfAssurance(String),

    #[error("Invalid level of assurance comparison: {0}")]
    InvalidComparison(String),

    #[error("Invalid SP type: {0}")]
    InvalidSpType(String),

    #[error("Invalid NameID format: {0}")]
    InvalidNameIdFormat(String),

    #[error("Invalid country code: {0}")]
    InvalidCountryCode(String),

    #[error("Attribute {0} is requested more than once")]
    DuplicateAttribute(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid value for attribute {name}: {reason}")]
    InvalidAttributeValue { name: String, reason: String },

    #[error("Attribute {0} requires a Latin script value")]
    TransliterationRequired(String),

    #[error("A successful response must assert at least one identifying attribute")]
    NoIdentifyingAttribute,

    #[error("A failure response requires a status message")]
    MissingStatusMessage,

    #[error("Status code {0} cannot be used for this response")]
    InvalidStatus(String),
}

pub(crate) fn require(value: &str, field: &'static str) -> Result<(), ModelError> {
    if value.trim().is_empty() {
        return Err(ModelError::MissingField(field));
    }
    Ok(())
}

/// ISO 3166-1 alpha-2 check, plus the `EU` code used by EU institutions
pub fn validate_country_code(code: &str) -> Result<(), ModelError> {
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ModelError::InvalidCountryCode(code.to_string()))
    }
}
