//! XML security layer: exclusive canonicalization, enveloped XML-DSig
//! signatures and XML-Enc 1.1 assertion encryption.

pub mod algorithms;
pub mod c14n;
mod dsig;
mod error;
pub mod utils;
mod xenc;

pub use dsig::{SignatureConfig, sign_document, verify_document};
pub use error::Error;
pub use utils::{Document, Element};
pub use xenc::{
    Decrypted, DecryptionPolicy, EncryptionConfig, KeyEncipherment, RecipientHint,
    decrypt_assertions, encrypt_assertions,
};

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

pub mod ns {
    pub const SAML2: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
    pub const SAML2P: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
    pub const MD: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
    pub const MDATTR: &str = "urn:oasis:names:tc:SAML:metadata:attribute";
    pub const DS: &str = "http://www.w3.org/2000/09/xmldsig#";
    pub const DSIG11: &str = "http://www.w3.org/2009/xmldsig11#";
    pub const XENC: &str = "http://www.w3.org/2001/04/xmlenc#";
    pub const XENC11: &str = "http://www.w3.org/2009/xmlenc11#";
    pub const EIDAS: &str = "http://eidas.europa.eu/saml-extensions";
    pub const EIDAS_NATURAL: &str = "http://eidas.europa.eu/attributes/naturalperson";
    pub const EIDAS_LEGAL: &str = "http://eidas.europa.eu/attributes/legalperson";
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
    pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
}

/// Element with text content only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    #[serde(rename = "$text", default)]
    pub value: String,
}

impl Text {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename(serialize = "@xmlns:ds"), skip_deserializing, default)]
    pub xmlns_ds: String,

    #[serde(rename(serialize = "ds:SignedInfo", deserialize = "SignedInfo"))]
    pub signed_info: SignedInfo,

    #[serde(rename(serialize = "ds:SignatureValue", deserialize = "SignatureValue"))]
    pub signature_value: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ds:KeyInfo", deserialize = "KeyInfo"), default)]
    pub key_info: Option<KeyInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedInfo {
    #[serde(rename(serialize = "@xmlns:ds"), skip_deserializing, default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xmlns_ds: Option<String>,

    #[serde(rename(
        serialize = "ds:CanonicalizationMethod",
        deserialize = "CanonicalizationMethod"
    ))]
    pub canon_method: CanonicalizationMethod,

    #[serde(rename(serialize = "ds:SignatureMethod", deserialize = "SignatureMethod"))]
    pub signature_method: AlgorithmRef,

    #[serde(rename(serialize = "ds:Reference", deserialize = "Reference"), default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalizationMethod {
    #[serde(rename = "@Algorithm")]
    pub algorithm: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ec:InclusiveNamespaces", deserialize = "InclusiveNamespaces"))]
    #[serde(default)]
    pub inclusive_ns: Option<InclusiveNamespaces>,
}

/// Any element whose only content is an `Algorithm` attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmRef {
    #[serde(rename = "@Algorithm")]
    pub algorithm: String,
}

impl AlgorithmRef {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "@URI", default)]
    pub uri: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ds:Transforms", deserialize = "Transforms"), default)]
    pub transforms: Option<Transforms>,

    #[serde(rename(serialize = "ds:DigestMethod", deserialize = "DigestMethod"))]
    pub digest_method: AlgorithmRef,

    #[serde(rename(serialize = "ds:DigestValue", deserialize = "DigestValue"))]
    pub digest_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transforms {
    #[serde(rename(serialize = "ds:Transform", deserialize = "Transform"), default)]
    pub transform: Vec<Transform>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transform {
    #[serde(rename = "@Algorithm")]
    pub algorithm: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ec:InclusiveNamespaces", deserialize = "InclusiveNamespaces"))]
    #[serde(default)]
    pub inclusive_ns: Option<InclusiveNamespaces>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InclusiveNamespaces {
    #[serde(rename(serialize = "@xmlns:ec"), skip_deserializing, default)]
    pub xmlns_ec: String,

    #[serde(rename = "@PrefixList", default)]
    pub prefix_list: String,
}

impl InclusiveNamespaces {
    pub fn prefixes(&self) -> Vec<String> {
        self.prefix_list
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ds:X509Data", deserialize = "X509Data"), default)]
    pub x509_data: Option<X509Data>,
}

/// `ds:X509Data` with every identification form the engine reads or writes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct X509Data {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ds:X509IssuerSerial", deserialize = "X509IssuerSerial"))]
    #[serde(default)]
    pub issuer_serial: Option<X509IssuerSerial>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(serialize = "ds:X509SKI", deserialize = "X509SKI"), default)]
    pub ski: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(serialize = "ds:X509SubjectName", deserialize = "X509SubjectName"))]
    #[serde(default)]
    pub subject_name: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(serialize = "ds:X509Certificate", deserialize = "X509Certificate"))]
    #[serde(default)]
    pub certificate: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(serialize = "dsig11:X509Digest", deserialize = "X509Digest"), default)]
    pub digest: Vec<X509Digest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X509IssuerSerial {
    #[serde(rename(serialize = "ds:X509IssuerName", deserialize = "X509IssuerName"))]
    pub issuer_name: String,

    #[serde(rename(serialize = "ds:X509SerialNumber", deserialize = "X509SerialNumber"))]
    pub serial_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X509Digest {
    #[serde(rename(serialize = "@xmlns:dsig11"), skip_deserializing, default)]
    pub xmlns_dsig11: String,

    #[serde(rename = "@Algorithm")]
    pub algorithm: String,

    #[serde(rename = "$text")]
    pub value: String,
}

/// Strip the whitespace that base64 content may be wrapped with
pub(crate) fn compact_base64(value: &str) -> String {
    value.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}
