use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use openssl::x509::X509;
use quick_xml::de::from_str as xml_from_str;
use serde::{Deserialize, Serialize};

use super::{MetadataError, PROTOCOL_VERSION_ATTRIBUTE, Result};
use crate::model::SpType;
use crate::xml::utils::strip_declaration;
use crate::xml::{KeyInfo, Text, X509Data, compact_base64};

/// `major.minor` eIDAS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for ProtocolVersion {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MetadataError::Parse(format!("Invalid protocol version: {s}"));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub binding: String,
    pub location: String,
}

/// Signing and encryption material of one SSO role
#[derive(Debug, Clone, Default)]
pub struct RoleDescriptor {
    pub signing_certificates: Vec<X509>,
    pub encryption_certificates: Vec<X509>,
    pub name_id_formats: Vec<String>,
    pub endpoints: Vec<Endpoint>,
    /// `AuthnRequestsSigned` (SP) or `WantAuthnRequestsSigned` (IDP)
    pub requests_signed: bool,
    pub want_assertions_signed: bool,
}

impl RoleDescriptor {
    pub fn endpoint(&self, binding: &str) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|e| e.binding == binding)
            .map(|e| e.location.as_str())
    }
}

/// Validated snapshot of a partner's metadata
#[derive(Debug, Clone)]
pub struct MetadataParameters {
    pub entity_id: String,
    pub valid_until: DateTime<Utc>,
    pub protocol_versions: Vec<ProtocolVersion>,
    pub sp_type: Option<SpType>,
    pub sp: Option<RoleDescriptor>,
    pub idp: Option<RoleDescriptor>,
    /// Certificate that signed the metadata document
    pub signer: Option<X509>,
}

impl MetadataParameters {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }

    pub fn highest_protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol_versions.iter().max().copied()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct EntityDescriptorXml {
    #[serde(rename(serialize = "@xmlns:md"), skip_deserializing, default)]
    pub xmlns_md: String,
    #[serde(rename(serialize = "@xmlns:ds"), skip_deserializing, default)]
    pub xmlns_ds: String,
    #[serde(rename(serialize = "@xmlns:saml2"), skip_deserializing, default)]
    pub xmlns_saml2: String,
    #[serde(rename(serialize = "@xmlns:mdattr"), skip_deserializing, default)]
    pub xmlns_mdattr: String,
    #[serde(rename(serialize = "@xmlns:eidas"), skip_deserializing, default)]
    pub xmlns_eidas: String,

    #[serde(rename = "@ID", default)]
    pub id: String,
    #[serde(rename = "@entityID")]
    pub entity_id: String,
    #[serde(rename = "@validUntil", default)]
    pub valid_until: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "md:Extensions", deserialize = "Extensions"), default)]
    pub extensions: Option<ExtensionsXml>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "md:SPSSODescriptor", deserialize = "SPSSODescriptor"))]
    #[serde(default)]
    pub sp: Option<RoleXml>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "md:IDPSSODescriptor", deserialize = "IDPSSODescriptor"))]
    #[serde(default)]
    pub idp: Option<RoleXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct ExtensionsXml {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "eidas:SPType", deserialize = "SPType"), default)]
    pub sp_type: Option<Text>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "mdattr:EntityAttributes", deserialize = "EntityAttributes"))]
    #[serde(default)]
    pub entity_attributes: Option<EntityAttributesXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct EntityAttributesXml {
    #[serde(rename(serialize = "saml2:Attribute", deserialize = "Attribute"), default)]
    pub attributes: Vec<AttributeXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct AttributeXml {
    #[serde(rename = "@Name")]
    pub name: String,
    #[serde(rename = "@NameFormat", default)]
    pub name_format: Option<String>,
    #[serde(rename(serialize = "saml2:AttributeValue", deserialize = "AttributeValue"))]
    #[serde(default)]
    pub values: Vec<Text>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct RoleXml {
    #[serde(rename = "@protocolSupportEnumeration", default)]
    pub protocol_support: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "@AuthnRequestsSigned", default)]
    pub authn_requests_signed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "@WantAssertionsSigned", default)]
    pub want_assertions_signed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "@WantAuthnRequestsSigned", default)]
    pub want_authn_requests_signed: Option<bool>,

    #[serde(rename(serialize = "md:KeyDescriptor", deserialize = "KeyDescriptor"), default)]
    pub key_descriptors: Vec<KeyDescriptorXml>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(serialize = "md:NameIDFormat", deserialize = "NameIDFormat"), default)]
    pub name_id_formats: Vec<Text>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(serialize = "md:SingleSignOnService", deserialize = "SingleSignOnService"))]
    #[serde(default)]
    pub single_sign_on: Vec<EndpointXml>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(
        serialize = "md:AssertionConsumerService",
        deserialize = "AssertionConsumerService"
    ))]
    #[serde(default)]
    pub assertion_consumer: Vec<EndpointXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct KeyDescriptorXml {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "@use", default)]
    pub usage: Option<String>,

    #[serde(rename(serialize = "ds:KeyInfo", deserialize = "KeyInfo"), default)]
    pub key_info: KeyInfo,
}

impl KeyDescriptorXml {
    pub fn new(usage: &str, certificate: &X509) -> Result<Self> {
        let der = certificate
            .to_der()
            .map_err(|e| MetadataError::Parse(e.to_string()))?;
        Ok(Self {
            usage: Some(usage.to_string()),
            key_info: KeyInfo {
                x509_data: Some(X509Data {
                    certificate: vec![BASE64.encode(der)],
                    ..Default::default()
                }),
            },
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct EndpointXml {
    #[serde(rename = "@Binding")]
    pub binding: String,
    #[serde(rename = "@Location")]
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "@index", default)]
    pub index: Option<u32>,
}

/// Parse the content of a metadata document whose signature has already been
/// validated. `source` names the document in errors.
pub fn parse_metadata(xml: &str, source: &str) -> Result<MetadataParameters> {
    let wire: EntityDescriptorXml = xml_from_str(strip_declaration(xml))?;

    let valid_until = wire
        .valid_until
        .as_deref()
        .ok_or_else(|| MetadataError::MissingValidUntil(source.to_string()))
        .and_then(|value| {
            DateTime::parse_from_rfc3339(value.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| MetadataError::Parse(format!("validUntil '{value}': {e}")))
        })?;

    let extensions = wire.extensions.unwrap_or_default();
    let protocol_versions = extensions
        .entity_attributes
        .iter()
        .flat_map(|attrs| &attrs.attributes)
        .filter(|attr| attr.name == PROTOCOL_VERSION_ATTRIBUTE)
        .flat_map(|attr| &attr.values)
        .flat_map(|value| value.value.split_whitespace())
        .map(ProtocolVersion::from_str)
        .collect::<Result<Vec<_>>>()?;
    let sp_type = extensions
        .sp_type
        .map(|t| {
            t.value
                .trim()
                .parse::<SpType>()
                .map_err(|e| MetadataError::Parse(e.to_string()))
        })
        .transpose()?;

    Ok(MetadataParameters {
        entity_id: wire.entity_id,
        valid_until,
        protocol_versions,
        sp_type,
        sp: wire.sp.map(|role| role_descriptor(role, true)).transpose()?,
        idp: wire.idp.map(|role| role_descriptor(role, false)).transpose()?,
        signer: None,
    })
}

fn role_descriptor(role: RoleXml, is_sp: bool) -> Result<RoleDescriptor> {
    let mut descriptor = RoleDescriptor {
        name_id_formats: role
            .name_id_formats
            .into_iter()
            .map(|f| f.value.trim().to_string())
            .collect(),
        requests_signed: if is_sp {
            role.authn_requests_signed.unwrap_or(false)
        } else {
            role.want_authn_requests_signed.unwrap_or(false)
        },
        want_assertions_signed: role.want_assertions_signed.unwrap_or(false),
        ..Default::default()
    };

    let endpoints = if is_sp {
        role.assertion_consumer
    } else {
        role.single_sign_on
    };
    descriptor.endpoints = endpoints
        .into_iter()
        .map(|e| Endpoint {
            binding: e.binding,
            location: e.location,
        })
        .collect();

    for key in role.key_descriptors {
        let certificates = key
            .key_info
            .x509_data
            .iter()
            .flat_map(|data| &data.certificate)
            .map(|encoded| decode_certificate(encoded))
            .collect::<Result<Vec<_>>>()?;
        match key.usage.as_deref() {
            Some("signing") => descriptor.signing_certificates.extend(certificates),
            Some("encryption") => descriptor.encryption_certificates.extend(certificates),
            None => {
                descriptor
                    .signing_certificates
                    .extend(certificates.iter().cloned());
                descriptor.encryption_certificates.extend(certificates);
            }
            Some(other) => {
                return Err(MetadataError::Parse(format!("Unknown key usage: {other}")));
            }
        }
    }
    Ok(descriptor)
}

pub(super) fn decode_certificate(encoded: &str) -> Result<X509> {
    let der = BASE64
        .decode(compact_base64(encoded))
        .map_err(|e| MetadataError::Parse(format!("certificate encoding: {e}")))?;
    X509::from_der(&der).map_err(|e| MetadataError::Parse(format!("certificate: {e}")))
}
