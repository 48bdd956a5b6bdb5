use chrono::{DateTime, Duration, SecondsFormat, Utc};
use openssl::x509::X509;
use quick_xml::se::to_string_with_root as xml_to_string;

use super::parser::{
    AttributeXml, EndpointXml, EntityAttributesXml, EntityDescriptorXml, ExtensionsXml,
    KeyDescriptorXml, RoleXml,
};
use super::{Endpoint, MetadataError, PROTOCOL_VERSION_ATTRIBUTE, ProtocolVersion, Result};
use crate::credential::Credential;
use crate::model::SpType;
use crate::xml::{self, SignatureConfig, Text, ns};

const ATTRNAME_FORMAT_URI: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:uri";

/// Keys and endpoints published for one SSO role
#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub signing_certificate: X509,
    pub encryption_certificate: Option<X509>,
    pub endpoints: Vec<Endpoint>,
    pub name_id_formats: Vec<String>,
    pub requests_signed: bool,
    pub want_assertions_signed: bool,
}

/// Produces this node's own signed metadata document
#[derive(Debug, Clone)]
pub struct MetadataGenerator {
    pub entity_id: String,
    pub valid_for: Duration,
    pub protocol_versions: Vec<ProtocolVersion>,
    pub sp_type: Option<SpType>,
    pub sp: Option<RoleConfig>,
    pub idp: Option<RoleConfig>,
}

impl MetadataGenerator {
    pub fn new(entity_id: impl Into<String>, valid_for: Duration) -> Self {
        Self {
            entity_id: entity_id.into(),
            valid_for,
            protocol_versions: vec![ProtocolVersion::new(1, 2)],
            sp_type: None,
            sp: None,
            idp: None,
        }
    }

    pub fn generate(
        &self,
        signer: &Credential,
        signature: &SignatureConfig,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let versions = self
            .protocol_versions
            .iter()
            .map(|v| Text::new(v.to_string()))
            .collect();
        let wire = EntityDescriptorXml {
            xmlns_md: ns::MD.into(),
            xmlns_ds: ns::DS.into(),
            xmlns_saml2: ns::SAML2.into(),
            xmlns_mdattr: ns::MDATTR.into(),
            xmlns_eidas: ns::EIDAS.into(),
            id: format!("_{}", uuid::Uuid::new_v4()),
            entity_id: self.entity_id.clone(),
            valid_until: Some(
                (now + self.valid_for).to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            extensions: Some(ExtensionsXml {
                sp_type: self.sp_type.map(|t| Text::new(t.as_str())),
                entity_attributes: Some(EntityAttributesXml {
                    attributes: vec![AttributeXml {
                        name: PROTOCOL_VERSION_ATTRIBUTE.into(),
                        name_format: Some(ATTRNAME_FORMAT_URI.into()),
                        values: versions,
                    }],
                }),
            }),
            sp: self.sp.as_ref().map(|role| role_xml(role, true)).transpose()?,
            idp: self.idp.as_ref().map(|role| role_xml(role, false)).transpose()?,
        };

        let unsigned = xml_to_string("md:EntityDescriptor", &wire)
            .map_err(|e| MetadataError::Parse(e.to_string()))?;
        Ok(xml::sign_document(&unsigned, signer, signature)?)
    }
}

fn role_xml(role: &RoleConfig, is_sp: bool) -> Result<RoleXml> {
    let mut key_descriptors = vec![KeyDescriptorXml::new("signing", &role.signing_certificate)?];
    if let Some(cert) = &role.encryption_certificate {
        key_descriptors.push(KeyDescriptorXml::new("encryption", cert)?);
    }
    let endpoints = role
        .endpoints
        .iter()
        .enumerate()
        .map(|(index, e)| EndpointXml {
            binding: e.binding.clone(),
            location: e.location.clone(),
            index: is_sp.then_some(index as u32),
        })
        .collect::<Vec<_>>();

    Ok(RoleXml {
        protocol_support: ns::SAML2P.into(),
        authn_requests_signed: is_sp.then_some(role.requests_signed),
        want_assertions_signed: is_sp.then_some(role.want_assertions_signed),
        want_authn_requests_signed: (!is_sp).then_some(role.requests_signed),
        key_descriptors,
        name_id_formats: role.name_id_formats.iter().map(Text::new).collect(),
        single_sign_on: if is_sp { Vec::new() } else { endpoints.clone() },
        assertion_consumer: if is_sp { endpoints } else { Vec::new() },
    })
}
