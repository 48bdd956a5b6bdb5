use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::xml::{Signature, Text};

// Element names carry their prefix when written; when read, quick-xml matches
// local names, so the prefix used by the partner does not matter.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthnRequestXml {
    #[serde(rename(serialize = "@xmlns:saml2p"), skip_deserializing, default)]
    pub xmlns_saml2p: String,
    #[serde(rename(serialize = "@xmlns:saml2"), skip_deserializing, default)]
    pub xmlns_saml2: String,
    #[serde(rename(serialize = "@xmlns:eidas"), skip_deserializing, default)]
    pub xmlns_eidas: String,
    #[serde(rename(serialize = "@xmlns:xsi"), skip_deserializing, default)]
    pub xmlns_xsi: String,
    #[serde(rename(serialize = "@xmlns:eidas-natural"), skip_deserializing, default)]
    pub xmlns_natural: String,
    #[serde(rename(serialize = "@xmlns:eidas-legal"), skip_deserializing, default)]
    pub xmlns_legal: String,

    #[serde(rename = "@ID", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(rename = "@Version", skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    #[serde(rename = "@IssueInstant", skip_serializing_if = "Option::is_none", default)]
    pub issue_instant: Option<String>,
    #[serde(rename = "@Destination", skip_serializing_if = "Option::is_none", default)]
    pub destination: Option<String>,
    #[serde(rename = "@Consent", skip_serializing_if = "Option::is_none", default)]
    pub consent: Option<String>,
    #[serde(rename = "@ForceAuthn", skip_serializing_if = "Option::is_none", default)]
    pub force_authn: Option<String>,
    #[serde(rename = "@IsPassive", skip_serializing_if = "Option::is_none", default)]
    pub is_passive: Option<String>,
    #[serde(rename = "@ProviderName", skip_serializing_if = "Option::is_none", default)]
    pub provider_name: Option<String>,
    #[serde(rename = "@ProtocolBinding", skip_serializing_if = "Option::is_none", default)]
    pub protocol_binding: Option<String>,
    #[serde(
        rename = "@AssertionConsumerServiceURL",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub assertion_consumer_service_url: Option<String>,

    #[serde(rename(serialize = "saml2:Issuer", deserialize = "Issuer"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub issuer: Option<IssuerXml>,

    #[serde(rename = "Signature", skip_serializing, default)]
    pub signature: Option<Signature>,

    #[serde(rename(serialize = "saml2p:Extensions", deserialize = "Extensions"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extensions: Option<RequestExtensionsXml>,

    #[serde(rename(serialize = "saml2p:NameIDPolicy", deserialize = "NameIDPolicy"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name_id_policy: Option<NameIdPolicyXml>,

    #[serde(rename(
        serialize = "saml2p:RequestedAuthnContext",
        deserialize = "RequestedAuthnContext"
    ))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub requested_authn_context: Option<RequestedAuthnContextXml>,

    #[serde(rename(serialize = "saml2p:Scoping", deserialize = "Scoping"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scoping: Option<ScopingXml>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerXml {
    #[serde(rename = "@Format", skip_serializing_if = "Option::is_none", default)]
    pub format: Option<String>,
    #[serde(rename = "$text", default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestExtensionsXml {
    #[serde(rename(serialize = "eidas:SPType", deserialize = "SPType"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sp_type: Option<Text>,

    #[serde(rename(
        serialize = "eidas:RequestedAttributes",
        deserialize = "RequestedAttributes"
    ))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub requested_attributes: Option<RequestedAttributesXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedAttributesXml {
    #[serde(rename(
        serialize = "eidas:RequestedAttribute",
        deserialize = "RequestedAttribute"
    ))]
    #[serde(default)]
    pub attributes: Vec<RequestedAttributeXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedAttributeXml {
    #[serde(rename = "@Name", default)]
    pub name: String,
    #[serde(rename = "@FriendlyName", skip_serializing_if = "Option::is_none", default)]
    pub friendly_name: Option<String>,
    #[serde(rename = "@NameFormat", skip_serializing_if = "Option::is_none", default)]
    pub name_format: Option<String>,
    #[serde(rename = "@isRequired", skip_serializing_if = "Option::is_none", default)]
    pub is_required: Option<String>,
    #[serde(rename(serialize = "eidas:AttributeValue", deserialize = "AttributeValue"))]
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub values: Vec<AttributeValueXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameIdPolicyXml {
    #[serde(rename = "@AllowCreate", skip_serializing_if = "Option::is_none", default)]
    pub allow_create: Option<String>,
    #[serde(rename = "@Format", skip_serializing_if = "Option::is_none", default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestedAuthnContextXml {
    #[serde(rename = "@Comparison", skip_serializing_if = "Option::is_none", default)]
    pub comparison: Option<String>,
    #[serde(rename(
        serialize = "saml2:AuthnContextClassRef",
        deserialize = "AuthnContextClassRef"
    ))]
    #[serde(default)]
    pub class_refs: Vec<Text>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopingXml {
    #[serde(rename(serialize = "saml2p:RequesterID", deserialize = "RequesterID"))]
    #[serde(default)]
    pub requester_ids: Vec<Text>,
}

/// One `AttributeValue`. The type namespaces are declared on the message
/// root; `LatinScript="false"` marks the native form of a transliterated
/// value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeValueXml {
    #[serde(rename(serialize = "@xsi:type", deserialize = "@type"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub xsi_type: Option<String>,

    #[serde(rename(serialize = "@eidas-natural:LatinScript"), skip_deserializing)]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latin_script_natural: Option<String>,

    #[serde(rename(serialize = "@eidas-legal:LatinScript"), skip_deserializing)]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latin_script_legal: Option<String>,

    #[serde(rename(deserialize = "@LatinScript"), skip_serializing, default)]
    pub latin_script: Option<String>,

    #[serde(rename = "$text", default)]
    pub value: String,
}

impl AttributeValueXml {
    pub fn is_native_script(&self) -> bool {
        self.latin_script.as_deref().map(str::trim) == Some("false")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseXml {
    #[serde(rename(serialize = "@xmlns:saml2p"), skip_deserializing, default)]
    pub xmlns_saml2p: String,
    #[serde(rename(serialize = "@xmlns:saml2"), skip_deserializing, default)]
    pub xmlns_saml2: String,
    #[serde(rename(serialize = "@xmlns:xsi"), skip_deserializing, default)]
    pub xmlns_xsi: String,
    #[serde(rename(serialize = "@xmlns:eidas-natural"), skip_deserializing, default)]
    pub xmlns_natural: String,
    #[serde(rename(serialize = "@xmlns:eidas-legal"), skip_deserializing, default)]
    pub xmlns_legal: String,

    #[serde(rename = "@ID", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(rename = "@InResponseTo", skip_serializing_if = "Option::is_none", default)]
    pub in_response_to: Option<String>,
    #[serde(rename = "@Version", skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    #[serde(rename = "@IssueInstant", skip_serializing_if = "Option::is_none", default)]
    pub issue_instant: Option<String>,
    #[serde(rename = "@Destination", skip_serializing_if = "Option::is_none", default)]
    pub destination: Option<String>,
    #[serde(rename = "@Consent", skip_serializing_if = "Option::is_none", default)]
    pub consent: Option<String>,

    #[serde(rename(serialize = "saml2:Issuer", deserialize = "Issuer"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub issuer: Option<IssuerXml>,

    #[serde(rename = "Signature", skip_serializing, default)]
    pub signature: Option<Signature>,

    #[serde(rename(serialize = "saml2p:Status", deserialize = "Status"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<StatusXml>,

    #[serde(rename(serialize = "saml2:Assertion", deserialize = "Assertion"))]
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub assertions: Vec<AssertionXml>,

    #[serde(rename = "EncryptedAssertion", skip_serializing, default)]
    pub encrypted_assertions: Vec<IgnoredAny>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusXml {
    #[serde(rename(serialize = "saml2p:StatusCode", deserialize = "StatusCode"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status_code: Option<StatusCodeXml>,

    #[serde(rename(serialize = "saml2p:StatusMessage", deserialize = "StatusMessage"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status_message: Option<Text>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusCodeXml {
    #[serde(rename = "@Value", default)]
    pub value: String,

    #[serde(rename(serialize = "saml2p:StatusCode", deserialize = "StatusCode"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub_code: Option<Box<StatusCodeXml>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertionXml {
    #[serde(rename = "@ID", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(rename = "@Version", skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    #[serde(rename = "@IssueInstant", skip_serializing_if = "Option::is_none", default)]
    pub issue_instant: Option<String>,

    #[serde(rename(serialize = "saml2:Issuer", deserialize = "Issuer"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub issuer: Option<IssuerXml>,

    #[serde(rename = "Signature", skip_serializing, default)]
    pub signature: Option<Signature>,

    #[serde(rename(serialize = "saml2:Subject", deserialize = "Subject"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject: Option<SubjectXml>,

    #[serde(rename(serialize = "saml2:Conditions", deserialize = "Conditions"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conditions: Option<ConditionsXml>,

    #[serde(rename(serialize = "saml2:AuthnStatement", deserialize = "AuthnStatement"))]
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub authn_statements: Vec<AuthnStatementXml>,

    #[serde(rename(serialize = "saml2:AttributeStatement", deserialize = "AttributeStatement"))]
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub attribute_statements: Vec<AttributeStatementXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectXml {
    #[serde(rename(serialize = "saml2:NameID", deserialize = "NameID"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name_id: Option<NameIdXml>,

    #[serde(rename(
        serialize = "saml2:SubjectConfirmation",
        deserialize = "SubjectConfirmation"
    ))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confirmation: Option<SubjectConfirmationXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameIdXml {
    #[serde(rename = "@Format", skip_serializing_if = "Option::is_none", default)]
    pub format: Option<String>,
    #[serde(rename = "@NameQualifier", skip_serializing_if = "Option::is_none", default)]
    pub name_qualifier: Option<String>,
    #[serde(rename = "$text", default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectConfirmationXml {
    #[serde(rename = "@Method", default)]
    pub method: String,

    #[serde(rename(
        serialize = "saml2:SubjectConfirmationData",
        deserialize = "SubjectConfirmationData"
    ))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<SubjectConfirmationDataXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectConfirmationDataXml {
    #[serde(rename = "@Address", skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(rename = "@InResponseTo", skip_serializing_if = "Option::is_none", default)]
    pub in_response_to: Option<String>,
    #[serde(rename = "@NotOnOrAfter", skip_serializing_if = "Option::is_none", default)]
    pub not_on_or_after: Option<String>,
    #[serde(rename = "@Recipient", skip_serializing_if = "Option::is_none", default)]
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionsXml {
    #[serde(rename = "@NotBefore", skip_serializing_if = "Option::is_none", default)]
    pub not_before: Option<String>,
    #[serde(rename = "@NotOnOrAfter", skip_serializing_if = "Option::is_none", default)]
    pub not_on_or_after: Option<String>,

    #[serde(rename(
        serialize = "saml2:AudienceRestriction",
        deserialize = "AudienceRestriction"
    ))]
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub audience_restrictions: Vec<AudienceRestrictionXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudienceRestrictionXml {
    #[serde(rename(serialize = "saml2:Audience", deserialize = "Audience"), default)]
    pub audiences: Vec<Text>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthnStatementXml {
    #[serde(rename = "@AuthnInstant", skip_serializing_if = "Option::is_none", default)]
    pub authn_instant: Option<String>,

    #[serde(rename(serialize = "saml2:SubjectLocality", deserialize = "SubjectLocality"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject_locality: Option<SubjectLocalityXml>,

    #[serde(rename(serialize = "saml2:AuthnContext", deserialize = "AuthnContext"))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub authn_context: Option<AuthnContextXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectLocalityXml {
    #[serde(rename = "@Address", skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthnContextXml {
    #[serde(rename(
        serialize = "saml2:AuthnContextClassRef",
        deserialize = "AuthnContextClassRef"
    ))]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_ref: Option<Text>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeStatementXml {
    #[serde(rename(serialize = "saml2:Attribute", deserialize = "Attribute"), default)]
    pub attributes: Vec<AttributeXml>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeXml {
    #[serde(rename = "@Name", default)]
    pub name: String,
    #[serde(rename = "@FriendlyName", skip_serializing_if = "Option::is_none", default)]
    pub friendly_name: Option<String>,
    #[serde(rename = "@NameFormat", skip_serializing_if = "Option::is_none", default)]
    pub name_format: Option<String>,
    #[serde(rename(serialize = "saml2:AttributeValue", deserialize = "AttributeValue"))]
    #[serde(default)]
    pub values: Vec<AttributeValueXml>,
}
