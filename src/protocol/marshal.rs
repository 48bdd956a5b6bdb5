use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::de::from_str as xml_from_str;
use quick_xml::se::to_string_with_root as xml_to_string;
use tracing::debug;

use super::schema::{MessageKind, check_schema};
use super::validate::{validate_assertion_wire, validate_request_wire, validate_response_wire};
use super::wire::*;
use super::{BEARER_METHOD, ENTITY_FORMAT, NAME_FORMAT_URI, Result, SAML_VERSION, ValidationError};
use crate::metadata::BINDING_HTTP_POST;
use crate::model::{
    AttributeDefinition, AttributeMap, AttributeRegistry, AttributeValue, AuthenticationRequest,
    AuthenticationResponse, ModelError, NameIdFormat, PersonType, RequestCore, RequestFields,
    ResponseFields, ResponseStatus, SpType, StatusCode, ValueKind,
};
use crate::xml::utils::strip_declaration;
use crate::xml::{Document, Text, ns};

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_instant(value: Option<&str>, field: &'static str) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v.trim())
                .map(|instant| instant.with_timezone(&Utc))
                .map_err(|_| ValidationError::Invalid(field))
        })
        .transpose()
}

/// Serialize an authentication request. The result is unsigned.
pub fn marshal_request(request: &AuthenticationRequest, issue_instant: DateTime<Utc>) -> Result<String> {
    let core = request.core();
    let requested = core
        .requested_attributes()
        .iter()
        .map(|(def, values)| RequestedAttributeXml {
            name: def.name_uri.clone(),
            friendly_name: Some(def.friendly_name.clone()),
            name_format: Some(NAME_FORMAT_URI.into()),
            is_required: Some(def.required.to_string()),
            values: values_to_wire(def, values),
        })
        .collect();

    let wire = AuthnRequestXml {
        xmlns_saml2p: ns::SAML2P.into(),
        xmlns_saml2: ns::SAML2.into(),
        xmlns_eidas: ns::EIDAS.into(),
        xmlns_xsi: ns::XSI.into(),
        xmlns_natural: ns::EIDAS_NATURAL.into(),
        xmlns_legal: ns::EIDAS_LEGAL.into(),
        id: Some(core.id().into()),
        version: Some(SAML_VERSION.into()),
        issue_instant: Some(timestamp(issue_instant)),
        destination: Some(core.destination().into()),
        consent: None,
        force_authn: Some("true".into()),
        is_passive: Some("false".into()),
        provider_name: core.provider_name().map(Into::into),
        protocol_binding: Some(BINDING_HTTP_POST.into()),
        assertion_consumer_service_url: core.assertion_consumer_service_url().map(Into::into),
        issuer: Some(IssuerXml {
            format: Some(ENTITY_FORMAT.into()),
            value: core.issuer().into(),
        }),
        signature: None,
        extensions: Some(RequestExtensionsXml {
            sp_type: request.sp_type().map(|t| Text::new(t.as_str())),
            requested_attributes: Some(RequestedAttributesXml {
                attributes: requested,
            }),
        }),
        name_id_policy: Some(NameIdPolicyXml {
            allow_create: Some("true".into()),
            format: core.name_id_format().map(|f| f.uri().into()),
        }),
        requested_authn_context: Some(RequestedAuthnContextXml {
            comparison: Some(core.comparison().as_str().into()),
            class_refs: vec![Text::new(core.level_of_assurance().uri())],
        }),
        scoping: request.requester_id().map(|id| ScopingXml {
            requester_ids: vec![Text::new(id)],
        }),
    };
    Ok(xml_to_string("saml2p:AuthnRequest", &wire)?)
}

/// Parse and validate a signed authentication request.
///
/// `legacy_protocol` selects the eIDAS 1.1 form, in which the SP type is
/// mandatory in the request. The citizen country is not carried by the
/// request itself; the receiving node supplies it.
pub fn unmarshal_request(
    xml: &str,
    registry: &AttributeRegistry,
    citizen_country_code: Option<&str>,
    legacy_protocol: bool,
) -> Result<AuthenticationRequest> {
    if check_schema(xml)? != MessageKind::AuthnRequest {
        return Err(ValidationError::Schema("expected an AuthnRequest".into()));
    }
    let wire: AuthnRequestXml = xml_from_str(strip_declaration(xml))?;
    validate_request_wire(&wire)?;

    let extensions = wire.extensions.unwrap_or_default();
    let mut requested_attributes = AttributeMap::new();
    for attribute in extensions
        .requested_attributes
        .map(|list| list.attributes)
        .unwrap_or_default()
    {
        let definition = lookup(registry, &attribute.name)?;
        let values = values_from_wire(definition, &attribute.values)?;
        requested_attributes.insert(definition.clone(), values)?;
    }

    let context = wire.requested_authn_context.unwrap_or_default();
    let core = RequestCore::new(RequestFields {
        id: wire.id.unwrap_or_default(),
        issuer: wire.issuer.map(|issuer| issuer.value).unwrap_or_default(),
        destination: wire.destination.unwrap_or_default(),
        level_of_assurance: context
            .class_refs
            .into_iter()
            .next()
            .map(|class_ref| class_ref.value)
            .unwrap_or_default(),
        level_of_assurance_comparison: context.comparison,
        requested_attributes,
        citizen_country_code: citizen_country_code.map(Into::into),
        provider_name: wire.provider_name,
        name_id_format: wire.name_id_policy.and_then(|policy| policy.format),
        assertion_consumer_service_url: wire.assertion_consumer_service_url,
    })?;

    let sp_type = extensions
        .sp_type
        .map(|t| t.value.parse::<SpType>())
        .transpose()?;
    let request = if legacy_protocol {
        AuthenticationRequest::legacy(core, sp_type.ok_or(ValidationError::Required("SPType"))?)?
    } else {
        let requester_id = wire
            .scoping
            .and_then(|scoping| scoping.requester_ids.into_iter().next())
            .map(|id| id.value);
        AuthenticationRequest::eidas(core, sp_type, requester_id)?
    };
    debug!(id = request.id(), issuer = request.issuer(), "Unmarshalled request");
    Ok(request)
}

/// Serialize an authentication response. A successful response carries one
/// assertion; the result is unsigned and unencrypted.
pub fn marshal_response(
    response: &AuthenticationResponse,
    destination: &str,
    consent: Option<&str>,
) -> Result<String> {
    let issue_instant = timestamp(response.issue_instant());
    let issuer = || IssuerXml {
        format: Some(ENTITY_FORMAT.into()),
        value: response.issuer().into(),
    };

    let status = response.status();
    let status = StatusXml {
        status_code: Some(StatusCodeXml {
            value: status.code.uri().into(),
            sub_code: status.sub_status.as_ref().map(|sub| {
                Box::new(StatusCodeXml {
                    value: sub.clone(),
                    sub_code: None,
                })
            }),
        }),
        status_message: status.message.as_ref().map(Text::new),
    };

    let assertions = if response.is_success() {
        vec![assertion_to_wire(response, destination, &issue_instant, issuer())]
    } else {
        Vec::new()
    };

    let wire = ResponseXml {
        xmlns_saml2p: ns::SAML2P.into(),
        xmlns_saml2: ns::SAML2.into(),
        xmlns_xsi: ns::XSI.into(),
        xmlns_natural: ns::EIDAS_NATURAL.into(),
        xmlns_legal: ns::EIDAS_LEGAL.into(),
        id: Some(response.id().into()),
        in_response_to: Some(response.in_response_to().into()),
        version: Some(SAML_VERSION.into()),
        issue_instant: Some(issue_instant.clone()),
        destination: Some(destination.into()),
        consent: consent.map(Into::into),
        issuer: Some(issuer()),
        signature: None,
        status: Some(status),
        assertions,
        encrypted_assertions: Vec::new(),
    };
    Ok(xml_to_string("saml2p:Response", &wire)?)
}

fn assertion_to_wire(
    response: &AuthenticationResponse,
    destination: &str,
    issue_instant: &str,
    issuer: IssuerXml,
) -> AssertionXml {
    let not_on_or_after = response.not_on_or_after().map(timestamp);
    let attributes = response
        .attributes()
        .iter()
        .map(|(def, values)| AttributeXml {
            name: def.name_uri.clone(),
            friendly_name: Some(def.friendly_name.clone()),
            name_format: Some(NAME_FORMAT_URI.into()),
            values: values_to_wire(def, values),
        })
        .collect();

    AssertionXml {
        id: Some(format!("_{}", uuid::Uuid::new_v4().simple())),
        version: Some(SAML_VERSION.into()),
        issue_instant: Some(issue_instant.into()),
        issuer: Some(issuer),
        signature: None,
        subject: Some(SubjectXml {
            name_id: Some(NameIdXml {
                format: Some(
                    response
                        .subject_name_id_format()
                        .unwrap_or(NameIdFormat::Unspecified)
                        .uri()
                        .into(),
                ),
                name_qualifier: None,
                value: response.subject().unwrap_or_default().into(),
            }),
            confirmation: Some(SubjectConfirmationXml {
                method: BEARER_METHOD.into(),
                data: Some(SubjectConfirmationDataXml {
                    address: response.subject_ip_address().map(Into::into),
                    in_response_to: Some(response.in_response_to().into()),
                    not_on_or_after: not_on_or_after.clone(),
                    recipient: Some(destination.into()),
                }),
            }),
        }),
        conditions: Some(ConditionsXml {
            not_before: Some(issue_instant.into()),
            not_on_or_after,
            audience_restrictions: response
                .audience()
                .map(|audience| AudienceRestrictionXml {
                    audiences: vec![Text::new(audience)],
                })
                .into_iter()
                .collect(),
        }),
        authn_statements: vec![AuthnStatementXml {
            authn_instant: Some(issue_instant.into()),
            subject_locality: response.subject_ip_address().map(|address| SubjectLocalityXml {
                address: Some(address.into()),
            }),
            authn_context: Some(AuthnContextXml {
                class_ref: response.level_of_assurance().map(|loa| Text::new(loa.uri())),
            }),
        }],
        attribute_statements: vec![AttributeStatementXml { attributes }],
    }
}

/// A validated response plus the envelope fields the business rules check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub response: AuthenticationResponse,
    pub destination: String,
    pub consent: Option<String>,
    /// `Assertion/Issuer`, absent on failure responses
    pub assertion_issuer: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    /// `SubjectConfirmationData/@Recipient`
    pub recipient: Option<String>,
    /// `SubjectConfirmationData/@InResponseTo`
    pub confirmation_in_response_to: Option<String>,
}

/// Parse and validate a signed response whose assertions are already
/// decrypted.
pub fn unmarshal_response(xml: &str, registry: &AttributeRegistry) -> Result<ResponseEnvelope> {
    if check_schema(xml)? != MessageKind::Response {
        return Err(ValidationError::Schema("expected a Response".into()));
    }
    let wire: ResponseXml = xml_from_str(strip_declaration(xml))?;
    validate_response_wire(&wire)?;
    if !wire.encrypted_assertions.is_empty() {
        return Err(ValidationError::Invalid("EncryptedAssertion"));
    }

    let issue_instant = parse_instant(wire.issue_instant.as_deref(), "IssueInstant")?
        .ok_or(ValidationError::Required("IssueInstant"))?;
    let mut fields = ResponseFields::new(
        wire.id.unwrap_or_default(),
        wire.in_response_to.unwrap_or_default(),
        wire.issuer.map(|issuer| issuer.value).unwrap_or_default(),
        issue_instant,
    );
    fields.status = status_from_wire(wire.status.unwrap_or_default())?;
    let destination = wire.destination.unwrap_or_default();

    if !fields.status.is_success() {
        return Ok(ResponseEnvelope {
            response: AuthenticationResponse::failure(fields)?,
            destination,
            consent: wire.consent,
            assertion_issuer: None,
            not_before: None,
            recipient: None,
            confirmation_in_response_to: None,
        });
    }

    let assertion = wire
        .assertions
        .into_iter()
        .next()
        .ok_or(ValidationError::Required("Assertion"))?;
    validate_assertion_wire(&assertion)?;

    let subject = assertion.subject.unwrap_or_default();
    let name_id = subject.name_id.unwrap_or_default();
    fields.subject = Some(name_id.value);
    fields.subject_name_id_format = name_id
        .format
        .as_deref()
        .map(NameIdFormat::from_uri)
        .transpose()
        .map_err(|_| ValidationError::Invalid("NameID Format"))?;

    let confirmation = subject.confirmation.and_then(|c| c.data).unwrap_or_default();
    fields.subject_ip_address = confirmation.address;

    let conditions = assertion.conditions.unwrap_or_default();
    fields.not_on_or_after = parse_instant(conditions.not_on_or_after.as_deref(), "NotOnOrAfter")?;
    fields.audience = conditions
        .audience_restrictions
        .into_iter()
        .flat_map(|restriction| restriction.audiences)
        .map(|audience| audience.value)
        .next();

    let statement = assertion.authn_statements.into_iter().next().unwrap_or_default();
    fields.level_of_assurance = statement
        .authn_context
        .and_then(|context| context.class_ref)
        .map(|class_ref| class_ref.value);

    for attribute in assertion
        .attribute_statements
        .into_iter()
        .flat_map(|statement| statement.attributes)
    {
        let definition = lookup(registry, &attribute.name)?;
        let values = values_from_wire(definition, &attribute.values)?;
        fields.attributes.insert(definition.clone(), values)?;
    }

    let envelope = ResponseEnvelope {
        response: AuthenticationResponse::success(fields)?,
        destination,
        consent: wire.consent,
        assertion_issuer: assertion.issuer.map(|issuer| issuer.value),
        not_before: parse_instant(conditions.not_before.as_deref(), "NotBefore")?,
        recipient: confirmation.recipient,
        confirmation_in_response_to: confirmation.in_response_to,
    };
    debug!(
        id = envelope.response.id(),
        in_response_to = envelope.response.in_response_to(),
        "Unmarshalled response"
    );
    Ok(envelope)
}

fn status_from_wire(status: StatusXml) -> Result<ResponseStatus> {
    let code = status
        .status_code
        .ok_or(ValidationError::Required("Status"))?;
    Ok(ResponseStatus {
        code: StatusCode::from_uri(&code.value).ok_or(ValidationError::Invalid("StatusCode"))?,
        sub_status: code.sub_code.map(|sub| sub.value),
        message: status.status_message.map(|message| message.value),
    })
}

fn lookup<'r>(registry: &'r AttributeRegistry, name: &str) -> Result<&'r AttributeDefinition> {
    registry
        .get(name.trim())
        .ok_or_else(|| ValidationError::UnknownAttribute(name.to_string()))
}

fn values_to_wire(def: &AttributeDefinition, values: &[AttributeValue]) -> Vec<AttributeValueXml> {
    let (_, prefix) = def.xml_type_namespace();
    let plain = |value: String| AttributeValueXml {
        xsi_type: Some(def.xml_type.clone()),
        value,
        ..Default::default()
    };

    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            AttributeValue::Transliterated { native, latin } => {
                let mut native = plain(native.clone());
                match def.person_type {
                    PersonType::NaturalPerson => native.latin_script_natural = Some("false".into()),
                    PersonType::LegalPerson => native.latin_script_legal = Some("false".into()),
                }
                out.push(native);
                out.push(plain(latin.clone()));
            }
            AttributeValue::Address(address) => out.push(plain(address.to_wire(prefix))),
            other => out.push(plain(other.to_string())),
        }
    }
    out
}

/// Wire values back to typed values. A `LatinScript="false"` value is paired
/// with the Latin value that follows it.
fn values_from_wire(
    def: &AttributeDefinition,
    values: &[AttributeValueXml],
) -> Result<Vec<AttributeValue>> {
    let invalid = |reason: String| ValidationError::AttributeValue {
        name: def.friendly_name.clone(),
        reason,
    };

    let mut out = Vec::with_capacity(values.len());
    let mut iter = values.iter();
    while let Some(value) = iter.next() {
        if value.is_native_script() {
            if def.value_kind != ValueKind::String {
                return Err(invalid("LatinScript is only allowed on string values".into()));
            }
            let latin = iter
                .next()
                .filter(|next| !next.is_native_script())
                .ok_or_else(|| ModelError::TransliterationRequired(def.friendly_name.clone()))?;
            out.push(AttributeValue::Transliterated {
                native: value.value.clone(),
                latin: latin.value.clone(),
            });
        } else {
            out.push(AttributeValue::from_wire(def.value_kind, &value.value).map_err(invalid)?);
        }
    }
    Ok(out)
}

/// Fields of a response readable without decryption or signature checks,
/// used to find the correlated request first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub id: String,
    pub in_response_to: String,
    pub issuer: String,
}

/// Issuer of a request, read before its signature is checked so the
/// partner's metadata can be resolved
pub fn read_request_issuer(xml: &str) -> Result<String> {
    let doc = Document::parse(strip_declaration(xml))?;
    let root = doc.root();
    if !root.is(ns::SAML2P, "AuthnRequest") {
        return Err(ValidationError::Schema(format!(
            "unexpected root element {}",
            root.name
        )));
    }
    let issuer = doc
        .children(root)
        .find(|e| e.is(ns::SAML2, "Issuer"))
        .ok_or(ValidationError::Required("Issuer"))?;
    let issuer = doc.text(issuer)?.trim().to_string();
    if issuer.is_empty() {
        return Err(ValidationError::Required("Issuer"));
    }
    Ok(issuer)
}

pub fn read_response_header(xml: &str) -> Result<ResponseHeader> {
    let doc = Document::parse(strip_declaration(xml))?;
    let root = doc.root();
    if !root.is(ns::SAML2P, "Response") {
        return Err(ValidationError::Schema(format!(
            "unexpected root element {}",
            root.name
        )));
    }
    let attribute = |name: &'static str| {
        root.attribute(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(ValidationError::Required(name))
    };
    let issuer = doc
        .children(root)
        .find(|e| e.is(ns::SAML2, "Issuer"))
        .ok_or(ValidationError::Required("Issuer"))?;

    Ok(ResponseHeader {
        id: attribute("ID")?,
        in_response_to: attribute("InResponseTo")?,
        issuer: doc.text(issuer)?.trim().to_string(),
    })
}
