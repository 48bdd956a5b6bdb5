use chrono::DateTime;

use super::wire::{AssertionXml, AuthnRequestXml, ResponseXml};
use super::{CONSENT_ALLOWED_VALUES, MessageKind, Result, SAML_VERSION, ValidationError};
use crate::metadata::BINDING_HTTP_POST;
use crate::model::{LoaComparison, NameIdFormat};

pub fn validate_size(message: &[u8], max: usize, kind: MessageKind) -> Result<()> {
    if message.len() > max {
        return Err(ValidationError::TooLarge(kind.name()));
    }
    Ok(())
}

/// An absent consent is fine; a present one must be a SAML 2.0 consent URI
pub fn validate_consent(consent: Option<&str>) -> Result<()> {
    match consent {
        Some(value) if !CONSENT_ALLOWED_VALUES.contains(&value.trim()) => {
            Err(ValidationError::Consent)
        }
        _ => Ok(()),
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::Required(field))
}

fn version(value: Option<&str>) -> Result<()> {
    if required(value, "Version")? != SAML_VERSION {
        return Err(ValidationError::Invalid("Version"));
    }
    Ok(())
}

fn instant(value: Option<&str>, field: &'static str) -> Result<()> {
    DateTime::parse_from_rfc3339(required(value, field)?)
        .map(|_| ())
        .map_err(|_| ValidationError::Invalid(field))
}

fn flag(value: Option<&str>, field: &'static str, expected: &str) -> Result<()> {
    if required(value, field)? != expected {
        return Err(ValidationError::Invalid(field));
    }
    Ok(())
}

pub fn validate_request_wire(request: &AuthnRequestXml) -> Result<()> {
    required(request.id.as_deref(), "ID")?;
    version(request.version.as_deref())?;
    instant(request.issue_instant.as_deref(), "IssueInstant")?;
    required(request.destination.as_deref(), "Destination")?;
    validate_consent(request.consent.as_deref())?;
    flag(request.force_authn.as_deref(), "ForceAuthn", "true")?;
    flag(request.is_passive.as_deref(), "IsPassive", "false")?;
    if let Some(binding) = &request.protocol_binding {
        if binding.trim() != BINDING_HTTP_POST {
            return Err(ValidationError::Invalid("ProtocolBinding"));
        }
    }
    required(
        request.issuer.as_ref().map(|issuer| issuer.value.as_str()),
        "Issuer",
    )?;
    if request.signature.is_none() {
        return Err(ValidationError::Required("Signature"));
    }

    let extensions = request
        .extensions
        .as_ref()
        .ok_or(ValidationError::Required("Extensions"))?;
    if let Some(sp_type) = &extensions.sp_type {
        sp_type
            .value
            .parse::<crate::model::SpType>()
            .map_err(|_| ValidationError::Invalid("SPType"))?;
    }
    let attributes = extensions
        .requested_attributes
        .as_ref()
        .filter(|list| !list.attributes.is_empty())
        .ok_or(ValidationError::Required("RequestedAttributes"))?;
    if attributes.attributes.iter().any(|a| a.name.trim().is_empty()) {
        return Err(ValidationError::Required("RequestedAttribute Name"));
    }

    if let Some(format) = request
        .name_id_policy
        .as_ref()
        .and_then(|policy| policy.format.as_deref())
    {
        NameIdFormat::from_uri(format).map_err(|_| ValidationError::Invalid("NameIDPolicy"))?;
    }

    let context = request
        .requested_authn_context
        .as_ref()
        .ok_or(ValidationError::Required("RequestedAuthnContext"))?;
    if let Some(comparison) = &context.comparison {
        comparison
            .parse::<LoaComparison>()
            .map_err(|_| ValidationError::Invalid("Comparison"))?;
    }
    if context.class_refs.len() != 1 {
        return Err(ValidationError::Cardinality {
            element: "AuthnContextClassRef",
            parent: "RequestedAuthnContext",
            count: context.class_refs.len(),
            allowed: 1,
        });
    }
    Ok(())
}

pub fn validate_response_wire(response: &ResponseXml) -> Result<()> {
    required(response.id.as_deref(), "ID")?;
    required(response.in_response_to.as_deref(), "InResponseTo")?;
    version(response.version.as_deref())?;
    instant(response.issue_instant.as_deref(), "IssueInstant")?;
    required(response.destination.as_deref(), "Destination")?;
    validate_consent(response.consent.as_deref())?;
    required(
        response.issuer.as_ref().map(|issuer| issuer.value.as_str()),
        "Issuer",
    )?;
    let status_code = response
        .status
        .as_ref()
        .and_then(|status| status.status_code.as_ref())
        .ok_or(ValidationError::Required("Status"))?;
    if response.signature.is_none() {
        return Err(ValidationError::Required("Signature"));
    }

    let assertions = response.assertions.len() + response.encrypted_assertions.len();
    if status_code.value.trim() == crate::model::StatusCode::Success.uri() {
        if assertions == 0 {
            return Err(ValidationError::Required("Assertion"));
        }
        if assertions > 1 {
            return Err(ValidationError::Cardinality {
                element: "Assertion",
                parent: "Response",
                count: assertions,
                allowed: 1,
            });
        }
    }
    Ok(())
}

pub fn validate_assertion_wire(assertion: &AssertionXml) -> Result<()> {
    required(assertion.id.as_deref(), "Assertion ID")?;
    version(assertion.version.as_deref())?;
    instant(assertion.issue_instant.as_deref(), "Assertion IssueInstant")?;
    required(
        assertion.issuer.as_ref().map(|issuer| issuer.value.as_str()),
        "Assertion Issuer",
    )?;

    let subject = assertion
        .subject
        .as_ref()
        .ok_or(ValidationError::Required("Subject"))?;
    required(
        subject.name_id.as_ref().map(|name_id| name_id.value.as_str()),
        "NameID",
    )?;
    if assertion.conditions.is_none() {
        return Err(ValidationError::Required("Conditions"));
    }

    for (element, count) in [
        ("AuthnStatement", assertion.authn_statements.len()),
        ("AttributeStatement", assertion.attribute_statements.len()),
    ] {
        if count != 1 {
            return Err(ValidationError::Cardinality {
                element,
                parent: "Assertion",
                count,
                allowed: 1,
            });
        }
    }
    let class_ref = assertion.authn_statements[0]
        .authn_context
        .as_ref()
        .and_then(|context| context.class_ref.as_ref())
        .map(|class_ref| class_ref.value.as_str());
    required(class_ref, "AuthnContextClassRef")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::{
        AuthnContextXml, AuthnStatementXml, AttributeStatementXml, ConditionsXml, IssuerXml,
        NameIdXml, RequestExtensionsXml, RequestedAttributeXml, RequestedAttributesXml,
        RequestedAuthnContextXml, StatusCodeXml, StatusXml, SubjectXml,
    };
    use crate::xml::{AlgorithmRef, CanonicalizationMethod, Signature, SignedInfo, Text};

    fn signature() -> Signature {
        Signature {
            xmlns_ds: String::new(),
            signed_info: SignedInfo {
                xmlns_ds: None,
                canon_method: CanonicalizationMethod {
                    algorithm: String::new(),
                    inclusive_ns: None,
                },
                signature_method: AlgorithmRef::new(""),
                references: vec![],
            },
            signature_value: String::new(),
            key_info: None,
        }
    }

    fn issuer() -> Option<IssuerXml> {
        Some(IssuerXml {
            format: None,
            value: "https://connector.example/metadata".into(),
        })
    }

    fn request() -> AuthnRequestXml {
        AuthnRequestXml {
            id: Some("_req".into()),
            version: Some("2.0".into()),
            issue_instant: Some("2026-01-01T10:00:00.000Z".into()),
            destination: Some("https://proxy.example/sso".into()),
            force_authn: Some("true".into()),
            is_passive: Some("false".into()),
            issuer: issuer(),
            signature: Some(signature()),
            extensions: Some(RequestExtensionsXml {
                sp_type: Some(Text::new("public")),
                requested_attributes: Some(RequestedAttributesXml {
                    attributes: vec![RequestedAttributeXml {
                        name: "http://eidas.europa.eu/attributes/naturalperson/PersonIdentifier"
                            .into(),
                        ..Default::default()
                    }],
                }),
            }),
            requested_authn_context: Some(RequestedAuthnContextXml {
                comparison: Some("minimum".into()),
                class_refs: vec![Text::new("http://eidas.europa.eu/LoA/low")],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_request() {
        assert_eq!(validate_request_wire(&request()), Ok(()));
    }

    #[test]
    fn test_request_field_messages() {
        let cases: Vec<(fn(&mut AuthnRequestXml), &str)> = vec![
            (|r: &mut AuthnRequestXml| r.id = None, "ID is required"),
            (|r: &mut AuthnRequestXml| r.version = None, "Version is required"),
            (|r: &mut AuthnRequestXml| r.version = Some("1.0".into()), "Version is invalid."),
            (|r: &mut AuthnRequestXml| r.issue_instant = None, "IssueInstant is required"),
            (|r: &mut AuthnRequestXml| r.destination = None, "Destination is required"),
            (|r: &mut AuthnRequestXml| r.consent = Some("invalid consent".into()), "Consent is invalid"),
            (|r: &mut AuthnRequestXml| r.force_authn = Some("false".into()), "ForceAuthn is invalid."),
            (|r: &mut AuthnRequestXml| r.is_passive = None, "IsPassive is required"),
            (|r: &mut AuthnRequestXml| r.is_passive = Some("true".into()), "IsPassive is invalid."),
            (
                |r: &mut AuthnRequestXml| r.protocol_binding = Some("urn:other".into()),
                "ProtocolBinding is invalid.",
            ),
            (|r: &mut AuthnRequestXml| r.issuer = None, "Issuer is required"),
            (|r: &mut AuthnRequestXml| r.signature = None, "Signature is required"),
            (|r: &mut AuthnRequestXml| r.extensions = None, "Extensions is required"),
        ];
        for (mutate, message) in cases {
            let mut request = request();
            mutate(&mut request);
            assert_eq!(validate_request_wire(&request).unwrap_err().to_string(), message);
        }
    }

    #[test]
    fn test_request_comparison_and_name_id_policy() {
        let mut r = request();
        if let Some(context) = r.requested_authn_context.as_mut() {
            context.comparison = Some("exact".into());
        }
        assert_eq!(validate_request_wire(&r), Err(ValidationError::Invalid("Comparison")));

        let mut r = request();
        r.name_id_policy = Some(crate::protocol::wire::NameIdPolicyXml {
            allow_create: Some("true".into()),
            format: Some("urn:example:format".into()),
        });
        assert_eq!(validate_request_wire(&r), Err(ValidationError::Invalid("NameIDPolicy")));
    }

    #[test]
    fn test_consent_allow_list() {
        for consent in CONSENT_ALLOWED_VALUES {
            assert!(validate_consent(Some(consent)).is_ok());
        }
        assert!(validate_consent(None).is_ok());
        assert_eq!(validate_consent(Some("yes")), Err(ValidationError::Consent));
    }

    #[test]
    fn test_size_limit() {
        let message = vec![b'a'; 11];
        assert!(validate_size(&message, 11, MessageKind::Response).is_ok());
        assert_eq!(
            validate_size(&message, 10, MessageKind::Response)
                .unwrap_err()
                .to_string(),
            "SAML Response exceeds max size."
        );
        assert_eq!(
            validate_size(&message, 10, MessageKind::AuthnRequest)
                .unwrap_err()
                .to_string(),
            "SAML AuthnRequest exceeds max size."
        );
    }

    fn assertion() -> AssertionXml {
        AssertionXml {
            id: Some("_a".into()),
            version: Some("2.0".into()),
            issue_instant: Some("2026-01-01T10:00:00Z".into()),
            issuer: issuer(),
            subject: Some(SubjectXml {
                name_id: Some(NameIdXml {
                    value: "BE/BE/123".into(),
                    ..Default::default()
                }),
                confirmation: None,
            }),
            conditions: Some(ConditionsXml::default()),
            authn_statements: vec![AuthnStatementXml {
                authn_context: Some(AuthnContextXml {
                    class_ref: Some(Text::new("http://eidas.europa.eu/LoA/high")),
                }),
                ..Default::default()
            }],
            attribute_statements: vec![AttributeStatementXml::default()],
            ..Default::default()
        }
    }

    fn response() -> ResponseXml {
        ResponseXml {
            id: Some("_resp".into()),
            in_response_to: Some("_req".into()),
            version: Some("2.0".into()),
            issue_instant: Some("2026-01-01T10:00:00Z".into()),
            destination: Some("https://connector.example/acs".into()),
            issuer: issuer(),
            signature: Some(signature()),
            status: Some(StatusXml {
                status_code: Some(StatusCodeXml {
                    value: crate::model::StatusCode::Success.uri().into(),
                    sub_code: None,
                }),
                status_message: None,
            }),
            assertions: vec![assertion()],
            ..Default::default()
        }
    }

    #[test]
    fn test_response_messages() {
        assert_eq!(validate_response_wire(&response()), Ok(()));

        let cases: Vec<(fn(&mut ResponseXml), &str)> = vec![
            (|r: &mut ResponseXml| r.in_response_to = None, "InResponseTo is required"),
            (|r: &mut ResponseXml| r.status = None, "Status is required"),
            (|r: &mut ResponseXml| r.signature = None, "Signature is required"),
            (|r: &mut ResponseXml| r.assertions.clear(), "Assertion is required"),
            (
                |r: &mut ResponseXml| r.assertions.push(r.assertions[0].clone()),
                "Number of Assertion 2 in Response differs from number of allowed ones:1.",
            ),
        ];
        for (mutate, message) in cases {
            let mut response = response();
            mutate(&mut response);
            assert_eq!(validate_response_wire(&response).unwrap_err().to_string(), message);
        }
    }

    #[test]
    fn test_failure_response_needs_no_assertion() {
        let mut r = response();
        r.assertions.clear();
        if let Some(code) = r.status.as_mut().and_then(|s| s.status_code.as_mut()) {
            code.value = crate::model::StatusCode::Responder.uri().into();
        }
        assert!(validate_response_wire(&r).is_ok());
    }

    #[test]
    fn test_assertion_cardinality() {
        assert!(validate_assertion_wire(&assertion()).is_ok());

        let mut a = assertion();
        a.authn_statements.clear();
        assert_eq!(
            validate_assertion_wire(&a).unwrap_err().to_string(),
            "Number of AuthnStatement 0 in Assertion differs from number of allowed ones:1."
        );

        let mut a = assertion();
        a.attribute_statements.push(AttributeStatementXml::default());
        assert!(matches!(
            validate_assertion_wire(&a),
            Err(ValidationError::Cardinality { count: 2, .. })
        ));

        let mut a = assertion();
        a.subject = None;
        assert_eq!(validate_assertion_wire(&a), Err(ValidationError::Required("Subject")));
    }
}
