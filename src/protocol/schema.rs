use super::{Result, ValidationError};
use crate::xml::{Document, Element, ns};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    AuthnRequest,
    Response,
}

impl MessageKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::AuthnRequest => "AuthnRequest",
            Self::Response => "Response",
        }
    }
}

/// One position of an XSD sequence
struct Particle {
    namespace: &'static str,
    names: &'static [&'static str],
    max: usize,
}

const fn one(namespace: &'static str, names: &'static [&'static str]) -> Particle {
    Particle {
        namespace,
        names,
        max: 1,
    }
}

const fn many(namespace: &'static str, names: &'static [&'static str]) -> Particle {
    Particle {
        namespace,
        names,
        max: usize::MAX,
    }
}

const AUTHN_REQUEST: &[Particle] = &[
    one(ns::SAML2, &["Issuer"]),
    one(ns::DS, &["Signature"]),
    one(ns::SAML2P, &["Extensions"]),
    one(ns::SAML2, &["Subject"]),
    one(ns::SAML2P, &["NameIDPolicy"]),
    one(ns::SAML2, &["Conditions"]),
    one(ns::SAML2P, &["RequestedAuthnContext"]),
    one(ns::SAML2P, &["Scoping"]),
];

const RESPONSE: &[Particle] = &[
    one(ns::SAML2, &["Issuer"]),
    one(ns::DS, &["Signature"]),
    one(ns::SAML2P, &["Extensions"]),
    one(ns::SAML2P, &["Status"]),
    many(ns::SAML2, &["Assertion", "EncryptedAssertion"]),
];

const ASSERTION: &[Particle] = &[
    one(ns::SAML2, &["Issuer"]),
    one(ns::DS, &["Signature"]),
    one(ns::SAML2, &["Subject"]),
    one(ns::SAML2, &["Conditions"]),
    one(ns::SAML2, &["Advice"]),
    many(
        ns::SAML2,
        &["Statement", "AuthnStatement", "AuthzDecisionStatement", "AttributeStatement"],
    ),
];

/// Structural check of a request or response document: the root must be a
/// `saml2p:AuthnRequest` or `saml2p:Response`, and the children of the root and
/// of every assertion must follow the SAML 2.0 content model. Elements in
/// foreign namespaces and documents with a DOCTYPE are rejected.
pub fn check_schema(xml: &str) -> Result<MessageKind> {
    let doc = Document::parse(xml)?;
    let root = doc.root();

    let kind = if root.is(ns::SAML2P, "AuthnRequest") {
        MessageKind::AuthnRequest
    } else if root.is(ns::SAML2P, "Response") {
        MessageKind::Response
    } else {
        return Err(ValidationError::Schema(format!(
            "unexpected root element {}",
            root.name
        )));
    };

    match kind {
        MessageKind::AuthnRequest => check_sequence(&doc, root, AUTHN_REQUEST)?,
        MessageKind::Response => {
            check_sequence(&doc, root, RESPONSE)?;
            for assertion in doc.children(root).filter(|e| e.is(ns::SAML2, "Assertion")) {
                check_sequence(&doc, assertion, ASSERTION)?;
            }
        }
    }
    Ok(kind)
}

fn check_sequence(doc: &Document<'_>, parent: &Element, sequence: &[Particle]) -> Result<()> {
    let mut position = 0;
    let mut count = 0;

    for child in doc.children(parent) {
        let namespace = child.namespace.as_deref().unwrap_or_default();
        let found = sequence[position..].iter().position(|p| {
            p.namespace == namespace && p.names.contains(&child.local_name.as_str())
        });
        match found {
            Some(0) => count += 1,
            Some(offset) => {
                position += offset;
                count = 1;
            }
            None => {
                return Err(ValidationError::Schema(format!(
                    "element {} is not allowed at this position in {}",
                    child.name, parent.local_name
                )));
            }
        }
        if count > sequence[position].max {
            return Err(ValidationError::Schema(format!(
                "element {} occurs too often in {}",
                child.name, parent.local_name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAML2P: &str = r#"xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol""#;
    const SAML2: &str = r#"xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion""#;

    #[test]
    fn test_request_accepted() {
        let xml = format!(
            "<saml2p:AuthnRequest {SAML2P} {SAML2} ID=\"_1\"><saml2:Issuer>i</saml2:Issuer>\
             <saml2p:NameIDPolicy/><saml2p:RequestedAuthnContext/></saml2p:AuthnRequest>"
        );
        assert_eq!(check_schema(&xml).unwrap(), MessageKind::AuthnRequest);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let xml = format!(
            "<saml2p:AuthnRequest {SAML2P} {SAML2}><saml2p:NameIDPolicy/>\
             <saml2:Issuer>i</saml2:Issuer></saml2p:AuthnRequest>"
        );
        assert!(matches!(check_schema(&xml), Err(ValidationError::Schema(_))));
    }

    #[test]
    fn test_duplicate_and_foreign_elements_rejected() {
        let xml = format!(
            "<saml2p:Response {SAML2P} {SAML2}><saml2:Issuer>a</saml2:Issuer>\
             <saml2:Issuer>b</saml2:Issuer></saml2p:Response>"
        );
        assert!(check_schema(&xml).is_err());

        let xml = format!(
            "<saml2p:Response {SAML2P} {SAML2} xmlns:x=\"urn:x\"><x:Extra/></saml2p:Response>"
        );
        assert!(check_schema(&xml).is_err());
    }

    #[test]
    fn test_assertion_content_checked() {
        let ok = format!(
            "<saml2p:Response {SAML2P} {SAML2}><saml2p:Status/><saml2:Assertion>\
             <saml2:Issuer>a</saml2:Issuer><saml2:Subject/><saml2:AuthnStatement/>\
             <saml2:AttributeStatement/></saml2:Assertion></saml2p:Response>"
        );
        assert_eq!(check_schema(&ok).unwrap(), MessageKind::Response);

        let bad = format!(
            "<saml2p:Response {SAML2P} {SAML2}><saml2p:Status/><saml2:Assertion>\
             <saml2:AttributeStatement/><saml2:Subject/></saml2:Assertion></saml2p:Response>"
        );
        assert!(check_schema(&bad).is_err());
    }

    #[test]
    fn test_wrong_root_rejected() {
        let xml = format!("<saml2:Assertion {SAML2}/>");
        assert!(matches!(check_schema(&xml), Err(ValidationError::Schema(_))));
    }
}
