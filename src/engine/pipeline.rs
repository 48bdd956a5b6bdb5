//! Message lifecycles as typestates. A message reaches its next state only
//! through the method performing that step, so an outgoing message cannot be
//! serialized unsigned and an incoming response cannot be read before its
//! signature, decryption, schema, correlation and business checks have run.

use std::marker::PhantomData;

use chrono::{DateTime, Duration, Utc};
use openssl::x509::{X509, X509Ref};
use tracing::{debug, warn};

use super::RequestContext;
use crate::correlation::validate_skew;
use crate::credential::{Credential, KeyStore};
use crate::error::{CryptographicError, Result};
use crate::model::{AttributeRegistry, AuthenticationResponse};
use crate::protocol::{
    MessageKind, ResponseEnvelope, ResponseHeader, ValidationError, read_response_header,
    unmarshal_response, validate_size,
};
use crate::xml::algorithms::KeyTransportAlgorithm;
use crate::xml::utils::{splice, strip_declaration};
use crate::xml::{self, DecryptionPolicy, Document, EncryptionConfig, SignatureConfig, ns};

pub mod state {
    use super::*;

    pub struct Built;
    pub struct Encrypted;
    pub struct Signed;

    pub struct Deserialized;

    pub struct SignatureValidated {
        pub(super) signer: X509,
    }

    pub struct Decrypted {
        pub(super) encrypted_assertions: usize,
        pub(super) key_transports: Vec<KeyTransportAlgorithm>,
    }

    pub struct SchemaValidated {
        pub(super) envelope: ResponseEnvelope,
        pub(super) encrypted_assertions: usize,
        pub(super) key_transports: Vec<KeyTransportAlgorithm>,
    }

    pub struct Correlated {
        pub(super) envelope: ResponseEnvelope,
        pub(super) encrypted_assertions: usize,
        pub(super) key_transports: Vec<KeyTransportAlgorithm>,
        pub(super) context: RequestContext,
    }

    pub trait Signable {}
    impl Signable for Built {}
    impl Signable for Encrypted {}
}

use state::*;

/// An outgoing message on its way to the wire
pub struct Outgoing<S> {
    id: String,
    xml: String,
    state: PhantomData<S>,
}

impl<S> Outgoing<S> {
    fn next<T>(self, xml: String) -> Outgoing<T> {
        Outgoing {
            id: self.id,
            xml,
            state: PhantomData,
        }
    }
}

impl Outgoing<Built> {
    pub fn new(id: impl Into<String>, xml: String) -> Self {
        Self {
            id: id.into(),
            xml,
            state: PhantomData,
        }
    }

    /// Sign every assertion of the message in place
    pub fn sign_assertions(self, credential: &Credential, config: &SignatureConfig) -> Result<Self> {
        let signed = sign_each_assertion(&self.xml, credential, config)?;
        Ok(self.next(signed))
    }

    pub fn encrypt(self, recipient: &X509Ref, config: &EncryptionConfig) -> Result<Outgoing<Encrypted>> {
        let encrypted = xml::encrypt_assertions(&self.xml, recipient, config)
            .map_err(CryptographicError::Encryption)?;
        Ok(self.next(encrypted))
    }
}

impl<S: Signable> Outgoing<S> {
    pub fn sign(self, credential: &Credential, config: &SignatureConfig) -> Result<Outgoing<Signed>> {
        let signed =
            xml::sign_document(&self.xml, credential, config).map_err(CryptographicError::Signing)?;
        Ok(self.next(signed))
    }
}

impl Outgoing<Signed> {
    pub fn serialize(self, max_size: usize, kind: MessageKind) -> Result<SamlMessage> {
        validate_size(self.xml.as_bytes(), max_size, kind)?;
        Ok(SamlMessage {
            id: self.id,
            xml: self.xml,
        })
    }
}

fn sign_each_assertion(
    xml: &str,
    credential: &Credential,
    config: &SignatureConfig,
) -> Result<String> {
    let doc = Document::parse(strip_declaration(xml)).map_err(ValidationError::from)?;
    let mut out = doc.source().to_string();
    let assertions: Vec<_> = doc
        .children(doc.root())
        .filter(|e| e.is(ns::SAML2, "Assertion"))
        .collect();
    // back to front so earlier offsets stay valid
    for assertion in assertions.iter().rev() {
        let signed = xml::sign_document(&doc.standalone(assertion), credential, config)
            .map_err(CryptographicError::Signing)?;
        out = splice(&out, assertion.start..assertion.end, strip_declaration(&signed));
    }
    Ok(out)
}

/// A signed, serialized message ready for a transport binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlMessage {
    pub id: String,
    pub xml: String,
}

impl SamlMessage {
    pub fn as_bytes(&self) -> &[u8] {
        self.xml.as_bytes()
    }

    /// Value of the `SAMLRequest`/`SAMLResponse` form field
    pub fn to_post(&self) -> String {
        crate::transport::post::encode(&self.xml)
    }
}

/// An incoming response moving through validation
pub struct Incoming<S> {
    xml: String,
    header: ResponseHeader,
    state: S,
}

/// A signature step that failed, handing the message back for a retry
pub struct Rejected<S> {
    pub message: Incoming<S>,
    pub error: xml::Error,
}

impl Incoming<Deserialized> {
    /// Size check and header read. Nothing is trusted yet.
    pub fn parse(bytes: &[u8], max_size: usize) -> Result<Self> {
        validate_size(bytes, max_size, MessageKind::Response)?;
        let xml = std::str::from_utf8(bytes)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let xml = strip_declaration(xml).to_string();
        let header = read_response_header(&xml)?;
        Ok(Self {
            xml,
            header,
            state: Deserialized,
        })
    }

    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    pub fn validate_signature(
        self,
        trusted: &[X509],
        config: &SignatureConfig,
    ) -> std::result::Result<Incoming<SignatureValidated>, Rejected<Deserialized>> {
        match xml::verify_document(&self.xml, trusted, config) {
            Ok(signer) => Ok(Incoming {
                xml: self.xml,
                header: self.header,
                state: SignatureValidated { signer },
            }),
            Err(error) => Err(Rejected {
                message: self,
                error,
            }),
        }
    }
}

impl Incoming<SignatureValidated> {
    pub fn signer(&self) -> &X509Ref {
        &self.state.signer
    }

    /// Decrypt the encrypted assertions, then check the signature of every
    /// assertion against the certificate that signed the response.
    pub fn decrypt(
        self,
        keystore: &KeyStore,
        now: DateTime<Utc>,
        policy: &DecryptionPolicy,
        signature: &SignatureConfig,
        require_signed_assertions: bool,
    ) -> Result<Incoming<Decrypted>> {
        let decrypted = xml::decrypt_assertions(&self.xml, keystore, now, policy)
            .map_err(CryptographicError::Decryption)?;
        if decrypted.count() > 0 {
            debug!(id = %self.header.id, count = decrypted.count(), "Decrypted assertions");
        }

        let doc = Document::parse(&decrypted.xml).map_err(ValidationError::from)?;
        for assertion in doc
            .children(doc.root())
            .filter(|e| e.is(ns::SAML2, "Assertion"))
        {
            let id = assertion.id().unwrap_or_default().to_string();
            let signed = doc.children(assertion).any(|e| e.is(ns::DS, "Signature"));
            if signed {
                xml::verify_document(
                    &doc.standalone(assertion),
                    std::slice::from_ref(&self.state.signer),
                    signature,
                )
                .map_err(CryptographicError::Signature)?;
            } else if require_signed_assertions {
                warn!(id, "Assertion is not signed");
                return Err(CryptographicError::UnsignedAssertion(id).into());
            }
        }

        let state = Decrypted {
            encrypted_assertions: decrypted.count(),
            key_transports: decrypted.key_transports,
        };
        Ok(Incoming {
            xml: decrypted.xml,
            header: self.header,
            state,
        })
    }
}

impl Incoming<Decrypted> {
    pub fn check_schema(self, registry: &AttributeRegistry) -> Result<Incoming<SchemaValidated>> {
        let envelope = unmarshal_response(&self.xml, registry)?;
        Ok(Incoming {
            xml: self.xml,
            header: self.header,
            state: SchemaValidated {
                envelope,
                encrypted_assertions: self.state.encrypted_assertions,
                key_transports: self.state.key_transports,
            },
        })
    }
}

impl Incoming<SchemaValidated> {
    /// Attach the context of the request this response answers
    pub fn correlate(self, context: RequestContext) -> Result<Incoming<Correlated>> {
        let in_response_to = self.state.envelope.response.in_response_to();
        if in_response_to != context.request_id {
            return Err(ValidationError::Mismatch {
                field: "InResponseTo",
                expected: context.request_id,
                actual: in_response_to.to_string(),
            }
            .into());
        }
        Ok(Incoming {
            xml: self.xml,
            header: self.header,
            state: Correlated {
                envelope: self.state.envelope,
                encrypted_assertions: self.state.encrypted_assertions,
                key_transports: self.state.key_transports,
                context,
            },
        })
    }
}

/// Business rules applied to a correlated response
#[derive(Debug, Clone)]
pub struct BusinessRules<'a> {
    pub now: DateTime<Utc>,
    pub before_skew: Duration,
    pub after_skew: Duration,
    pub encryption_mandatory: bool,
    pub legacy_key_transport_allowed: bool,
    pub validate_ip: bool,
    pub remote_address: Option<&'a str>,
}

impl Incoming<Correlated> {
    pub fn validate(self, rules: &BusinessRules<'_>) -> Result<ValidatedResponse> {
        let Correlated {
            envelope,
            encrypted_assertions,
            key_transports,
            context,
        } = self.state;
        let response = &envelope.response;

        validate_skew(response.issue_instant(), rules.now, rules.before_skew, rules.after_skew)?;

        if let Some(acs) = &context.assertion_consumer_service_url {
            expect_equal("Destination", acs, &envelope.destination)?;
        }

        if response.is_success() {
            if rules.encryption_mandatory && encrypted_assertions == 0 {
                warn!(id = response.id(), "Unencrypted assertion while encryption is mandatory");
                return Err(ValidationError::Required("EncryptedAssertion").into());
            }
            if !rules.legacy_key_transport_allowed
                && key_transports.contains(&KeyTransportAlgorithm::RsaOaepMgf1p)
            {
                warn!(id = response.id(), "Legacy RSA-OAEP key transport rejected");
                return Err(ValidationError::Invalid("EncryptionMethod").into());
            }
            check_assertion(&envelope, &context, rules)?;
        }

        debug!(
            id = response.id(),
            in_response_to = response.in_response_to(),
            success = response.is_success(),
            "Response passed business validation"
        );
        Ok(ValidatedResponse {
            response: envelope.response,
            context,
        })
    }
}

pub(super) fn expect_equal(field: &'static str, expected: &str, actual: &str) -> Result<()> {
    if expected.trim() != actual.trim() {
        return Err(ValidationError::Mismatch {
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into());
    }
    Ok(())
}

fn check_assertion(
    envelope: &ResponseEnvelope,
    context: &RequestContext,
    rules: &BusinessRules<'_>,
) -> Result<()> {
    let response = &envelope.response;

    if let Some(assertion_issuer) = &envelope.assertion_issuer {
        expect_equal("Assertion Issuer", response.issuer(), assertion_issuer)?;
    }
    expect_equal("Audience", &context.issuer, response.audience().unwrap_or_default())?;
    expect_equal(
        "SubjectConfirmationData InResponseTo",
        &context.request_id,
        envelope.confirmation_in_response_to.as_deref().unwrap_or_default(),
    )?;
    if let Some(acs) = &context.assertion_consumer_service_url {
        expect_equal("Recipient", acs, envelope.recipient.as_deref().unwrap_or_default())?;
    }

    let granted = response
        .level_of_assurance()
        .ok_or(ValidationError::Required("AuthnContextClassRef"))?;
    if !granted.satisfies(context.level_of_assurance, context.comparison) {
        warn!(%granted, requested = %context.level_of_assurance, "Level of assurance too low");
        return Err(ValidationError::LevelOfAssurance {
            requested: context.level_of_assurance.uri().into(),
            granted: granted.uri().into(),
        }
        .into());
    }

    if let Some(not_before) = envelope.not_before {
        if not_before > rules.now + rules.after_skew {
            return Err(ValidationError::Conditions(format!("{} (NotBefore {not_before})", rules.now)).into());
        }
    }
    if let Some(not_on_or_after) = response.not_on_or_after() {
        if not_on_or_after <= rules.now - rules.before_skew {
            return Err(ValidationError::Conditions(format!(
                "{} (NotOnOrAfter {not_on_or_after})",
                rules.now
            ))
            .into());
        }
    }

    if rules.validate_ip {
        let remote = rules.remote_address.or(context.remote_address.as_deref());
        if let Some(remote) = remote {
            expect_equal(
                "SubjectConfirmationData Address",
                remote,
                response.subject_ip_address().unwrap_or_default(),
            )?;
        }
    }
    Ok(())
}

/// A response that passed every check, with the context of its request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedResponse {
    response: AuthenticationResponse,
    context: RequestContext,
}

impl ValidatedResponse {
    pub fn response(&self) -> &AuthenticationResponse {
        &self.response
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.context
    }

    pub fn into_response(self) -> AuthenticationResponse {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::model::{
        AttributeMap, AttributeRegistry, AttributeValue, LevelOfAssurance, LoaComparison,
        ResponseFields,
    };

    const PROXY: &str = "https://proxy.example/metadata";
    const CONNECTOR: &str = "https://connector.example/metadata";

    fn envelope(assertion_issuer: Option<&str>, now: DateTime<Utc>) -> ResponseEnvelope {
        let registry = AttributeRegistry::eidas();
        let identifier = registry.get_by_friendly_name("PersonIdentifier").cloned().unwrap();
        let mut fields = ResponseFields::new("_S1", "_R1", PROXY, now);
        fields.subject = Some("BE/BE/123".into());
        fields.level_of_assurance = Some(LevelOfAssurance::High.uri().into());
        fields.audience = Some(CONNECTOR.into());
        fields.attributes = AttributeMap::new()
            .with(identifier, vec![AttributeValue::Text("BE/BE/123".into())])
            .unwrap();
        ResponseEnvelope {
            response: AuthenticationResponse::success(fields).unwrap(),
            destination: "https://connector.example/acs".into(),
            consent: None,
            assertion_issuer: assertion_issuer.map(str::to_string),
            not_before: None,
            recipient: None,
            confirmation_in_response_to: Some("_R1".into()),
        }
    }

    fn context(now: DateTime<Utc>) -> RequestContext {
        RequestContext {
            request_id: "_R1".into(),
            issuer: CONNECTOR.into(),
            destination: "https://proxy.example/sso".into(),
            level_of_assurance: LevelOfAssurance::Substantial,
            comparison: LoaComparison::Minimum,
            assertion_consumer_service_url: None,
            remote_address: None,
            created_at: now,
        }
    }

    fn rules(now: DateTime<Utc>) -> BusinessRules<'static> {
        BusinessRules {
            now,
            before_skew: Duration::zero(),
            after_skew: Duration::zero(),
            encryption_mandatory: false,
            legacy_key_transport_allowed: true,
            validate_ip: false,
            remote_address: None,
        }
    }

    #[test]
    fn test_assertion_issued_by_response_issuer() {
        let now = Utc::now();
        check_assertion(&envelope(Some(PROXY), now), &context(now), &rules(now)).unwrap();
        check_assertion(&envelope(None, now), &context(now), &rules(now)).unwrap();
    }

    #[test]
    fn test_assertion_from_another_issuer_rejected() {
        let now = Utc::now();
        let err = check_assertion(
            &envelope(Some("https://other.example/metadata"), now),
            &context(now),
            &rules(now),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::Mismatch { field: "Assertion Issuer", .. })
        ));
    }
}
