use std::sync::Arc;

use openssl::x509::X509;
use tracing::{debug, info, instrument, warn};

use super::pipeline::{
    BusinessRules, Incoming, Outgoing, Rejected, expect_equal, state::Deserialized,
};
use super::{EngineInstance, RequestContext, SamlMessage, ValidatedResponse};
use crate::clock::Clock;
use crate::correlation::CorrelationManager;
use crate::error::{CryptographicError, Result};
use crate::metadata::{BINDING_HTTP_POST, MetadataError, MetadataResolver};
use crate::model::{
    AuthenticationRequest, AuthenticationResponse, ResponseFields, ResponseStatus, StatusCode,
};
use crate::protocol::{
    MessageKind, ValidationError, marshal_request, marshal_response, read_request_issuer,
    unmarshal_request, validate_size,
};
use crate::xml;

#[derive(Debug, Clone, Copy)]
enum PartnerRole {
    /// Sends requests
    Sp,
    /// Sends responses
    Idp,
}

/// A response read just far enough to find the request it answers.
///
/// The response content stays hidden until
/// [`ProtocolEngine::validate_unmarshalled_response`] has run every check.
pub struct UnmarshalledResponse {
    message: Incoming<Deserialized>,
}

impl UnmarshalledResponse {
    pub fn id(&self) -> &str {
        &self.message.header().id
    }

    pub fn in_response_to(&self) -> &str {
        &self.message.header().in_response_to
    }

    pub fn issuer(&self) -> &str {
        &self.message.header().issuer
    }
}

impl std::fmt::Debug for UnmarshalledResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnmarshalledResponse")
            .field("id", &self.id())
            .field("in_response_to", &self.in_response_to())
            .field("issuer", &self.issuer())
            .finish()
    }
}

/// Builds and validates the messages of one engine instance
pub struct ProtocolEngine {
    instance: Arc<EngineInstance>,
    metadata: Arc<MetadataResolver>,
    correlation: Arc<CorrelationManager>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("instance", &self.instance.name())
            .finish_non_exhaustive()
    }
}

impl ProtocolEngine {
    pub fn new(
        instance: Arc<EngineInstance>,
        metadata: Arc<MetadataResolver>,
        correlation: Arc<CorrelationManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            instance,
            metadata,
            correlation,
            clock,
        }
    }

    pub fn instance(&self) -> &EngineInstance {
        &self.instance
    }

    pub fn metadata(&self) -> &MetadataResolver {
        &self.metadata
    }

    pub fn correlation(&self) -> &CorrelationManager {
        &self.correlation
    }

    /// Sign and serialize `request` and remember it for its response
    #[instrument(skip_all, fields(instance = self.instance.name(), id = request.id()))]
    pub async fn generate_request_message(
        &self,
        request: &AuthenticationRequest,
        remote_address: Option<&str>,
    ) -> Result<SamlMessage> {
        let settings = self.instance.settings();
        expect_equal("Issuer", &settings.entity_id, request.issuer())?;

        let now = self.clock.now();
        let xml = marshal_request(request, now)?;
        let message = Outgoing::new(request.id(), xml)
            .sign(&settings.signing, &settings.signature)?
            .serialize(settings.max_message_size, MessageKind::AuthnRequest)?;

        self.correlation
            .put(request.id(), &RequestContext::of(request, remote_address, now))
            .await?;
        info!(destination = request.core().destination(), "Generated authentication request");
        Ok(message)
    }

    /// Check the signature of an incoming request against its issuer's
    /// metadata and turn it into a request value
    #[instrument(skip_all, fields(instance = self.instance.name()))]
    pub async fn unmarshall_request_and_validate(
        &self,
        bytes: &[u8],
        citizen_country_code: Option<&str>,
    ) -> Result<AuthenticationRequest> {
        let settings = self.instance.settings();
        validate_size(bytes, settings.max_message_size, MessageKind::AuthnRequest)?;
        let xml = std::str::from_utf8(bytes).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let issuer = read_request_issuer(xml)?;
        let signer = self.verify_partner_signature(xml, &issuer, PartnerRole::Sp).await?;
        settings
            .certificate_policy
            .check(&signer, self.clock.now())
            .map_err(CryptographicError::Certificate)?;

        let partner = self.metadata.get_entity_descriptor(&issuer).await?;
        let legacy = self.instance.is_legacy_partner(&partner);
        let request = unmarshal_request(xml, &settings.registry, citizen_country_code, legacy)?;

        if let Some(sso) = &settings.endpoints.single_sign_on_service_url {
            expect_equal("Destination", sso, request.core().destination())?;
        }
        if let Some(acs) = request.core().assertion_consumer_service_url() {
            let published = partner
                .sp
                .as_ref()
                .is_some_and(|sp| sp.endpoints.iter().any(|e| e.location == acs));
            if !published {
                warn!(issuer, acs, "AssertionConsumerServiceURL not published in metadata");
                return Err(ValidationError::Invalid("AssertionConsumerServiceURL").into());
            }
        }

        info!(id = request.id(), issuer, legacy, "Validated authentication request");
        Ok(request)
    }

    /// Sign, encrypt and sign again a response to `request`
    #[instrument(skip_all, fields(instance = self.instance.name(), id = response.id()))]
    pub async fn generate_response_message(
        &self,
        request: &AuthenticationRequest,
        response: &AuthenticationResponse,
        consent: Option<&str>,
    ) -> Result<SamlMessage> {
        let settings = self.instance.settings();
        expect_equal("InResponseTo", request.id(), response.in_response_to())?;
        expect_equal("Issuer", &settings.entity_id, response.issuer())?;
        if let Some(audience) = response.audience() {
            expect_equal("Audience", request.issuer(), audience)?;
        }

        let partner = self.metadata.get_entity_descriptor(request.issuer()).await?;
        let destination = match request.core().assertion_consumer_service_url() {
            Some(acs) => acs.to_string(),
            None => partner
                .sp
                .as_ref()
                .and_then(|sp| sp.endpoint(BINDING_HTTP_POST))
                .map(str::to_string)
                .ok_or(ValidationError::Required("AssertionConsumerServiceURL"))?,
        };

        if let Some(granted) = response.level_of_assurance() {
            let requested = request.core().level_of_assurance();
            if !granted.satisfies(requested, request.core().comparison()) {
                return Err(ValidationError::LevelOfAssurance {
                    requested: requested.uri().into(),
                    granted: granted.uri().into(),
                }
                .into());
            }
        }

        let xml = marshal_response(response, &destination, consent)?;
        let mut message = Outgoing::new(response.id(), xml);
        let success = response.is_success();
        if success && settings.sign_assertions {
            message = message.sign_assertions(&settings.signing, &settings.signature)?;
        }

        let signed = if success && settings.encrypt_responses {
            let recipient = self.metadata.get_encryption_certificate(request.issuer()).await?;
            settings
                .certificate_policy
                .check(&recipient, self.clock.now())
                .map_err(CryptographicError::Certificate)?;
            message
                .encrypt(&recipient, &settings.encryption)?
                .sign(&settings.signing, &settings.signature)?
        } else {
            message.sign(&settings.signing, &settings.signature)?
        };

        let message = signed.serialize(settings.max_message_size, MessageKind::Response)?;
        info!(destination, success, "Generated authentication response");
        Ok(message)
    }

    /// A signed failure response to `request`
    pub async fn generate_response_error_message(
        &self,
        request: &AuthenticationRequest,
        code: StatusCode,
        sub_status: Option<String>,
        message: &str,
    ) -> Result<SamlMessage> {
        let settings = self.instance.settings();
        let mut fields = ResponseFields::new(
            format!("_{}", uuid::Uuid::new_v4()),
            request.id(),
            settings.entity_id.clone(),
            self.clock.now(),
        );
        fields.status = ResponseStatus::failure(code, sub_status, message);
        fields.audience = Some(request.issuer().to_string());
        let response = AuthenticationResponse::failure(fields).map_err(ValidationError::from)?;
        self.generate_response_message(request, &response, None).await
    }

    /// Read the header of a response. No signature has been checked yet.
    pub fn unmarshall_response(&self, bytes: &[u8]) -> Result<UnmarshalledResponse> {
        let message = Incoming::parse(bytes, self.instance.settings().max_message_size)?;
        debug!(
            id = %message.header().id,
            in_response_to = %message.header().in_response_to,
            "Unmarshalled response"
        );
        Ok(UnmarshalledResponse { message })
    }

    /// Run signature, decryption, schema, correlation and business checks
    #[instrument(skip_all, fields(instance = self.instance.name(), id = unmarshalled.id()))]
    pub async fn validate_unmarshalled_response(
        &self,
        unmarshalled: UnmarshalledResponse,
        remote_address: Option<&str>,
    ) -> Result<ValidatedResponse> {
        let settings = self.instance.settings();
        let message = unmarshalled.message;
        let issuer = message.header().issuer.clone();
        let in_response_to = message.header().in_response_to.clone();

        let certificate = self.signing_certificate(&issuer, PartnerRole::Idp).await?;
        let message = match message.validate_signature(&[certificate], &settings.signature) {
            Ok(message) => message,
            Err(Rejected { message, error }) if is_stale_certificate(&error) => {
                warn!(issuer, %error, "Response signature rejected, refreshing metadata");
                self.metadata.refresh(&issuer).await?;
                let certificate = self.signing_certificate(&issuer, PartnerRole::Idp).await?;
                message
                    .validate_signature(&[certificate], &settings.signature)
                    .map_err(|rejected| CryptographicError::Signature(rejected.error))?
            }
            Err(Rejected { error, .. }) => {
                warn!(issuer, %error, "Response signature rejected");
                return Err(CryptographicError::Signature(error).into());
            }
        };

        let now = self.clock.now();
        settings
            .certificate_policy
            .check(message.signer(), now)
            .map_err(CryptographicError::Certificate)?;

        let message = message
            .decrypt(
                &settings.decryption,
                now,
                &settings.decryption_policy,
                &settings.signature,
                settings.require_signed_assertions,
            )?
            .check_schema(&settings.registry)?;

        let context: RequestContext = self.correlation.get_and_remove(&in_response_to).await?;
        let partner = self.metadata.get_entity_descriptor(&issuer).await?;
        let rules = BusinessRules {
            now,
            before_skew: settings.before_skew,
            after_skew: settings.after_skew,
            encryption_mandatory: settings.response_encryption_mandatory,
            legacy_key_transport_allowed: self.instance.legacy_key_transport_allowed(&partner),
            validate_ip: settings.validate_ip,
            remote_address,
        };
        let validated = message.correlate(context)?.validate(&rules)?;

        info!(issuer, in_response_to, "Validated authentication response");
        Ok(validated)
    }

    pub async fn unmarshall_response_and_validate(
        &self,
        bytes: &[u8],
        remote_address: Option<&str>,
    ) -> Result<ValidatedResponse> {
        let unmarshalled = self.unmarshall_response(bytes)?;
        self.validate_unmarshalled_response(unmarshalled, remote_address).await
    }

    /// This node's signed metadata
    pub fn generate_metadata(&self) -> Result<String> {
        self.instance.generate_metadata(self.clock.now())
    }

    async fn signing_certificate(
        &self,
        url: &str,
        role: PartnerRole,
    ) -> std::result::Result<X509, MetadataError> {
        match role {
            PartnerRole::Sp => self.metadata.get_request_signature_certificate(url).await,
            PartnerRole::Idp => self.metadata.get_response_signature_certificate(url).await,
        }
    }

    /// Verify `xml` against the partner's published signing certificate,
    /// refreshing the partner's metadata once when the cached certificate
    /// no longer matches.
    async fn verify_partner_signature(&self, xml: &str, url: &str, role: PartnerRole) -> Result<X509> {
        let signature = &self.instance.settings().signature;
        let certificate = self.signing_certificate(url, role).await?;
        match xml::verify_document(xml, &[certificate], signature) {
            Ok(signer) => Ok(signer),
            Err(error) if is_stale_certificate(&error) => {
                warn!(url, %error, "Signature rejected, refreshing metadata");
                self.metadata.refresh(url).await?;
                let certificate = self.signing_certificate(url, role).await?;
                xml::verify_document(xml, &[certificate], signature)
                    .map_err(|e| CryptographicError::Signature(e).into())
            }
            Err(error) => {
                warn!(url, %error, "Signature rejected");
                Err(CryptographicError::Signature(error).into())
            }
        }
    }
}

fn is_stale_certificate(error: &xml::Error) -> bool {
    matches!(error, xml::Error::InvalidSignature | xml::Error::UntrustedCertificate)
}
