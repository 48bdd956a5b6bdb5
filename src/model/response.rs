use super::{AttributeMap, LevelOfAssurance, ModelError, NameIdFormat, require};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level SAML status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    Requester,
    Responder,
    VersionMismatch,
}

impl StatusCode {
    pub fn uri(self) -> &'static str {
        match self {
            Self::Success => "urn:oasis:names:tc:SAML:2.0:status:Success",
            Self::Requester => "urn:oasis:names:tc:SAML:2.0:status:Requester",
            Self::Responder => "urn:oasis:names:tc:SAML:2.0:status:Responder",
            Self::VersionMismatch => "urn:oasis:names:tc:SAML:2.0:status:VersionMismatch",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::Success,
            Self::Requester,
            Self::Responder,
            Self::VersionMismatch,
        ]
        .into_iter()
        .find(|code| code.uri() == uri.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: StatusCode,
    /// Second-level status code URI, e.g. `...:status:AuthnFailed`
    pub sub_status: Option<String>,
    pub message: Option<String>,
}

impl ResponseStatus {
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success,
            sub_status: None,
            message: None,
        }
    }

    pub fn failure(
        code: StatusCode,
        sub_status: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            sub_status,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

/// Raw input for [`AuthenticationResponse::success`] and [`AuthenticationResponse::failure`]
#[derive(Debug, Clone)]
pub struct ResponseFields {
    pub id: String,
    pub in_response_to: String,
    pub issuer: String,
    pub issue_instant: DateTime<Utc>,
    pub status: ResponseStatus,
    pub subject: Option<String>,
    pub subject_name_id_format: Option<NameIdFormat>,
    pub level_of_assurance: Option<String>,
    pub attributes: AttributeMap,
    pub audience: Option<String>,
    pub subject_ip_address: Option<String>,
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl ResponseFields {
    pub fn new(
        id: impl Into<String>,
        in_response_to: impl Into<String>,
        issuer: impl Into<String>,
        issue_instant: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            in_response_to: in_response_to.into(),
            issuer: issuer.into(),
            issue_instant,
            status: ResponseStatus::success(),
            subject: None,
            subject_name_id_format: None,
            level_of_assurance: None,
            attributes: AttributeMap::new(),
            audience: None,
            subject_ip_address: None,
            not_on_or_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    id: String,
    in_response_to: String,
    issuer: String,
    issue_instant: DateTime<Utc>,
    status: ResponseStatus,
    subject: Option<String>,
    subject_name_id_format: Option<NameIdFormat>,
    level_of_assurance: Option<LevelOfAssurance>,
    attributes: AttributeMap,
    audience: Option<String>,
    subject_ip_address: Option<String>,
    not_on_or_after: Option<DateTime<Utc>>,
}

impl AuthenticationResponse {
    pub fn success(fields: ResponseFields) -> Result<Self, ModelError> {
        Self::check_common(&fields)?;
        if !fields.status.is_success() {
            return Err(ModelError::InvalidStatus(fields.status.code.uri().into()));
        }
        let subject = fields
            .subject
            .filter(|subject| !subject.trim().is_empty())
            .ok_or(ModelError::MissingField("Subject"))?;
        let level_of_assurance = fields
            .level_of_assurance
            .as_deref()
            .map(LevelOfAssurance::from_uri)
            .transpose()?
            .ok_or(ModelError::MissingField("LevelOfAssurance"))?;
        if !fields.attributes.has_unique_identifier() {
            return Err(ModelError::NoIdentifyingAttribute);
        }

        Ok(Self {
            id: fields.id,
            in_response_to: fields.in_response_to,
            issuer: fields.issuer,
            issue_instant: fields.issue_instant,
            status: fields.status,
            subject: Some(subject),
            subject_name_id_format: fields.subject_name_id_format,
            level_of_assurance: Some(level_of_assurance),
            attributes: fields.attributes,
            audience: fields.audience,
            subject_ip_address: fields.subject_ip_address,
            not_on_or_after: fields.not_on_or_after,
        })
    }

    pub fn failure(fields: ResponseFields) -> Result<Self, ModelError> {
        Self::check_common(&fields)?;
        if fields.status.is_success() {
            return Err(ModelError::InvalidStatus(fields.status.code.uri().into()));
        }
        if fields
            .status
            .message
            .as_deref()
            .is_none_or(|message| message.trim().is_empty())
        {
            return Err(ModelError::MissingStatusMessage);
        }

        Ok(Self {
            id: fields.id,
            in_response_to: fields.in_response_to,
            issuer: fields.issuer,
            issue_instant: fields.issue_instant,
            status: fields.status,
            subject: None,
            subject_name_id_format: None,
            level_of_assurance: None,
            attributes: AttributeMap::new(),
            audience: fields.audience,
            subject_ip_address: None,
            not_on_or_after: None,
        })
    }

    fn check_common(fields: &ResponseFields) -> Result<(), ModelError> {
        require(&fields.id, "ID")?;
        require(&fields.in_response_to, "InResponseTo")?;
        require(&fields.issuer, "Issuer")
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn in_response_to(&self) -> &str {
        &self.in_response_to
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue_instant(&self) -> DateTime<Utc> {
        self.issue_instant
    }

    pub fn status(&self) -> &ResponseStatus {
        &self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn subject_name_id_format(&self) -> Option<NameIdFormat> {
        self.subject_name_id_format
    }

    pub fn level_of_assurance(&self) -> Option<LevelOfAssurance> {
        self.level_of_assurance
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    pub fn subject_ip_address(&self) -> Option<&str> {
        self.subject_ip_address.as_deref()
    }

    pub fn not_on_or_after(&self) -> Option<DateTime<Utc>> {
        self.not_on_or_after
    }
}
