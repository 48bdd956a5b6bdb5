use super::{
    AttributeMap, LevelOfAssurance, LoaComparison, ModelError, NameIdFormat, SpType, require,
    validate_country_code,
};

/// Raw input for [`RequestCore::new`]
#[derive(Debug, Clone, Default)]
pub struct RequestFields {
    pub id: String,
    pub issuer: String,
    pub destination: String,
    pub level_of_assurance: String,
    /// Defaults to `minimum` when absent
    pub level_of_assurance_comparison: Option<String>,
    pub requested_attributes: AttributeMap,
    pub citizen_country_code: Option<String>,
    pub provider_name: Option<String>,
    pub name_id_format: Option<String>,
    pub assertion_consumer_service_url: Option<String>,
}

/// Fields shared by every authentication request variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCore {
    id: String,
    issuer: String,
    destination: String,
    level_of_assurance: LevelOfAssurance,
    comparison: LoaComparison,
    requested_attributes: AttributeMap,
    citizen_country_code: Option<String>,
    provider_name: Option<String>,
    name_id_format: Option<NameIdFormat>,
    assertion_consumer_service_url: Option<String>,
}

impl RequestCore {
    pub fn new(fields: RequestFields) -> Result<Self, ModelError> {
        require(&fields.id, "ID")?;
        require(&fields.issuer, "Issuer")?;
        require(&fields.destination, "Destination")?;

        let level_of_assurance = LevelOfAssurance::from_uri(&fields.level_of_assurance)?;
        let comparison = fields
            .level_of_assurance_comparison
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();

        if fields.requested_attributes.is_empty() {
            return Err(ModelError::MissingField("RequestedAttributes"));
        }
        if let Some(code) = &fields.citizen_country_code {
            validate_country_code(code)?;
        }
        let name_id_format = fields
            .name_id_format
            .as_deref()
            .map(NameIdFormat::from_uri)
            .transpose()?;

        Ok(Self {
            id: fields.id,
            issuer: fields.issuer,
            destination: fields.destination,
            level_of_assurance,
            comparison,
            requested_attributes: fields.requested_attributes,
            citizen_country_code: fields.citizen_country_code,
            provider_name: fields.provider_name.filter(|name| !name.trim().is_empty()),
            name_id_format,
            assertion_consumer_service_url: fields.assertion_consumer_service_url,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn level_of_assurance(&self) -> LevelOfAssurance {
        self.level_of_assurance
    }

    pub fn comparison(&self) -> LoaComparison {
        self.comparison
    }

    pub fn requested_attributes(&self) -> &AttributeMap {
        &self.requested_attributes
    }

    pub fn citizen_country_code(&self) -> Option<&str> {
        self.citizen_country_code.as_deref()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider_name.as_deref()
    }

    pub fn name_id_format(&self) -> Option<NameIdFormat> {
        self.name_id_format
    }

    pub fn assertion_consumer_service_url(&self) -> Option<&str> {
        self.assertion_consumer_service_url.as_deref()
    }

    /// Copy with the citizen country set; used once the receiving node knows it
    pub fn with_citizen_country_code(mut self, code: &str) -> Result<Self, ModelError> {
        validate_country_code(code)?;
        self.citizen_country_code = Some(code.to_string());
        Ok(self)
    }
}

/// eIDAS 1.2+ request: SP type is optional (it may be published in metadata
/// instead) and private SPs may name a requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EidasRequest {
    pub core: RequestCore,
    pub sp_type: Option<SpType>,
    pub requester_id: Option<String>,
}

/// eIDAS 1.1 request: SP type is mandatory in the request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRequest {
    pub core: RequestCore,
    pub sp_type: SpType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationRequest {
    Eidas(EidasRequest),
    Legacy(LegacyRequest),
}

impl AuthenticationRequest {
    pub fn eidas(
        core: RequestCore,
        sp_type: Option<SpType>,
        requester_id: Option<String>,
    ) -> Result<Self, ModelError> {
        if let Some(requester_id) = &requester_id {
            require(requester_id, "RequesterID")?;
        }
        Ok(Self::Eidas(EidasRequest {
            core,
            sp_type,
            requester_id,
        }))
    }

    pub fn legacy(core: RequestCore, sp_type: SpType) -> Result<Self, ModelError> {
        Ok(Self::Legacy(LegacyRequest { core, sp_type }))
    }

    pub fn core(&self) -> &RequestCore {
        match self {
            Self::Eidas(request) => &request.core,
            Self::Legacy(request) => &request.core,
        }
    }

    pub fn id(&self) -> &str {
        self.core().id()
    }

    pub fn issuer(&self) -> &str {
        self.core().issuer()
    }

    pub fn sp_type(&self) -> Option<SpType> {
        match self {
            Self::Eidas(request) => request.sp_type,
            Self::Legacy(request) => Some(request.sp_type),
        }
    }

    pub fn requester_id(&self) -> Option<&str> {
        match self {
            Self::Eidas(request) => request.requester_id.as_deref(),
            Self::Legacy(_) => None,
        }
    }

    /// eIDAS protocol version the request was built for
    pub fn protocol_version(&self) -> &'static str {
        match self {
            Self::Eidas(_) => "1.2",
            Self::Legacy(_) => "1.1",
        }
    }

    pub(crate) fn map_core(
        self,
        f: impl FnOnce(RequestCore) -> Result<RequestCore, ModelError>,
    ) -> Result<Self, ModelError> {
        Ok(match self {
            Self::Eidas(mut request) => {
                request.core = f(request.core)?;
                Self::Eidas(request)
            }
            Self::Legacy(mut request) => {
                request.core = f(request.core)?;
                Self::Legacy(request)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeRegistry;

    fn fields() -> RequestFields {
        let registry = AttributeRegistry::eidas();
        let attributes = AttributeMap::new()
            .with(registry.get_by_friendly_name("PersonIdentifier").cloned().unwrap(), vec![])
            .unwrap();
        RequestFields {
            id: "R1".into(),
            issuer: "https://connector.example/metadata".into(),
            destination: "https://proxy.example/sso".into(),
            level_of_assurance: LevelOfAssurance::Substantial.uri().into(),
            requested_attributes: attributes,
            ..Default::default()
        }
    }

    #[test]
    fn test_comparison_defaults_to_minimum() {
        let core = RequestCore::new(fields()).unwrap();
        assert_eq!(core.comparison(), LoaComparison::Minimum);
        assert_eq!(core.id(), "R1");
    }

    #[test]
    fn test_invalid_comparison_and_loa_rejected() {
        let mut f = fields();
        f.level_of_assurance_comparison = Some("exact".into());
        assert!(matches!(RequestCore::new(f), Err(ModelError::InvalidComparison(_))));

        let mut f = fields();
        f.level_of_assurance = "http://eidas.europa.eu/LoA/medium".into();
        assert!(matches!(
            RequestCore::new(f),
            Err(ModelError::InvalidLevelOfAssurance(_))
        ));
    }

    #[test]
    fn test_mandatory_fields() {
        let mut f = fields();
        f.id = "".into();
        assert_eq!(RequestCore::new(f), Err(ModelError::MissingField("ID")));

        let mut f = fields();
        f.requested_attributes = AttributeMap::new();
        assert!(RequestCore::new(f).is_err());

        let mut f = fields();
        f.citizen_country_code = Some("bel".into());
        assert!(matches!(RequestCore::new(f), Err(ModelError::InvalidCountryCode(_))));
    }

    #[test]
    fn test_variants() {
        let core = RequestCore::new(fields()).unwrap();
        let legacy = AuthenticationRequest::legacy(core.clone(), SpType::Public).unwrap();
        assert_eq!(legacy.sp_type(), Some(SpType::Public));
        assert_eq!(legacy.protocol_version(), "1.1");

        let eidas = AuthenticationRequest::eidas(core, None, Some("urn:requester".into())).unwrap();
        assert_eq!(eidas.sp_type(), None);
        assert_eq!(eidas.requester_id(), Some("urn:requester"));
    }
}
