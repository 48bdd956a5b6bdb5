//! Protocol Engine: per-instance orchestration of the marshaller, the XML
//! security layer, the metadata resolver and the correlation store.

mod instance;
pub mod pipeline;
mod processor;
mod set;

pub use instance::{EngineInstance, InstanceSettings, NodeEndpoints};
pub use pipeline::{SamlMessage, ValidatedResponse};
pub use processor::{ProtocolEngine, UnmarshalledResponse};
pub use set::EngineSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AuthenticationRequest, LevelOfAssurance, LoaComparison};

/// What is remembered about a sent request until its response comes back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub issuer: String,
    pub destination: String,
    pub level_of_assurance: LevelOfAssurance,
    pub comparison: LoaComparison,
    pub assertion_consumer_service_url: Option<String>,
    /// Address of the user agent that triggered the request
    pub remote_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn of(
        request: &AuthenticationRequest,
        remote_address: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let core = request.core();
        Self {
            request_id: core.id().to_string(),
            issuer: core.issuer().to_string(),
            destination: core.destination().to_string(),
            level_of_assurance: core.level_of_assurance(),
            comparison: core.comparison(),
            assertion_consumer_service_url: core.assertion_consumer_service_url().map(str::to_string),
            remote_address: remote_address.map(str::to_string),
            created_at,
        }
    }
}
