use super::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// eIDAS notified levels of assurance, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LevelOfAssurance {
    Low,
    Substantial,
    High,
}

impl LevelOfAssurance {
    const PREFIX: &'static str = "http://eidas.europa.eu/LoA/";

    pub fn uri(self) -> &'static str {
        match self {
            Self::Low => "http://eidas.europa.eu/LoA/low",
            Self::Substantial => "http://eidas.europa.eu/LoA/substantial",
            Self::High => "http://eidas.europa.eu/LoA/high",
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, ModelError> {
        match uri.trim().strip_prefix(Self::PREFIX) {
            Some("low") => Ok(Self::Low),
            Some("substantial") => Ok(Self::Substantial),
            Some("high") => Ok(Self::High),
            _ => Err(ModelError::InvalidLevelOfAssurance(uri.to_string())),
        }
    }

    /// Whether this granted level satisfies `requested` under `comparison`
    pub fn satisfies(self, requested: Self, comparison: LoaComparison) -> bool {
        match comparison {
            LoaComparison::Minimum => self >= requested,
        }
    }
}

impl fmt::Display for LevelOfAssurance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

/// `RequestedAuthnContext/@Comparison`. eIDAS only allows `minimum`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoaComparison {
    #[default]
    Minimum,
}

impl LoaComparison {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimum => "minimum",
        }
    }
}

impl FromStr for LoaComparison {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "minimum" => Ok(Self::Minimum),
            other => Err(ModelError::InvalidComparison(other.to_string())),
        }
    }
}

/// Service provider sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpType {
    Public,
    Private,
}

impl SpType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for SpType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(ModelError::InvalidSpType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameIdFormat {
    Persistent,
    Transient,
    Unspecified,
}

impl NameIdFormat {
    pub fn uri(self) -> &'static str {
        match self {
            Self::Persistent => "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent",
            Self::Transient => "urn:oasis:names:tc:SAML:2.0:nameid-format:transient",
            Self::Unspecified => "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified",
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, ModelError> {
        [Self::Persistent, Self::Transient, Self::Unspecified]
            .into_iter()
            .find(|format| format.uri() == uri.trim())
            .ok_or_else(|| ModelError::InvalidNameIdFormat(uri.to_string()))
    }
}
