use super::ModelError;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::NaiveDate;
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const NATURAL_PERSON_NS: &str = "http://eidas.europa.eu/attributes/naturalperson";
const LEGAL_PERSON_NS: &str = "http://eidas.europa.eu/attributes/legalperson";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersonType {
    NaturalPerson,
    LegalPerson,
}

/// How the textual wire value of an attribute is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    String,
    Date,
    Address,
    Gender,
}

/// A registry entry describing one attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name_uri: String,
    pub friendly_name: String,
    pub person_type: PersonType,
    /// `prefix:LocalType` written as `xsi:type` on each value
    pub xml_type: String,
    pub value_kind: ValueKind,
    pub required: bool,
    pub unique_identifier: bool,
    pub transliteration_mandatory: bool,
}

impl AttributeDefinition {
    fn new(person_type: PersonType, name: &str, friendly_name: &str, kind: ValueKind) -> Self {
        let (ns, prefix) = match person_type {
            PersonType::NaturalPerson => (NATURAL_PERSON_NS, "eidas-natural"),
            PersonType::LegalPerson => (LEGAL_PERSON_NS, "eidas-legal"),
        };
        Self {
            name_uri: format!("{ns}/{name}"),
            friendly_name: friendly_name.to_string(),
            person_type,
            xml_type: format!("{prefix}:{name}Type"),
            value_kind: kind,
            required: false,
            unique_identifier: false,
            transliteration_mandatory: false,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn unique(mut self) -> Self {
        self.unique_identifier = true;
        self
    }

    fn transliterated(mut self) -> Self {
        self.transliteration_mandatory = true;
        self
    }

    /// Namespace URI and prefix of [`AttributeDefinition::xml_type`]
    pub fn xml_type_namespace(&self) -> (&'static str, &'static str) {
        match self.person_type {
            PersonType::NaturalPerson => (NATURAL_PERSON_NS, "eidas-natural"),
            PersonType::LegalPerson => (LEGAL_PERSON_NS, "eidas-legal"),
        }
    }

    /// Check that each value matches this definition's type and script rules
    pub fn validate_values(&self, values: &[AttributeValue]) -> Result<(), ModelError> {
        for value in values {
            let kind_matches = matches!(
                (self.value_kind, value),
                (ValueKind::String, AttributeValue::Text(_))
                    | (ValueKind::String, AttributeValue::Transliterated { .. })
                    | (ValueKind::Date, AttributeValue::Date(_))
                    | (ValueKind::Address, AttributeValue::Address(_))
                    | (ValueKind::Gender, AttributeValue::Gender(_))
            );
            if !kind_matches {
                return Err(ModelError::InvalidAttributeValue {
                    name: self.friendly_name.clone(),
                    reason: format!("expected a {:?} value", self.value_kind),
                });
            }

            match value {
                AttributeValue::Text(text) if text.trim().is_empty() => {
                    return Err(ModelError::InvalidAttributeValue {
                        name: self.friendly_name.clone(),
                        reason: "empty value".into(),
                    });
                }
                AttributeValue::Text(text)
                    if self.transliteration_mandatory && !is_latin_script(text) =>
                {
                    return Err(ModelError::TransliterationRequired(
                        self.friendly_name.clone(),
                    ));
                }
                AttributeValue::Transliterated { latin, .. } if !is_latin_script(latin) => {
                    return Err(ModelError::TransliterationRequired(
                        self.friendly_name.clone(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Registered attribute definitions keyed by name URI
#[derive(Debug, Clone, Default)]
pub struct AttributeRegistry {
    definitions: BTreeMap<String, AttributeDefinition>,
}

impl AttributeRegistry {
    pub fn new(definitions: impl IntoIterator<Item = AttributeDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|def| (def.name_uri.clone(), def))
                .collect(),
        }
    }

    /// The natural and legal person attribute sets of the eIDAS SAML profile
    pub fn eidas() -> Self {
        use PersonType::{LegalPerson as L, NaturalPerson as N};
        use ValueKind::*;
        let def = AttributeDefinition::new;

        Self::new([
            def(N, "PersonIdentifier", "PersonIdentifier", String).required().unique(),
            def(N, "CurrentFamilyName", "FamilyName", String).required().transliterated(),
            def(N, "CurrentGivenName", "FirstName", String).required().transliterated(),
            def(N, "DateOfBirth", "DateOfBirth", Date).required(),
            def(N, "BirthName", "BirthName", String).transliterated(),
            def(N, "PlaceOfBirth", "PlaceOfBirth", String),
            def(N, "CurrentAddress", "CurrentAddress", Address),
            def(N, "Gender", "Gender", Gender),
            def(N, "Nationality", "Nationality", String),
            def(N, "CountryOfBirth", "CountryOfBirth", String),
            def(N, "TownOfBirth", "TownOfBirth", String),
            def(N, "CountryOfResidence", "CountryOfResidence", String),
            def(N, "PhoneNumber", "PhoneNumber", String),
            def(N, "EmailAddress", "EmailAddress", String),
            def(L, "LegalPersonIdentifier", "LegalPersonIdentifier", String).required().unique(),
            def(L, "LegalName", "LegalName", String).required().transliterated(),
            def(L, "LegalPersonAddress", "LegalAddress", Address),
            def(L, "VATRegistrationNumber", "VATRegistration", String),
            def(L, "TaxReference", "TaxReference", String),
            def(L, "BusinessCodes", "BusinessCodes", String),
            def(L, "LEI", "LEI", String),
            def(L, "EORI", "EORI", String),
            def(L, "SEED", "SEED", String),
            def(L, "SIC", "SIC", String),
            def(L, "D-2012-17-EUIdentifier", "D-2012-17-EUIdentifier", String),
        ])
    }

    pub fn get(&self, name_uri: &str) -> Option<&AttributeDefinition> {
        self.definitions.get(name_uri)
    }

    pub fn get_by_friendly_name(&self, friendly_name: &str) -> Option<&AttributeDefinition> {
        self.definitions
            .values()
            .find(|def| def.friendly_name == friendly_name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Unspecified,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Unspecified => "Unspecified",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Male" => Ok(Self::Male),
            "Female" => Ok(Self::Female),
            "Unspecified" => Ok(Self::Unspecified),
            other => Err(format!("unknown gender {other}")),
        }
    }
}

/// eIDAS `CurrentAddressType`, carried base64 encoded on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostalAddress {
    #[serde(rename = "PoBox", skip_serializing_if = "Option::is_none")]
    pub po_box: Option<String>,
    #[serde(rename = "LocatorDesignator", skip_serializing_if = "Option::is_none")]
    pub locator_designator: Option<String>,
    #[serde(rename = "LocatorName", skip_serializing_if = "Option::is_none")]
    pub locator_name: Option<String>,
    #[serde(rename = "CvaddressArea", skip_serializing_if = "Option::is_none")]
    pub cv_address_area: Option<String>,
    #[serde(rename = "Thoroughfare", skip_serializing_if = "Option::is_none")]
    pub thoroughfare: Option<String>,
    #[serde(rename = "PostName", skip_serializing_if = "Option::is_none")]
    pub post_name: Option<String>,
    #[serde(rename = "AdminunitFirstline", skip_serializing_if = "Option::is_none")]
    pub admin_unit_first_line: Option<String>,
    #[serde(rename = "AdminunitSecondline", skip_serializing_if = "Option::is_none")]
    pub admin_unit_second_line: Option<String>,
    #[serde(rename = "PostCode", skip_serializing_if = "Option::is_none")]
    pub post_code: Option<String>,
    #[serde(rename = "FullCvaddress", skip_serializing_if = "Option::is_none")]
    pub full_cv_address: Option<String>,
}

impl PostalAddress {
    fn fields(&self) -> [(&'static str, &Option<String>); 10] {
        [
            ("PoBox", &self.po_box),
            ("LocatorDesignator", &self.locator_designator),
            ("LocatorName", &self.locator_name),
            ("CvaddressArea", &self.cv_address_area),
            ("Thoroughfare", &self.thoroughfare),
            ("PostName", &self.post_name),
            ("AdminunitFirstline", &self.admin_unit_first_line),
            ("AdminunitSecondline", &self.admin_unit_second_line),
            ("PostCode", &self.post_code),
            ("FullCvaddress", &self.full_cv_address),
        ]
    }

    /// Base64 of the address child elements
    pub fn to_wire(&self, prefix: &str) -> String {
        let inner: String = self
            .fields()
            .into_iter()
            .filter_map(|(name, value)| {
                value
                    .as_deref()
                    .map(|v| format!("<{prefix}:{name}>{}</{prefix}:{name}>", escape(v)))
            })
            .collect();
        STANDARD.encode(inner)
    }

    pub fn from_wire(value: &str) -> Result<Self, String> {
        let decoded = STANDARD
            .decode(value.trim())
            .map_err(|e| format!("address is not base64: {e}"))?;
        let inner = String::from_utf8(decoded).map_err(|e| e.to_string())?;
        quick_xml::de::from_str(&format!("<Address>{inner}</Address>")).map_err(|e| e.to_string())
    }
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    /// A non-Latin value accompanied by its Latin transliteration
    Transliterated { native: String, latin: String },
    Date(NaiveDate),
    Address(PostalAddress),
    Gender(Gender),
}

impl AttributeValue {
    /// Decode a single wire value of the given kind
    pub fn from_wire(kind: ValueKind, text: &str) -> Result<Self, String> {
        match kind {
            ValueKind::String => Ok(Self::Text(text.to_string())),
            ValueKind::Date => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|e| format!("invalid date {text}: {e}")),
            ValueKind::Address => PostalAddress::from_wire(text).map(Self::Address),
            ValueKind::Gender => text.parse().map(Self::Gender),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Transliterated { native, latin } => write!(f, "{native} ({latin})"),
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Address(address) => {
                f.write_str(address.full_cv_address.as_deref().unwrap_or("<address>"))
            }
            Self::Gender(gender) => f.write_str(gender.as_str()),
        }
    }
}

/// True when every letter in `text` belongs to the Latin script
pub fn is_latin_script(text: &str) -> bool {
    text.chars().all(|c| {
        !c.is_alphabetic()
            || c.is_ascii_alphabetic()
            || matches!(c as u32, 0x00C0..=0x024F | 0x1E00..=0x1EFF | 0x00AA | 0x00BA)
    })
}

/// Ordered attribute map with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: Vec<(AttributeDefinition, Vec<AttributeValue>)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute, validating its values
    pub fn insert(
        &mut self,
        definition: AttributeDefinition,
        values: Vec<AttributeValue>,
    ) -> Result<(), ModelError> {
        if self.get(&definition.name_uri).is_some() {
            return Err(ModelError::DuplicateAttribute(definition.name_uri));
        }
        definition.validate_values(&values)?;
        self.entries.push((definition, values));
        Ok(())
    }

    pub fn with(
        mut self,
        definition: AttributeDefinition,
        values: Vec<AttributeValue>,
    ) -> Result<Self, ModelError> {
        self.insert(definition, values)?;
        Ok(self)
    }

    pub fn get(&self, name_uri: &str) -> Option<&[AttributeValue]> {
        self.entries
            .iter()
            .find(|(def, _)| def.name_uri == name_uri)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttributeDefinition, &[AttributeValue])> {
        self.entries
            .iter()
            .map(|(def, values)| (def, values.as_slice()))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.entries.iter().map(|(def, _)| def)
    }

    pub fn has_unique_identifier(&self) -> bool {
        self.entries
            .iter()
            .any(|(def, values)| def.unique_identifier && !values.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
