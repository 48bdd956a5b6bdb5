use crate::crypto::errors::{CryptoResult, Error};
use openssl::ec::{EcGroup, EcGroupRef};
use openssl::nid::Nid;
use std::fmt;

/// Elliptic curves accepted for ECDSA signatures and ECDH-ES key agreement
#[derive(Debug, Clone, Default, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256 (secp256r1)
    #[default]
    NistP256,
    /// NIST P-384 (secp384r1)
    NistP384,
    /// NIST P-521 (secp521r1)
    NistP521,
    /// Brainpool P-256r1
    BrainpoolP256r1,
    /// Brainpool P-384r1
    BrainpoolP384r1,
    /// Brainpool P-512r1
    BrainpoolP512r1,
}

impl Curve {
    /// Get the OpenSSL NID for this curve
    pub fn to_nid(self) -> Nid {
        match self {
            Curve::NistP256 => Nid::X9_62_PRIME256V1,
            Curve::NistP384 => Nid::SECP384R1,
            Curve::NistP521 => Nid::SECP521R1,
            Curve::BrainpoolP256r1 => Nid::BRAINPOOL_P256R1,
            Curve::BrainpoolP384r1 => Nid::BRAINPOOL_P384R1,
            Curve::BrainpoolP512r1 => Nid::BRAINPOOL_P512R1,
        }
    }

    /// Resolve a curve from its OpenSSL NID
    pub fn from_nid(nid: Nid) -> CryptoResult<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|curve| curve.to_nid() == nid)
            .ok_or_else(|| Error::UnsupportedCurve(format!("NID {}", nid.as_raw())))
    }

    /// Create an OpenSSL EcGroup for this curve
    pub fn to_ec_group(self) -> CryptoResult<EcGroup> {
        Ok(EcGroup::from_curve_name(self.to_nid())?)
    }

    /// Get the key size in bytes for this curve
    pub fn key_size(self) -> usize {
        match self {
            Curve::NistP256 | Curve::BrainpoolP256r1 => 32,
            Curve::NistP384 | Curve::BrainpoolP384r1 => 48,
            Curve::NistP521 => 66,
            Curve::BrainpoolP512r1 => 64,
        }
    }

    /// Get the coordinate size in bytes
    pub fn coordinate_size(self) -> usize {
        self.key_size()
    }

    /// Get the uncompressed point size in bytes
    pub fn uncompressed_point_size(self) -> usize {
        1 + 2 * self.key_size()
    }

    /// The object identifier of the curve
    pub fn oid(self) -> &'static str {
        match self {
            Curve::NistP256 => "1.2.840.10045.3.1.7",
            Curve::NistP384 => "1.3.132.0.34",
            Curve::NistP521 => "1.3.132.0.35",
            Curve::BrainpoolP256r1 => "1.3.36.3.3.2.8.1.1.7",
            Curve::BrainpoolP384r1 => "1.3.36.3.3.2.8.1.1.11",
            Curve::BrainpoolP512r1 => "1.3.36.3.3.2.8.1.1.13",
        }
    }

    /// Parse curve from OID string
    pub fn from_oid(oid: &str) -> CryptoResult<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|curve| curve.oid() == oid)
            .ok_or_else(|| Error::UnsupportedCurve(format!("Unknown OID: {oid}")))
    }

    /// The `NamedCurve` URI used in `dsig11:ECKeyValue`
    pub fn named_curve_uri(self) -> String {
        format!("urn:oid:{}", self.oid())
    }

    /// Parse a `NamedCurve` URI (`urn:oid:<oid>`)
    pub fn from_named_curve_uri(uri: &str) -> CryptoResult<Self> {
        let oid = uri
            .strip_prefix("urn:oid:")
            .ok_or_else(|| Error::UnsupportedCurve(format!("Not an OID URN: {uri}")))?;
        Self::from_oid(oid)
    }

    /// Get all supported curves
    pub fn all() -> &'static [Curve] {
        &[
            Curve::NistP256,
            Curve::NistP384,
            Curve::NistP521,
            Curve::BrainpoolP256r1,
            Curve::BrainpoolP384r1,
            Curve::BrainpoolP512r1,
        ]
    }
}

impl TryFrom<Curve> for EcGroup {
    type Error = Error;

    fn try_from(curve: Curve) -> Result<Self, Self::Error> {
        curve.to_ec_group()
    }
}

impl TryFrom<&EcGroupRef> for Curve {
    type Error = Error;

    fn try_from(group: &EcGroupRef) -> Result<Self, Self::Error> {
        let nid = group
            .curve_name()
            .ok_or_else(|| Error::UnsupportedCurve("Explicit curve parameters".into()))?;
        Curve::from_nid(nid)
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Curve::NistP256 => "NIST P-256 (secp256r1)",
            Curve::NistP384 => "NIST P-384 (secp384r1)",
            Curve::NistP521 => "NIST P-521 (secp521r1)",
            Curve::BrainpoolP256r1 => "Brainpool P-256r1",
            Curve::BrainpoolP384r1 => "Brainpool P-384r1",
            Curve::BrainpoolP512r1 => "Brainpool P-512r1",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_properties() {
        for &curve in Curve::all() {
            let group = curve.to_ec_group().unwrap();
            assert_eq!(Curve::try_from(&*group).unwrap(), curve);

            let oid = curve.oid();
            assert_eq!(Curve::from_oid(oid).unwrap(), curve);
        }
    }

    #[test]
    fn test_named_curve_uri() {
        let uri = Curve::NistP256.named_curve_uri();
        assert_eq!(uri, "urn:oid:1.2.840.10045.3.1.7");
        assert_eq!(Curve::from_named_curve_uri(&uri).unwrap(), Curve::NistP256);
        assert!(Curve::from_named_curve_uri("1.2.840.10045.3.1.7").is_err());
        assert!(Curve::from_named_curve_uri("urn:oid:1.2.3").is_err());
    }
}
