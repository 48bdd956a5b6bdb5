use crate::crypto::curves::Curve;
use crate::crypto::errors::{CryptoResult, Error};
use crate::crypto::rsa::{RsaPrivateKey, RsaPublicKey};
use openssl::bn::BigNumContext;
use openssl::ec::{EcGroup, EcKey, EcPoint, PointConversionForm as Form};
use openssl::pkey::{Id, PKey, Private, Public};
use openssl::x509::X509Ref;
use secrecy::{ExposeSecret, SecretSlice};
use std::fmt;

/// Secure wrapper for sensitive byte data that zeroizes on drop
#[derive(Debug, Clone, Default)]
pub struct SecureBytes(SecretSlice<u8>);

impl SecureBytes {
    /// Create new SecureBytes
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(SecretSlice::new(data.into().into()))
    }

    /// Expose the secret data
    pub fn expose_secret(&self) -> &[u8] {
        self.0.expose_secret()
    }

    /// Get the length of the data
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    /// Check if the data is empty
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl From<&[u8]> for SecureBytes {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

/// Represents an EC private key
#[derive(Clone)]
pub struct PrivateKey {
    curve: Curve,
    openssl_key: PKey<Private>,
}

impl PrivateKey {
    /// Generate a new random private key with the given curve
    pub fn generate(curve: Curve) -> CryptoResult<Self> {
        let group: EcGroup = curve.try_into()?;
        let ec_key = EcKey::generate(&group)?;
        let pkey = PKey::from_ec_key(ec_key)?;

        Ok(Self {
            curve,
            openssl_key: pkey,
        })
    }

    /// Wrap an OpenSSL key, which must be an EC key on a supported curve
    pub fn from_pkey(pk: PKey<Private>) -> CryptoResult<Self> {
        let ec_key = pk.ec_key()?;
        let curve: Curve = ec_key.group().try_into()?;

        Ok(Self {
            curve,
            openssl_key: pk,
        })
    }

    /// Get the curve used by this key
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Get the OpenSSL PKey
    pub fn as_openssl_pkey(&self) -> &PKey<Private> {
        &self.openssl_key
    }

    /// Derive the corresponding public key
    pub fn public_key(&self) -> CryptoResult<PublicKey> {
        let ec_key = self.openssl_key.ec_key()?;
        let public_point = ec_key.public_key();
        let group = ec_key.group();

        let mut ctx = BigNumContext::new()?;
        let point_bytes = public_point.to_bytes(group, Form::UNCOMPRESSED, &mut ctx)?;

        PublicKey::from_bytes(self.curve, &point_bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("curve", &self.curve)
            .field("key_data", &"[REDACTED]")
            .finish()
    }
}

/// Represents an EC public key
#[derive(Clone, Debug)]
pub struct PublicKey {
    curve: Curve,
    point_data: Vec<u8>,
    openssl_key: PKey<Public>,
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.curve == other.curve && self.point_data == other.point_data
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    /// Create a public key from point bytes (uncompressed or compressed format)
    pub fn from_bytes(curve: Curve, point_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let bytes = point_bytes.as_ref();
        let len = bytes.len();
        if len != curve.uncompressed_point_size() && len != curve.coordinate_size() + 1 {
            return Err(Error::Invalid(format!(
                "Invalid point size: expected {} or {} bytes, got {len}",
                curve.uncompressed_point_size(),
                curve.coordinate_size() + 1
            )));
        }
        if !matches!(bytes[0], 0x02..=0x04) {
            return Err(Error::Invalid(
                "Point must be in correct uncompressed or compressed format".to_string(),
            ));
        }

        let group: EcGroup = curve.try_into()?;
        let mut ctx = BigNumContext::new()?;
        let point = EcPoint::from_bytes(&group, bytes, &mut ctx)?;
        let uncompressed = point.to_bytes(&group, Form::UNCOMPRESSED, &mut ctx)?;
        let ec_key = EcKey::from_public_key(&group, &point)?;
        ec_key.check_key()?;
        let pkey = PKey::from_ec_key(ec_key)?;

        Ok(Self {
            curve,
            point_data: uncompressed,
            openssl_key: pkey,
        })
    }

    /// Import key from SubjectPublicKeyInfo DER format
    pub fn from_der(der_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let pkey = PKey::public_key_from_der(der_bytes.as_ref())?;
        Self::from_pkey(pkey)
    }

    /// Wrap an OpenSSL public key, which must be an EC key on a supported curve
    pub fn from_pkey(pkey: PKey<Public>) -> CryptoResult<Self> {
        let ec_key = pkey.ec_key()?;
        let group = ec_key.group();
        let curve: Curve = group.try_into()?;

        let point = ec_key.public_key();
        let mut ctx = BigNumContext::new()?;
        let point_bytes = point.to_bytes(group, Form::UNCOMPRESSED, &mut ctx)?;

        Ok(Self {
            curve,
            point_data: point_bytes,
            openssl_key: pkey,
        })
    }

    /// Get the curve used by this key
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Get the uncompressed point bytes
    pub fn uncompressed_bytes(&self) -> &[u8] {
        &self.point_data
    }

    /// Get the OpenSSL PKey of this public key
    pub fn as_openssl_pkey(&self) -> &PKey<Public> {
        &self.openssl_key
    }

    /// Export key in SubjectPublicKeyInfo DER format
    pub fn to_der(&self) -> CryptoResult<Vec<u8>> {
        Ok(self.openssl_key.public_key_to_der()?)
    }
}

/// A public key of either supported family, as found in a certificate
#[derive(Debug, Clone)]
pub enum PublicKeyKind {
    Rsa(RsaPublicKey),
    Ec(PublicKey),
}

impl PublicKeyKind {
    /// Classify an OpenSSL public key
    pub fn from_pkey(pkey: PKey<Public>) -> CryptoResult<Self> {
        match pkey.id() {
            Id::RSA => Ok(Self::Rsa(RsaPublicKey::from_pkey(pkey)?)),
            Id::EC => Ok(Self::Ec(PublicKey::from_pkey(pkey)?)),
            _ => Err(Error::Invalid("Unsupported public key algorithm".into())),
        }
    }

    /// Extract the subject public key of an X.509 certificate
    pub fn from_certificate(cert: &X509Ref) -> CryptoResult<Self> {
        Self::from_pkey(cert.public_key()?)
    }

    /// The JCA-style algorithm name (`RSA` or `EC`)
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Rsa(_) => "RSA",
            Self::Ec(_) => "EC",
        }
    }
}

/// A private key of either supported family
#[derive(Debug, Clone)]
pub enum PrivateKeyKind {
    Rsa(RsaPrivateKey),
    Ec(PrivateKey),
}

impl PrivateKeyKind {
    /// Classify an OpenSSL private key
    pub fn from_pkey(pkey: PKey<Private>) -> CryptoResult<Self> {
        match pkey.id() {
            Id::RSA => Ok(Self::Rsa(RsaPrivateKey::from_pkey(pkey)?)),
            Id::EC => Ok(Self::Ec(PrivateKey::from_pkey(pkey)?)),
            _ => Err(Error::Invalid("Unsupported private key algorithm".into())),
        }
    }

    /// Load a PKCS#8 (or traditional) PEM private key
    pub fn from_pem(pem_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        Self::from_pkey(PKey::private_key_from_pem(pem_bytes.as_ref())?)
    }

    /// The JCA-style algorithm name (`RSA` or `EC`)
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Rsa(_) => "RSA",
            Self::Ec(_) => "EC",
        }
    }

    /// Get the underlying OpenSSL key
    pub fn as_openssl_pkey(&self) -> &PKey<Private> {
        match self {
            Self::Rsa(key) => key.pkey(),
            Self::Ec(key) => key.as_openssl_pkey(),
        }
    }

    /// Check that this private key belongs to the given certificate
    pub fn matches_certificate(&self, cert: &X509Ref) -> CryptoResult<bool> {
        let cert_key = cert.public_key()?;
        Ok(self.as_openssl_pkey().public_eq(&cert_key))
    }
}
