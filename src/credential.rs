//! Local key material: signing and decryption credentials, and the keystore
//! that picks the right decryption entry from `KeyInfo` hints.

use crate::crypto::{self, HashAlg, PrivateKeyKind, PublicKeyKind, constant_time_eq};
use chrono::{DateTime, TimeZone, Utc};
use openssl::error::ErrorStack;
use openssl::pkcs12::Pkcs12;
use openssl::x509::{X509, X509Ref, X509VerifyResult};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid credential: {0}")]
    Invalid(String),

    #[error("Private key of '{0}' does not match its certificate")]
    KeyMismatch(String),

    #[error("Unknown key alias: {0}")]
    UnknownAlias(String),

    /// Every keystore entry was excluded by the validity-period check
    #[error("No valid decryption credential: all certificates are expired or not yet valid")]
    NoValidDecryptionCredential,

    /// Valid entries exist but none matches the recipient hints
    #[error("No usable decryption credential matches the recipient key info")]
    NoMatchingDecryptionCredential,

    #[error("Certificate '{0}' is expired or not yet valid")]
    OutsideValidityPeriod(String),

    #[error("Self-signed certificate '{0}' is not allowed")]
    SelfSigned(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::Error),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
}

type Result<T> = std::result::Result<T, CredentialError>;

/// A private key together with the certificate that publishes its public half
#[derive(Clone)]
pub struct Credential {
    alias: String,
    certificate: X509,
    private_key: PrivateKeyKind,
}

impl Credential {
    pub fn new(
        alias: impl Into<String>,
        certificate: X509,
        private_key: PrivateKeyKind,
    ) -> Result<Self> {
        let alias = alias.into();
        if !private_key.matches_certificate(&certificate)? {
            return Err(CredentialError::KeyMismatch(alias));
        }
        Ok(Self {
            alias,
            certificate,
            private_key,
        })
    }

    /// Load a PEM certificate and PEM private key
    pub fn from_pem(
        alias: impl Into<String>,
        certificate_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self> {
        let certificate = X509::from_pem(certificate_pem)?;
        let private_key = PrivateKeyKind::from_pem(key_pem)?;
        Self::new(alias, certificate, private_key)
    }

    /// Load the key entry of a PKCS#12 keystore
    pub fn from_pkcs12(alias: impl Into<String>, der: &[u8], password: &str) -> Result<Self> {
        let alias = alias.into();
        let parsed = Pkcs12::from_der(der)?.parse2(password)?;
        let pkey = parsed
            .pkey
            .ok_or_else(|| CredentialError::Invalid(format!("'{alias}' has no private key")))?;
        let certificate = parsed
            .cert
            .ok_or_else(|| CredentialError::Invalid(format!("'{alias}' has no certificate")))?;
        Self::new(alias, certificate, PrivateKeyKind::from_pkey(pkey)?)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    pub fn private_key(&self) -> &PrivateKeyKind {
        &self.private_key
    }

    /// `RSA` or `EC`
    pub fn key_algorithm(&self) -> &'static str {
        self.private_key.algorithm()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("alias", &self.alias)
            .field("subject", &subject_name(&self.certificate).unwrap_or_default())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Certificate facts derived once per check
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    /// Decimal serial number
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject_key_identifier: Option<Vec<u8>>,
}

impl CertificateInfo {
    pub fn of(cert: &X509Ref) -> Result<Self> {
        let der = cert.to_der()?;
        let (_, parsed) = X509Certificate::from_der(&der)
            .map_err(|e| CredentialError::Invalid(format!("certificate parse error: {e}")))?;
        let validity = parsed.validity();
        let timestamp = |t: i64| {
            Utc.timestamp_opt(t, 0)
                .single()
                .ok_or_else(|| CredentialError::Invalid("certificate validity out of range".into()))
        };

        Ok(Self {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            serial: parsed.tbs_certificate.serial.to_str_radix(10),
            not_before: timestamp(validity.not_before.timestamp())?,
            not_after: timestamp(validity.not_after.timestamp())?,
            subject_key_identifier: cert.subject_key_id().map(|ski| ski.as_slice().to_vec()),
        })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

pub fn subject_name(cert: &X509Ref) -> Result<String> {
    Ok(CertificateInfo::of(cert)?.subject)
}

/// A self-signed certificate names itself as issuer and verifies with its own key
pub fn is_self_signed(cert: &X509Ref) -> bool {
    cert.issued(cert) == X509VerifyResult::OK
        && cert
            .public_key()
            .and_then(|key| cert.verify(&key))
            .unwrap_or(false)
}

/// Normalise a distinguished name so that `CN=a, O=b` and `O=b,CN=a` compare equal
pub fn normalize_dn(dn: &str) -> String {
    let mut parts: Vec<String> = dn
        .split([',', '+'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => format!("{}={}", key.trim().to_ascii_uppercase(), value.trim()),
            None => part.to_string(),
        })
        .collect();
    parts.sort();
    parts.join(",")
}

/// Checks applied to partner and local certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CertificatePolicy {
    pub check_validity_period: bool,
    pub disallow_self_signed: bool,
}

impl CertificatePolicy {
    pub fn check(&self, cert: &X509Ref, now: DateTime<Utc>) -> Result<()> {
        if self.check_validity_period {
            let info = CertificateInfo::of(cert)?;
            if !info.is_valid_at(now) {
                return Err(CredentialError::OutsideValidityPeriod(info.subject));
            }
        }
        if self.disallow_self_signed && is_self_signed(cert) {
            return Err(CredentialError::SelfSigned(subject_name(cert)?));
        }
        Ok(())
    }
}

/// Recipient key hints read from `ds:KeyInfo` / `xenc:RecipientKeyInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInfoHints {
    /// DER encoded certificates
    pub certificates: Vec<Vec<u8>>,
    /// Issuer DN and decimal serial number
    pub issuer_serials: Vec<(String, String)>,
    pub subject_key_identifiers: Vec<Vec<u8>>,
    pub subject_names: Vec<String>,
    pub digests: Vec<(HashAlg, Vec<u8>)>,
}

impl KeyInfoHints {
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
            && self.issuer_serials.is_empty()
            && self.subject_key_identifiers.is_empty()
            && self.subject_names.is_empty()
            && self.digests.is_empty()
    }

    fn matches_certificate(&self, cert: &X509Ref) -> Result<bool> {
        let der = cert.to_der()?;
        Ok(self.certificates.iter().any(|hint| constant_time_eq(hint, &der)))
    }

    fn matches_issuer_serial(&self, info: &CertificateInfo) -> bool {
        let issuer = normalize_dn(&info.issuer);
        self.issuer_serials
            .iter()
            .any(|(name, serial)| normalize_dn(name) == issuer && serial.trim() == info.serial)
    }

    fn matches_ski(&self, info: &CertificateInfo) -> bool {
        info.subject_key_identifier
            .as_ref()
            .is_some_and(|ski| self.subject_key_identifiers.iter().any(|hint| hint == ski))
    }

    fn matches_subject(&self, info: &CertificateInfo) -> bool {
        let subject = normalize_dn(&info.subject);
        self.subject_names
            .iter()
            .any(|name| normalize_dn(name) == subject)
    }

    fn matches_digest(&self, cert: &X509Ref) -> Result<bool> {
        let der = cert.to_der()?;
        for (alg, digest) in &self.digests {
            if constant_time_eq(&alg.hash(&der)?, digest) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// The set of local private-key entries of one engine instance
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    entries: Vec<Credential>,
}

impl KeyStore {
    pub fn new(entries: Vec<Credential>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Credential] {
        &self.entries
    }

    pub fn get(&self, alias: &str) -> Result<&Credential> {
        self.entries
            .iter()
            .find(|entry| entry.alias == alias)
            .ok_or_else(|| CredentialError::UnknownAlias(alias.to_string()))
    }

    /// Pick the decryption credential designated by `hints`.
    ///
    /// With `check_validity_period` set, entries whose certificate is expired or
    /// not yet valid are removed first. Hints are then tried by kind in the order
    /// certificate, issuer+serial, subject key identifier, subject name, digest;
    /// within a kind the first matching keystore entry wins. Without any hints a
    /// single remaining candidate is used.
    pub fn select_decryption_credential(
        &self,
        hints: &KeyInfoHints,
        now: DateTime<Utc>,
        check_validity_period: bool,
    ) -> Result<&Credential> {
        let mut candidates = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let info = CertificateInfo::of(&entry.certificate)?;
            if check_validity_period && !info.is_valid_at(now) {
                debug!(alias = %entry.alias, "Skipping expired or not yet valid credential");
                continue;
            }
            candidates.push((entry, info));
        }
        if candidates.is_empty() {
            warn!("No decryption credential is currently valid");
            return Err(CredentialError::NoValidDecryptionCredential);
        }

        if hints.is_empty() {
            return match candidates.as_slice() {
                [(only, _)] => Ok(*only),
                _ => Err(CredentialError::NoMatchingDecryptionCredential),
            };
        }

        for (entry, _) in &candidates {
            if hints.matches_certificate(&entry.certificate)? {
                return Ok(selected(*entry, "certificate"));
            }
        }
        let by_info = |check: fn(&KeyInfoHints, &CertificateInfo) -> bool| {
            candidates
                .iter()
                .find(|(_, info)| check(hints, info))
                .map(|(entry, _)| *entry)
        };
        if let Some(entry) = by_info(KeyInfoHints::matches_issuer_serial) {
            return Ok(selected(entry, "issuer-serial"));
        }
        if let Some(entry) = by_info(KeyInfoHints::matches_ski) {
            return Ok(selected(entry, "subject-key-identifier"));
        }
        if let Some(entry) = by_info(KeyInfoHints::matches_subject) {
            return Ok(selected(entry, "subject-name"));
        }
        for (entry, _) in &candidates {
            if hints.matches_digest(&entry.certificate)? {
                return Ok(selected(*entry, "digest"));
            }
        }

        warn!(
            candidates = candidates.len(),
            "No decryption credential matches the recipient key info"
        );
        Err(CredentialError::NoMatchingDecryptionCredential)
    }
}

fn selected<'a>(entry: &'a Credential, by: &str) -> &'a Credential {
    debug!(alias = %entry.alias, matched_by = by, "Selected decryption credential");
    entry
}

/// Public key of a certificate, classified by family
pub fn certificate_public_key(cert: &X509Ref) -> Result<PublicKeyKind> {
    Ok(PublicKeyKind::from_certificate(cert)?)
}
