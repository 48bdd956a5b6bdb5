use chrono::{DateTime, Utc};
use openssl::x509::{X509, X509VerifyResult};
use quick_xml::de::from_str as xml_from_str;
use tracing::{debug, warn};
use url::Url;

use super::parser::decode_certificate;
use super::{MetadataError, Result};
use crate::credential::{CertificatePolicy, is_self_signed};
use crate::xml::utils::strip_declaration;
use crate::xml::{self, Document, Signature, SignatureConfig, ns};

/// Which metadata locations may be contacted at all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlPolicy {
    pub https_only: bool,
    pub whitelist_enabled: bool,
    pub whitelist: Vec<String>,
}

/// Check `url` against `policy` before any network access
pub fn validate_url(url: &str, policy: &UrlPolicy) -> Result<Url> {
    let trimmed = url.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|e| MetadataError::InvalidSource(format!("{trimmed}: {e}")))?;
    match parsed.scheme() {
        "https" => {}
        "http" if !policy.https_only => {}
        scheme => {
            return Err(MetadataError::InvalidSource(format!(
                "{trimmed}: scheme '{scheme}' is not allowed"
            )));
        }
    }
    if policy.whitelist_enabled && !is_listed(&policy.whitelist, &parsed) {
        warn!(url = trimmed, "Metadata URL is not whitelisted");
        return Err(MetadataError::InvalidSource(format!(
            "{trimmed} is not in the metadata whitelist"
        )));
    }
    Ok(parsed)
}

/// Whether `url` appears in `list`, both sides compared in their parsed form
fn is_listed(list: &[String], url: &Url) -> bool {
    list.iter()
        .filter_map(|entry| Url::parse(entry.trim()).ok())
        .any(|entry| entry == *url)
}

/// Trust anchors and signature policy for metadata documents
#[derive(Debug, Clone, Default)]
pub struct MetadataTrust {
    pub anchors: Vec<X509>,
    /// Metadata URLs whose documents may be signed by a self-signed anchor
    pub self_signed_whitelist: Vec<String>,
    pub signature: SignatureConfig,
    pub certificate_policy: CertificatePolicy,
}

impl MetadataTrust {
    /// Validate the signature of the metadata document fetched from `url` and
    /// return the certificate that signed it.
    ///
    /// The signer must be an anchor itself or be issued by one. A self-signed
    /// anchor is only accepted for whitelisted URLs.
    pub fn verify(&self, xml: &str, url: &str, now: DateTime<Utc>) -> Result<X509> {
        let signer = embedded_signer(xml)?;
        let signer_der = signer
            .to_der()
            .map_err(|e| MetadataError::Parse(e.to_string()))?;

        let is_anchor = self
            .anchors
            .iter()
            .any(|anchor| anchor.to_der().is_ok_and(|der| der == signer_der));
        let mut policy = self.certificate_policy;
        if is_anchor && is_self_signed(&signer) {
            let whitelisted = Url::parse(url.trim())
                .is_ok_and(|parsed| is_listed(&self.self_signed_whitelist, &parsed));
            if !whitelisted {
                warn!(url, "Metadata signed by a self-signed certificate that is not whitelisted");
                return Err(MetadataError::Untrusted(format!(
                    "self-signed signer of {url} is not whitelisted"
                )));
            }
            // whitelisted self-signed signers are exempt from disallow_self_signed
            policy.disallow_self_signed = false;
        } else if !is_anchor && !self.anchors.iter().any(|anchor| issued_by(&signer, anchor)) {
            warn!(url, "Metadata signer does not chain to a trust anchor");
            return Err(MetadataError::Untrusted(format!(
                "signer of {url} is not issued by a trust anchor"
            )));
        }

        policy
            .check(&signer, now)
            .map_err(|e| MetadataError::Untrusted(e.to_string()))?;

        let verified = xml::verify_document(xml, std::slice::from_ref(&signer), &self.signature)?;
        debug!(url, "Metadata signature verified");
        Ok(verified)
    }
}

fn issued_by(cert: &X509, issuer: &X509) -> bool {
    issuer.issued(cert) == X509VerifyResult::OK
        && issuer
            .public_key()
            .and_then(|key| cert.verify(&key))
            .unwrap_or(false)
}

fn embedded_signer(xml: &str) -> Result<X509> {
    let source = strip_declaration(xml);
    let doc = Document::parse(source)?;
    let root = doc.root();
    let signature_el = doc
        .children(root)
        .find(|e| e.is(ns::DS, "Signature"))
        .ok_or_else(|| MetadataError::Signature("metadata is not signed".into()))?;
    let signature: Signature = xml_from_str(doc.raw(signature_el))?;
    let encoded = signature
        .key_info
        .as_ref()
        .and_then(|info| info.x509_data.as_ref())
        .and_then(|data| data.certificate.first())
        .ok_or_else(|| MetadataError::Untrusted("metadata signature carries no certificate".into()))?;
    decode_certificate(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        let policy = UrlPolicy {
            https_only: true,
            ..Default::default()
        };
        assert!(validate_url("https://node.example/metadata", &policy).is_ok());
        assert!(matches!(
            validate_url("http://node.example/metadata", &policy),
            Err(MetadataError::InvalidSource(_))
        ));
        assert!(validate_url("not a url", &policy).is_err());
        assert!(validate_url("http://node.example/metadata", &UrlPolicy::default()).is_ok());
    }

    #[test]
    fn test_url_whitelist() {
        let policy = UrlPolicy {
            https_only: true,
            whitelist_enabled: true,
            whitelist: vec!["https://a.example/metadata".into()],
        };
        assert!(validate_url("https://a.example/metadata", &policy).is_ok());
        assert!(validate_url("https://b.example/metadata", &policy).is_err());
    }

    #[test]
    fn test_url_whitelist_compares_parsed_urls() {
        let policy = UrlPolicy {
            https_only: true,
            whitelist_enabled: true,
            whitelist: vec![" https://Proxy.Example ".into()],
        };
        assert!(validate_url("https://proxy.example/", &policy).is_ok());
        assert!(validate_url("https://PROXY.example", &policy).is_ok());
        assert!(validate_url("https://proxy.example/other", &policy).is_err());
    }
}
