use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use openssl::x509::{X509, X509Ref};
use quick_xml::de::from_str as xml_from_str;
use quick_xml::se::to_string_with_root as xml_to_string;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::crypto::rsa::{self, RsaSignature};
use crate::crypto::{PrivateKeyKind, PublicKeyKind, constant_time_eq, ecdsa};
use crate::xml::algorithms::{
    DigestAlgorithm, ENVELOPED_SIGNATURE, EXCLUSIVE_C14N, SignatureAlgorithm,
};
use crate::xml::utils::{Document, Element, splice, strip_declaration};
use crate::xml::*;

/// Algorithms used to produce and accept enveloped signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureConfig {
    /// Algorithm used when signing
    pub algorithm: SignatureAlgorithm,
    pub digest: DigestAlgorithm,
    /// Algorithms accepted for signing and validation
    pub whitelist: Vec<SignatureAlgorithm>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        use SignatureAlgorithm::*;
        Self {
            algorithm: RsaPssSha256,
            digest: DigestAlgorithm::Sha256,
            whitelist: vec![
                RsaPssSha256,
                RsaPssSha384,
                RsaPssSha512,
                EcdsaSha256,
                EcdsaSha384,
                EcdsaSha512,
            ],
        }
    }
}

impl SignatureConfig {
    pub fn is_allowed(&self, algorithm: SignatureAlgorithm) -> bool {
        self.whitelist.contains(&algorithm)
    }

    /// Reject a signing algorithm outside the whitelist
    pub fn check(&self) -> Result<()> {
        if !self.is_allowed(self.algorithm) {
            return Err(Error::DisallowedAlgorithm(self.algorithm.uri().to_string()));
        }
        Ok(())
    }
}

/// Sign the root element of `xml` with an enveloped signature placed right
/// after its `Issuer` child.
pub fn sign_document(xml: &str, credential: &Credential, config: &SignatureConfig) -> Result<String> {
    config.check()?;
    let algorithm = config.algorithm;
    if algorithm.key_algorithm() != credential.key_algorithm() {
        return Err(Error::KeyTypeMismatch {
            algorithm: algorithm.uri().to_string(),
            expected: algorithm.key_algorithm(),
            actual: credential.key_algorithm(),
        });
    }

    let source = strip_declaration(xml);
    let doc = Document::parse(source)?;
    let root = doc.root();
    let id = root
        .id()
        .ok_or_else(|| Error::ElementNotFound(format!("ID attribute on {}", root.name)))?;
    if root.content_start == root.end {
        return Err(Error::Invalid(format!("Element '{id}' has no content to sign")));
    }
    if find_signature(&doc, root).is_some() {
        return Err(Error::Invalid(format!("Element '{id}' is already signed")));
    }

    let digest_alg = config.digest;
    let canonical = c14n::canonicalize(source, &[])?;
    let digest = digest_alg.hash().hash(canonical.as_bytes())?;

    let mut signed_info = SignedInfo {
        xmlns_ds: Some(ns::DS.to_string()),
        canon_method: CanonicalizationMethod {
            algorithm: EXCLUSIVE_C14N.into(),
            inclusive_ns: None,
        },
        signature_method: AlgorithmRef::new(algorithm.uri()),
        references: vec![Reference {
            uri: format!("#{id}"),
            transforms: Some(Transforms {
                transform: vec![
                    Transform {
                        algorithm: ENVELOPED_SIGNATURE.into(),
                        inclusive_ns: None,
                    },
                    Transform {
                        algorithm: EXCLUSIVE_C14N.into(),
                        inclusive_ns: None,
                    },
                ],
            }),
            digest_method: AlgorithmRef::new(digest_alg.uri()),
            digest_value: BASE64.encode(&digest),
        }],
    };

    let signed_info_xml = xml_to_string("ds:SignedInfo", &signed_info)?;
    let signed_info_c14n = c14n::canonicalize(&signed_info_xml, &[])?;
    let signature_value = sign_bytes(credential, algorithm, signed_info_c14n.as_bytes())?;

    // Nested inside ds:Signature the declaration is inherited
    signed_info.xmlns_ds = None;
    let signature = Signature {
        xmlns_ds: ns::DS.to_string(),
        signed_info,
        signature_value: BASE64.encode(signature_value),
        key_info: Some(KeyInfo {
            x509_data: Some(X509Data {
                certificate: vec![BASE64.encode(credential.certificate().to_der()?)],
                ..Default::default()
            }),
        }),
    };
    let signature_xml = xml_to_string("ds:Signature", &signature)?;

    let position = doc
        .children(root)
        .find(|e| e.local_name == "Issuer")
        .map_or(root.content_start, |issuer| issuer.end);
    debug!(id, algorithm = %algorithm, "Signed document");
    Ok(splice(source, position..position, &signature_xml))
}

fn sign_bytes(credential: &Credential, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match credential.private_key() {
        PrivateKeyKind::Rsa(key) => {
            let signature = rsa::sign(key, data, algorithm.hash(), algorithm.rsa_padding())?;
            Ok(signature.as_bytes().to_vec())
        }
        PrivateKeyKind::Ec(key) => Ok(ecdsa::sign(key, data, algorithm.hash())?.raw_signature()),
    }
}

fn find_signature<'d>(doc: &'d Document<'_>, root: &'d Element) -> Option<&'d Element> {
    doc.children(root).find(|e| e.is(ns::DS, "Signature"))
}

/// Validate the enveloped signature over the root element of `xml` against
/// the `trusted` certificates and return the certificate that verified it.
///
/// When the signature carries an `X509Certificate` it must be one of the
/// trusted certificates; otherwise every trusted certificate is tried.
pub fn verify_document(xml: &str, trusted: &[X509], config: &SignatureConfig) -> Result<X509> {
    let source = strip_declaration(xml);
    let doc = Document::parse(source)?;
    let root = doc.root();
    let id = root.id().unwrap_or_default();

    let signature_el = find_signature(&doc, root).ok_or(Error::SignatureMissing)?;
    let signature: Signature = xml_from_str(doc.raw(signature_el))?;
    let signed_info = &signature.signed_info;

    if signed_info.canon_method.algorithm != EXCLUSIVE_C14N {
        return Err(Error::DisallowedAlgorithm(
            signed_info.canon_method.algorithm.clone(),
        ));
    }
    let algorithm = SignatureAlgorithm::from_uri(&signed_info.signature_method.algorithm)?;
    if !config.is_allowed(algorithm) {
        warn!(algorithm = %algorithm, "Signature algorithm is not whitelisted");
        return Err(Error::DisallowedAlgorithm(algorithm.uri().to_string()));
    }

    let [reference] = signed_info.references.as_slice() else {
        return Err(Error::Invalid(format!(
            "Expected exactly one signature reference, found {}",
            signed_info.references.len()
        )));
    };
    let expected = format!("#{id}");
    if id.is_empty() || reference.uri != expected {
        return Err(Error::ReferenceMismatch {
            expected,
            actual: reference.uri.clone(),
        });
    }

    // Enveloped transform: the signed content is the root without its signature
    let mut prefixes = Vec::new();
    for transform in reference.transforms.iter().flat_map(|t| &t.transform) {
        match transform.algorithm.as_str() {
            ENVELOPED_SIGNATURE => {}
            EXCLUSIVE_C14N => {
                if let Some(inclusive) = &transform.inclusive_ns {
                    prefixes = inclusive.prefixes();
                }
            }
            other => return Err(Error::DisallowedAlgorithm(other.to_string())),
        }
    }
    let digest_alg = DigestAlgorithm::from_uri(&reference.digest_method.algorithm)?;
    let unsigned = splice(source, signature_el.start..signature_el.end, "");
    let canonical = c14n::canonicalize(&unsigned, &prefixes)?;
    let digest = digest_alg.hash().hash(canonical.as_bytes())?;
    let expected_digest = BASE64.decode(compact_base64(&reference.digest_value))?;
    if !constant_time_eq(&digest, &expected_digest) {
        warn!(id, "Reference digest does not match the signed content");
        return Err(Error::DigestMismatch);
    }

    let signed_info_el = doc
        .children(signature_el)
        .find(|e| e.local_name == "SignedInfo")
        .ok_or_else(|| Error::ElementNotFound("SignedInfo".into()))?;
    let signed_info_prefixes = signed_info
        .canon_method
        .inclusive_ns
        .as_ref()
        .map(InclusiveNamespaces::prefixes)
        .unwrap_or_default();
    let signed_info_c14n =
        c14n::canonicalize(doc.standalone(signed_info_el), &signed_info_prefixes)?;
    let signature_value = BASE64.decode(compact_base64(&signature.signature_value))?;

    let embedded = signature
        .key_info
        .as_ref()
        .and_then(|info| info.x509_data.as_ref())
        .and_then(|data| data.certificate.first());

    if let Some(encoded) = embedded {
        let der = BASE64.decode(compact_base64(encoded))?;
        let cert = trusted
            .iter()
            .find(|cert| cert.to_der().is_ok_and(|trusted_der| trusted_der == der))
            .ok_or_else(|| {
                warn!(id, "Signature certificate is not trusted");
                Error::UntrustedCertificate
            })?;
        let key = PublicKeyKind::from_certificate(cert)?;
        if key.algorithm() != algorithm.key_algorithm() {
            return Err(Error::KeyTypeMismatch {
                algorithm: algorithm.uri().to_string(),
                expected: algorithm.key_algorithm(),
                actual: key.algorithm(),
            });
        }
        return if verify_bytes(&key, algorithm, signed_info_c14n.as_bytes(), &signature_value)? {
            Ok(cert.clone())
        } else {
            warn!(id, "Signature value does not verify");
            Err(Error::InvalidSignature)
        };
    }

    for cert in trusted {
        if verify_with(cert, algorithm, signed_info_c14n.as_bytes(), &signature_value)? {
            debug!(id, "Signature verified against a trusted certificate");
            return Ok(cert.clone());
        }
    }
    warn!(id, candidates = trusted.len(), "No trusted certificate verifies the signature");
    Err(Error::InvalidSignature)
}

fn verify_with(
    cert: &X509Ref,
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let key = PublicKeyKind::from_certificate(cert)?;
    if key.algorithm() != algorithm.key_algorithm() {
        return Ok(false);
    }
    verify_bytes(&key, algorithm, data, signature)
}

fn verify_bytes(
    key: &PublicKeyKind,
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool> {
    match key {
        PublicKeyKind::Rsa(key) => Ok(rsa::verify(
            key,
            data,
            &RsaSignature::new(signature),
            algorithm.hash(),
            algorithm.rsa_padding(),
        )?),
        PublicKeyKind::Ec(key) => {
            let Ok(sig) = ecdsa::EcdsaSig::from_raw(key.curve(), signature) else {
                return Ok(false);
            };
            Ok(ecdsa::verify(key, data, &sig, algorithm.hash())?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::test_support;

    const UNSIGNED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<saml2p:AuthnRequest xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_abc" Version="2.0"><saml2:Issuer>https://sp.example/metadata</saml2:Issuer><saml2p:NameIDPolicy AllowCreate="true"/></saml2p:AuthnRequest>"#;

    fn rsa_credential() -> Credential {
        test_support::credential("sign", test_support::rsa_key(), -1, 30, 1)
    }

    fn ec_credential() -> Credential {
        test_support::credential("sign-ec", test_support::ec_key(), -1, 30, 2)
    }

    #[test]
    fn test_sign_and_verify_rsa() {
        let credential = rsa_credential();
        let config = SignatureConfig::default();
        let signed = sign_document(UNSIGNED, &credential, &config).unwrap();

        let doc = Document::parse(&signed).unwrap();
        let names: Vec<_> = doc
            .children(doc.root())
            .map(|e| e.local_name.as_str())
            .collect();
        assert_eq!(names, ["Issuer", "Signature", "NameIDPolicy"]);

        let trusted = [credential.certificate().to_owned()];
        let cert = verify_document(&signed, &trusted, &config).unwrap();
        assert_eq!(cert.to_der().unwrap(), trusted[0].to_der().unwrap());
    }

    #[test]
    fn test_sign_and_verify_ecdsa() {
        let credential = ec_credential();
        let config = SignatureConfig {
            algorithm: SignatureAlgorithm::EcdsaSha384,
            ..Default::default()
        };
        let signed = sign_document(UNSIGNED, &credential, &config).unwrap();
        let trusted = [credential.certificate().to_owned()];
        assert!(verify_document(&signed, &trusted, &config).is_ok());
    }

    #[test]
    fn test_tampered_content_fails_digest() {
        let credential = rsa_credential();
        let config = SignatureConfig::default();
        let signed = sign_document(UNSIGNED, &credential, &config).unwrap();
        let tampered = signed.replace("https://sp.example/metadata", "https://evil.example");

        let trusted = [credential.certificate().to_owned()];
        assert!(matches!(
            verify_document(&tampered, &trusted, &config),
            Err(Error::DigestMismatch)
        ));
    }

    #[test]
    fn test_untrusted_certificate() {
        let credential = rsa_credential();
        let other = test_support::credential("other", test_support::rsa_key(), -1, 30, 9);
        let config = SignatureConfig::default();
        let signed = sign_document(UNSIGNED, &credential, &config).unwrap();

        let trusted = [other.certificate().to_owned()];
        assert!(matches!(
            verify_document(&signed, &trusted, &config),
            Err(Error::UntrustedCertificate)
        ));
    }

    #[test]
    fn test_disallowed_algorithms() {
        let credential = rsa_credential();
        let config = SignatureConfig {
            algorithm: SignatureAlgorithm::RsaSha256,
            ..Default::default()
        };
        assert!(matches!(
            sign_document(UNSIGNED, &credential, &config),
            Err(Error::DisallowedAlgorithm(_))
        ));

        let permissive = SignatureConfig {
            algorithm: SignatureAlgorithm::RsaSha256,
            whitelist: vec![SignatureAlgorithm::RsaSha256],
            ..Default::default()
        };
        let signed = sign_document(UNSIGNED, &credential, &permissive).unwrap();
        let trusted = [credential.certificate().to_owned()];
        assert!(matches!(
            verify_document(&signed, &trusted, &SignatureConfig::default()),
            Err(Error::DisallowedAlgorithm(_))
        ));
    }

    #[test]
    fn test_key_type_mismatch() {
        let config = SignatureConfig {
            algorithm: SignatureAlgorithm::EcdsaSha256,
            ..Default::default()
        };
        assert!(matches!(
            sign_document(UNSIGNED, &rsa_credential(), &config),
            Err(Error::KeyTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unsigned_document() {
        let trusted = [rsa_credential().certificate().to_owned()];
        assert!(matches!(
            verify_document(UNSIGNED, &trusted, &SignatureConfig::default()),
            Err(Error::SignatureMissing)
        ));
    }

    #[test]
    fn test_reference_must_target_root() {
        let credential = rsa_credential();
        let config = SignatureConfig::default();
        let signed = sign_document(UNSIGNED, &credential, &config).unwrap();
        let moved = signed.replace(r#"ID="_abc""#, r#"ID="_other""#);

        let trusted = [credential.certificate().to_owned()];
        assert!(matches!(
            verify_document(&moved, &trusted, &config),
            Err(Error::ReferenceMismatch { .. })
        ));
    }
}
