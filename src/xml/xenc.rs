//! XML Encryption 1.1 of SAML assertions.
//!
//! Each `saml2:Assertion` of a response is replaced by an
//! `saml2:EncryptedAssertion` carrying an `xenc:EncryptedData` whose content
//! key is either transported with RSA-OAEP or wrapped with a key derived from
//! an ECDH-ES agreement (ConcatKDF + AES key wrap).

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use openssl::x509::X509Ref;
use quick_xml::de::from_str as xml_from_str;
use quick_xml::se::to_string_with_root as xml_to_string;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credential::{CertificateInfo, KeyInfoHints, KeyStore};
use crate::crypto::ecdh;
use crate::crypto::kdf::{ConcatKdfParams, concat_kdf};
use crate::crypto::rsa::{self, OaepParams};
use crate::crypto::{Curve, HashAlg, PrivateKeyKind, PublicKey, PublicKeyKind, SecureBytes};
use crate::xml::algorithms::{
    self, CONCAT_KDF, DataEncryptionAlgorithm, DigestAlgorithm, ECDH_ES, ELEMENT_TYPE,
    KeyTransportAlgorithm, KeyWrapAlgorithm,
};
use crate::xml::utils::{Document, splice, strip_declaration};
use crate::xml::*;

/// How the content-encryption key reaches the recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncipherment {
    RsaKeyTransport,
    EcdhKeyAgreement,
}

/// Certificate identification forms written to the recipient key info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientHint {
    Certificate,
    IssuerSerial,
    SubjectKeyIdentifier,
    SubjectName,
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    pub data_algorithm: DataEncryptionAlgorithm,
    /// `None` picks the mode matching the recipient key type
    pub key_encipherment: Option<KeyEncipherment>,
    pub key_transport: KeyTransportAlgorithm,
    pub oaep: OaepParams,
    pub key_wrap: KeyWrapAlgorithm,
    pub kdf_digest: DigestAlgorithm,
    pub hints: Vec<RecipientHint>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            data_algorithm: DataEncryptionAlgorithm::Aes256Gcm,
            key_encipherment: None,
            key_transport: KeyTransportAlgorithm::RsaOaep,
            oaep: OaepParams::default(),
            key_wrap: KeyWrapAlgorithm::Aes256,
            kdf_digest: DigestAlgorithm::Sha256,
            hints: vec![RecipientHint::Certificate],
        }
    }
}

/// Checks applied while decrypting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionPolicy {
    pub allowed_data_algorithms: Vec<DataEncryptionAlgorithm>,
    pub check_validity_period: bool,
}

impl Default for DecryptionPolicy {
    fn default() -> Self {
        Self {
            allowed_data_algorithms: DataEncryptionAlgorithm::ALL.to_vec(),
            check_validity_period: true,
        }
    }
}

/// Result of [`decrypt_assertions`]
#[derive(Debug, Clone)]
pub struct Decrypted {
    pub xml: String,
    /// Key encipherment mode of every decrypted assertion, in document order
    pub key_encipherment: Vec<KeyEncipherment>,
    /// RSA key transport algorithms met while decrypting
    pub key_transports: Vec<KeyTransportAlgorithm>,
}

impl Decrypted {
    pub fn count(&self) -> usize {
        self.key_encipherment.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedAssertion {
    #[serde(rename(serialize = "@xmlns:saml2"), skip_deserializing, default)]
    xmlns_saml2: String,

    #[serde(rename(serialize = "xenc:EncryptedData", deserialize = "EncryptedData"))]
    encrypted_data: EncryptedData,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(rename(serialize = "xenc:EncryptedKey", deserialize = "EncryptedKey"), default)]
    encrypted_keys: Vec<EncryptedKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedData {
    #[serde(rename(serialize = "@xmlns:xenc"), skip_deserializing, default)]
    xmlns_xenc: String,
    #[serde(rename(serialize = "@xmlns:ds"), skip_deserializing, default)]
    xmlns_ds: String,
    #[serde(rename(serialize = "@xmlns:xenc11"), skip_deserializing, default)]
    xmlns_xenc11: String,
    #[serde(rename(serialize = "@xmlns:dsig11"), skip_deserializing, default)]
    xmlns_dsig11: String,

    #[serde(rename = "@Type", default)]
    r#type: Option<String>,

    #[serde(rename(serialize = "xenc:EncryptionMethod", deserialize = "EncryptionMethod"))]
    encryption_method: AlgorithmRef,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ds:KeyInfo", deserialize = "KeyInfo"), default)]
    key_info: Option<DataKeyInfo>,

    #[serde(rename(serialize = "xenc:CipherData", deserialize = "CipherData"))]
    cipher_data: CipherData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DataKeyInfo {
    #[serde(rename(serialize = "xenc:EncryptedKey", deserialize = "EncryptedKey"), default)]
    encrypted_keys: Vec<EncryptedKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedKey {
    #[serde(rename(serialize = "xenc:EncryptionMethod", deserialize = "EncryptionMethod"))]
    encryption_method: KeyEncryptionMethod,

    #[serde(rename(serialize = "ds:KeyInfo", deserialize = "KeyInfo"), default)]
    key_info: KeyKeyInfo,

    #[serde(rename(serialize = "xenc:CipherData", deserialize = "CipherData"))]
    cipher_data: CipherData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyEncryptionMethod {
    #[serde(rename = "@Algorithm")]
    algorithm: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ds:DigestMethod", deserialize = "DigestMethod"), default)]
    digest_method: Option<AlgorithmRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "xenc11:MGF", deserialize = "MGF"), default)]
    mgf: Option<AlgorithmRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyKeyInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "ds:X509Data", deserialize = "X509Data"), default)]
    x509_data: Option<X509Data>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename(serialize = "xenc:AgreementMethod", deserialize = "AgreementMethod"))]
    #[serde(default)]
    agreement_method: Option<AgreementMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgreementMethod {
    #[serde(rename = "@Algorithm")]
    algorithm: String,

    #[serde(rename(
        serialize = "xenc11:KeyDerivationMethod",
        deserialize = "KeyDerivationMethod"
    ))]
    key_derivation_method: KeyDerivationMethod,

    #[serde(rename(serialize = "xenc:OriginatorKeyInfo", deserialize = "OriginatorKeyInfo"))]
    originator_key_info: OriginatorKeyInfo,

    #[serde(rename(serialize = "xenc:RecipientKeyInfo", deserialize = "RecipientKeyInfo"))]
    #[serde(default)]
    recipient_key_info: KeyInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyDerivationMethod {
    #[serde(rename = "@Algorithm")]
    algorithm: String,

    #[serde(rename(serialize = "xenc11:ConcatKDFParams", deserialize = "ConcatKDFParams"))]
    params: ConcatKdfParamsXml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConcatKdfParamsXml {
    #[serde(rename = "@AlgorithmID", default)]
    algorithm_id: String,
    #[serde(rename = "@PartyUInfo", default)]
    party_u_info: String,
    #[serde(rename = "@PartyVInfo", default)]
    party_v_info: String,

    #[serde(rename(serialize = "ds:DigestMethod", deserialize = "DigestMethod"))]
    digest_method: AlgorithmRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OriginatorKeyInfo {
    #[serde(rename(serialize = "ds:KeyValue", deserialize = "KeyValue"))]
    key_value: KeyValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyValue {
    #[serde(rename(serialize = "dsig11:ECKeyValue", deserialize = "ECKeyValue"))]
    ec_key_value: EcKeyValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EcKeyValue {
    #[serde(rename(serialize = "dsig11:NamedCurve", deserialize = "NamedCurve"))]
    named_curve: NamedCurve,
    #[serde(rename(serialize = "dsig11:PublicKey", deserialize = "PublicKey"))]
    public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamedCurve {
    #[serde(rename = "@URI")]
    uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CipherData {
    #[serde(rename(serialize = "xenc:CipherValue", deserialize = "CipherValue"))]
    cipher_value: String,
}

impl CipherData {
    fn new(bytes: &[u8]) -> Self {
        Self {
            cipher_value: BASE64.encode(bytes),
        }
    }

    fn decode(&self) -> Result<Vec<u8>> {
        Ok(BASE64.decode(compact_base64(&self.cipher_value))?)
    }
}

/// Encrypt every `saml2:Assertion` child of the root element of `xml` for the
/// holder of `recipient`.
pub fn encrypt_assertions(xml: &str, recipient: &X509Ref, config: &EncryptionConfig) -> Result<String> {
    let source = strip_declaration(xml);
    let doc = Document::parse(source)?;
    let root = doc.root();
    let assertions: Vec<_> = doc
        .children(root)
        .filter(|e| e.is(ns::SAML2, "Assertion"))
        .collect();
    if assertions.is_empty() {
        return Ok(source.to_string());
    }

    let recipient_key = PublicKeyKind::from_certificate(recipient)?;
    let mode = match (config.key_encipherment, &recipient_key) {
        (Some(mode), _) => mode,
        (None, PublicKeyKind::Rsa(_)) => KeyEncipherment::RsaKeyTransport,
        (None, PublicKeyKind::Ec(_)) => KeyEncipherment::EcdhKeyAgreement,
    };
    let recipient_info = recipient_key_info(recipient, &config.hints)?;

    // Replace back to front so earlier offsets stay valid
    let mut out = source.to_string();
    for assertion in assertions.iter().rev() {
        let plaintext = doc.standalone(assertion);
        let cipher = config.data_algorithm.cipher();
        let cek = cipher.generate_key()?;
        let encrypted_content = cipher.encrypt(&cek, plaintext.as_bytes())?;

        let encrypted_key = match (mode, &recipient_key) {
            (KeyEncipherment::RsaKeyTransport, PublicKeyKind::Rsa(key)) => {
                transport_key(key, &cek, config, recipient_info.clone())?
            }
            (KeyEncipherment::EcdhKeyAgreement, PublicKeyKind::Ec(key)) => {
                agree_key(key, &cek, config, recipient_info.clone())?
            }
            (mode, key) => {
                let (algorithm, expected) = match mode {
                    KeyEncipherment::RsaKeyTransport => (config.key_transport.uri(), "RSA"),
                    KeyEncipherment::EcdhKeyAgreement => (ECDH_ES, "EC"),
                };
                return Err(Error::KeyTypeMismatch {
                    algorithm: algorithm.to_string(),
                    expected,
                    actual: key.algorithm(),
                });
            }
        };

        let encrypted = EncryptedAssertion {
            xmlns_saml2: ns::SAML2.into(),
            encrypted_data: EncryptedData {
                xmlns_xenc: ns::XENC.into(),
                xmlns_ds: ns::DS.into(),
                xmlns_xenc11: ns::XENC11.into(),
                xmlns_dsig11: ns::DSIG11.into(),
                r#type: Some(ELEMENT_TYPE.into()),
                encryption_method: AlgorithmRef::new(config.data_algorithm.uri()),
                key_info: Some(DataKeyInfo {
                    encrypted_keys: vec![encrypted_key],
                }),
                cipher_data: CipherData::new(&encrypted_content),
            },
            encrypted_keys: Vec::new(),
        };
        let encrypted_xml = xml_to_string("saml2:EncryptedAssertion", &encrypted)?;
        out = splice(&out, assertion.start..assertion.end, &encrypted_xml);
    }

    debug!(count = assertions.len(), mode = ?mode, "Encrypted assertions");
    Ok(out)
}

fn transport_key(
    key: &crate::crypto::rsa::RsaPublicKey,
    cek: &SecureBytes,
    config: &EncryptionConfig,
    recipient: KeyInfo,
) -> Result<EncryptedKey> {
    let oaep = match config.key_transport {
        KeyTransportAlgorithm::RsaOaepMgf1p => OaepParams {
            mgf1: HashAlg::Sha1,
            ..config.oaep
        },
        KeyTransportAlgorithm::RsaOaep => config.oaep,
    };
    let wrapped = rsa::oaep_encrypt(key, cek.expose_secret(), oaep)?;
    let mgf = match config.key_transport {
        KeyTransportAlgorithm::RsaOaep => Some(AlgorithmRef::new(algorithms::mgf_uri(oaep.mgf1))),
        KeyTransportAlgorithm::RsaOaepMgf1p => None,
    };
    Ok(EncryptedKey {
        encryption_method: KeyEncryptionMethod {
            algorithm: config.key_transport.uri().into(),
            digest_method: Some(AlgorithmRef::new(algorithms::digest_uri(oaep.digest))),
            mgf,
        },
        key_info: KeyKeyInfo {
            x509_data: recipient.x509_data,
            agreement_method: None,
        },
        cipher_data: CipherData::new(&wrapped),
    })
}

fn agree_key(
    key: &PublicKey,
    cek: &SecureBytes,
    config: &EncryptionConfig,
    recipient: KeyInfo,
) -> Result<EncryptedKey> {
    let originated = ecdh::originate(key)?;
    let params = ConcatKdfParams::new(config.kdf_digest.hash())
        .with_algorithm_id(config.key_wrap.uri().as_bytes());
    let wrap = config.key_wrap.key_wrap();
    let kek = concat_kdf(originated.secret(), &params, wrap.key_size())?;
    let wrapped = wrap.wrap(&kek, cek)?;

    Ok(EncryptedKey {
        encryption_method: KeyEncryptionMethod {
            algorithm: config.key_wrap.uri().into(),
            digest_method: None,
            mgf: None,
        },
        key_info: KeyKeyInfo {
            x509_data: None,
            agreement_method: Some(AgreementMethod {
                algorithm: ECDH_ES.into(),
                key_derivation_method: KeyDerivationMethod {
                    algorithm: CONCAT_KDF.into(),
                    params: ConcatKdfParamsXml {
                        algorithm_id: params.algorithm_id.clone(),
                        party_u_info: params.party_u_info.clone(),
                        party_v_info: params.party_v_info.clone(),
                        digest_method: AlgorithmRef::new(config.kdf_digest.uri()),
                    },
                },
                originator_key_info: OriginatorKeyInfo {
                    key_value: KeyValue {
                        ec_key_value: EcKeyValue {
                            named_curve: NamedCurve {
                                uri: originated.originator_key().curve().named_curve_uri(),
                            },
                            public_key: BASE64.encode(originated.originator_key().uncompressed_bytes()),
                        },
                    },
                },
                recipient_key_info: recipient,
            }),
        },
        cipher_data: CipherData::new(&wrapped),
    })
}

fn recipient_key_info(cert: &X509Ref, hints: &[RecipientHint]) -> Result<KeyInfo> {
    let info = CertificateInfo::of(cert)?;
    let mut data = X509Data::default();
    for hint in hints {
        match hint {
            RecipientHint::Certificate => data.certificate.push(BASE64.encode(cert.to_der()?)),
            RecipientHint::IssuerSerial => {
                data.issuer_serial = Some(X509IssuerSerial {
                    issuer_name: info.issuer.clone(),
                    serial_number: info.serial.clone(),
                })
            }
            RecipientHint::SubjectKeyIdentifier => {
                if let Some(ski) = &info.subject_key_identifier {
                    data.ski.push(BASE64.encode(ski));
                }
            }
            RecipientHint::SubjectName => data.subject_name.push(info.subject.clone()),
            RecipientHint::Digest => data.digest.push(X509Digest {
                xmlns_dsig11: ns::DSIG11.into(),
                algorithm: DigestAlgorithm::Sha256.uri().into(),
                value: BASE64.encode(HashAlg::Sha256.hash(cert.to_der()?)?),
            }),
        }
    }
    Ok(KeyInfo {
        x509_data: Some(data),
    })
}

fn hints_from(data: Option<&X509Data>) -> Result<KeyInfoHints> {
    let mut hints = KeyInfoHints::default();
    let Some(data) = data else {
        return Ok(hints);
    };
    for cert in &data.certificate {
        hints.certificates.push(BASE64.decode(compact_base64(cert))?);
    }
    if let Some(issuer_serial) = &data.issuer_serial {
        hints.issuer_serials.push((
            issuer_serial.issuer_name.clone(),
            issuer_serial.serial_number.clone(),
        ));
    }
    for ski in &data.ski {
        hints
            .subject_key_identifiers
            .push(BASE64.decode(compact_base64(ski))?);
    }
    hints.subject_names.extend(data.subject_name.iter().cloned());
    for digest in &data.digest {
        let alg = DigestAlgorithm::from_uri(&digest.algorithm)?.hash();
        hints
            .digests
            .push((alg, BASE64.decode(compact_base64(&digest.value))?));
    }
    Ok(hints)
}

/// Decrypt every `EncryptedAssertion` child of the root element of `xml` with
/// the keystore entry its recipient key info designates.
pub fn decrypt_assertions(
    xml: &str,
    keystore: &KeyStore,
    now: DateTime<Utc>,
    policy: &DecryptionPolicy,
) -> Result<Decrypted> {
    let source = strip_declaration(xml);
    let doc = Document::parse(source)?;
    let root = doc.root();
    let encrypted: Vec<_> = doc
        .children(root)
        .filter(|e| e.is(ns::SAML2, "EncryptedAssertion"))
        .collect();

    let mut out = source.to_string();
    let mut modes = Vec::with_capacity(encrypted.len());
    let mut transports = Vec::new();
    for element in encrypted.iter().rev() {
        let wire: EncryptedAssertion = xml_from_str(doc.raw(element))?;
        let data = &wire.encrypted_data;
        if data.r#type.as_deref().is_some_and(|t| t != ELEMENT_TYPE) {
            return Err(Error::Invalid(format!(
                "Unsupported EncryptedData type: {}",
                data.r#type.as_deref().unwrap_or_default()
            )));
        }
        let data_algorithm = DataEncryptionAlgorithm::from_uri(&data.encryption_method.algorithm)?;
        if !policy.allowed_data_algorithms.contains(&data_algorithm) {
            warn!(algorithm = %data_algorithm, "Content encryption algorithm is not whitelisted");
            return Err(Error::DisallowedAlgorithm(data_algorithm.uri().to_string()));
        }

        let encrypted_key = data
            .key_info
            .iter()
            .flat_map(|info| &info.encrypted_keys)
            .chain(&wire.encrypted_keys)
            .next()
            .ok_or_else(|| Error::ElementNotFound("EncryptedKey".into()))?;

        let (cek, mode, transport) = unwrap_content_key(encrypted_key, keystore, now, policy)?;
        transports.extend(transport);
        let cipher = data_algorithm.cipher();
        if cek.len() != cipher.key_size() {
            return Err(Error::Invalid("Content key length does not match the cipher".into()));
        }
        let plaintext = cipher.decrypt(&cek, &data.cipher_data.decode()?)?;
        let plaintext = String::from_utf8(plaintext)?;

        let assertion = Document::parse(strip_declaration(&plaintext))?;
        if !assertion.root().is(ns::SAML2, "Assertion") {
            return Err(Error::Invalid("Decrypted content is not an assertion".into()));
        }
        out = splice(&out, element.start..element.end, strip_declaration(&plaintext));
        modes.push(mode);
    }
    modes.reverse();

    Ok(Decrypted {
        xml: out,
        key_encipherment: modes,
        key_transports: transports,
    })
}

fn unwrap_content_key(
    encrypted_key: &EncryptedKey,
    keystore: &KeyStore,
    now: DateTime<Utc>,
    policy: &DecryptionPolicy,
) -> Result<(SecureBytes, KeyEncipherment, Option<KeyTransportAlgorithm>)> {
    let method = &encrypted_key.encryption_method;
    let wrapped = encrypted_key.cipher_data.decode()?;

    if let Some(agreement) = &encrypted_key.key_info.agreement_method {
        let hints = hints_from(agreement.recipient_key_info.x509_data.as_ref())?;
        let credential = keystore.select_decryption_credential(&hints, now, policy.check_validity_period)?;
        let PrivateKeyKind::Ec(private_key) = credential.private_key() else {
            return Err(Error::KeyTypeMismatch {
                algorithm: ECDH_ES.into(),
                expected: "EC",
                actual: credential.key_algorithm(),
            });
        };
        let cek = derive_and_unwrap(agreement, method, private_key, &wrapped)?;
        debug!(alias = credential.alias(), "Unwrapped content key with ECDH-ES");
        return Ok((cek, KeyEncipherment::EcdhKeyAgreement, None));
    }

    let transport = KeyTransportAlgorithm::from_uri(&method.algorithm)?;
    let oaep = algorithms::oaep_params(
        transport,
        method.digest_method.as_ref().map(|d| d.algorithm.as_str()),
        method.mgf.as_ref().map(|m| m.algorithm.as_str()),
    )?;
    let hints = hints_from(encrypted_key.key_info.x509_data.as_ref())?;
    let credential = keystore.select_decryption_credential(&hints, now, policy.check_validity_period)?;
    let PrivateKeyKind::Rsa(private_key) = credential.private_key() else {
        return Err(Error::KeyTypeMismatch {
            algorithm: transport.uri().into(),
            expected: "RSA",
            actual: credential.key_algorithm(),
        });
    };
    let cek = rsa::oaep_decrypt(private_key, &wrapped, oaep)?;
    debug!(alias = credential.alias(), "Unwrapped content key with RSA-OAEP");
    Ok((cek, KeyEncipherment::RsaKeyTransport, Some(transport)))
}

fn derive_and_unwrap(
    agreement: &AgreementMethod,
    method: &KeyEncryptionMethod,
    private_key: &crate::crypto::PrivateKey,
    wrapped: &[u8],
) -> Result<SecureBytes> {
    if agreement.algorithm != ECDH_ES {
        return Err(Error::UnsupportedAlgorithm(agreement.algorithm.clone()));
    }
    let derivation = &agreement.key_derivation_method;
    if derivation.algorithm != CONCAT_KDF {
        return Err(Error::UnsupportedAlgorithm(derivation.algorithm.clone()));
    }
    let wrap = KeyWrapAlgorithm::from_uri(&method.algorithm)?.key_wrap();

    let ec_value = &agreement.originator_key_info.key_value.ec_key_value;
    let curve = Curve::from_named_curve_uri(&ec_value.named_curve.uri)?;
    let originator =
        PublicKey::from_bytes(curve, BASE64.decode(compact_base64(&ec_value.public_key))?)?;
    let shared = ecdh::agree(private_key, &originator)?;

    let wire = &derivation.params;
    let params = ConcatKdfParams {
        hash_function: DigestAlgorithm::from_uri(&wire.digest_method.algorithm)?.hash(),
        algorithm_id: wire.algorithm_id.clone(),
        party_u_info: wire.party_u_info.clone(),
        party_v_info: wire.party_v_info.clone(),
    };
    let kek = concat_kdf(&shared, &params, wrap.key_size())?;
    Ok(wrap.unwrap(&kek, wrapped)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, CredentialError, test_support};

    const RESPONSE: &str = r#"<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r"><saml2:Issuer>https://idp.example</saml2:Issuer><saml2:Assertion ID="_a" Version="2.0"><saml2:Issuer>https://idp.example</saml2:Issuer><saml2:Subject>subject &amp; co</saml2:Subject></saml2:Assertion></saml2p:Response>"#;

    fn ec_credential(alias: &str, serial: u32) -> Credential {
        test_support::credential(alias, test_support::ec_key(), -1, 30, serial)
    }

    fn rsa_credential(alias: &str, serial: u32) -> Credential {
        test_support::credential(alias, test_support::rsa_key(), -1, 30, serial)
    }

    fn round_trip(credential: &Credential, config: &EncryptionConfig) -> Decrypted {
        let encrypted = encrypt_assertions(RESPONSE, credential.certificate(), config).unwrap();
        assert!(encrypted.contains("saml2:EncryptedAssertion"));
        assert!(!encrypted.contains("subject &amp; co"));

        let keystore = KeyStore::new(vec![credential.clone()]);
        decrypt_assertions(&encrypted, &keystore, Utc::now(), &DecryptionPolicy::default()).unwrap()
    }

    #[test]
    fn test_rsa_key_transport_round_trip() {
        let credential = rsa_credential("rsa", 1);
        for key_transport in KeyTransportAlgorithm::ALL {
            let config = EncryptionConfig {
                key_transport: *key_transport,
                data_algorithm: DataEncryptionAlgorithm::Aes128Cbc,
                ..Default::default()
            };
            let decrypted = round_trip(&credential, &config);
            assert_eq!(decrypted.key_encipherment, [KeyEncipherment::RsaKeyTransport]);
            assert_eq!(decrypted.key_transports, [*key_transport]);

            let doc = Document::parse(&decrypted.xml).unwrap();
            let assertion = doc.find(|e| e.is(ns::SAML2, "Assertion")).unwrap();
            assert_eq!(assertion.id(), Some("_a"));
            let subject = doc.find(|e| e.local_name == "Subject").unwrap();
            assert_eq!(doc.text(subject).unwrap(), "subject & co");
        }
    }

    #[test]
    fn test_ecdh_key_agreement_round_trip() {
        let credential = ec_credential("ec", 1);
        let decrypted = round_trip(&credential, &EncryptionConfig::default());
        assert_eq!(decrypted.key_encipherment, [KeyEncipherment::EcdhKeyAgreement]);
        assert!(decrypted.xml.contains(r#"ID="_a""#));
    }

    #[test]
    fn test_ec_key_with_rsa_transport_fails() {
        let credential = ec_credential("ec", 1);
        let config = EncryptionConfig {
            key_encipherment: Some(KeyEncipherment::RsaKeyTransport),
            ..Default::default()
        };
        let result = encrypt_assertions(RESPONSE, credential.certificate(), &config);
        assert!(matches!(
            result,
            Err(Error::KeyTypeMismatch { expected: "RSA", actual: "EC", .. })
        ));
    }

    #[test]
    fn test_rsa_key_with_ecdh_fails() {
        let credential = rsa_credential("rsa", 1);
        let config = EncryptionConfig {
            key_encipherment: Some(KeyEncipherment::EcdhKeyAgreement),
            ..Default::default()
        };
        assert!(matches!(
            encrypt_assertions(RESPONSE, credential.certificate(), &config),
            Err(Error::KeyTypeMismatch { expected: "EC", .. })
        ));
    }

    #[test]
    fn test_hints_select_second_entry() {
        for hint in [
            RecipientHint::IssuerSerial,
            RecipientHint::SubjectKeyIdentifier,
            RecipientHint::Digest,
        ] {
            let first = ec_credential("first", 1);
            let second = ec_credential("second", 2);
            let config = EncryptionConfig {
                hints: vec![hint],
                ..Default::default()
            };
            let encrypted = encrypt_assertions(RESPONSE, second.certificate(), &config).unwrap();

            let keystore = KeyStore::new(vec![first, second]);
            let decrypted =
                decrypt_assertions(&encrypted, &keystore, Utc::now(), &DecryptionPolicy::default());
            assert!(decrypted.is_ok(), "hint {hint:?} failed");
        }
    }

    #[test]
    fn test_all_expired_entries() {
        let live = rsa_credential("live", 1);
        let expired = test_support::credential("old", test_support::rsa_key(), -30, -1, 2);
        let encrypted =
            encrypt_assertions(RESPONSE, live.certificate(), &EncryptionConfig::default()).unwrap();

        let keystore = KeyStore::new(vec![expired]);
        let result = decrypt_assertions(&encrypted, &keystore, Utc::now(), &DecryptionPolicy::default());
        assert!(matches!(
            result,
            Err(Error::Credential(CredentialError::NoValidDecryptionCredential))
        ));
    }

    #[test]
    fn test_disallowed_content_algorithm() {
        let credential = rsa_credential("rsa", 1);
        let config = EncryptionConfig {
            data_algorithm: DataEncryptionAlgorithm::Aes128Cbc,
            ..Default::default()
        };
        let encrypted = encrypt_assertions(RESPONSE, credential.certificate(), &config).unwrap();
        let policy = DecryptionPolicy {
            allowed_data_algorithms: vec![DataEncryptionAlgorithm::Aes256Gcm],
            ..Default::default()
        };
        let keystore = KeyStore::new(vec![credential]);
        assert!(matches!(
            decrypt_assertions(&encrypted, &keystore, Utc::now(), &policy),
            Err(Error::DisallowedAlgorithm(_))
        ));
    }

    #[test]
    fn test_without_assertions_is_unchanged() {
        let credential = rsa_credential("rsa", 1);
        let xml = r#"<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" ID="_r"/>"#;
        let out = encrypt_assertions(xml, credential.certificate(), &EncryptionConfig::default()).unwrap();
        assert_eq!(out, xml);
    }
}
