use crate::crypto::HashAlg;
use crate::crypto::errors::{CryptoResult, Error};
use crate::crypto::keys::SecureBytes;
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};
use std::fmt;

/// RSA key sizes supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaKeySize {
    /// 2048-bit RSA key
    Rsa2048,
    /// 3072-bit RSA key
    Rsa3072,
    /// 4096-bit RSA key
    Rsa4096,
}

impl RsaKeySize {
    /// Get the key size in bits
    pub fn bits(&self) -> u32 {
        match self {
            RsaKeySize::Rsa2048 => 2048,
            RsaKeySize::Rsa3072 => 3072,
            RsaKeySize::Rsa4096 => 4096,
        }
    }

    /// Get the key size in bytes
    pub fn bytes(&self) -> u32 {
        self.bits() / 8
    }
}

impl TryFrom<u32> for RsaKeySize {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            2048 => Ok(Self::Rsa2048),
            3072 => Ok(Self::Rsa3072),
            4096 => Ok(Self::Rsa4096),
            _ => Err(Error::Invalid(format!("Unsupported RSA key size: {bits}"))),
        }
    }
}

/// Signature padding scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    /// RSASSA-PKCS1-v1_5
    Pkcs1,
    /// RSASSA-PSS with MGF1 over the same digest and salt length equal to the digest length
    Pss,
}

/// Represents an RSA signature
#[derive(Clone)]
pub struct RsaSignature {
    data: SecureBytes,
}

impl RsaSignature {
    /// Create a new RSA signature
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: SecureBytes::new(data.into()),
        }
    }

    /// Get the signature data as bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.data.expose_secret()
    }

    /// Get the signature length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if signature is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for RsaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSignature")
            .field("size", &self.len())
            .field("hex", &hex::encode(self.as_bytes()))
            .finish()
    }
}

/// RSA private key wrapper
#[derive(Debug, Clone)]
pub struct RsaPrivateKey {
    key: PKey<Private>,
    key_size: RsaKeySize,
}

impl RsaPrivateKey {
    /// Generate a new RSA private key
    pub fn generate(key_size: RsaKeySize) -> CryptoResult<Self> {
        let rsa = Rsa::generate(key_size.bits())?;
        let key = PKey::from_rsa(rsa)?;

        Ok(Self { key, key_size })
    }

    /// Load from PEM-encoded PKCS#1/PKCS#8.
    pub fn from_pem(pem_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let key = PKey::private_key_from_pem(pem_bytes.as_ref())?;
        Self::from_pkey(key)
    }

    pub(crate) fn from_pkey(key: PKey<Private>) -> CryptoResult<Self> {
        let rsa = key.rsa()?;
        let key_size = RsaKeySize::try_from(rsa.size() * 8)?;
        Ok(Self { key, key_size })
    }

    /// Serialize as PEM-encoded PKCS#8.
    pub fn to_pem(&self) -> CryptoResult<String> {
        let pem_bytes = self.key.private_key_to_pem_pkcs8()?;
        Ok(String::from_utf8_lossy(&pem_bytes).to_string())
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> CryptoResult<RsaPublicKey> {
        let pub_key = PKey::public_key_from_der(&self.key.public_key_to_der()?)?;

        Ok(RsaPublicKey {
            key: pub_key,
            key_size: self.key_size,
        })
    }

    /// Get the key size
    pub fn key_size(&self) -> RsaKeySize {
        self.key_size
    }

    /// Get the underlying OpenSSL private key
    pub(crate) fn pkey(&self) -> &PKey<Private> {
        &self.key
    }
}

/// RSA public key wrapper
#[derive(Debug, Clone)]
pub struct RsaPublicKey {
    key: PKey<Public>,
    key_size: RsaKeySize,
}

impl RsaPublicKey {
    pub(crate) fn from_pkey(key: PKey<Public>) -> CryptoResult<Self> {
        let rsa = key.rsa()?;
        let key_size = RsaKeySize::try_from(rsa.size() * 8)?;
        Ok(Self { key, key_size })
    }

    /// Export key in SubjectPublicKeyInfo DER format
    pub fn to_der(&self) -> CryptoResult<Vec<u8>> {
        Ok(self.key.public_key_to_der()?)
    }

    /// Get the key size
    pub fn key_size(&self) -> RsaKeySize {
        self.key_size
    }

    /// Get the underlying OpenSSL public key
    pub(crate) fn pkey(&self) -> &PKey<Public> {
        &self.key
    }
}

/// Sign data using RSA private key
pub fn sign(
    private_key: &RsaPrivateKey,
    data: impl AsRef<[u8]>,
    hash_alg: HashAlg,
    padding: RsaPadding,
) -> CryptoResult<RsaSignature> {
    let mut signer = Signer::new(hash_alg.into(), private_key.pkey())?;
    if padding == RsaPadding::Pss {
        signer.set_rsa_padding(Padding::PKCS1_PSS)?;
        signer.set_rsa_mgf1_md(hash_alg.into())?;
        signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
    }
    let signature_data = signer.sign_oneshot_to_vec(data.as_ref())?;

    Ok(RsaSignature::new(signature_data))
}

/// Verify RSA signature
pub fn verify(
    public_key: &RsaPublicKey,
    data: impl AsRef<[u8]>,
    signature: &RsaSignature,
    hash_alg: HashAlg,
    padding: RsaPadding,
) -> CryptoResult<bool> {
    if signature.len() != public_key.key_size().bytes() as usize {
        return Ok(false);
    }

    let mut verifier = Verifier::new(hash_alg.into(), public_key.pkey())?;
    if padding == RsaPadding::Pss {
        verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
        verifier.set_rsa_mgf1_md(hash_alg.into())?;
        verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
    }
    Ok(verifier.verify_oneshot(signature.as_bytes(), data.as_ref())?)
}

/// Parameters of an RSA-OAEP key transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OaepParams {
    /// Digest applied to the OAEP label
    pub digest: HashAlg,
    /// Digest used by the MGF1 mask generation function
    pub mgf1: HashAlg,
}

impl Default for OaepParams {
    fn default() -> Self {
        Self {
            digest: HashAlg::Sha256,
            mgf1: HashAlg::Sha256,
        }
    }
}

/// Wrap a content-encryption key for the holder of `public_key`
pub fn oaep_encrypt(
    public_key: &RsaPublicKey,
    plaintext: &[u8],
    params: OaepParams,
) -> CryptoResult<Vec<u8>> {
    let mut encrypter = Encrypter::new(public_key.pkey())?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    encrypter.set_rsa_oaep_md(params.digest.into())?;
    encrypter.set_rsa_mgf1_md(params.mgf1.into())?;

    let mut out = vec![0u8; encrypter.encrypt_len(plaintext)?];
    let len = encrypter.encrypt(plaintext, &mut out)?;
    out.truncate(len);
    Ok(out)
}

/// Unwrap a content-encryption key
pub fn oaep_decrypt(
    private_key: &RsaPrivateKey,
    ciphertext: &[u8],
    params: OaepParams,
) -> CryptoResult<SecureBytes> {
    let mut decrypter = Decrypter::new(private_key.pkey())?;
    decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    decrypter.set_rsa_oaep_md(params.digest.into())?;
    decrypter.set_rsa_mgf1_md(params.mgf1.into())?;

    let mut out = vec![0u8; decrypter.decrypt_len(ciphertext)?];
    let len = decrypter
        .decrypt(ciphertext, &mut out)
        .map_err(|_| Error::DecryptionFailed)?;
    out.truncate(len);
    Ok(SecureBytes::new(out))
}
