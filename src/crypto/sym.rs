use crate::crypto::SecureBytes;
use crate::crypto::errors::{CryptoResult, Error};
use crate::crypto::utils::generate_random_bytes;
use openssl::aes::{AesKey, unwrap_key, wrap_key};
use openssl::symm::{Cipher as OpenSslCipher, Crypter, Mode, decrypt_aead, encrypt_aead};

const AES_BLOCK_SIZE: usize = 16;
const GCM_IV_SIZE: usize = 12;
const GCM_TAG_SIZE: usize = 16;

/// Block encryption algorithms for `xenc:EncryptedData`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
}

impl Cipher {
    /// Get the key size of the cipher in bytes
    pub const fn key_size(self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes128Gcm => 16,
            Self::Aes192Cbc | Self::Aes192Gcm => 24,
            Self::Aes256Cbc | Self::Aes256Gcm => 32,
        }
    }

    /// Whether this is an authenticated (GCM) mode
    pub const fn is_aead(self) -> bool {
        matches!(self, Self::Aes128Gcm | Self::Aes192Gcm | Self::Aes256Gcm)
    }

    const fn iv_size(self) -> usize {
        if self.is_aead() {
            GCM_IV_SIZE
        } else {
            AES_BLOCK_SIZE
        }
    }

    fn to_openssl_cipher(self) -> OpenSslCipher {
        match self {
            Self::Aes128Cbc => OpenSslCipher::aes_128_cbc(),
            Self::Aes192Cbc => OpenSslCipher::aes_192_cbc(),
            Self::Aes256Cbc => OpenSslCipher::aes_256_cbc(),
            Self::Aes128Gcm => OpenSslCipher::aes_128_gcm(),
            Self::Aes192Gcm => OpenSslCipher::aes_192_gcm(),
            Self::Aes256Gcm => OpenSslCipher::aes_256_gcm(),
        }
    }

    /// Generate a fresh random content-encryption key for this cipher
    pub fn generate_key(self) -> CryptoResult<SecureBytes> {
        Ok(SecureBytes::new(generate_random_bytes(self.key_size())?))
    }

    /// Encrypt `plaintext` and return `IV || ciphertext` (with the GCM tag appended)
    pub fn encrypt(self, key: &SecureBytes, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.check_key(key)?;
        let iv = generate_random_bytes(self.iv_size())?;
        let mut out = iv.clone();

        if self.is_aead() {
            let mut tag = [0u8; GCM_TAG_SIZE];
            let ciphertext = encrypt_aead(
                self.to_openssl_cipher(),
                key.expose_secret(),
                Some(&iv),
                &[],
                plaintext,
                &mut tag,
            )?;
            out.extend_from_slice(&ciphertext);
            out.extend_from_slice(&tag);
        } else {
            let padded = xmlenc_pad(plaintext)?;
            let ciphertext = self.cbc(Mode::Encrypt, key, &iv, &padded)?;
            out.extend_from_slice(&ciphertext);
        }
        Ok(out)
    }

    /// Decrypt `IV || ciphertext` as produced by [`Cipher::encrypt`]
    pub fn decrypt(self, key: &SecureBytes, data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.check_key(key)?;
        let iv_size = self.iv_size();

        if self.is_aead() {
            if data.len() < iv_size + GCM_TAG_SIZE {
                return Err(Error::DecryptionFailed);
            }
            let (iv, rest) = data.split_at(iv_size);
            let (ciphertext, tag) = rest.split_at(rest.len() - GCM_TAG_SIZE);
            decrypt_aead(
                self.to_openssl_cipher(),
                key.expose_secret(),
                Some(iv),
                &[],
                ciphertext,
                tag,
            )
            .map_err(|_| Error::DecryptionFailed)
        } else {
            if data.len() < iv_size + AES_BLOCK_SIZE || (data.len() - iv_size) % AES_BLOCK_SIZE != 0
            {
                return Err(Error::DecryptionFailed);
            }
            let (iv, ciphertext) = data.split_at(iv_size);
            let padded = self.cbc(Mode::Decrypt, key, iv, ciphertext)?;
            xmlenc_unpad(padded)
        }
    }

    fn check_key(self, key: &SecureBytes) -> CryptoResult<()> {
        if key.len() != self.key_size() {
            return Err(Error::Invalid(format!(
                "Key length {} does not match cipher key size {}",
                key.len(),
                self.key_size()
            )));
        }
        Ok(())
    }

    fn cbc(self, mode: Mode, key: &SecureBytes, iv: &[u8], input: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut crypter = Crypter::new(
            self.to_openssl_cipher(),
            mode,
            key.expose_secret(),
            Some(iv),
        )?;
        crypter.pad(false);

        let mut output = vec![0u8; input.len() + AES_BLOCK_SIZE];
        let mut count = crypter.update(input, &mut output)?;
        count += crypter.finalize(&mut output[count..])?;
        output.truncate(count);
        Ok(output)
    }
}

// XML-Enc block padding: arbitrary filler, last byte holds the pad length.
fn xmlenc_pad(data: &[u8]) -> CryptoResult<Vec<u8>> {
    let pad_len = AES_BLOCK_SIZE - data.len() % AES_BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.extend(generate_random_bytes(pad_len - 1)?);
    padded.push(pad_len as u8);
    Ok(padded)
}

fn xmlenc_unpad(mut data: Vec<u8>) -> CryptoResult<Vec<u8>> {
    let pad_len = *data.last().ok_or(Error::DecryptionFailed)? as usize;
    if pad_len == 0 || pad_len > AES_BLOCK_SIZE || pad_len > data.len() {
        return Err(Error::DecryptionFailed);
    }
    data.truncate(data.len() - pad_len);
    Ok(data)
}

/// AES key wrap (RFC 3394) as used after ECDH-ES key agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyWrap {
    Aes128,
    Aes192,
    Aes256,
}

impl KeyWrap {
    /// Get the key-encryption key size in bytes
    pub const fn key_size(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Wrap a content-encryption key
    pub fn wrap(self, kek: &SecureBytes, cek: &SecureBytes) -> CryptoResult<Vec<u8>> {
        if kek.len() != self.key_size() || cek.len() % 8 != 0 || cek.len() < 16 {
            return Err(Error::Invalid("Invalid key wrap input lengths".into()));
        }
        let key = AesKey::new_encrypt(kek.expose_secret())
            .map_err(|_| Error::Invalid("Invalid key-encryption key".into()))?;
        let mut out = vec![0u8; cek.len() + 8];
        let len = wrap_key(&key, None, &mut out, cek.expose_secret())
            .map_err(|_| Error::Invalid("AES key wrap failed".into()))?;
        out.truncate(len);
        Ok(out)
    }

    /// Unwrap a content-encryption key, verifying the integrity check value
    pub fn unwrap(self, kek: &SecureBytes, wrapped: &[u8]) -> CryptoResult<SecureBytes> {
        if kek.len() != self.key_size() || wrapped.len() % 8 != 0 || wrapped.len() < 24 {
            return Err(Error::DecryptionFailed);
        }
        let key = AesKey::new_decrypt(kek.expose_secret()).map_err(|_| Error::DecryptionFailed)?;
        let mut out = vec![0u8; wrapped.len() - 8];
        let len =
            unwrap_key(&key, None, &mut out, wrapped).map_err(|_| Error::DecryptionFailed)?;
        out.truncate(len);
        Ok(SecureBytes::new(out))
    }
}
