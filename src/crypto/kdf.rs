use crate::crypto::HashAlg;
use crate::crypto::ecdh::SharedSecret;
use crate::crypto::errors::{CryptoResult, Error};
use crate::crypto::keys::SecureBytes;
use crate::crypto::utils::hex_to_bytes;

/// Parameters of the NIST SP 800-56A concatenation KDF as carried in
/// `xenc11:ConcatKDFParams`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatKdfParams {
    /// Hash function to use
    pub hash_function: HashAlg,
    /// `AlgorithmID` bit string, hex encoded with the leading padding byte
    pub algorithm_id: String,
    /// `PartyUInfo` bit string
    pub party_u_info: String,
    /// `PartyVInfo` bit string
    pub party_v_info: String,
}

impl ConcatKdfParams {
    /// Create KDF parameters with empty party information
    pub fn new(hash_function: HashAlg) -> Self {
        Self {
            hash_function,
            algorithm_id: "00".into(),
            party_u_info: "00".into(),
            party_v_info: "00".into(),
        }
    }

    /// Set the `AlgorithmID` bit string
    pub fn with_algorithm_id(mut self, algorithm_id: impl AsRef<[u8]>) -> Self {
        self.algorithm_id = format!("00{}", hex::encode_upper(algorithm_id.as_ref()));
        self
    }

    /// Set the `PartyUInfo` bit string
    pub fn with_party_u_info(mut self, info: impl AsRef<[u8]>) -> Self {
        self.party_u_info = format!("00{}", hex::encode_upper(info.as_ref()));
        self
    }

    fn other_info(&self) -> CryptoResult<Vec<u8>> {
        let mut out = Vec::new();
        for field in [&self.algorithm_id, &self.party_u_info, &self.party_v_info] {
            out.extend_from_slice(&bit_string_bytes(field)?);
        }
        Ok(out)
    }
}

// The first byte of an XML-Enc bit string counts unused trailing bits; only
// byte-aligned strings are accepted.
fn bit_string_bytes(value: &str) -> CryptoResult<Vec<u8>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    let bytes = hex_to_bytes(value)?;
    match bytes.split_first() {
        Some((0, rest)) => Ok(rest.to_vec()),
        _ => Err(Error::Invalid(format!(
            "Padded bit strings are not supported: {value}"
        ))),
    }
}

/// Derive `output_length` bytes from a shared secret
pub fn concat_kdf(
    shared_secret: &SharedSecret,
    params: &ConcatKdfParams,
    output_length: usize,
) -> CryptoResult<SecureBytes> {
    derive_key(shared_secret.as_bytes(), params, output_length)
}

/// Derive `output_length` bytes from the raw secret `z`
pub fn derive_key(
    z: impl AsRef<[u8]>,
    params: &ConcatKdfParams,
    output_length: usize,
) -> CryptoResult<SecureBytes> {
    let other_info = params.other_info()?;
    let hash_len = params.hash_function.output_size();
    let rounds = output_length.div_ceil(hash_len);

    let mut output = Vec::with_capacity(rounds * hash_len);
    for counter in 1..=rounds as u32 {
        let mut input = Vec::with_capacity(4 + z.as_ref().len() + other_info.len());
        input.extend_from_slice(&counter.to_be_bytes());
        input.extend_from_slice(z.as_ref());
        input.extend_from_slice(&other_info);
        output.extend(params.hash_function.hash(&input)?);
    }
    output.truncate(output_length);
    Ok(SecureBytes::new(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Curve, PrivateKey, ecdh};

    #[test]
    fn test_derive_key_length() {
        let params = ConcatKdfParams::new(HashAlg::Sha256);
        assert_eq!(derive_key(b"z", &params, 16).unwrap().len(), 16);
        assert_eq!(derive_key(b"z", &params, 48).unwrap().len(), 48);
    }

    #[test]
    fn test_derive_key_single_round_matches_hash() {
        let params = ConcatKdfParams::new(HashAlg::Sha256).with_algorithm_id(b"alg");
        let derived = derive_key(b"secret", &params, 32).unwrap();

        let mut input = vec![0, 0, 0, 1];
        input.extend_from_slice(b"secret");
        input.extend_from_slice(b"alg");
        let expected = HashAlg::Sha256.hash(&input).unwrap();
        assert_eq!(derived.expose_secret(), expected.as_slice());
    }

    #[test]
    fn test_party_info_changes_output() {
        let a = ConcatKdfParams::new(HashAlg::Sha256).with_party_u_info(b"u");
        let b = ConcatKdfParams::new(HashAlg::Sha256).with_party_u_info(b"v");
        assert_ne!(
            derive_key(b"z", &a, 32).unwrap().expose_secret(),
            derive_key(b"z", &b, 32).unwrap().expose_secret()
        );
    }

    #[test]
    fn test_padded_bit_string_rejected() {
        let mut params = ConcatKdfParams::new(HashAlg::Sha256);
        params.algorithm_id = "04AB".into();
        assert!(derive_key(b"z", &params, 32).is_err());
    }

    #[test]
    fn test_concat_kdf_from_shared_secret() {
        let recipient = PrivateKey::generate(Curve::NistP256).unwrap();
        let originated = ecdh::originate(&recipient.public_key().unwrap()).unwrap();
        let params = ConcatKdfParams::new(HashAlg::Sha256);

        let derived = concat_kdf(originated.secret(), &params, 32).unwrap();
        assert_eq!(derived.len(), 32);
        assert_eq!(
            derived.expose_secret(),
            derive_key(originated.secret().as_bytes(), &params, 32).unwrap().expose_secret()
        );
    }
}
