//! Algorithm identifiers of XML-DSig and XML-Enc 1.1 and their mapping onto
//! the primitive layer.

use crate::crypto::HashAlg;
use crate::crypto::rsa::{OaepParams, RsaPadding};
use crate::crypto::sym::{Cipher, KeyWrap};
use crate::xml::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const ELEMENT_TYPE: &str = "http://www.w3.org/2001/04/xmlenc#Element";
pub const ECDH_ES: &str = "http://www.w3.org/2009/xmlenc11#ECDH-ES";
pub const CONCAT_KDF: &str = "http://www.w3.org/2009/xmlenc11#ConcatKDF";

macro_rules! uri_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $uri:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn uri(self) -> &'static str {
                match self {
                    $($name::$variant => $uri),+
                }
            }

            pub fn from_uri(uri: &str) -> Result<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|alg| alg.uri() == uri.trim())
                    .ok_or_else(|| Error::UnsupportedAlgorithm(uri.to_string()))
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_uri(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                Self::from_uri(&s)
            }
        }

        impl From<$name> for String {
            fn from(alg: $name) -> String {
                alg.uri().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.uri())
            }
        }
    };
}

uri_enum!(
    /// `ds:SignatureMethod` algorithms
    SignatureAlgorithm {
        RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
        RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        RsaPssSha256 => "http://www.w3.org/2007/05/xmldsig-more#sha256-rsa-MGF1",
        RsaPssSha384 => "http://www.w3.org/2007/05/xmldsig-more#sha384-rsa-MGF1",
        RsaPssSha512 => "http://www.w3.org/2007/05/xmldsig-more#sha512-rsa-MGF1",
        EcdsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256",
        EcdsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384",
        EcdsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512",
    }
);

impl SignatureAlgorithm {
    pub fn hash(self) -> HashAlg {
        use SignatureAlgorithm::*;
        match self {
            RsaSha256 | RsaPssSha256 | EcdsaSha256 => HashAlg::Sha256,
            RsaSha384 | RsaPssSha384 | EcdsaSha384 => HashAlg::Sha384,
            RsaSha512 | RsaPssSha512 | EcdsaSha512 => HashAlg::Sha512,
        }
    }

    /// Key family the algorithm signs with (`RSA` or `EC`)
    pub fn key_algorithm(self) -> &'static str {
        use SignatureAlgorithm::*;
        match self {
            EcdsaSha256 | EcdsaSha384 | EcdsaSha512 => "EC",
            _ => "RSA",
        }
    }

    pub fn rsa_padding(self) -> RsaPadding {
        use SignatureAlgorithm::*;
        match self {
            RsaPssSha256 | RsaPssSha384 | RsaPssSha512 => RsaPadding::Pss,
            _ => RsaPadding::Pkcs1,
        }
    }
}

uri_enum!(
    /// `ds:DigestMethod` algorithms
    DigestAlgorithm {
        Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
        Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
        Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
    }
);

impl DigestAlgorithm {
    pub fn hash(self) -> HashAlg {
        match self {
            Self::Sha256 => HashAlg::Sha256,
            Self::Sha384 => HashAlg::Sha384,
            Self::Sha512 => HashAlg::Sha512,
        }
    }
}

uri_enum!(
    /// `xenc:EncryptionMethod` of the encrypted content
    DataEncryptionAlgorithm {
        Aes128Cbc => "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
        Aes192Cbc => "http://www.w3.org/2001/04/xmlenc#aes192-cbc",
        Aes256Cbc => "http://www.w3.org/2001/04/xmlenc#aes256-cbc",
        Aes128Gcm => "http://www.w3.org/2009/xmlenc11#aes128-gcm",
        Aes192Gcm => "http://www.w3.org/2009/xmlenc11#aes192-gcm",
        Aes256Gcm => "http://www.w3.org/2009/xmlenc11#aes256-gcm",
    }
);

impl DataEncryptionAlgorithm {
    pub fn cipher(self) -> Cipher {
        match self {
            Self::Aes128Cbc => Cipher::Aes128Cbc,
            Self::Aes192Cbc => Cipher::Aes192Cbc,
            Self::Aes256Cbc => Cipher::Aes256Cbc,
            Self::Aes128Gcm => Cipher::Aes128Gcm,
            Self::Aes192Gcm => Cipher::Aes192Gcm,
            Self::Aes256Gcm => Cipher::Aes256Gcm,
        }
    }
}

uri_enum!(
    /// RSA key transport algorithms of an `xenc:EncryptedKey`
    KeyTransportAlgorithm {
        RsaOaepMgf1p => "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p",
        RsaOaep => "http://www.w3.org/2009/xmlenc11#rsa-oaep",
    }
);

uri_enum!(
    /// AES key wrap algorithms used after ECDH-ES agreement
    KeyWrapAlgorithm {
        Aes128 => "http://www.w3.org/2001/04/xmlenc#kw-aes128",
        Aes192 => "http://www.w3.org/2001/04/xmlenc#kw-aes192",
        Aes256 => "http://www.w3.org/2001/04/xmlenc#kw-aes256",
    }
);

impl KeyWrapAlgorithm {
    pub fn key_wrap(self) -> KeyWrap {
        match self {
            Self::Aes128 => KeyWrap::Aes128,
            Self::Aes192 => KeyWrap::Aes192,
            Self::Aes256 => KeyWrap::Aes256,
        }
    }
}

uri_enum!(
    /// MGF1 variants of `xenc11:MGF`
    MgfAlgorithm {
        Mgf1Sha1 => "http://www.w3.org/2009/xmlenc11#mgf1sha1",
        Mgf1Sha256 => "http://www.w3.org/2009/xmlenc11#mgf1sha256",
        Mgf1Sha384 => "http://www.w3.org/2009/xmlenc11#mgf1sha384",
        Mgf1Sha512 => "http://www.w3.org/2009/xmlenc11#mgf1sha512",
    }
);

impl MgfAlgorithm {
    pub fn hash(self) -> HashAlg {
        match self {
            Self::Mgf1Sha1 => HashAlg::Sha1,
            Self::Mgf1Sha256 => HashAlg::Sha256,
            Self::Mgf1Sha384 => HashAlg::Sha384,
            Self::Mgf1Sha512 => HashAlg::Sha512,
        }
    }
}

const SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#sha1";

/// Resolve the OAEP parameters of an `EncryptedKey/EncryptionMethod`
pub fn oaep_params(
    algorithm: KeyTransportAlgorithm,
    digest_uri: Option<&str>,
    mgf_uri: Option<&str>,
) -> Result<OaepParams> {
    let digest = match digest_uri {
        None | Some(SHA1_URI) => HashAlg::Sha1,
        Some(uri) => DigestAlgorithm::from_uri(uri)?.hash(),
    };
    let mgf1 = match (algorithm, mgf_uri) {
        (KeyTransportAlgorithm::RsaOaepMgf1p, _) | (_, None) => HashAlg::Sha1,
        (KeyTransportAlgorithm::RsaOaep, Some(uri)) => MgfAlgorithm::from_uri(uri)?.hash(),
    };
    Ok(OaepParams { digest, mgf1 })
}

/// URI of the digest used inside OAEP and ConcatKDF parameters
pub fn digest_uri(hash: HashAlg) -> &'static str {
    match hash {
        HashAlg::Sha1 => SHA1_URI,
        HashAlg::Sha256 => DigestAlgorithm::Sha256.uri(),
        HashAlg::Sha384 => DigestAlgorithm::Sha384.uri(),
        HashAlg::Sha512 => DigestAlgorithm::Sha512.uri(),
    }
}

pub fn mgf_uri(hash: HashAlg) -> &'static str {
    match hash {
        HashAlg::Sha1 => MgfAlgorithm::Mgf1Sha1.uri(),
        HashAlg::Sha256 => MgfAlgorithm::Mgf1Sha256.uri(),
        HashAlg::Sha384 => MgfAlgorithm::Mgf1Sha384.uri(),
        HashAlg::Sha512 => MgfAlgorithm::Mgf1Sha512.uri(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_round_trip() {
        for alg in SignatureAlgorithm::ALL {
            assert_eq!(SignatureAlgorithm::from_uri(alg.uri()).unwrap(), *alg);
        }
        assert!(matches!(
            SignatureAlgorithm::from_uri("http://www.w3.org/2000/09/xmldsig#rsa-sha1"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_signature_algorithm_properties() {
        assert_eq!(SignatureAlgorithm::EcdsaSha384.key_algorithm(), "EC");
        assert_eq!(SignatureAlgorithm::RsaPssSha256.rsa_padding(), RsaPadding::Pss);
        assert_eq!(SignatureAlgorithm::RsaSha512.hash(), HashAlg::Sha512);
    }

    #[test]
    fn test_oaep_params() {
        let params = oaep_params(KeyTransportAlgorithm::RsaOaepMgf1p, None, None).unwrap();
        assert_eq!(params.digest, HashAlg::Sha1);
        assert_eq!(params.mgf1, HashAlg::Sha1);

        let params = oaep_params(
            KeyTransportAlgorithm::RsaOaep,
            Some(DigestAlgorithm::Sha256.uri()),
            Some(MgfAlgorithm::Mgf1Sha256.uri()),
        )
        .unwrap();
        assert_eq!(params.digest, HashAlg::Sha256);
        assert_eq!(params.mgf1, HashAlg::Sha256);
    }

    #[test]
    fn test_algorithms_deserialize_from_uri() {
        let alg: DataEncryptionAlgorithm =
            serde_json::from_str("\"http://www.w3.org/2009/xmlenc11#aes256-gcm\"").unwrap();
        assert_eq!(alg, DataEncryptionAlgorithm::Aes256Gcm);
    }
}
