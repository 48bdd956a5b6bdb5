//! ECDH-ES key agreement as used by XML Encryption `AgreementMethod`.
//!
//! The sender of an encrypted assertion is the originator: it draws a
//! one-time key on the curve of the recipient's certificate, agrees it
//! against the recipient's static public key and publishes only the public
//! half in `OriginatorKeyInfo`. The recipient repeats the agreement with its
//! static private key. Both sides feed the secret `Z` to ConcatKDF.

use crate::crypto::curves::Curve;
use crate::crypto::errors::{CryptoResult, Error};
use crate::crypto::keys::{PrivateKey, PublicKey, SecureBytes};
use openssl::derive::Deriver;
use std::fmt;

/// Result of the originator side of ECDH-ES. The ephemeral private key is
/// dropped once `Z` is computed.
#[derive(Debug)]
pub struct Originated {
    originator_key: PublicKey,
    secret: SharedSecret,
}

impl Originated {
    /// Public key to publish in `OriginatorKeyInfo`
    pub fn originator_key(&self) -> &PublicKey {
        &self.originator_key
    }

    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }
}

/// Agree a fresh ephemeral key with the recipient's static key
pub fn originate(recipient: &PublicKey) -> CryptoResult<Originated> {
    let ephemeral = PrivateKey::generate(recipient.curve())?;
    let secret = derive(&ephemeral, recipient)?;
    Ok(Originated {
        originator_key: ephemeral.public_key()?,
        secret,
    })
}

/// Recompute `Z` on the recipient side from the published originator key
pub fn agree(recipient: &PrivateKey, originator_key: &PublicKey) -> CryptoResult<SharedSecret> {
    derive(recipient, originator_key)
}

fn derive(private_key: &PrivateKey, peer: &PublicKey) -> CryptoResult<SharedSecret> {
    if private_key.curve() != peer.curve() {
        return Err(Error::Invalid(format!(
            "originator key on {:?} does not match recipient key on {:?}",
            peer.curve(),
            private_key.curve()
        )));
    }
    let mut deriver = Deriver::new(private_key.as_openssl_pkey())?;
    deriver.set_peer(peer.as_openssl_pkey())?;
    Ok(SharedSecret {
        curve: private_key.curve(),
        z: SecureBytes::new(deriver.derive_to_vec()?),
    })
}

/// The ECDH output `Z`, the x-coordinate of the agreed point
pub struct SharedSecret {
    curve: Curve,
    z: SecureBytes,
}

impl SharedSecret {
    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.z.expose_secret()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("curve", &self.curve)
            .field("z", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_recomputes_originator_secret() {
        for &curve in Curve::all() {
            let recipient = PrivateKey::generate(curve).unwrap();
            let originated = originate(&recipient.public_key().unwrap()).unwrap();
            assert_eq!(originated.originator_key().curve(), curve);

            let secret = agree(&recipient, originated.originator_key()).unwrap();
            assert_eq!(secret.as_bytes(), originated.secret().as_bytes());
            assert_eq!(secret.as_bytes().len(), curve.coordinate_size());
        }
    }

    #[test]
    fn test_each_message_gets_a_fresh_ephemeral_key() {
        let recipient = PrivateKey::generate(Curve::NistP256).unwrap().public_key().unwrap();
        let first = originate(&recipient).unwrap();
        let second = originate(&recipient).unwrap();

        assert_ne!(first.originator_key(), second.originator_key());
        assert_ne!(first.secret().as_bytes(), second.secret().as_bytes());
    }

    #[test]
    fn test_originator_key_on_other_curve_rejected() {
        let recipient = PrivateKey::generate(Curve::NistP256).unwrap();
        let foreign = PrivateKey::generate(Curve::NistP384).unwrap().public_key().unwrap();

        let err = agree(&recipient, &foreign).unwrap_err();
        assert!(matches!(err, Error::Invalid(reason) if reason.contains("does not match")));
    }
}
