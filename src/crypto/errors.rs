use openssl::error::ErrorStack;
use thiserror::Error;

pub(crate) type CryptoResult<T> = Result<T, Error>;

/// Error type for cryptographic operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid data format or corrupted data
    #[error("Invalid data: {0}")]
    Invalid(String),

    /// Unsupported curve
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// Key type does not fit the requested operation
    #[error("Key type mismatch: expected {expected}, got {actual}")]
    KeyTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Authenticated decryption failed or padding was corrupt
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Internal OpenSSL error
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
