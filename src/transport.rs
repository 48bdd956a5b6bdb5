//! Binding encodings for carrying SAML messages over HTTP, and the light token
//! used on the side channel to the national adaptation module.

mod light_token;
pub mod post;
pub mod redirect;

pub use light_token::{LightToken, LightTokenCodec, MAX_LIGHT_TOKEN_SIZE};

pub const SAML_REQUEST: &str = "SAMLRequest";
pub const SAML_RESPONSE: &str = "SAMLResponse";
pub const RELAY_STATE: &str = "RelayState";

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Message is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Inflating message failed: {0}")]
    Inflate(#[source] std::io::Error),

    #[error("Deflating message failed: {0}")]
    Deflate(#[source] std::io::Error),

    #[error("Decoded message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Missing query parameter {0}")]
    MissingParameter(&'static str),

    #[error("LightToken parse error")]
    LightTokenParse,

    #[error("LightToken digest failure")]
    LightTokenDigest,

    #[error(transparent)]
    Crypto(#[from] crate::crypto::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
