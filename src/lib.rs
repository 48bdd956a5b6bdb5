//! Protocol engine of an eIDAS node: builds, signs, encrypts, decrypts,
//! validates and correlates the SAML authentication requests and responses
//! exchanged between a Connector and a ProxyService.

pub mod clock;
pub mod config;
pub mod correlation;
pub mod credential;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod model;
pub mod protocol;
pub mod telemetry;
pub mod transport;
pub mod xml;

pub use engine::{EngineSet, ProtocolEngine};
pub use error::{EngineError, Result};
