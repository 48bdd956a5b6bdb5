//! HTTP-Redirect binding: raw DEFLATE, then base64, then URL encoding.

use super::{RELAY_STATE, Result, TransportError};
use base64::{Engine, engine::general_purpose::STANDARD};
use flate2::Compression;
use flate2::bufread::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};
use url::form_urlencoded;

/// The URL-encoded query parameter value for `xml`.
pub fn encode(xml: &str) -> Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(TransportError::Deflate)?;
    let compressed = encoder.finish().map_err(TransportError::Deflate)?;
    Ok(urlencoding::encode(&STANDARD.encode(compressed)).into_owned())
}

/// Reverse of [`encode`]. Inflation stops once `max_size` is exceeded, so a
/// small compressed payload cannot expand without bound.
pub fn decode(value: &str, max_size: usize) -> Result<String> {
    let unescaped = urlencoding::decode(value).map_err(TransportError::Utf8)?;
    inflate(&unescaped, max_size)
}

/// Base64 decode and inflate an already unescaped parameter value
fn inflate(value: &str, max_size: usize) -> Result<String> {
    let compressed = STANDARD.decode(value.as_bytes())?;

    let mut xml = Vec::new();
    DeflateDecoder::new(&compressed[..])
        .take(max_size as u64 + 1)
        .read_to_end(&mut xml)
        .map_err(TransportError::Inflate)?;
    if xml.len() > max_size {
        return Err(TransportError::TooLarge { limit: max_size });
    }
    Ok(String::from_utf8(xml)?)
}

/// Query string carrying `xml` under `parameter`, plus an optional relay state.
pub fn query(parameter: &str, xml: &str, relay_state: Option<&str>) -> Result<String> {
    let mut query = format!("{parameter}={}", encode(xml)?);
    if let Some(relay_state) = relay_state {
        query.push_str(&format!("&{RELAY_STATE}={}", urlencoding::encode(relay_state)));
    }
    Ok(query)
}

/// Extract and decode `parameter` from a query string. Returns the message and
/// the relay state, if any.
pub fn parse_query(
    query: &str,
    parameter: &'static str,
    max_size: usize,
) -> Result<(String, Option<String>)> {
    let mut message = None;
    let mut relay_state = None;
    for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        if key == parameter {
            message = Some(value);
        } else if key == RELAY_STATE {
            relay_state = Some(value.into_owned());
        }
    }
    let message = message.ok_or(TransportError::MissingParameter(parameter))?;
    Ok((inflate(&message, max_size)?, relay_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SAML_REQUEST;

    const XML: &str = r#"<saml2p:AuthnRequest ID="_a+b/c=" Destination="https://idp.example/sso?x=1&amp;y=2"/>"#;

    #[test]
    fn test_query_flow() {
        let query = query(SAML_REQUEST, XML, Some("state 1&2")).unwrap();
        assert!(!query.contains('+'));

        let (xml, relay_state) = parse_query(&query, SAML_REQUEST, 4096).unwrap();
        assert_eq!(xml, XML);
        assert_eq!(relay_state.as_deref(), Some("state 1&2"));
    }

    #[test]
    fn test_form_encoded_query() {
        let message = encode(XML).unwrap();
        let query = format!("?foo=bar&Relay%53tate=state+1%262&SAMLRequest={message}");

        let (xml, relay_state) = parse_query(&query, SAML_REQUEST, 4096).unwrap();
        assert_eq!(xml, XML);
        assert_eq!(relay_state.as_deref(), Some("state 1&2"));
    }

    #[test]
    fn test_missing_parameter() {
        assert!(matches!(
            parse_query("RelayState=x", SAML_REQUEST, 4096),
            Err(TransportError::MissingParameter("SAMLRequest"))
        ));
    }

    #[test]
    fn test_inflate_is_bounded() {
        let bomb = "A".repeat(1_000_000);
        let encoded = encode(&bomb).unwrap();
        assert!(encoded.len() < 10_000);
        assert!(matches!(
            decode(&encoded, 131_072),
            Err(TransportError::TooLarge { limit: 131_072 })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let not_deflate = urlencoding::encode(&STANDARD.encode(b"\xff\xff\xff\xff")).into_owned();
        assert!(decode(&not_deflate, 1024).is_err());
    }
}
