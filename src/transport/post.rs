//! HTTP-POST binding: the message travels base64 encoded in a form field.

use super::{Result, TransportError};
use base64::{Engine, engine::general_purpose::STANDARD};

pub fn encode(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}

/// Decode a form field value. Line breaks inserted by senders are tolerated;
/// anything decoding to more than `max_size` bytes is rejected before the
/// full buffer is allocated.
pub fn decode(value: &str, max_size: usize) -> Result<String> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.len() / 4 * 3 > max_size + 2 {
        return Err(TransportError::TooLarge { limit: max_size });
    }
    let bytes = STANDARD.decode(compact)?;
    if bytes.len() > max_size {
        return Err(TransportError::TooLarge { limit: max_size });
    }
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tolerates_line_breaks() {
        let encoded = encode("<saml2p:Response/>");
        let wrapped = format!("{}\r\n{}", &encoded[..8], &encoded[8..]);
        assert_eq!(decode(&wrapped, 1024).unwrap(), "<saml2p:Response/>");
    }

    #[test]
    fn test_decode_limits() {
        let encoded = encode(&"a".repeat(100));
        assert!(decode(&encoded, 100).is_ok());
        assert!(matches!(
            decode(&encoded, 99),
            Err(TransportError::TooLarge { limit: 99 })
        ));
        assert!(matches!(
            decode("not*base64", 100),
            Err(TransportError::Base64(_))
        ));
    }
}
