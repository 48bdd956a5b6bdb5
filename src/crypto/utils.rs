use crate::crypto::errors::{CryptoResult, Error};
use rand::{TryRngCore, rngs::OsRng};

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes(length: usize) -> CryptoResult<Vec<u8>> {
    let mut buf = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::Invalid(format!("OS random source failed: {e}")))?;
    Ok(buf)
}

/// Compare two byte strings in constant time
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}

/// Decode a hex string, tolerating a `0x` prefix and surrounding whitespace
pub fn hex_to_bytes(hex_str: &str) -> CryptoResult<Vec<u8>> {
    let trimmed = hex_str.trim();
    let cleaned = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    Ok(hex::decode(cleaned)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_length() {
        let a = generate_random_bytes(32).unwrap();
        let b = generate_random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("0x1234").unwrap(), vec![0x12, 0x34]);
        assert_eq!(hex_to_bytes(" 0X1234 ").unwrap(), vec![0x12, 0x34]);
        assert_eq!(hex_to_bytes("1234").unwrap(), vec![0x12, 0x34]);
    }
}
