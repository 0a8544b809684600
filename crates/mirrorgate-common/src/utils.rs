//! Small string helpers for hex-quantity handling.

/// True when `value` is `0x` followed by one or more hex digits.
pub fn is_hex_quantity(value: &str) -> bool {
    match value.strip_prefix("0x") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// True when `value` is a hex quantity whose digit count does not exceed `max_digits`.
pub fn is_bounded_hex(value: &str, max_digits: usize) -> bool {
    match value.strip_prefix("0x") {
        Some(digits) => {
            !digits.is_empty()
                && digits.len() <= max_digits
                && digits.bytes().all(|b| b.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// True when `value` is a hex string encoding exactly `bytes` bytes.
pub fn is_hex_bytes(value: &str, bytes: usize) -> bool {
    match value.strip_prefix("0x") {
        Some(digits) => {
            digits.len() == bytes * 2 && digits.bytes().all(|b| b.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Decode a `0x`-prefixed hex string into bytes. Odd-length payloads are rejected.
pub fn decode_hex(value: &str) -> Option<Vec<u8>> {
    let digits = value.strip_prefix("0x")?;
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

/// Format a u64 as a minimal `0x` quantity.
pub fn to_hex_quantity(value: u64) -> String {
    format!("{value:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_quantity() {
        assert!(is_hex_quantity("0x0"));
        assert!(is_hex_quantity("0xdeadBEEF"));
        assert!(!is_hex_quantity("0x"));
        assert!(!is_hex_quantity("deadbeef"));
        assert!(!is_hex_quantity("0xzz"));
    }

    #[test]
    fn test_bounded_and_sized_hex() {
        assert!(is_bounded_hex("0xffff", 4));
        assert!(!is_bounded_hex("0xfffff", 4));
        assert!(is_hex_bytes(&format!("0x{}", "ab".repeat(20)), 20));
        assert!(!is_hex_bytes(&format!("0x{}", "ab".repeat(19)), 20));
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("0x0102ff"), Some(vec![1, 2, 255]));
        assert_eq!(decode_hex("0x102"), None);
        assert_eq!(decode_hex("102"), None);
    }

    #[test]
    fn test_to_hex_quantity() {
        assert_eq!(to_hex_quantity(0), "0x0");
        assert_eq!(to_hex_quantity(298), "0x12a");
    }
}
