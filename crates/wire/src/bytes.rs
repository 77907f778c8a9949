/// Big-endian encoding of `value` with leading zeros stripped (zero is empty).
pub fn encode_u64(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![];
    }
    let bytes: [u8; 8] = value.to_be_bytes();
    let start: usize = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    bytes[start..].to_vec()
}

/// Inverse of [`encode_u64`]. Returns `None` for more than eight bytes.
pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    let mut result: u64 = 0;
    for &b in bytes {
        result = (result << 8) | (b as u64);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_roundtrip() {
        for v in [0u64, 1, 255, 65536, 1_000_000_000, u64::MAX] {
            assert_eq!(decode_u64(&encode_u64(v)), Some(v));
        }
    }

    #[test]
    fn test_minimal_encoding() {
        assert!(encode_u64(0).is_empty());
        assert_eq!(encode_u64(1), vec![1]);
        assert_eq!(encode_u64(256), vec![1, 0]);
    }

    #[test]
    fn test_oversized_rejected() {
        assert_eq!(decode_u64(&[1; 9]), None);
    }
}
