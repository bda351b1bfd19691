//! Small helpers shared across the crate

/// Parse an integer written either as hex (`0x8000`) or decimal (`32768`).
///
/// Used as a clap value parser for flash offsets.
pub fn parse_int(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value '{}': {}", s, e))
    } else {
        s.parse::<u32>()
            .map_err(|e| format!("Invalid value '{}': {}", s, e))
    }
}

/// Round up to the next multiple of four.
pub fn align4(val: usize) -> usize {
    (val + 3) & !3
}

/// Read a little-endian u32 at `offset`, or `None` past the end of `data`.
pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a little-endian u16 at `offset`, or `None` past the end of `data`.
pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Decode consecutive little-endian u32 words; a trailing partial word is ignored.
pub fn words_le(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_hex() {
        assert_eq!(parse_int("0x8000").unwrap(), 0x8000);
        assert_eq!(parse_int("0X110000").unwrap(), 0x110000);
    }

    #[test]
    fn test_parse_int_decimal() {
        assert_eq!(parse_int("32768").unwrap(), 32768);
        assert_eq!(parse_int("  0 ").unwrap(), 0);
    }

    #[test]
    fn test_parse_int_invalid() {
        assert!(parse_int("0xZZ").is_err());
        assert!(parse_int("offset").is_err());
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(5), 8);
    }

    #[test]
    fn test_read_helpers_bounds() {
        let data = [0x78, 0x56, 0x34, 0x12, 0xff];
        assert_eq!(read_u32_le(&data, 0), Some(0x12345678));
        assert_eq!(read_u32_le(&data, 2), None);
        assert_eq!(read_u16_le(&data, 3), Some(0xff12));
        assert_eq!(read_u16_le(&data, 4), None);
        assert_eq!(words_le(&data), vec![0x12345678]);
    }
}
