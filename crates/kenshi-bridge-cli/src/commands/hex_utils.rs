//! Hex address parsing.

use anyhow::Result;

/// Parse a hex address with or without a `0x` prefix
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(s, 16).map_err(|e| anyhow::anyhow!("Invalid hex address {:?}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_address() {
        assert_eq!(parse_hex_address("0x140000000").unwrap(), 0x1_4000_0000);
        assert_eq!(parse_hex_address("0X1000").unwrap(), 0x1000);
        assert_eq!(parse_hex_address(" DEADBEEF ").unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_parse_hex_address_invalid() {
        assert!(parse_hex_address("0xZZZ").is_err());
        assert!(parse_hex_address("").is_err());
    }
}
