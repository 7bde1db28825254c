//! Hex address parsing.

use anyhow::Result;

/// Parse a hex address string (with or without 0x prefix).
///
/// ```text
/// parse_hex_address("0x1000") == 0x1000
/// parse_hex_address("1000")   == 0x1000
/// ```
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
        .replace('_', "");
    u64::from_str_radix(&digits, 16).map_err(|e| anyhow::anyhow!("Invalid hex address {:?}: {}", s, e))
}
