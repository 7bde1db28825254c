use serde::{Deserialize, Serialize};

use super::chain::PointerChain;
use crate::error::{Error, Result};

/// Byte pattern locating the anchor inside the executable image, plus the
/// steps that turn the match position into the root address.
///
/// `pattern` is either IDA-style (`"48 8B 05 ?? ?? ?? ??"`) or, when `mask` is
/// present, plain hex bytes paired with an `x`/`?` mask of the same length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorSignature {
    pub pattern: String,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub recipe: PointerChain,
}

impl AnchorSignature {
    pub fn new(pattern: impl Into<String>, recipe: PointerChain) -> Self {
        Self {
            pattern: pattern.into(),
            mask: None,
            recipe,
        }
    }

    pub fn pattern_bytes(&self) -> Result<Vec<Option<u8>>> {
        match &self.mask {
            Some(mask) => {
                let bytes = parse_pattern(&self.pattern)?
                    .into_iter()
                    .map(|b| b.unwrap_or(0))
                    .collect::<Vec<_>>();
                apply_mask(&bytes, mask)
            }
            None => parse_pattern(&self.pattern),
        }
    }
}

pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            Error::InvalidPattern(format!("Invalid signature token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::InvalidPattern("Signature pattern is empty".to_string()));
    }

    Ok(bytes)
}

/// Combine raw bytes with an `x` (must match) / `?` (wildcard) mask
pub fn apply_mask(bytes: &[u8], mask: &str) -> Result<Vec<Option<u8>>> {
    if bytes.len() != mask.len() {
        return Err(Error::InvalidPattern(format!(
            "Mask length {} does not match pattern length {}",
            mask.len(),
            bytes.len()
        )));
    }
    if bytes.is_empty() {
        return Err(Error::InvalidPattern("Signature pattern is empty".to_string()));
    }

    bytes
        .iter()
        .zip(mask.chars())
        .map(|(&byte, m)| match m {
            'x' | 'X' => Ok(Some(byte)),
            '?' => Ok(None),
            other => Err(Error::InvalidPattern(format!("Invalid mask character '{}'", other))),
        })
        .collect()
}

pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
