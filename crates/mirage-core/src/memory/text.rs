//! Bounded text decoding for foreign strings

use encoding_rs::{SHIFT_JIS, UTF_16LE, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    IntoStaticStr,
    Display,
)]
#[strum(ascii_case_insensitive)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf8")]
    #[strum(serialize = "utf8")]
    Utf8,
    #[serde(rename = "utf16le")]
    #[strum(serialize = "utf16le")]
    Utf16le,
    #[serde(rename = "shift_jis")]
    #[strum(serialize = "shift_jis")]
    ShiftJis,
    #[serde(rename = "latin1")]
    #[strum(serialize = "latin1")]
    Latin1,
}

impl TextEncoding {
    /// Width of one code unit, which is also the width of the terminator
    pub fn unit_width(self) -> usize {
        match self {
            Self::Utf16le => 2,
            _ => 1,
        }
    }

    fn encoding(self) -> &'static encoding_rs::Encoding {
        match self {
            Self::Utf8 => UTF_8,
            Self::Utf16le => UTF_16LE,
            Self::ShiftJis => SHIFT_JIS,
            Self::Latin1 => WINDOWS_1252,
        }
    }
}

/// Length of `bytes` up to (not including) the first terminator
fn terminated_len(bytes: &[u8], encoding: TextEncoding) -> usize {
    match encoding.unit_width() {
        1 => memchr::memchr(0, bytes).unwrap_or(bytes.len()),
        width => bytes
            .chunks_exact(width)
            .position(|unit| unit.iter().all(|&b| b == 0))
            .map(|units| units * width)
            .unwrap_or(bytes.len() - bytes.len() % width),
    }
}

fn is_filler(c: char) -> bool {
    c.is_control() || c.is_whitespace() || c == char::REPLACEMENT_CHARACTER
}

/// Decode a raw byte run, truncating at the first terminator and stripping
/// leading filler (control characters, whitespace, undecodable bytes).
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    let len = terminated_len(bytes, encoding);
    let (decoded, _) = encoding.encoding().decode_without_bom_handling(&bytes[..len]);
    decoded.trim_start_matches(is_filler).to_string()
}
