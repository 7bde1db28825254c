//! Wildcard byte-pattern scanning over the executable image

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AttachConfig;
use crate::error::{Error, Result};
use crate::memory::{Address, ReadMemory};

/// How close the scan came to the pattern, kept even when the scan fails so
/// operators can tell a shifted binary from a missing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchQuality {
    /// Longest matched pattern prefix
    pub matched: usize,
    pub total: usize,
    /// Image offset where `matched` was reached
    pub offset: Option<usize>,
}

impl MatchQuality {
    pub fn is_full(&self) -> bool {
        self.total > 0 && self.matched == self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    /// Offset of the first full match
    pub position: Option<usize>,
    pub quality: MatchQuality,
}

/// Length of the pattern prefix matching `buffer` at `at`
fn prefix_len(buffer: &[u8], at: usize, pattern: &[Option<u8>]) -> usize {
    pattern
        .iter()
        .zip(&buffer[at..])
        .take_while(|(expected, actual)| expected.is_none_or(|b| b == **actual))
        .count()
}

/// Find the first full match of `pattern` in `buffer`, tracking the best partial match.
pub fn find_pattern(buffer: &[u8], pattern: &[Option<u8>]) -> ScanResult {
    let mut quality = MatchQuality {
        total: pattern.len(),
        ..Default::default()
    };
    if pattern.is_empty() || buffer.len() < pattern.len() {
        return ScanResult {
            position: None,
            quality,
        };
    }

    let last = buffer.len() - pattern.len();
    let mut check = |at: usize| -> bool {
        let matched = prefix_len(buffer, at, pattern);
        if matched > quality.matched {
            quality.matched = matched;
            quality.offset = Some(at);
        }
        matched == pattern.len()
    };

    // A concrete first byte lets memchr skip positions that cannot match at all
    let position = match pattern[0] {
        Some(first) => memchr::memchr_iter(first, &buffer[..=last]).find(|&at| check(at)),
        None => (0..=last).find(|&at| check(at)),
    };

    ScanResult { position, quality }
}

/// Executable image bytes read once per attach
pub struct SignatureScanner {
    base: Address,
    image: Vec<u8>,
}

impl SignatureScanner {
    pub fn from_image(base: Address, image: Vec<u8>) -> Self {
        Self { base, image }
    }

    /// Read the image in chunks. An unreadable first chunk is an error; a
    /// later failure truncates the image at that point.
    pub fn load<R: ReadMemory + ?Sized>(reader: &R, config: &AttachConfig) -> Result<Self> {
        let base = reader.base_address();
        let size = reader.image_size().min(config.max_image_size);
        if size == 0 {
            return Err(Error::OffsetSearchFailed("Executable image size is zero".to_string()));
        }

        let chunk_size = config.scan_chunk_size.max(1);
        let mut image = Vec::with_capacity(size);
        while image.len() < size {
            let read_size = (size - image.len()).min(chunk_size);
            let addr = base.add(image.len() as u64);
            match reader.read_bytes(addr, read_size) {
                Ok(chunk) => image.extend_from_slice(&chunk),
                Err(e) if image.is_empty() => {
                    return Err(Error::OffsetSearchFailed(format!(
                        "Failed to read executable image: {}",
                        e
                    )));
                }
                Err(e) => {
                    debug!(
                        "Image read stopped at offset {:#x} of {:#x}: {}",
                        image.len(),
                        size,
                        e
                    );
                    break;
                }
            }
        }

        debug!("Loaded {:#x} image bytes from {}", image.len(), base);
        Ok(Self { base, image })
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn scan(&self, pattern: &[Option<u8>]) -> ScanResult {
        let result = find_pattern(&self.image, pattern);
        match result.position {
            Some(pos) => debug!("Pattern matched at image offset {:#x}", pos),
            None => debug!(
                "Pattern not found; best partial {}/{} at {:?}",
                result.quality.matched, result.quality.total, result.quality.offset
            ),
        }
        result
    }

    /// Address of the first full match
    pub fn find(&self, pattern: &[Option<u8>]) -> Result<(Address, MatchQuality)> {
        let result = self.scan(pattern);
        match result.position {
            Some(pos) => Ok((self.base.add(pos as u64), result.quality)),
            None => Err(Error::PatternNotFound {
                matched: result.quality.matched,
                total: result.quality.total,
            }),
        }
    }
}
