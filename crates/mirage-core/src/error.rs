use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Address {0:#x} is outside the plausible window")]
    ImplausibleAddress(u64),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Pattern not found (best partial match {matched}/{total} bytes)")]
    PatternNotFound { matched: usize, total: usize },

    #[error("Failed to search offset: {0}")]
    OffsetSearchFailed(String),

    #[error("Failed to resolve anchor: {0}")]
    AnchorResolveFailed(String),

    #[error("Record '{record}' has no field '{field}'")]
    MissingField { record: String, field: String },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Not attached to a process")]
    NotAttached,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Check if this error came from a foreign read rather than local I/O or parsing.
    ///
    /// Read failures are expected during normal operation and callers treat
    /// them as "value absent".
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            Error::MemoryReadFailed { .. } | Error::ImplausibleAddress(_)
        )
    }

    pub(crate) fn read_failed(address: u64, message: impl Into<String>) -> Self {
        Error::MemoryReadFailed {
            address,
            message: message.into(),
        }
    }
}
