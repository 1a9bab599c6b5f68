//! Error types for the converter.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for SVF/glTF operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid magic bytes at the start of a binary asset
    #[error("Invalid {format} data: bad magic bytes")]
    InvalidMagic { format: &'static str },

    /// Unsupported container or entry version
    #[error("Unsupported {what} version: {version}")]
    UnsupportedVersion { what: &'static str, version: i32 },

    /// Asset is truncated or an offset points past its end
    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    /// Invalid data structure in a binary asset
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    /// Encoding recognized but not supported (e.g. a compressed OpenCTM
    /// method or a non-Phong material definition). Recoverable per item.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// A referenced geometry, material or image could not be resolved.
    /// Recoverable: the referencing node is dropped.
    #[error("Missing asset: {0}")]
    MissingAsset(String),

    /// Pack-file entry index out of bounds
    #[error("Entry index {index} out of bounds (count: {count})")]
    EntryOutOfBounds { index: usize, count: usize },

    /// Write issued after the writer was closed
    #[error("Writer is closed and cannot accept further scenes")]
    WriterClosed,

    /// A shared-asset batch was requested while a previous batch is
    /// still collecting responses
    #[error("Batch request issued while a previous batch is pending")]
    BatchPending,

    /// Conversion cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse or serialize error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// UTF-8 conversion error
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create an unsupported encoding error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedEncoding(msg.into())
    }

    /// True for errors that skip a single item without aborting the
    /// surrounding conversion.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnsupportedEncoding(_) | Self::MissingAsset(_))
    }
}

/// Result type alias for converter operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidMagic { format: "OpenCTM" };
        assert!(e.to_string().contains("magic"));

        let e = Error::EntryOutOfBounds { index: 5, count: 3 };
        assert!(e.to_string().contains("5"));
        assert!(e.to_string().contains("3"));
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::unsupported("MG2").is_recoverable());
        assert!(Error::MissingAsset("mesh".into()).is_recoverable());
        assert!(!Error::WriterClosed.is_recoverable());
        assert!(!Error::UnexpectedEof(12).is_recoverable());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
