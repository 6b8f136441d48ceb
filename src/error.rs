//! Error types for Matroska/WebM demuxing.
//!
//! The window signal [`MkvError::NeedBytes`] is not a failure: it tells the
//! caller how many additional bytes must become available before the same
//! operation can be retried. Every parser leaves its cursor unmoved when
//! returning it.

use thiserror::Error;

/// Demuxer error type.
#[derive(Error, Debug)]
pub enum MkvError {
    /// Invalid EBML header.
    #[error("invalid EBML header: {0}")]
    InvalidEbmlHeader(String),

    /// Invalid element ID.
    #[error("invalid element ID at offset {offset}")]
    InvalidElementId {
        /// Byte offset where the invalid ID was found.
        offset: u64,
    },

    /// Invalid element size.
    #[error("invalid element size at offset {offset}: {message}")]
    InvalidElementSize {
        /// Byte offset where the invalid size was found.
        offset: u64,
        /// Description of the size error.
        message: String,
    },

    /// Invalid variable-length integer.
    #[error("invalid VINT encoding at offset {offset}")]
    InvalidVint {
        /// Byte offset where the invalid VINT was found.
        offset: u64,
    },

    /// Invalid block structure.
    #[error("invalid block structure: {0}")]
    InvalidBlock(String),

    /// Invalid lacing structure.
    #[error("invalid lacing: {0}")]
    InvalidLacing(String),

    /// Invalid segment-level structure.
    #[error("invalid segment structure: {0}")]
    InvalidStructure(String),

    /// The available window is too short; retry once the count of additional
    /// bytes has been made available.
    #[error("need {0} more bytes")]
    NeedBytes(u64),

    /// The reader capability failed permanently.
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl MkvError {
    /// True when this is the non-fatal "window too short" signal.
    pub fn is_need_more(&self) -> bool {
        matches!(self, MkvError::NeedBytes(_))
    }

    /// The byte count of a [`MkvError::NeedBytes`] signal, if that is what
    /// this error is.
    pub fn need_bytes(&self) -> Option<u64> {
        match self {
            MkvError::NeedBytes(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<String> for MkvError {
    fn from(s: String) -> Self {
        MkvError::InvalidStructure(s)
    }
}

impl From<&str> for MkvError {
    fn from(s: &str) -> Self {
        MkvError::InvalidStructure(s.to_string())
    }
}

/// Result type for demuxer operations.
pub type Result<T> = std::result::Result<T, MkvError>;
