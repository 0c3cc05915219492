//! Error types for the Sarissa postings codec.
//!
//! All errors are represented by the [`SarissaError`] enum. Decoding errors carry
//! the resource (file name and offset) that first touched the bad byte, so a
//! corrupt segment can be traced back to a concrete file.
//!
//! # Examples
//!
//! ```
//! use sarissa_postings::error::{Result, SarissaError};
//!
//! fn check_bit_width(bits: u8) -> Result<u8> {
//!     if bits > 32 {
//!         return Err(SarissaError::corrupt("_0.doc offset=40", format!("bit width {bits}")));
//!     }
//!     Ok(bits)
//! }
//!
//! assert!(check_bit_width(7).is_ok());
//! assert!(check_bit_width(33).unwrap_err().is_corruption());
//! ```

use std::io;

use thiserror::Error;

/// Every failure of the postings codec and its storage layer.
#[derive(Error, Debug)]
pub enum SarissaError {
    /// I/O errors surfaced unchanged from the storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The index bytes violate the postings format.
    #[error("Corrupt index: {message} (resource={resource})")]
    CorruptIndex {
        /// Description of the problem.
        message: String,
        /// File name and offset where the problem was detected.
        resource: String,
    },

    /// A file was written by a format version this reader does not understand.
    #[error("Unsupported format version {version} (resource={resource}); supported range is {min}..={max}")]
    UnsupportedVersion {
        /// File name of the offending resource.
        resource: String,
        /// Version found in the header.
        version: i32,
        /// Oldest supported version.
        min: i32,
        /// Newest supported version.
        max: i32,
    },

    /// A caller misused an API (e.g. advancing backwards).
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with SarissaError.
pub type Result<T> = std::result::Result<T, SarissaError>;

impl SarissaError {
    /// Create a new corrupt index error.
    pub fn corrupt<R: Into<String>, S: Into<String>>(resource: R, msg: S) -> Self {
        SarissaError::CorruptIndex {
            message: msg.into(),
            resource: resource.into(),
        }
    }

    /// Create a new unsupported version error.
    pub fn unsupported_version<R: Into<String>>(resource: R, version: i32, min: i32, max: i32) -> Self {
        SarissaError::UnsupportedVersion {
            resource: resource.into(),
            version,
            min,
            max,
        }
    }

    /// Create a new contract violation error.
    pub fn contract<S: Into<String>>(msg: S) -> Self {
        SarissaError::ContractViolation(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SarissaError::Storage(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        SarissaError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SarissaError::Other(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        SarissaError::Other(format!("Invalid argument: {}", msg.into()))
    }

    /// Whether this error reports damaged index bytes.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SarissaError::CorruptIndex { .. })
    }
}
