//! Error taxonomy for gridstore
//!
//! Every public operation surfaces one [`Error`]. The variants fall into two
//! groups:
//!
//! | Group | Variants | Retried by the write controller |
//! |-------|----------|---------------------------------|
//! | Contract violations | `Planning`, `StructuralMismatch`, `OutOfExtent`, `NotFound`, `ArchiveExists`, `InvalidConfig` | Never |
//! | Transient failures | `Io`, `Storage`, `Corruption`, `Serialization` | Up to the configured bound |
//!
//! Once the retry budget is spent the controller reports
//! `MissingDataRegression` or `TransientWrite`, both carrying the number of
//! attempts made.

use thiserror::Error;

/// All gridstore errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Advisor or validator given degenerate input (zero-length dimension,
    /// zero chunk length, non-positive byte budget).
    #[error("planning error: {0}")]
    Planning(String),

    /// Fragment shape, dimensions or dtype disagree with the archive.
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),

    /// Fragment coordinates fall outside the archive's declared extent.
    #[error("out of extent: {0}")]
    OutOfExtent(String),

    /// Verification kept finding missing-data regressions until the retry
    /// budget ran out.
    #[error("missing data regression after {attempts} attempt(s): {detail}")]
    MissingDataRegression {
        /// Total write attempts made
        attempts: u32,
        /// Variables whose missingness mask differed on the last attempt
        detail: String,
    },

    /// The storage layer kept failing until the retry budget ran out.
    #[error("write failed after {attempts} attempt(s): {source}")]
    TransientWrite {
        /// Total write attempts made
        attempts: u32,
        /// Cause reported by the last attempt
        #[source]
        source: Box<Error>,
    },

    /// Archive, array or dataset not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Archive already exists and overwriting was not requested
    #[error("archive already exists: {0}")]
    ArchiveExists(String),

    /// Configuration rejected during validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata or document (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage engine error
    #[error("storage error: {0}")]
    Storage(String),

    /// Chunk or metadata failed an integrity check
    #[error("corruption: {0}")]
    Corruption(String),
}

/// Result type for gridstore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error may succeed on a fresh attempt.
    ///
    /// Only storage-level failures are retryable. Contract violations are
    /// raised immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Storage(_) | Error::Corruption(_) | Error::Serialization(_)
        )
    }

    /// Check if this error reports a caller contract violation.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::Planning(_)
                | Error::StructuralMismatch(_)
                | Error::OutOfExtent(_)
                | Error::NotFound(_)
                | Error::ArchiveExists(_)
                | Error::InvalidConfig(_)
        )
    }

    /// Number of write attempts recorded on a retry-exhaustion error.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::MissingDataRegression { attempts, .. } | Error::TransientWrite { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::StructuralMismatch(e.to_string())
    }
}
