//! Errors surfaced by the library core.
//!
//! All errors propagate to the caller; the core performs no retries and no
//! interactive recovery. Secret buffers materialized during a failing call
//! are wiped before the error is returned.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Input the algorithm cannot digest: empty names, out-of-range
    /// parameters, unknown type or purpose names.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// An algorithm version outside the supported range.
    #[error("unsupported algorithm version: {0}")]
    UnsupportedVersion(u32),

    /// The master password does not reproduce the key ID recorded in the
    /// loaded configuration. Carries a display string, never key material.
    #[error("master password mismatch: {0}")]
    WrongMasterPassword(String),

    /// A codec could not parse its input. Line 0 means the defect has no
    /// useful line attribution.
    #[error("malformed input at line {line}: {what}")]
    Malformed { line: usize, what: String },

    /// A required field was absent on a structured read.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A cryptographic primitive failed. Fatal.
    #[error("cryptographic failure in {0}")]
    CryptoFailure(&'static str),
}

impl Error {
    pub(crate) fn malformed(line: usize, what: impl Into<String>) -> Error {
        Error::Malformed { line, what: what.into() }
    }
}
