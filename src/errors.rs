//! Error types shared across the crate.

use thiserror::Error;

/// Errors produced by the library.
///
/// Classification inconsistencies in strict mode are *not* represented here;
/// they are encoded in [`crate::classify::ClassifierResult`] with
/// `success = false` and a populated `error` field.
#[derive(Debug, Error)]
pub enum GambitError {
    /// Invalid user-supplied parameters or query data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Reference database files missing, ambiguous, or not matching each other.
    #[error("incompatible database: {0}")]
    IncompatibleDatabase(String),

    /// Malformed signature file or other on-disk data.
    #[error("format error: {0}")]
    Format(String),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A long-running operation was cancelled via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Error from the HDF5 signature container layer.
    #[error("signature storage error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Error from the SQLite taxonomy database layer.
    #[error("taxonomy database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error parsing a sequence file.
    #[error("sequence parse error: {0}")]
    SequenceParse(#[from] needletail::errors::ParseError),

    /// JSON serialization/deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl GambitError {
    /// Whether this error is caused by bad user input (CLI exit code 1)
    /// rather than an internal or environmental failure (exit code 2).
    pub fn is_user_error(&self) -> bool {
        matches!(self, GambitError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, GambitError>;
