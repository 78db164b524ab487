//! Error types for the PixStu cache.
//!
//! Storage errors keep their `rusqlite` source so the store can tell an
//! integrity failure (which triggers a reset) apart from a transient one.

use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the PixStu cache.
#[derive(Debug, Error)]
pub enum PixstuError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Cache storage corrupted: {message}")]
    Corrupted { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Image error: {message}")]
    Image {
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, PixstuError>;

impl From<std::io::Error> for PixstuError {
    fn from(err: std::io::Error) -> Self {
        PixstuError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PixstuError {
    fn from(err: serde_json::Error) -> Self {
        PixstuError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for PixstuError {
    fn from(err: rusqlite::Error) -> Self {
        PixstuError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<image::ImageError> for PixstuError {
    fn from(err: image::ImageError) -> Self {
        PixstuError::Image {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PixstuError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PixstuError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        PixstuError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check whether this error means the backing file is unusable.
    ///
    /// Busy and locked errors are not corruption: another connection holds
    /// the file and the operation may succeed later. Permission failures
    /// (`SQLITE_READONLY`, `SQLITE_CANTOPEN`) are not corruption either; the
    /// file may be intact and must not be discarded.
    pub fn is_corruption(&self) -> bool {
        match self {
            PixstuError::Corrupted { .. } => true,
            PixstuError::Database {
                source: Some(err), ..
            } => is_integrity_failure(err),
            _ => false,
        }
    }
}

fn is_integrity_failure(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => true,
            // Short reads from a truncated or overwritten file.
            ErrorCode::SystemIoFailure => true,
            // A missing table or column means the schema was damaged or replaced.
            ErrorCode::Unknown => message
                .as_deref()
                .map(|m| m.contains("no such table") || m.contains("no such column"))
                .unwrap_or(false),
            _ => false,
        },
        _ => false,
    }
}
