//! Crate-level error type.
//!
//! Every fallible operation in the store, query service, loader and HTTP
//! surface returns [`DashboardError`]. Validation and conflict errors map to
//! 4xx responses; the rest are server-side failures.

use std::path::PathBuf;

use thiserror::Error;

/// Extended SQLite result code for a violated `UNIQUE` constraint.
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug, Error)]
pub enum DashboardError {
    /// A query parameter or setting is malformed or out of bounds.
    #[error("invalid value for `{param}`: {reason}")]
    Validation { param: String, reason: String },

    /// An insert collided with an existing `external_id`.
    #[error("participant with external_id `{0}` already exists")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The store mutex was poisoned or the blocking task died.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read participant document {}: {source}", .path.display())]
    Document {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed participant document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The config file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DashboardError {
    pub fn validation(param: impl Into<String>, reason: impl Into<String>) -> Self {
        DashboardError::Validation {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            DashboardError::Validation { .. } => 400,
            DashboardError::Conflict(_) => 409,
            DashboardError::Store(_)
            | DashboardError::Unavailable(_)
            | DashboardError::Document { .. }
            | DashboardError::Malformed(_)
            | DashboardError::Config(_) => 500,
        }
    }

    /// Whether the failure is the caller's fault (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Rewrite a SQLite unique-constraint failure into [`DashboardError::Conflict`].
    ///
    /// Any other error passes through as [`DashboardError::Store`].
    pub fn from_insert(err: rusqlite::Error, external_id: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.extended_code == SQLITE_CONSTRAINT_UNIQUE => {
                DashboardError::Conflict(external_id.to_string())
            }
            _ => DashboardError::Store(err),
        }
    }
}
