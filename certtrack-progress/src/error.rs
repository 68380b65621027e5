//! Error types for certtrack-progress
//!
//! | Class | Surfaced to caller | Retryable |
//! |---|---|---|
//! | `NotFound` | yes | no |
//! | `BusinessRule` | yes, with the unmet modules | no, needs new input |
//! | `Transient` | yes | yes, with backoff by the caller |
//!
//! Duplicate completions are not errors either: the store reports them as
//! [`AppendOutcome::Duplicate`](crate::store::AppendOutcome) and the writer
//! answers with the unchanged state. Reconciliation discrepancies are data.

use thiserror::Error;

/// Main error type for certtrack-progress
#[derive(Error, Debug)]
pub enum Error {
    /// Progress, module, lesson or enrollment reference does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Certification completion requested before all assessments are done
    #[error("Business rule violation: {message} (unmet modules: {})", .unmet_modules.join(", "))]
    BusinessRule {
        message: String,
        unmet_modules: Vec<String>,
    },

    /// Storage timeout or unavailability
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Operation not allowed in the record's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Record already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors from shared infrastructure (config, schema, parsing)
    #[error(transparent)]
    Common(#[from] certtrack_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Database(e) => is_busy(e),
            Error::Common(certtrack_common::Error::Database(e)) => is_busy(e),
            _ => false,
        }
    }

    /// Modules blocking certification completion, if this is a gate failure
    pub fn unmet_modules(&self) -> Option<&[String]> {
        match self {
            Error::BusinessRule { unmet_modules, .. } => Some(unmet_modules),
            _ => None,
        }
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED and pool exhaustion are transient
fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// True when a database error is a UNIQUE/PRIMARY KEY violation
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Convenience Result type using certtrack-progress Error
pub type Result<T> = std::result::Result<T, Error>;
