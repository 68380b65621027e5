//! Common error types for CertTrack

use thiserror::Error;

/// Common result type for CertTrack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by CertTrack crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = Error::Config("write_timeout_ms must be greater than zero".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: write_timeout_ms must be greater than zero"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "certtrack.toml");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("certtrack.toml"));
    }
}
