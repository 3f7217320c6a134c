//! Error types for the backup pipeline.
//!
//! Steps return structured results; the orchestrator is the only component
//! that halts a run. `is_retryable` drives the fatal/retryable split.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// A run was requested while another is active. Never retried.
    #[error("a backup is already in progress (started at {0})")]
    Conflict(i64),

    /// Missing database privilege or similar. Fatal, surfaced verbatim.
    #[error("{0}")]
    Permission(String),

    /// Invalid remote credentials. Not retried automatically.
    #[error("{0}")]
    Validation(String),

    /// Dump-engine failure, captured at the step boundary.
    #[error("database dump failed: {0}")]
    Dump(String),

    /// Network or filesystem hiccup. Retried up to the attempt ceiling.
    #[error("{0}")]
    Transient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("settings store error: {0}")]
    Settings(#[from] rusqlite::Error),

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BackupError {
    /// Whether the orchestrator may re-queue the failing step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackupError::Transient(_) | BackupError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_io_are_retryable() {
        assert!(BackupError::Transient("connection reset".into()).is_retryable());
        assert!(BackupError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out"
        ))
        .is_retryable());
    }

    #[test]
    fn conflict_permission_validation_dump_are_fatal() {
        assert!(!BackupError::Conflict(0).is_retryable());
        assert!(!BackupError::Permission("no SHOW VIEW".into()).is_retryable());
        assert!(!BackupError::Validation("bad host".into()).is_retryable());
        assert!(!BackupError::Dump("engine exploded".into()).is_retryable());
    }
}
