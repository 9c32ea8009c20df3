use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("repository root not found: {path}")]
    RootNotFound { path: String },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("unknown encoding label: {label}")]
    UnknownEncoding { label: String },

    #[error("segment write failed for {}: {source}", path.display())]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("resume ledger write failed for {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl HarvestError {
    /// Errors that must stop the whole run rather than just one repository.
    ///
    /// Losing a record silently is worse than stopping, so any failure to
    /// persist output or resume state aborts.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarvestError::Output { .. } | HarvestError::Ledger { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_failures_are_fatal() {
        let err = HarvestError::Output {
            path: PathBuf::from("out/github.0.jsonl"),
            source: std::io::Error::other("disk full"),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("github.0.jsonl"));
    }

    #[test]
    fn repository_errors_are_not_fatal() {
        let err = HarvestError::RootNotFound {
            path: "/tmp/missing".into(),
        };
        assert!(!err.is_fatal());
        assert!(!HarvestError::Cancelled.is_fatal());
    }
}
