//! Typed failures at the seams between orchestration and side effects.
//!
//! Library seams return these enums so callers can branch on the failure
//! kind. Configuration loading and the CLI use `anyhow` instead.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`RemoteService`](crate::io::remote::RemoteService) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The service answered with an error payload. `message` is the service's
    /// own text so the failure classifier can inspect it.
    #[error("{message}")]
    Api { status: Option<u16>, message: String },
    /// A bounded call did not finish in time.
    #[error("{operation} timed out after {}s", timeout.as_secs())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
        }
    }
}

/// Failure while establishing an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Cluster ID is not configured")]
    MissingClusterId,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Failure while pushing the project to the remote staging area.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync source {} does not exist", .0.display())]
    SourceMissing(PathBuf),
    #[error("invalid exclude pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("project size {size_mb:.2} MB exceeds max_size_mb ({limit_mb} MB)")]
    TooLarge { size_mb: f64, limit_mb: f64 },
    #[error("upload to {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: RemoteError,
    },
    #[error("could not resolve current user: {0}")]
    Identity(#[source] RemoteError),
}

/// Reasons a persisted fingerprint cache is discarded. Never fatal.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache version {found} does not match expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_displays_service_message_verbatim() {
        let err = RemoteError::api("Context ab12 not found");
        assert_eq!(err.to_string(), "Context ab12 not found");
    }

    #[test]
    fn timeout_names_operation() {
        let err = RemoteError::Timeout {
            operation: "create execution context",
            timeout: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "create execution context timed out after 300s"
        );
    }
}
