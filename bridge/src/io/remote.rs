//! Remote service abstraction.
//!
//! The [`RemoteService`] trait captures only the operations the bridge needs
//! from the workspace API, so orchestration can run against the HTTP client
//! ([`WorkspaceClient`](crate::io::workspace_client::WorkspaceClient)) or a
//! scripted fake in tests. Every call returns a tagged `Result` rather than
//! panicking or retrying; retry policy lives in the callers.

use std::sync::Arc;
use std::time::Duration;

use crate::core::types::CommandResponse;
use crate::error::RemoteError;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Lifecycle state of a cluster as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    Pending,
    Running,
    Restarting,
    Resizing,
    Terminating,
    Terminated,
    Error,
    Unknown(String),
}

impl ClusterState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "RESTARTING" => Self::Restarting,
            "RESIZING" => Self::Resizing,
            "TERMINATING" => Self::Terminating,
            "TERMINATED" => Self::Terminated,
            "ERROR" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Operations consumed from the remote workspace.
pub trait RemoteService {
    /// Create a Python execution context; blocks until it is usable or `timeout` passes.
    fn create_execution_context(&self, cluster_id: &str, timeout: Duration)
    -> RemoteResult<String>;

    /// Run `code` in the context; blocks until the command finishes or `timeout` passes.
    fn execute_command(
        &self,
        cluster_id: &str,
        context_id: &str,
        code: &str,
        timeout: Duration,
    ) -> RemoteResult<CommandResponse>;

    fn destroy_execution_context(&self, cluster_id: &str, context_id: &str) -> RemoteResult<()>;

    fn cluster_state(&self, cluster_id: &str) -> RemoteResult<ClusterState>;

    fn start_cluster(&self, cluster_id: &str) -> RemoteResult<()>;

    /// Block until the cluster is running. The wait is bounded by the implementation.
    fn wait_until_running(&self, cluster_id: &str) -> RemoteResult<()>;

    /// Download a file-store object.
    fn download(&self, path: &str) -> RemoteResult<Vec<u8>>;

    /// Write `contents` to `path` in the staging area.
    fn upload_to_staging(&self, path: &str, contents: &[u8], overwrite: bool)
    -> RemoteResult<()>;

    /// Recursively delete a staging-area directory.
    fn delete_staging(&self, path: &str) -> RemoteResult<()>;

    /// Recursively delete a workspace directory.
    fn delete_workspace(&self, path: &str) -> RemoteResult<()>;

    /// User name of the authenticated identity.
    fn current_user(&self) -> RemoteResult<String>;
}

macro_rules! forward_remote_service {
    ($($target:tt)*) => {
        impl<T: RemoteService + ?Sized> RemoteService for $($target)* {
            fn create_execution_context(
                &self,
                cluster_id: &str,
                timeout: Duration,
            ) -> RemoteResult<String> {
                (**self).create_execution_context(cluster_id, timeout)
            }

            fn execute_command(
                &self,
                cluster_id: &str,
                context_id: &str,
                code: &str,
                timeout: Duration,
            ) -> RemoteResult<CommandResponse> {
                (**self).execute_command(cluster_id, context_id, code, timeout)
            }

            fn destroy_execution_context(
                &self,
                cluster_id: &str,
                context_id: &str,
            ) -> RemoteResult<()> {
                (**self).destroy_execution_context(cluster_id, context_id)
            }

            fn cluster_state(&self, cluster_id: &str) -> RemoteResult<ClusterState> {
                (**self).cluster_state(cluster_id)
            }

            fn start_cluster(&self, cluster_id: &str) -> RemoteResult<()> {
                (**self).start_cluster(cluster_id)
            }

            fn wait_until_running(&self, cluster_id: &str) -> RemoteResult<()> {
                (**self).wait_until_running(cluster_id)
            }

            fn download(&self, path: &str) -> RemoteResult<Vec<u8>> {
                (**self).download(path)
            }

            fn upload_to_staging(
                &self,
                path: &str,
                contents: &[u8],
                overwrite: bool,
            ) -> RemoteResult<()> {
                (**self).upload_to_staging(path, contents, overwrite)
            }

            fn delete_staging(&self, path: &str) -> RemoteResult<()> {
                (**self).delete_staging(path)
            }

            fn delete_workspace(&self, path: &str) -> RemoteResult<()> {
                (**self).delete_workspace(path)
            }

            fn current_user(&self) -> RemoteResult<String> {
                (**self).current_user()
            }
        }
    };
}

forward_remote_service!(&T);
forward_remote_service!(Arc<T>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_state_parses_known_and_unknown_values() {
        assert_eq!(ClusterState::parse("RUNNING"), ClusterState::Running);
        assert_eq!(ClusterState::parse("TERMINATED"), ClusterState::Terminated);
        assert_eq!(
            ClusterState::parse("UPSIZE_COMPLETED"),
            ClusterState::Unknown("UPSIZE_COMPLETED".to_string())
        );
    }
}
