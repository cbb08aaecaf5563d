//! Execution context lifecycle and the reconnect-once protocol.
//!
//! One [`ExecutionContextManager`] owns at most one remote context. A command
//! that fails because the context is gone triggers exactly one reconnect and
//! retry; every other failure is returned as an error result immediately.

use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{FailureKind, classify_failure};
use crate::core::decoder::decode_response;
use crate::core::types::ExecutionResult;
use crate::error::{ContextError, RemoteError};
use crate::io::config::ExecutionConfig;
use crate::io::remote::{ClusterState, RemoteService};

/// Lifecycle of the session's execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextState {
    Absent,
    Creating,
    Active(String),
    Destroyed,
}

pub struct ExecutionContextManager<R> {
    remote: R,
    cluster_id: Option<String>,
    settings: ExecutionConfig,
    state: ContextState,
}

impl<R: RemoteService> ExecutionContextManager<R> {
    pub fn new(remote: R, cluster_id: Option<String>, settings: ExecutionConfig) -> Self {
        Self {
            remote,
            cluster_id: cluster_id.filter(|id| !id.is_empty()),
            settings,
            state: ContextState::Absent,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn state(&self) -> &ContextState {
        &self.state
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    pub fn context_id(&self) -> Option<&str> {
        match &self.state {
            ContextState::Active(id) => Some(id),
            _ => None,
        }
    }

    /// Create the execution context unless one is already active.
    #[instrument(skip(self))]
    pub fn create_context(&mut self) -> Result<(), ContextError> {
        if self.context_id().is_some() {
            return Ok(());
        }
        let cluster_id = self
            .cluster_id
            .clone()
            .ok_or(ContextError::MissingClusterId)?;

        self.state = ContextState::Creating;
        match self.open_context(&cluster_id) {
            Ok(context_id) => {
                info!(cluster_id = %cluster_id, context_id = %context_id, "execution context created");
                self.state = ContextState::Active(context_id);
                Ok(())
            }
            Err(err) => {
                warn!(cluster_id = %cluster_id, err = %err, "execution context creation failed");
                self.state = ContextState::Absent;
                Err(err.into())
            }
        }
    }

    fn open_context(&self, cluster_id: &str) -> Result<String, RemoteError> {
        if self.settings.ensure_cluster_running {
            self.ensure_cluster_running(cluster_id)?;
        }
        self.remote
            .create_execution_context(cluster_id, self.settings.context_timeout())
    }

    fn ensure_cluster_running(&self, cluster_id: &str) -> Result<(), RemoteError> {
        match self.remote.cluster_state(cluster_id)? {
            ClusterState::Running => Ok(()),
            ClusterState::Terminated | ClusterState::Terminating => {
                info!(cluster_id, "starting terminated cluster");
                self.remote.start_cluster(cluster_id)?;
                self.remote.wait_until_running(cluster_id)
            }
            ClusterState::Pending | ClusterState::Restarting | ClusterState::Resizing => {
                debug!(cluster_id, "waiting for cluster");
                self.remote.wait_until_running(cluster_id)
            }
            state @ (ClusterState::Error | ClusterState::Unknown(_)) => {
                warn!(cluster_id, state = ?state, "unexpected cluster state, trying anyway");
                Ok(())
            }
        }
    }

    /// Run `code`, creating the context first if needed.
    ///
    /// With `allow_reconnect`, a context-invalid failure causes one
    /// reconnect and retry; the retried result is marked `reconnected`.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub fn execute(&mut self, code: &str, allow_reconnect: bool) -> ExecutionResult {
        if self.context_id().is_none()
            && let Err(err) = self.create_context()
        {
            return ExecutionResult::failure(format!("Failed to create execution context: {err}"));
        }

        let err = match self.submit(code) {
            Ok(result) => return result,
            Err(err) => err,
        };
        let message = err.to_string();
        if !allow_reconnect || classify_failure(&message) != FailureKind::ContextInvalid {
            debug!(err = %message, "command failed");
            return ExecutionResult::failure(message);
        }

        info!(err = %message, "execution context lost, reconnecting");
        thread::sleep(self.settings.reconnect_delay());
        if let Err(err) = self.reconnect() {
            return ExecutionResult::failure(format!("Reconnection failed: {err}"));
        }
        match self.submit(code) {
            Ok(result) => result.mark_reconnected(),
            Err(err) => ExecutionResult::failure(format!("Reconnection failed: {err}")),
        }
    }

    fn submit(&self, code: &str) -> Result<ExecutionResult, RemoteError> {
        let (Some(cluster_id), Some(context_id)) = (self.cluster_id(), self.context_id()) else {
            return Ok(ExecutionResult::failure("Failed to create execution context"));
        };
        let response = self.remote.execute_command(
            cluster_id,
            context_id,
            code,
            self.settings.command_timeout(),
        )?;
        Ok(decode_response(response, |path| self.remote.download(path)))
    }

    /// Drop the current context (best effort) and create a new one.
    pub fn reconnect(&mut self) -> Result<(), ContextError> {
        self.destroy_context();
        self.create_context()
    }

    /// Destroy the context if one exists. Remote failures are logged and the
    /// local id is cleared regardless.
    pub fn destroy_context(&mut self) {
        let ContextState::Active(context_id) = &self.state else {
            return;
        };
        let Some(cluster_id) = self.cluster_id.as_deref() else {
            return;
        };
        match self.remote.destroy_execution_context(cluster_id, context_id) {
            Ok(()) => info!(context_id = %context_id, "execution context destroyed"),
            Err(err) => warn!(context_id = %context_id, err = %err, "failed to destroy execution context"),
        }
        self.state = ContextState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CommandResponse, ExecStatus};
    use crate::test_support::{Call, ScriptedRemote};

    fn settings() -> ExecutionConfig {
        ExecutionConfig {
            reconnect_delay_ms: 0,
            ..ExecutionConfig::default()
        }
    }

    fn manager(remote: &ScriptedRemote) -> ExecutionContextManager<&ScriptedRemote> {
        ExecutionContextManager::new(remote, Some("cluster-1".to_string()), settings())
    }

    fn context_lost() -> RemoteError {
        RemoteError::api("Context ctx-1 does not exist")
    }

    #[test]
    fn create_context_is_lazy_and_idempotent() {
        let remote = ScriptedRemote::new();
        let mut manager = manager(&remote);
        assert_eq!(manager.state(), &ContextState::Absent);

        manager.create_context().expect("create");
        manager.create_context().expect("create again");
        assert_eq!(manager.context_id(), Some("ctx-1"));
        assert_eq!(
            remote.count(|call| matches!(call, Call::CreateContext { .. })),
            1
        );
    }

    #[test]
    fn missing_cluster_id_is_a_configuration_error() {
        let remote = ScriptedRemote::new();
        let mut manager = ExecutionContextManager::new(&remote, None, settings());
        assert_eq!(manager.create_context(), Err(ContextError::MissingClusterId));

        let result = manager.execute("1 + 1", true);
        assert_eq!(result.status, ExecStatus::Error);
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("Failed to create execution context"))
        );
        assert!(remote.executed_code().is_empty());
    }

    #[test]
    fn creation_failure_records_no_context() {
        let remote = ScriptedRemote::new();
        remote.push_context(Err(RemoteError::Timeout {
            operation: "create execution context",
            timeout: std::time::Duration::from_secs(300),
        }));
        let mut manager = manager(&remote);

        let result = manager.execute("x", true);
        assert!(!result.is_ok());
        assert!(result.error.as_deref().is_some_and(|e| e.contains("timed out")));
        assert_eq!(manager.state(), &ContextState::Absent);
        assert!(remote.executed_code().is_empty());
    }

    #[test]
    fn terminated_cluster_is_started_before_creating_context() {
        let remote = ScriptedRemote::new();
        remote.push_cluster_state(ClusterState::Terminated);
        let mut manager = manager(&remote);
        manager.create_context().expect("create");

        assert_eq!(
            remote.calls(),
            vec![
                Call::ClusterState,
                Call::StartCluster,
                Call::WaitUntilRunning,
                Call::CreateContext {
                    cluster_id: "cluster-1".to_string()
                },
            ]
        );
    }

    #[test]
    fn cluster_check_can_be_disabled() {
        let remote = ScriptedRemote::new();
        let mut manager = ExecutionContextManager::new(
            &remote,
            Some("cluster-1".to_string()),
            ExecutionConfig {
                ensure_cluster_running: false,
                ..settings()
            },
        );
        manager.create_context().expect("create");
        assert_eq!(remote.count(|call| *call == Call::ClusterState), 0);
    }

    #[test]
    fn successful_execution_is_not_marked_reconnected() {
        let remote = ScriptedRemote::new();
        remote.push_command(Ok(CommandResponse::text("Hello, World!")));
        let mut manager = manager(&remote);

        let result = manager.execute("print('Hello, World!')", true);
        assert!(result.is_ok());
        assert_eq!(result.output.as_deref(), Some("Hello, World!"));
        assert!(!result.reconnected);
    }

    #[test]
    fn context_loss_reconnects_and_retries_once() {
        let remote = ScriptedRemote::new();
        remote
            .push_command(Err(context_lost()))
            .push_command(Ok(CommandResponse::text("42")));
        let mut manager = manager(&remote);

        let result = manager.execute("x", true);
        assert!(result.is_ok());
        assert!(result.reconnected);
        assert_eq!(result.output.as_deref(), Some("42"));
        assert_eq!(manager.context_id(), Some("ctx-2"));
        assert_eq!(
            remote.calls(),
            vec![
                Call::ClusterState,
                Call::CreateContext {
                    cluster_id: "cluster-1".to_string()
                },
                Call::Execute {
                    context_id: "ctx-1".to_string(),
                    code: "x".to_string()
                },
                Call::DestroyContext {
                    context_id: "ctx-1".to_string()
                },
                Call::ClusterState,
                Call::CreateContext {
                    cluster_id: "cluster-1".to_string()
                },
                Call::Execute {
                    context_id: "ctx-2".to_string(),
                    code: "x".to_string()
                },
            ]
        );
    }

    #[test]
    fn failed_retry_reports_reconnection_failure() {
        let remote = ScriptedRemote::new();
        remote
            .push_command(Err(context_lost()))
            .push_command(Err(RemoteError::Transport("connection reset".to_string())));
        let mut manager = manager(&remote);

        let result = manager.execute("x", true);
        assert_eq!(result.status, ExecStatus::Error);
        assert!(!result.reconnected);
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|e| e.contains("Reconnection failed"))
        );
        assert_eq!(remote.executed_code().len(), 2);
    }

    #[test]
    fn failed_context_recreation_reports_reconnection_failure() {
        let remote = ScriptedRemote::new();
        remote
            .push_context(Ok("ctx-a".to_string()))
            .push_context(Err(RemoteError::api("cluster unreachable")))
            .push_command(Err(context_lost()));
        let mut manager = manager(&remote);

        let result = manager.execute("x", true);
        assert_eq!(
            result.error.as_deref(),
            Some("Reconnection failed: cluster unreachable")
        );
        assert!(!result.reconnected);
        assert_eq!(manager.context_id(), None);
    }

    #[test]
    fn reconnect_disabled_returns_error_immediately() {
        let remote = ScriptedRemote::new();
        remote.push_command(Err(context_lost()));
        let mut manager = manager(&remote);

        let result = manager.execute("x", false);
        assert_eq!(result.error.as_deref(), Some("Context ctx-1 does not exist"));
        assert_eq!(
            remote.count(|call| matches!(call, Call::CreateContext { .. })),
            1
        );
        assert_eq!(
            remote.count(|call| matches!(call, Call::DestroyContext { .. })),
            0
        );
    }

    #[test]
    fn other_failures_never_reconnect() {
        let remote = ScriptedRemote::new();
        remote.push_command(Err(RemoteError::api("Session expired")));
        let mut manager = manager(&remote);

        let result = manager.execute("x", true);
        assert_eq!(result.error.as_deref(), Some("Session expired"));
        assert_eq!(remote.executed_code().len(), 1);
        assert_eq!(manager.context_id(), Some("ctx-1"));
    }

    #[test]
    fn destroy_clears_context_even_when_remote_fails() {
        let remote = ScriptedRemote::new();
        remote.fail_destroy(RemoteError::api("boom"));
        let mut manager = manager(&remote);
        manager.create_context().expect("create");

        manager.destroy_context();
        assert_eq!(manager.state(), &ContextState::Destroyed);
        assert_eq!(manager.context_id(), None);

        manager.destroy_context();
        assert_eq!(
            remote.count(|call| matches!(call, Call::DestroyContext { .. })),
            1
        );
    }

    #[test]
    fn destroy_without_context_is_a_no_op() {
        let remote = ScriptedRemote::new();
        let mut manager = manager(&remote);
        manager.destroy_context();
        assert_eq!(manager.state(), &ContextState::Absent);
        assert!(remote.calls().is_empty());
    }
}
