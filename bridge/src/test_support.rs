//! Test-only helpers: a scripted remote service and temporary projects.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::core::types::CommandResponse;
use crate::error::RemoteError;
use crate::io::remote::{ClusterState, RemoteResult, RemoteService};

/// One recorded call against [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateContext { cluster_id: String },
    Execute { context_id: String, code: String },
    DestroyContext { context_id: String },
    ClusterState,
    StartCluster,
    WaitUntilRunning,
    Download { path: String },
    Upload { path: String, overwrite: bool },
    DeleteStaging { path: String },
    DeleteWorkspace { path: String },
    CurrentUser,
}

#[derive(Debug, Default)]
struct Script {
    contexts: VecDeque<RemoteResult<String>>,
    commands: VecDeque<RemoteResult<CommandResponse>>,
    cluster_states: VecDeque<ClusterState>,
    downloads: HashMap<String, Vec<u8>>,
    destroy_error: Option<RemoteError>,
    upload_error: Option<RemoteError>,
    user: Option<RemoteResult<String>>,
    uploads: Vec<(String, Vec<u8>)>,
    calls: Vec<Call>,
    next_context: u32,
}

/// In-memory [`RemoteService`] driven by queued responses.
///
/// Unscripted calls succeed: contexts are numbered `ctx-1`, `ctx-2`, ...;
/// commands finish with no results; the cluster is running; the user is
/// `user@example.com`.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().expect("script lock");
        f(&mut script)
    }

    /// Queue the result of the next `create_execution_context`.
    pub fn push_context(&self, result: RemoteResult<String>) -> &Self {
        self.with(|s| s.contexts.push_back(result));
        self
    }

    /// Queue the result of the next `execute_command`.
    pub fn push_command(&self, result: RemoteResult<CommandResponse>) -> &Self {
        self.with(|s| s.commands.push_back(result));
        self
    }

    /// Queue cluster states returned by successive `cluster_state` calls.
    pub fn push_cluster_state(&self, state: ClusterState) -> &Self {
        self.with(|s| s.cluster_states.push_back(state));
        self
    }

    pub fn add_download(&self, path: &str, bytes: &[u8]) -> &Self {
        self.with(|s| s.downloads.insert(path.to_string(), bytes.to_vec()));
        self
    }

    pub fn fail_destroy(&self, err: RemoteError) -> &Self {
        self.with(|s| s.destroy_error = Some(err));
        self
    }

    pub fn fail_uploads(&self, err: RemoteError) -> &Self {
        self.with(|s| s.upload_error = Some(err));
        self
    }

    pub fn set_user(&self, result: RemoteResult<String>) -> &Self {
        self.with(|s| s.user = Some(result));
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|call| predicate(call)).count())
    }

    /// Code submitted through `execute_command`, in order.
    pub fn executed_code(&self) -> Vec<String> {
        self.with(|s| {
            s.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Execute { code, .. } => Some(code.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// Successful uploads as `(path, bytes)`.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.with(|s| s.uploads.clone())
    }
}

impl RemoteService for ScriptedRemote {
    fn create_execution_context(
        &self,
        cluster_id: &str,
        _timeout: Duration,
    ) -> RemoteResult<String> {
        self.with(|s| {
            s.calls.push(Call::CreateContext {
                cluster_id: cluster_id.to_string(),
            });
            s.contexts.pop_front().unwrap_or_else(|| {
                s.next_context += 1;
                Ok(format!("ctx-{}", s.next_context))
            })
        })
    }

    fn execute_command(
        &self,
        _cluster_id: &str,
        context_id: &str,
        code: &str,
        _timeout: Duration,
    ) -> RemoteResult<CommandResponse> {
        self.with(|s| {
            s.calls.push(Call::Execute {
                context_id: context_id.to_string(),
                code: code.to_string(),
            });
            s.commands.pop_front().unwrap_or_else(|| {
                Ok(CommandResponse {
                    status: Some("Finished".to_string()),
                    ..CommandResponse::default()
                })
            })
        })
    }

    fn destroy_execution_context(&self, _cluster_id: &str, context_id: &str) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::DestroyContext {
                context_id: context_id.to_string(),
            });
            s.destroy_error.clone().map_or(Ok(()), Err)
        })
    }

    fn cluster_state(&self, _cluster_id: &str) -> RemoteResult<ClusterState> {
        self.with(|s| {
            s.calls.push(Call::ClusterState);
            Ok(s.cluster_states.pop_front().unwrap_or(ClusterState::Running))
        })
    }

    fn start_cluster(&self, _cluster_id: &str) -> RemoteResult<()> {
        self.with(|s| s.calls.push(Call::StartCluster));
        Ok(())
    }

    fn wait_until_running(&self, _cluster_id: &str) -> RemoteResult<()> {
        self.with(|s| s.calls.push(Call::WaitUntilRunning));
        Ok(())
    }

    fn download(&self, path: &str) -> RemoteResult<Vec<u8>> {
        self.with(|s| {
            s.calls.push(Call::Download {
                path: path.to_string(),
            });
            s.downloads
                .get(path)
                .cloned()
                .ok_or_else(|| RemoteError::api(format!("{path} not found")))
        })
    }

    fn upload_to_staging(&self, path: &str, contents: &[u8], overwrite: bool) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::Upload {
                path: path.to_string(),
                overwrite,
            });
            if let Some(err) = s.upload_error.clone() {
                return Err(err);
            }
            s.uploads.push((path.to_string(), contents.to_vec()));
            Ok(())
        })
    }

    fn delete_staging(&self, path: &str) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::DeleteStaging {
                path: path.to_string(),
            });
        });
        Ok(())
    }

    fn delete_workspace(&self, path: &str) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(Call::DeleteWorkspace {
                path: path.to_string(),
            });
        });
        Ok(())
    }

    fn current_user(&self) -> RemoteResult<String> {
        self.with(|s| {
            s.calls.push(Call::CurrentUser);
            s.user
                .clone()
                .unwrap_or_else(|| Ok("user@example.com".to_string()))
        })
    }
}

/// A temporary project directory.
pub struct TestProject {
    dir: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
