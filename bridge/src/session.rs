//! Notebook-facing session: one execution context plus one sync target.
//!
//! [`Session::execute_cell`] mirrors what a notebook kernel does per cell:
//! lazy initialization, sync-if-needed, execution, reconnection notice, and
//! rendering of the result into front-end outputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::render::render_html_table;
use crate::core::types::{ExecStatus, ExecutionResult};
use crate::execution::ExecutionContextManager;
use crate::io::config::Config;
use crate::io::remote::RemoteService;
use crate::sync::SyncEngine;

pub const MSG_SYNCING: &str = "Syncing files to Databricks...\n";
pub const MSG_SYNCED: &str = "Files synced successfully.\n";
pub const MSG_RECONNECTED: &str = "Session reconnected. Variables have been reset.\n";

/// Output stream of a text chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// Error raised by a cell, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellError {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

/// One message for the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    Stream { name: StreamName, text: String },
    /// MIME type to payload (base64 for images, markup for HTML).
    DisplayData { data: BTreeMap<String, String> },
    Error(CellError),
}

/// Result of one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellOutcome {
    pub status: ExecStatus,
    pub outputs: Vec<Output>,
    pub error: Option<CellError>,
    pub reconnected: bool,
}

impl CellOutcome {
    fn ok(outputs: Vec<Output>) -> Self {
        Self {
            status: ExecStatus::Ok,
            outputs,
            error: None,
            reconnected: false,
        }
    }

    fn error(outputs: Vec<Output>, error: CellError) -> Self {
        Self {
            status: ExecStatus::Error,
            outputs,
            error: Some(error),
            reconnected: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecStatus::Ok
    }

    /// Concatenated text of one stream.
    pub fn stream_text(&self, stream: StreamName) -> String {
        self.outputs
            .iter()
            .filter_map(|output| match output {
                Output::Stream { name, text } if *name == stream => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn stderr(outputs: &mut Vec<Output>, text: impl Into<String>) {
    outputs.push(Output::Stream {
        name: StreamName::Stderr,
        text: text.into(),
    });
}

/// Short random session id (first 8 hex chars of a v4 UUID).
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub struct Session<R> {
    config: Config,
    remote: Arc<R>,
    session_id: String,
    executor: Option<ExecutionContextManager<Arc<R>>>,
    sync: Option<SyncEngine<Arc<R>>>,
    initialized: bool,
    last_staging_path: Option<String>,
    /// An archive was uploaded but its setup code has not yet succeeded.
    setup_pending: bool,
}

impl<R: RemoteService> Session<R> {
    pub fn new(config: Config, remote: Arc<R>) -> Self {
        Self::with_id(config, remote, new_session_id())
    }

    pub fn with_id(config: Config, remote: Arc<R>, session_id: impl Into<String>) -> Self {
        Self {
            config,
            remote,
            session_id: session_id.into(),
            executor: None,
            sync: None,
            initialized: false,
            last_staging_path: None,
            setup_pending: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn executor(&self) -> Option<&ExecutionContextManager<Arc<R>>> {
        self.executor.as_ref()
    }

    fn initialize(&mut self, outputs: &mut Vec<Output>) -> bool {
        if self.initialized {
            return true;
        }
        let errors = self.config.validate();
        if !errors.is_empty() {
            for error in errors {
                stderr(outputs, format!("Configuration error: {error}\n"));
            }
            return false;
        }

        if self.executor.is_none() {
            self.executor = Some(ExecutionContextManager::new(
                Arc::clone(&self.remote),
                self.config.cluster_id.clone(),
                self.config.execution.clone(),
            ));
        }
        if self.sync.is_none() && self.config.sync.enabled {
            match SyncEngine::new(
                Arc::clone(&self.remote),
                self.config.sync.clone(),
                self.config.source_path(),
                &self.session_id,
            ) {
                Ok(engine) => self.sync = Some(engine),
                Err(err) => stderr(outputs, format!("Sync failed: {err}\n")),
            }
        }
        self.initialized = true;
        info!(session = %self.session_id, "session initialized");
        true
    }

    fn sync_files(&mut self, outputs: &mut Vec<Output>) {
        let (Some(sync), Some(executor)) = (self.sync.as_mut(), self.executor.as_mut()) else {
            return;
        };
        if sync.needs_sync() {
            stderr(outputs, MSG_SYNCING);
            match sync.sync() {
                Ok(stats) => {
                    self.setup_pending |= stats.uploaded;
                    self.last_staging_path = Some(stats.staging_path);
                }
                Err(err) => {
                    warn!(err = %err, "sync failed");
                    stderr(outputs, format!("Sync failed: {err}\n"));
                    return;
                }
            }
        } else if !self.setup_pending {
            return;
        }

        if self.setup_pending
            && let Some(staging_path) = self.last_staging_path.as_deref()
        {
            let code = match sync.setup_code(staging_path) {
                Ok(code) => code,
                Err(err) => {
                    stderr(outputs, format!("Sync failed: {err}\n"));
                    return;
                }
            };
            let result = executor.execute(&code, false);
            if !result.is_ok() {
                warn!(session = %self.session_id, "setup code failed, retrying on next cell");
                stderr(
                    outputs,
                    format!("Sync setup failed: {}\n", result.error.unwrap_or_default()),
                );
                return;
            }
            self.setup_pending = false;
        }
        stderr(outputs, MSG_SYNCED);
    }

    /// Re-run the last setup code so synced modules import again.
    fn restore_after_reconnect(&mut self, outputs: &mut Vec<Output>) {
        stderr(outputs, MSG_RECONNECTED);
        let (Some(sync), Some(executor), Some(staging_path)) = (
            self.sync.as_mut(),
            self.executor.as_mut(),
            self.last_staging_path.as_deref(),
        ) else {
            return;
        };
        let failure = match sync.setup_code(staging_path) {
            Ok(code) => executor.execute(&code, false).error,
            Err(err) => Some(err.to_string()),
        };
        match failure {
            Some(err) => stderr(outputs, format!("Warning: Failed to restore sys.path: {err}\n")),
            None => self.setup_pending = false,
        }
    }

    /// Execute one cell. `silent` suppresses rendered output, not the status.
    pub fn execute_cell(&mut self, code: &str, silent: bool) -> CellOutcome {
        let code = code.trim();
        if code.is_empty() {
            return CellOutcome::ok(Vec::new());
        }

        let mut outputs = Vec::new();
        if !self.initialize(&mut outputs) {
            let error = CellError {
                ename: "ConfigurationError".to_string(),
                evalue: "Failed to initialize remote connection".to_string(),
                traceback: Vec::new(),
            };
            return CellOutcome::error(outputs, error);
        }

        self.sync_files(&mut outputs);

        let Some(executor) = self.executor.as_mut() else {
            return CellOutcome::ok(outputs);
        };
        let result = executor.execute(code, true);
        let reconnected = result.reconnected;
        if reconnected {
            self.restore_after_reconnect(&mut outputs);
        }

        let mut outcome = render_result(result, silent, outputs);
        outcome.reconnected = reconnected;
        outcome
    }

    /// Shut the session down. A restart keeps the remote context; a full
    /// shutdown deletes sync artifacts and destroys the context.
    pub fn shutdown(&mut self, restart: bool) {
        self.initialized = false;
        if restart {
            info!(session = %self.session_id, "session restarting, keeping context");
            return;
        }
        if let Some(mut sync) = self.sync.take() {
            sync.cleanup();
        }
        if let Some(mut executor) = self.executor.take() {
            executor.destroy_context();
        }
        self.last_staging_path = None;
        self.setup_pending = false;
        info!(session = %self.session_id, "session shut down");
    }
}

fn render_result(result: ExecutionResult, silent: bool, mut outputs: Vec<Output>) -> CellOutcome {
    if !result.is_ok() {
        let error = CellError {
            ename: "ExecutionError".to_string(),
            evalue: result.error.unwrap_or_else(|| "Unknown error".to_string()),
            traceback: result.traceback.unwrap_or_default(),
        };
        if !silent {
            outputs.push(Output::Error(error.clone()));
        }
        return CellOutcome::error(outputs, error);
    }
    if silent {
        return CellOutcome::ok(outputs);
    }

    if let Some(text) = result.output.filter(|text| !text.is_empty()) {
        outputs.push(Output::Stream {
            name: StreamName::Stdout,
            text,
        });
    }
    for image in result.images.unwrap_or_default() {
        outputs.push(Output::DisplayData {
            data: BTreeMap::from([(image.mime_type, image.data)]),
        });
    }
    if let Some(table) = result.table {
        outputs.push(Output::DisplayData {
            data: BTreeMap::from([("text/html".to_string(), render_html_table(&table))]),
        });
    }
    CellOutcome::ok(outputs)
}
