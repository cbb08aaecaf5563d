//! Blocking HTTP client for the workspace REST API.

use std::thread;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::core::types::CommandResponse;
use crate::error::RemoteError;
use crate::io::config::Credentials;
use crate::io::remote::{ClusterState, RemoteResult, RemoteService};

/// Per-request timeout; long operations are polled under their own deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on waiting for a cluster to reach `RUNNING`.
const CLUSTER_WAIT: Duration = Duration::from_secs(20 * 60);
/// Raw bytes per DBFS `add-block` call.
const UPLOAD_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct ContextStatus {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct ClusterInfo {
    #[serde(default)]
    state: String,
}

#[derive(Deserialize)]
struct HandleResponse {
    handle: u64,
}

#[derive(Deserialize)]
struct Me {
    #[serde(rename = "userName")]
    user_name: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error_code: Option<String>,
    error: Option<String>,
}

/// Workspace API client authenticated with a personal access token.
#[derive(Debug, Clone)]
pub struct WorkspaceClient {
    http: Client,
    host: String,
    token: String,
    poll_interval: Duration,
}

impl WorkspaceClient {
    pub fn new(credentials: &Credentials) -> RemoteResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            host: normalize_host(&credentials.host),
            token: credentials.token.clone(),
            poll_interval: POLL_INTERVAL,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> RemoteResult<T> {
        let request = self.http.get(self.url(path)).query(query);
        self.send(path, request)
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> RemoteResult<T> {
        let request = self.http.post(self.url(path)).json(body);
        self.send(path, request)
    }

    fn send<T: DeserializeOwned>(&self, path: &str, request: RequestBuilder) -> RemoteResult<T> {
        debug!(path, "workspace request");
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let body = if body.trim().is_empty() { "{}" } else { &body };
        serde_json::from_str(body).map_err(|err| {
            RemoteError::Transport(format!("unexpected response from {path}: {err}"))
        })
    }

    fn cluster_info(&self, cluster_id: &str) -> RemoteResult<ClusterInfo> {
        self.get("/api/2.0/clusters/get", &[("cluster_id", cluster_id)])
    }
}

/// Ensure the host has a scheme and no trailing slash.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Turn an error response into a [`RemoteError::Api`] carrying the service's message.
pub fn api_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();
    let message = parsed
        .and_then(|body| body.message.or(body.error).or(body.error_code))
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                trimmed.to_string()
            }
        });
    RemoteError::Api {
        status: Some(status.as_u16()),
        message,
    }
}

/// Call `check` every `interval` until it yields a value or `timeout` elapses.
pub fn poll_until<T, F>(
    operation: &'static str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> RemoteResult<T>
where
    F: FnMut() -> RemoteResult<Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check()? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(RemoteError::Timeout { operation, timeout });
        }
        thread::sleep(interval);
    }
}

impl RemoteService for WorkspaceClient {
    #[instrument(skip(self))]
    fn create_execution_context(
        &self,
        cluster_id: &str,
        timeout: Duration,
    ) -> RemoteResult<String> {
        let created: IdResponse = self.post(
            "/api/1.2/contexts/create",
            &json!({ "clusterId": cluster_id, "language": "python" }),
        )?;
        poll_until(
            "create execution context",
            timeout,
            self.poll_interval,
            || {
                let status: ContextStatus = self.get(
                    "/api/1.2/contexts/status",
                    &[("clusterId", cluster_id), ("contextId", created.id.as_str())],
                )?;
                match status.status.as_str() {
                    "Running" => Ok(Some(())),
                    "Error" => Err(RemoteError::api(format!(
                        "Execution context {} failed to start",
                        created.id
                    ))),
                    _ => Ok(None),
                }
            },
        )?;
        info!(context_id = %created.id, "execution context running");
        Ok(created.id)
    }

    #[instrument(skip(self, code), fields(code_len = code.len()))]
    fn execute_command(
        &self,
        cluster_id: &str,
        context_id: &str,
        code: &str,
        timeout: Duration,
    ) -> RemoteResult<CommandResponse> {
        let command: IdResponse = self.post(
            "/api/1.2/commands/execute",
            &json!({
                "clusterId": cluster_id,
                "contextId": context_id,
                "language": "python",
                "command": code,
            }),
        )?;
        poll_until("execute command", timeout, self.poll_interval, || {
            let response: CommandResponse = self.get(
                "/api/1.2/commands/status",
                &[
                    ("clusterId", cluster_id),
                    ("contextId", context_id),
                    ("commandId", command.id.as_str()),
                ],
            )?;
            match response.status.as_deref() {
                Some("Finished" | "Cancelled" | "Error") => Ok(Some(response)),
                _ => Ok(None),
            }
        })
    }

    fn destroy_execution_context(&self, cluster_id: &str, context_id: &str) -> RemoteResult<()> {
        let _: IgnoredAny = self.post(
            "/api/1.2/contexts/destroy",
            &json!({ "clusterId": cluster_id, "contextId": context_id }),
        )?;
        Ok(())
    }

    fn cluster_state(&self, cluster_id: &str) -> RemoteResult<ClusterState> {
        Ok(ClusterState::parse(&self.cluster_info(cluster_id)?.state))
    }

    fn start_cluster(&self, cluster_id: &str) -> RemoteResult<()> {
        let _: IgnoredAny = self.post(
            "/api/2.0/clusters/start",
            &json!({ "cluster_id": cluster_id }),
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn wait_until_running(&self, cluster_id: &str) -> RemoteResult<()> {
        poll_until(
            "wait for cluster",
            CLUSTER_WAIT,
            self.poll_interval * 5,
            || match self.cluster_state(cluster_id)? {
                ClusterState::Running => Ok(Some(())),
                state @ (ClusterState::Terminated | ClusterState::Error) => Err(RemoteError::api(
                    format!("Cluster {cluster_id} entered state {state:?} while starting"),
                )),
                _ => Ok(None),
            },
        )
    }

    fn download(&self, path: &str) -> RemoteResult<Vec<u8>> {
        let url = self.url(&format!("/api/2.0/fs/files{path}"));
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(api_error(status, &body));
        }
        let bytes = response
            .bytes()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self, contents), fields(bytes = contents.len()))]
    fn upload_to_staging(&self, path: &str, contents: &[u8], overwrite: bool) -> RemoteResult<()> {
        let created: HandleResponse = self.post(
            "/api/2.0/dbfs/create",
            &json!({ "path": path, "overwrite": overwrite }),
        )?;
        for block in contents.chunks(UPLOAD_BLOCK_SIZE) {
            let _: IgnoredAny = self.post(
                "/api/2.0/dbfs/add-block",
                &json!({ "handle": created.handle, "data": STANDARD.encode(block) }),
            )?;
        }
        let _: IgnoredAny = self.post(
            "/api/2.0/dbfs/close",
            &json!({ "handle": created.handle }),
        )?;
        Ok(())
    }

    fn delete_staging(&self, path: &str) -> RemoteResult<()> {
        let _: IgnoredAny = self.post(
            "/api/2.0/dbfs/delete",
            &json!({ "path": path, "recursive": true }),
        )?;
        Ok(())
    }

    fn delete_workspace(&self, path: &str) -> RemoteResult<()> {
        let _: IgnoredAny = self.post(
            "/api/2.0/workspace/delete",
            &json!({ "path": path, "recursive": true }),
        )?;
        Ok(())
    }

    fn current_user(&self) -> RemoteResult<String> {
        let me: Me = self.get("/api/2.0/preview/scim/v2/Me", &[])?;
        Ok(me.user_name)
    }
}
