//! Bridge configuration.
//!
//! Sources, highest priority first:
//! - `DATABRICKS_CLUSTER_ID` / `DATABRICKS_HOST` / `DATABRICKS_TOKEN` environment variables.
//! - The active profile of `~/.databrickscfg` (`DATABRICKS_CONFIG_PROFILE`, default `DEFAULT`).
//! - `[tool.bridge]` in the project's `pyproject.toml` for sync and execution settings.
//!
//! Malformed files are reported with a warning and skipped; loading itself never fails.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const PYPROJECT_FILE: &str = "pyproject.toml";
pub const PROFILE_FILE: &str = ".databrickscfg";
pub const DEFAULT_PROFILE: &str = "DEFAULT";

pub const ENV_CLUSTER_ID: &str = "DATABRICKS_CLUSTER_ID";
pub const ENV_PROFILE: &str = "DATABRICKS_CONFIG_PROFILE";
pub const ENV_HOST: &str = "DATABRICKS_HOST";
pub const ENV_TOKEN: &str = "DATABRICKS_TOKEN";

/// File synchronization settings (`[tool.bridge.sync]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Source directory, relative to the project root.
    pub source: String,
    /// Extra gitignore-style exclusion patterns, applied after the defaults.
    pub exclude: Vec<String>,
    /// Upper bound on the total size of synced files.
    pub max_size_mb: Option<f64>,
    /// Files larger than this are left out of the archive.
    pub max_file_size_mb: Option<f64>,
    /// Also apply the source directory's `.gitignore`.
    pub use_gitignore: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: ".".to_string(),
            exclude: Vec::new(),
            max_size_mb: None,
            max_file_size_mb: None,
            use_gitignore: true,
        }
    }
}

/// Execution context settings (`[tool.bridge.execution]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub context_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Pause before reconnecting after a context-invalid failure.
    pub reconnect_delay_ms: u64,
    /// Start a terminated cluster before creating a context.
    pub ensure_cluster_running: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            context_timeout_secs: 5 * 60,
            command_timeout_secs: 10 * 60,
            reconnect_delay_ms: 1_000,
            ensure_cluster_running: true,
        }
    }
}

impl ExecutionConfig {
    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PyProject {
    #[serde(default)]
    tool: ToolTable,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    #[serde(default)]
    bridge: BridgeTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BridgeTable {
    sync: SyncConfig,
    execution: ExecutionConfig,
}

/// Where configuration is read from. Injectable so tests never touch the
/// process environment.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    pub env: HashMap<String, String>,
    pub home: Option<PathBuf>,
    pub project_root: PathBuf,
}

impl ConfigSources {
    /// Capture the current process environment, home directory, and working directory.
    pub fn from_process() -> Result<Self> {
        Ok(Self {
            env: env::vars().collect(),
            home: dirs::home_dir(),
            project_root: env::current_dir().context("resolve current directory")?,
        })
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Workspace credentials for the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub token: String,
}

/// Resolved configuration for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub cluster_id: Option<String>,
    pub profile: String,
    pub host: Option<String>,
    pub token: Option<String>,
    pub project_root: PathBuf,
    pub sync: SyncConfig,
    pub execution: ExecutionConfig,
}

impl Config {
    /// Configuration with defaults everywhere and no cluster.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            cluster_id: None,
            profile: DEFAULT_PROFILE.to_string(),
            host: None,
            token: None,
            project_root: project_root.into(),
            sync: SyncConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }

    /// Load configuration from `sources`.
    pub fn load(sources: &ConfigSources) -> Self {
        let mut cfg = Self::new(&sources.project_root);
        cfg.profile = sources
            .var(ENV_PROFILE)
            .unwrap_or(DEFAULT_PROFILE)
            .to_string();

        let profile = sources
            .home
            .as_deref()
            .map(|home| home.join(PROFILE_FILE))
            .and_then(|path| load_profile(&path, &cfg.profile))
            .unwrap_or_default();

        let pick = |env_key: &str, profile_key: &str| {
            sources
                .var(env_key)
                .map(str::to_string)
                .or_else(|| profile.get(profile_key).cloned())
        };
        cfg.cluster_id = pick(ENV_CLUSTER_ID, "cluster_id");
        cfg.host = pick(ENV_HOST, "host");
        cfg.token = pick(ENV_TOKEN, "token");

        let pyproject = sources.project_root.join(PYPROJECT_FILE);
        if let Some(table) = load_bridge_table(&pyproject) {
            cfg.sync = table.sync;
            cfg.execution = table.execution;
        }

        debug!(
            cluster_id = ?cfg.cluster_id,
            profile = %cfg.profile,
            sync_enabled = cfg.sync.enabled,
            "configuration loaded"
        );
        cfg
    }

    /// Validate the configuration. Returns human-readable problems; empty if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.cluster_id.as_deref().is_none_or(str::is_empty) {
            errors.push(format!(
                "Cluster ID is not configured. Set {ENV_CLUSTER_ID} or add cluster_id to the \
                 [{}] profile in ~/{PROFILE_FILE}.",
                self.profile
            ));
        }
        if self.sync.max_size_mb.is_some_and(|limit| limit <= 0.0) {
            errors.push("max_size_mb must be a positive number.".to_string());
        }
        if self.sync.max_file_size_mb.is_some_and(|limit| limit <= 0.0) {
            errors.push("max_file_size_mb must be a positive number.".to_string());
        }
        if self.execution.context_timeout_secs == 0 {
            errors.push("context_timeout_secs must be > 0.".to_string());
        }
        if self.execution.command_timeout_secs == 0 {
            errors.push("command_timeout_secs must be > 0.".to_string());
        }
        errors
    }

    /// Credentials for the workspace API.
    pub fn credentials(&self) -> Result<Credentials> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| anyhow!("workspace host is not configured (set {ENV_HOST})"))?;
        let token = self
            .token
            .clone()
            .ok_or_else(|| anyhow!("access token is not configured (set {ENV_TOKEN})"))?;
        Ok(Credentials { host, token })
    }

    /// Absolute path of the sync source directory.
    pub fn source_path(&self) -> PathBuf {
        let source = self.sync.source.trim();
        let source = source.strip_prefix("./").unwrap_or(source);
        if source.is_empty() || source == "." {
            return self.project_root.clone();
        }
        self.project_root.join(source)
    }
}

fn load_profile(path: &Path, profile: &str) -> Option<HashMap<String, String>> {
    if !path.exists() {
        return None;
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to read profile file, skipping");
            return None;
        }
    };
    match parse_ini(&contents) {
        Ok(mut sections) => sections.remove(profile),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to parse profile file, skipping");
            None
        }
    }
}

/// Parse a minimal INI document: `[section]` headers, `key = value` pairs,
/// `#`/`;` comments. Keys outside any section are an error.
fn parse_ini(contents: &str) -> Result<HashMap<String, HashMap<String, String>>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            bail!("line {}: expected `key = value`", index + 1);
        };
        let Some(section) = current.as_ref() else {
            bail!("line {}: key `{}` outside of any section", index + 1, key.trim());
        };
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(sections)
}

fn load_bridge_table(path: &Path) -> Option<BridgeTable> {
    if !path.exists() {
        return None;
    }
    let parsed = fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))
        .and_then(|contents| {
            toml::from_str::<PyProject>(&contents)
                .with_context(|| format!("parse {}", path.display()))
        });
    match parsed {
        Ok(pyproject) => Some(pyproject.tool.bridge),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "using default project configuration");
            None
        }
    }
}
