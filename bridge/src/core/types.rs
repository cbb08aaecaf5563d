//! Shared types for execution results and raw command responses.
//!
//! `CommandResponse` mirrors the wire shape of the command-status payload;
//! `ExecutionResult` is the decoded, immutable value handed to callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome status of one execution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Error,
}

/// An image inlined as base64 with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

impl ImagePayload {
    /// Parse a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;
        let mime_type = header.split(';').next().unwrap_or_default();
        if mime_type.is_empty() {
            return None;
        }
        Some(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Tabular output, passed through from the service unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    pub rows: Vec<Vec<Value>>,
    /// Column definitions, each an object with at least a `name` key.
    pub schema: Option<Vec<Value>>,
}

impl TablePayload {
    /// Column names from the schema, in order. Missing names render empty.
    pub fn column_names(&self) -> Option<Vec<String>> {
        self.schema.as_ref().map(|columns| {
            columns
                .iter()
                .map(|column| match column.get("name") {
                    Some(Value::String(name)) => name.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
    }
}

/// Decoded result of one execution call.
///
/// Values are never mutated after construction; [`ExecutionResult::mark_reconnected`]
/// returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub traceback: Option<Vec<String>>,
    pub images: Option<Vec<ImagePayload>>,
    pub table: Option<TablePayload>,
    /// Set when the result was produced after an automatic reconnection.
    pub reconnected: bool,
}

impl ExecutionResult {
    /// Successful result with optional text output.
    pub fn ok(output: Option<String>) -> Self {
        Self {
            status: ExecStatus::Ok,
            output,
            error: None,
            traceback: None,
            images: None,
            table: None,
            reconnected: false,
        }
    }

    /// Error result with a message and no traceback.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Error,
            output: None,
            error: Some(error.into()),
            traceback: None,
            images: None,
            table: None,
            reconnected: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecStatus::Ok
    }

    /// Return a copy flagged as produced after a reconnection.
    pub fn mark_reconnected(self) -> Self {
        Self {
            reconnected: true,
            ..self
        }
    }
}

/// Declared kind of a command's result payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Text,
    Image,
    Images,
    Table,
    Error,
    #[serde(other)]
    Other,
}

/// Result block of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandResults {
    pub result_type: Option<ResultKind>,
    pub data: Option<Value>,
    pub cause: Option<String>,
    pub summary: Option<String>,
    pub schema: Option<Vec<Value>>,
    pub file_name: Option<String>,
    pub file_names: Option<Vec<String>>,
    pub truncated: Option<bool>,
}

/// Raw command response as returned by the command-status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandResponse {
    pub id: Option<String>,
    pub status: Option<String>,
    pub results: Option<CommandResults>,
}

impl CommandResponse {
    /// Finished plain-text response, the common case in tests and fakes.
    pub fn text(output: &str) -> Self {
        Self {
            id: None,
            status: Some("Finished".to_string()),
            results: Some(CommandResults {
                result_type: Some(ResultKind::Text),
                data: Some(Value::String(output.to_string())),
                ..CommandResults::default()
            }),
        }
    }

    /// Finished response whose result carries a failure cause.
    pub fn error(cause: &str, summary: Option<&str>) -> Self {
        Self {
            id: None,
            status: Some("Finished".to_string()),
            results: Some(CommandResults {
                result_type: Some(ResultKind::Error),
                cause: Some(cause.to_string()),
                summary: summary.map(str::to_string),
                ..CommandResults::default()
            }),
        }
    }
}
