//! Decoding raw command responses into [`ExecutionResult`] values.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::warn;

use crate::core::types::{
    CommandResponse, CommandResults, ExecutionResult, ImagePayload, ResultKind, TablePayload,
};
use crate::error::RemoteError;

/// Root of the remote file store that plot references are relative to.
pub const FILESTORE_ROOT: &str = "/FileStore";

/// Decode a command response.
///
/// `fetch` downloads a file-store path; it is only called for image results
/// whose references are not already inline. Download failures drop the image
/// and never fail the whole result.
pub fn decode_response<F>(response: CommandResponse, fetch: F) -> ExecutionResult
where
    F: Fn(&str) -> Result<Vec<u8>, RemoteError>,
{
    let Some(results) = response.results else {
        return match response.status.as_deref() {
            Some("Finished") => ExecutionResult::ok(None),
            Some(status) => ExecutionResult::failure(format!("Command ended with status {status}")),
            None => ExecutionResult::failure("No response from the command service"),
        };
    };

    if let Some(cause) = results.cause {
        let mut result = ExecutionResult::failure(cause);
        result.traceback = results
            .summary
            .filter(|summary| !summary.is_empty())
            .map(|summary| summary.split('\n').map(str::to_string).collect());
        return result;
    }

    match results.result_type {
        Some(ResultKind::Image) => {
            let images = results
                .file_name
                .as_deref()
                .and_then(|reference| resolve_image(reference, &fetch))
                .map(|image| vec![image]);
            with_images(images)
        }
        Some(ResultKind::Images) => {
            let images = results.file_names.as_ref().map(|references| {
                references
                    .iter()
                    .filter_map(|reference| resolve_image(reference, &fetch))
                    .collect::<Vec<_>>()
            });
            with_images(images.filter(|images| !images.is_empty()))
        }
        Some(ResultKind::Table) => decode_table(results),
        _ => ExecutionResult::ok(text_output(results)),
    }
}

fn with_images(images: Option<Vec<ImagePayload>>) -> ExecutionResult {
    ExecutionResult {
        images,
        ..ExecutionResult::ok(None)
    }
}

fn decode_table(results: CommandResults) -> ExecutionResult {
    let Some(data) = results.data else {
        return ExecutionResult::ok(None);
    };
    match serde_json::from_value::<Vec<Vec<Value>>>(data) {
        Ok(rows) => ExecutionResult {
            table: Some(TablePayload {
                rows,
                schema: results.schema,
            }),
            ..ExecutionResult::ok(None)
        },
        Err(err) => {
            warn!(err = %err, "table result is not a list of rows");
            ExecutionResult::ok(results.summary)
        }
    }
}

fn text_output(results: CommandResults) -> Option<String> {
    match results.data {
        Some(Value::String(text)) => Some(text),
        Some(Value::Null) | None => results.summary.filter(|summary| !summary.is_empty()),
        Some(other) => Some(other.to_string()),
    }
}

/// Resolve an image reference to an inline payload.
///
/// Inline `data:` references are returned as-is. Anything else is a path in
/// the remote file store and is downloaded through `fetch`.
pub fn resolve_image<F>(reference: &str, fetch: &F) -> Option<ImagePayload>
where
    F: Fn(&str) -> Result<Vec<u8>, RemoteError>,
{
    if reference.starts_with("data:") {
        let image = ImagePayload::from_data_url(reference);
        if image.is_none() {
            warn!(reference, "malformed inline image reference");
        }
        return image;
    }

    let path = filestore_path(reference);
    match fetch(&path) {
        Ok(bytes) => Some(ImagePayload {
            mime_type: mime_type_for(reference).to_string(),
            data: STANDARD.encode(bytes),
        }),
        Err(err) => {
            warn!(path = %path, err = %err, "failed to download image from file store");
            None
        }
    }
}

/// Map a plot reference (e.g. `/plots/a.png`) to its absolute file-store path.
pub fn filestore_path(reference: &str) -> String {
    if reference.starts_with(FILESTORE_ROOT) {
        return reference.to_string();
    }
    if reference.starts_with('/') {
        format!("{FILESTORE_ROOT}{reference}")
    } else {
        format!("{FILESTORE_ROOT}/{reference}")
    }
}

/// MIME type from a file extension; unknown or missing extensions are PNG.
pub fn mime_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "image/png",
    }
}
