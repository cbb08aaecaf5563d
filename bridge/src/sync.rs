//! Project synchronization to the remote staging area.
//!
//! A sync walks the source tree, hashes every included file, uploads a zip of
//! the tree to a session-scoped staging path, and records the hashes. The
//! cluster side is prepared by running [`SyncEngine::setup_code`] in the
//! execution context, which unpacks the archive into a per-user workspace
//! directory and puts it on `sys.path`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, instrument, warn};

use crate::core::filter::{DEFAULT_EXCLUDES, PathFilter};
use crate::core::path::sanitize_path_component;
use crate::error::SyncError;
use crate::io::archive::{ARCHIVE_NAME, build_archive};
use crate::io::config::SyncConfig;
use crate::io::fingerprint::{CACHE_FILE_NAME, FingerprintCache};
use crate::io::remote::RemoteService;
use crate::io::walk::{SourceFile, latest_mtime, total_size, walk_source};

/// Staging root for uploaded archives.
pub const STAGING_ROOT: &str = "/tmp/bridge";
/// Directory under the user's workspace home that holds extracted projects.
pub const WORKSPACE_DIR_NAME: &str = "bridge";
pub const GITIGNORE_FILE: &str = ".gitignore";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Outcome of one [`SyncEngine::sync`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Staging path of the archive the cluster should unpack.
    pub staging_path: String,
    /// False when nothing changed since the previous sync of this session.
    pub uploaded: bool,
    pub total_files: usize,
    pub changed_files: usize,
    pub skipped_files: usize,
    pub removed_files: usize,
    /// Files left out because they exceed `max_file_size_mb`.
    pub oversized_files: usize,
    pub total_bytes: u64,
    pub archive_bytes: u64,
}

/// Preview of one file for `bridge files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub relative: String,
    pub size: u64,
    pub changed: bool,
    pub oversized: bool,
}

/// Ordered exclusion patterns: defaults, the cache file, `.gitignore` (when
/// enabled), then user patterns.
pub fn exclusion_patterns(
    settings: &SyncConfig,
    source_root: &Path,
) -> Result<Vec<String>, SyncError> {
    let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
    patterns.push(format!("/{CACHE_FILE_NAME}"));

    let gitignore = source_root.join(GITIGNORE_FILE);
    if settings.use_gitignore && gitignore.is_file() {
        let contents = fs::read_to_string(&gitignore).map_err(|source| SyncError::Io {
            path: gitignore.clone(),
            source,
        })?;
        patterns.extend(contents.lines().map(str::to_string));
    }

    patterns.extend(settings.exclude.iter().cloned());
    Ok(patterns)
}

pub struct SyncEngine<R> {
    remote: R,
    settings: SyncConfig,
    source_root: PathBuf,
    session_id: String,
    filter: PathFilter,
    cache: FingerprintCache,
    synced: bool,
    watermark: Option<SystemTime>,
    user_name: Option<String>,
}

impl<R: RemoteService> SyncEngine<R> {
    /// Compile exclusions and load the fingerprint cache for `source_root`.
    pub fn new(
        remote: R,
        settings: SyncConfig,
        source_root: PathBuf,
        session_id: &str,
    ) -> Result<Self, SyncError> {
        let filter = PathFilter::new(exclusion_patterns(&settings, &source_root)?)?;
        let cache = FingerprintCache::load(&source_root);
        debug!(
            source = %source_root.display(),
            patterns = filter.len(),
            cached = cache.len(),
            "sync engine ready"
        );
        Ok(Self {
            remote,
            settings,
            source_root,
            session_id: session_id.to_string(),
            filter,
            cache,
            synced: false,
            watermark: None,
            user_name: None,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Session-scoped staging directory.
    pub fn staging_dir(&self) -> String {
        format!("{STAGING_ROOT}/{}", self.session_id)
    }

    pub fn staging_path(&self) -> String {
        format!("{}/{ARCHIVE_NAME}", self.staging_dir())
    }

    /// True when a sync would change what the cluster sees.
    pub fn needs_sync(&self) -> bool {
        if !self.settings.enabled {
            return false;
        }
        if !self.synced {
            return true;
        }
        match walk_source(&self.source_root, &self.filter) {
            Ok(files) => latest_mtime(&files) > self.watermark,
            Err(err) => {
                debug!(err = %err, "walk failed while checking for changes");
                true
            }
        }
    }

    /// Push the project to the staging area.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub fn sync(&mut self) -> Result<SyncStats, SyncError> {
        let files = walk_source(&self.source_root, &self.filter)?;
        let watermark = latest_mtime(&files);
        let (included, oversized) = split_oversized(files, self.settings.max_file_size_mb);
        for file in &oversized {
            warn!(path = %file.relative, size = file.size, "file exceeds max_file_size_mb, not synced");
        }

        let total_bytes = total_size(&included);
        if let Some(limit_mb) = self.settings.max_size_mb {
            let size_mb = total_bytes as f64 / BYTES_PER_MB;
            if size_mb > limit_mb {
                return Err(SyncError::TooLarge { size_mb, limit_mb });
            }
        }

        let changes = self.cache.changed_files(&included);
        let staging_path = self.staging_path();
        let mut archive_bytes = 0;
        let uploaded = !self.synced || changes.has_changes();
        if uploaded {
            let archive = build_archive(&included)?;
            archive_bytes = archive.len() as u64;
            self.remote
                .upload_to_staging(&staging_path, &archive, true)
                .map_err(|source| SyncError::Upload {
                    path: staging_path.clone(),
                    source,
                })?;
        } else {
            debug!("no content changes, skipping upload");
        }

        self.cache.record(&changes);
        if let Err(err) = self.cache.save() {
            warn!(err = %err, "failed to persist sync cache");
        }
        self.watermark = watermark;
        self.synced = true;

        let stats = SyncStats {
            staging_path,
            uploaded,
            total_files: changes.total,
            changed_files: changes.changed.len(),
            skipped_files: changes.skipped,
            removed_files: changes.removed.len(),
            oversized_files: oversized.len(),
            total_bytes,
            archive_bytes,
        };
        info!(
            uploaded = stats.uploaded,
            total = stats.total_files,
            changed = stats.changed_files,
            bytes = stats.archive_bytes,
            "sync complete"
        );
        Ok(stats)
    }

    /// Files a sync would include or skip, with their change status.
    pub fn preview(&self) -> Result<Vec<FileStatus>, SyncError> {
        file_statuses(&self.source_root, &self.filter, &self.cache, &self.settings)
    }

    fn user_name(&mut self) -> Result<&str, SyncError> {
        if self.user_name.is_none() {
            let raw = self.remote.current_user().map_err(SyncError::Identity)?;
            self.user_name = Some(sanitize_path_component(&raw));
        }
        Ok(self.user_name.as_deref().unwrap_or_default())
    }

    /// Per-user extraction directory, once the user is known.
    pub fn workspace_dir(&self) -> Option<String> {
        self.user_name
            .as_deref()
            .map(|user| workspace_dir_for(user, &self.session_id))
    }

    /// Code that unpacks the archive at `staging_path` on the cluster and
    /// makes it importable.
    pub fn setup_code(&mut self, staging_path: &str) -> Result<String, SyncError> {
        let user = self.user_name()?.to_string();
        let extract_dir = workspace_dir_for(&user, &self.session_id);
        Ok(format!(
            r#"
import os
import shutil
import sys
import zipfile

_bridge_extract_dir = "{extract_dir}"
_bridge_archive = "dbfs:{staging_path}"

if os.path.exists(_bridge_extract_dir):
    shutil.rmtree(_bridge_extract_dir)
os.makedirs(_bridge_extract_dir, exist_ok=True)

_bridge_local_zip = _bridge_extract_dir + "/{ARCHIVE_NAME}"
dbutils.fs.cp(_bridge_archive, "file:" + _bridge_local_zip)
with zipfile.ZipFile(_bridge_local_zip, "r") as _bridge_zf:
    _bridge_zf.extractall(_bridge_extract_dir)
os.remove(_bridge_local_zip)

if _bridge_extract_dir not in sys.path:
    sys.path.insert(0, _bridge_extract_dir)

del _bridge_extract_dir, _bridge_archive, _bridge_local_zip, _bridge_zf
"#
        ))
    }

    /// Delete remote artifacts and forget sync state. Failures are logged only.
    pub fn cleanup(&mut self) {
        if !self.synced {
            return;
        }
        let staging_dir = self.staging_dir();
        if let Err(err) = self.remote.delete_staging(&staging_dir) {
            warn!(path = %staging_dir, err = %err, "failed to delete staging directory");
        }
        if let Some(workspace_dir) = self.workspace_dir()
            && let Err(err) = self.remote.delete_workspace(&workspace_dir)
        {
            warn!(path = %workspace_dir, err = %err, "failed to delete workspace directory");
        }
        self.synced = false;
        self.watermark = None;
        info!(session = %self.session_id, "sync artifacts cleaned up");
    }
}

fn split_oversized(
    files: Vec<SourceFile>,
    max_file_size_mb: Option<f64>,
) -> (Vec<SourceFile>, Vec<SourceFile>) {
    let Some(limit_mb) = max_file_size_mb else {
        return (files, Vec::new());
    };
    let limit = limit_mb * BYTES_PER_MB;
    files.into_iter().partition(|file| (file.size as f64) <= limit)
}

/// List what a sync of `source_root` would include, without a session or
/// remote access. Change status is relative to the persisted cache.
pub fn preview_files(
    settings: &SyncConfig,
    source_root: &Path,
) -> Result<Vec<FileStatus>, SyncError> {
    let filter = PathFilter::new(exclusion_patterns(settings, source_root)?)?;
    let cache = FingerprintCache::load(source_root);
    file_statuses(source_root, &filter, &cache, settings)
}

fn file_statuses(
    source_root: &Path,
    filter: &PathFilter,
    cache: &FingerprintCache,
    settings: &SyncConfig,
) -> Result<Vec<FileStatus>, SyncError> {
    let files = walk_source(source_root, filter)?;
    let (included, oversized) = split_oversized(files, settings.max_file_size_mb);
    let changes = cache.changed_files(&included);

    let mut statuses: Vec<FileStatus> = included
        .into_iter()
        .map(|file| FileStatus {
            changed: changes.changed.contains(&file.relative),
            relative: file.relative,
            size: file.size,
            oversized: false,
        })
        .chain(oversized.into_iter().map(|file| FileStatus {
            relative: file.relative,
            size: file.size,
            changed: false,
            oversized: true,
        }))
        .collect();
    statuses.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(statuses)
}

fn workspace_dir_for(user: &str, session_id: &str) -> String {
    format!("/Workspace/Users/{user}/{WORKSPACE_DIR_NAME}/{session_id}")
}
