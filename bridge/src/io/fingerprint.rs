//! Content-hash cache used to detect which files changed since the last sync.
//!
//! Stored as `{ "version": 1, "files": { "<relative path>": "<sha256 hex>" } }`
//! in the source root. Anything unreadable is discarded and treated as empty.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::io::walk::SourceFile;

/// Cache file name, relative to the source root. Always excluded from syncs.
pub const CACHE_FILE_NAME: &str = ".bridge_sync_cache.json";

/// Bump when the hash or file format changes; older caches are discarded.
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    files: BTreeMap<String, String>,
}

/// Result of comparing the current tree against the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Relative paths whose content differs from the cache, or that could not be hashed.
    pub changed: Vec<String>,
    /// Cached paths that are no longer present.
    pub removed: Vec<String>,
    /// Fresh hashes for every file that could be read.
    pub hashes: BTreeMap<String, String>,
    /// Files whose hash matched the cache.
    pub skipped: usize,
    pub total: usize,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.removed.is_empty()
    }
}

/// Persistent map of relative path to content hash.
#[derive(Debug, Clone)]
pub struct FingerprintCache {
    path: PathBuf,
    files: BTreeMap<String, String>,
}

impl FingerprintCache {
    /// Load the cache from `source_root`. Missing, corrupt, or outdated
    /// caches yield an empty cache.
    pub fn load(source_root: &Path) -> Self {
        let path = source_root.join(CACHE_FILE_NAME);
        let files = match load_strict(&path) {
            Ok(files) => files,
            Err(CacheError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                BTreeMap::new()
            }
            Err(err) => {
                warn!(err = %err, "discarding sync cache");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = files.len(), "sync cache loaded");
        Self { path, files }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, relative: &str) -> Option<&str> {
        self.files.get(relative).map(String::as_str)
    }

    /// Hash every file and compare with the cached hashes.
    pub fn changed_files(&self, files: &[SourceFile]) -> ChangeSet {
        let mut changes = ChangeSet {
            total: files.len(),
            ..ChangeSet::default()
        };
        for file in files {
            match hash_file(&file.absolute) {
                Ok(hash) => {
                    if self.get(&file.relative) == Some(hash.as_str()) {
                        changes.skipped += 1;
                    } else {
                        changes.changed.push(file.relative.clone());
                    }
                    changes.hashes.insert(file.relative.clone(), hash);
                }
                Err(err) => {
                    warn!(path = %file.absolute.display(), err = %err, "failed to hash file, treating as changed");
                    changes.changed.push(file.relative.clone());
                }
            }
        }
        changes.removed = self
            .files
            .keys()
            .filter(|path| !files.iter().any(|file| &file.relative == *path))
            .cloned()
            .collect();
        debug!(
            total = changes.total,
            changed = changes.changed.len(),
            skipped = changes.skipped,
            removed = changes.removed.len(),
            "change detection complete"
        );
        changes
    }

    /// Replace the cached hashes with those of a completed sync.
    ///
    /// Files that could not be hashed are dropped so they count as changed next time.
    pub fn record(&mut self, changes: &ChangeSet) {
        self.files = changes.hashes.clone();
    }

    /// Atomically write the cache (temp file + rename).
    pub fn save(&self) -> Result<(), CacheError> {
        let cache = CacheFile {
            version: CACHE_VERSION,
            files: self.files.clone(),
        };
        let mut buf = serde_json::to_string_pretty(&cache).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })?;
        buf.push('\n');

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf).map_err(|source| CacheError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), entries = self.files.len(), "sync cache saved");
        Ok(())
    }
}

fn load_strict(path: &Path) -> Result<BTreeMap<String, String>, CacheError> {
    let contents = fs::read_to_string(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cache: CacheFile = serde_json::from_str(&contents).map_err(|source| CacheError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if cache.version != CACHE_VERSION {
        return Err(CacheError::VersionMismatch {
            found: cache.version,
            expected: CACHE_VERSION,
        });
    }
    Ok(cache.files)
}

/// SHA-256 of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
