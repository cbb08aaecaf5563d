//! Filtered traversal of the sync source tree.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::filter::PathFilter;
use crate::core::path::relative_slash_path;
use crate::error::SyncError;

/// A regular file selected for syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Slash-separated path relative to the source root.
    pub relative: String,
    pub absolute: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Walk `root`, pruning excluded directories and skipping excluded files.
///
/// Symlinks are not followed and only regular files are returned, sorted by
/// relative path. Unreadable entries are logged and skipped.
pub fn walk_source(root: &Path, filter: &PathFilter) -> Result<Vec<SourceFile>, SyncError> {
    if !root.is_dir() {
        return Err(SyncError::SourceMissing(root.to_path_buf()));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_pruned(root, entry, filter));

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_slash_path(root, entry.path()) else {
            continue;
        };
        if filter.is_file_excluded(&relative) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %entry.path().display(), err = %err, "skipping file without metadata");
                continue;
            }
        };
        files.push(SourceFile {
            relative,
            absolute: entry.path().to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    debug!(root = %root.display(), files = files.len(), "source walk complete");
    Ok(files)
}

fn is_pruned(root: &Path, entry: &DirEntry, filter: &PathFilter) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    relative_slash_path(root, entry.path()).is_some_and(|relative| filter.is_dir_pruned(&relative))
}

/// Most recent modification time among `files`.
pub fn latest_mtime(files: &[SourceFile]) -> Option<SystemTime> {
    files.iter().filter_map(|file| file.modified).max()
}

/// Total size of `files` in bytes.
pub fn total_size(files: &[SourceFile]) -> u64 {
    files.iter().map(|file| file.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn relatives(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|file| file.relative.as_str()).collect()
    }

    #[test]
    fn walk_prunes_directories_and_skips_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "main.py", "print(1)");
        touch(temp.path(), "pkg/util.py", "x = 1");
        touch(temp.path(), "pkg/util.pyc", "bytecode");
        touch(temp.path(), ".venv/lib/site.py", "ignored");
        touch(temp.path(), "pkg/__pycache__/util.cpython-311.pyc", "ignored");

        let filter = PathFilter::new(["*.pyc", ".venv/**", "__pycache__/"]).expect("filter");
        let files = walk_source(temp.path(), &filter).expect("walk");
        assert_eq!(relatives(&files), vec!["main.py", "pkg/util.py"]);
        assert_eq!(files[0].size, 8);
        assert_eq!(total_size(&files), 13);
        assert!(latest_mtime(&files).is_some());
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = walk_source(&temp.path().join("absent"), &PathFilter::default())
            .expect_err("missing root");
        assert!(matches!(err, SyncError::SourceMissing(_)));
    }

    #[test]
    fn empty_tree_has_no_watermark() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = walk_source(temp.path(), &PathFilter::default()).expect("walk");
        assert!(files.is_empty());
        assert_eq!(latest_mtime(&files), None);
    }
}
