//! Zip packaging of the synced tree.

use std::fs::File;
use std::io::{self, Cursor};

use tracing::debug;
use zip::write::FileOptions;

use crate::error::SyncError;
use crate::io::walk::SourceFile;

/// Name of the archive inside the staging directory.
pub const ARCHIVE_NAME: &str = "project.zip";

/// Build a deflated zip of `files` in memory, entries named by relative path.
pub fn build_archive(files: &[SourceFile]) -> Result<Vec<u8>, SyncError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for file in files {
        zip.start_file(file.relative.as_str(), options)?;
        let mut source = File::open(&file.absolute).map_err(|source| SyncError::Io {
            path: file.absolute.clone(),
            source,
        })?;
        io::copy(&mut source, &mut zip).map_err(|source| SyncError::Io {
            path: file.absolute.clone(),
            source,
        })?;
    }

    let bytes = zip.finish()?.into_inner();
    debug!(entries = files.len(), bytes = bytes.len(), "archive built");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;

    #[test]
    fn archive_contains_files_under_relative_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("pkg")).expect("mkdir");
        fs::write(temp.path().join("pkg/mod.py"), "VALUE = 42\n").expect("write");

        let files = vec![SourceFile {
            relative: "pkg/mod.py".to_string(),
            absolute: temp.path().join("pkg/mod.py"),
            size: 11,
            modified: None,
        }];
        let bytes = build_archive(&files).expect("archive");

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("open");
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_name("pkg/mod.py").expect("entry");
        let mut contents = String::new();
        entry.read_to_string(&mut contents).expect("read");
        assert_eq!(contents, "VALUE = 42\n");
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = vec![SourceFile {
            relative: "gone.py".to_string(),
            absolute: temp.path().join("gone.py"),
            size: 0,
            modified: None,
        }];
        let err = build_archive(&files).expect_err("missing file");
        assert!(matches!(err, SyncError::Io { .. }));
    }
}
