//! Sync engine tests across edits and sessions.
//!
//! Exercises change detection against real files: edits, deletions,
//! `.gitignore` handling, and cache persistence between engine instances.

use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::time::{Duration, SystemTime};

use bridge::io::config::SyncConfig;
use bridge::io::fingerprint::CACHE_FILE_NAME;
use bridge::sync::SyncEngine;
use bridge::test_support::{ScriptedRemote, TestProject};

fn engine<'a>(
    remote: &'a ScriptedRemote,
    project: &TestProject,
    settings: SyncConfig,
) -> SyncEngine<&'a ScriptedRemote> {
    SyncEngine::new(remote, settings, project.root().to_path_buf(), "sync0001").expect("engine")
}

/// Push a file's mtime forward so the change is visible regardless of
/// filesystem timestamp granularity.
fn bump_mtime(project: &TestProject, relative: &str) {
    let file = File::options()
        .write(true)
        .open(project.root().join(relative))
        .expect("open");
    file.set_modified(SystemTime::now() + Duration::from_secs(10))
        .expect("set mtime");
}

fn archive_entries(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).expect("zip");
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).expect("entry");
        let mut contents = String::new();
        entry.read_to_string(&mut contents).expect("read");
        entries.push((entry.name().to_string(), contents));
    }
    entries.sort();
    entries
}

/// Edit cycle within one session:
/// 1. First sync uploads everything.
/// 2. Touching a file without changing content re-checks but skips the upload.
/// 3. Editing a file uploads a fresh full archive with the new content.
/// 4. Deleting a file uploads an archive without it.
#[test]
fn edits_within_a_session_drive_uploads() {
    let remote = ScriptedRemote::new();
    let project = TestProject::new();
    project.write("app/main.py", "from app import util\n");
    project.write("app/util.py", "VALUE = 1\n");
    let mut engine = engine(&remote, &project, SyncConfig::default());

    let first = engine.sync().expect("first sync");
    assert!(first.uploaded);
    assert_eq!(first.changed_files, 2);
    assert!(!engine.needs_sync());

    bump_mtime(&project, "app/util.py");
    assert!(engine.needs_sync());
    let touched = engine.sync().expect("touch sync");
    assert!(!touched.uploaded);
    assert_eq!(touched.skipped_files, 2);
    assert_eq!(remote.uploads().len(), 1);

    project.write("app/util.py", "VALUE = 2\n");
    bump_mtime(&project, "app/util.py");
    assert!(engine.needs_sync());
    let edited = engine.sync().expect("edit sync");
    assert!(edited.uploaded);
    assert_eq!(edited.changed_files, 1);
    let uploads = remote.uploads();
    assert_eq!(
        archive_entries(&uploads[1].1),
        vec![
            ("app/main.py".to_string(), "from app import util\n".to_string()),
            ("app/util.py".to_string(), "VALUE = 2\n".to_string()),
        ]
    );

    fs::remove_file(project.root().join("app/util.py")).expect("remove");
    let removed = engine.sync().expect("delete sync");
    assert!(removed.uploaded);
    assert_eq!(removed.removed_files, 1);
    let uploads = remote.uploads();
    assert_eq!(archive_entries(&uploads[2].1).len(), 1);
}

/// The persisted cache survives the engine: a later session sees no content
/// changes but still uploads, because its staging area starts empty.
#[test]
fn cache_persists_across_sessions() {
    let remote = ScriptedRemote::new();
    let project = TestProject::new();
    project.write("main.py", "print('hi')\n");
    engine(&remote, &project, SyncConfig::default())
        .sync()
        .expect("session one");
    assert!(project.root().join(CACHE_FILE_NAME).is_file());

    let mut second = engine(&remote, &project, SyncConfig::default());
    assert!(second.needs_sync());
    let stats = second.sync().expect("session two");
    assert!(stats.uploaded);
    assert_eq!(stats.changed_files, 0);
    assert_eq!(stats.skipped_files, 1);
}

/// `.gitignore` patterns apply by default, can be re-included by user
/// patterns, and are ignored when `use_gitignore` is off.
#[test]
fn gitignore_patterns_apply_before_user_patterns() {
    let remote = ScriptedRemote::new();
    let project = TestProject::new();
    project.write(".gitignore", "*.log\nbuild/\n");
    project.write("main.py", "x = 1\n");
    project.write("debug.log", "noise\n");
    project.write("keep.log", "important\n");
    project.write("build/out.py", "generated\n");

    let mut with_gitignore = engine(
        &remote,
        &project,
        SyncConfig {
            exclude: vec!["!keep.log".to_string()],
            ..SyncConfig::default()
        },
    );
    with_gitignore.sync().expect("sync");
    let names: Vec<String> = archive_entries(&remote.uploads()[0].1)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec![".gitignore", "keep.log", "main.py"]);

    let remote = ScriptedRemote::new();
    let mut without_gitignore = engine(
        &remote,
        &project,
        SyncConfig {
            use_gitignore: false,
            ..SyncConfig::default()
        },
    );
    without_gitignore.sync().expect("sync");
    let names: Vec<String> = archive_entries(&remote.uploads()[0].1)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(
        names,
        vec![".gitignore", "build/out.py", "debug.log", "keep.log", "main.py"]
    );
}

/// A nested source directory is synced relative to itself.
#[test]
fn nested_source_directory_is_the_archive_root() {
    let remote = ScriptedRemote::new();
    let project = TestProject::new();
    project.write("README.md", "top level\n");
    project.write("src/lib/mod.py", "A = 1\n");
    let mut engine = SyncEngine::new(
        &remote,
        SyncConfig::default(),
        project.root().join("src"),
        "sync0002",
    )
    .expect("engine");

    engine.sync().expect("sync");
    let names: Vec<String> = archive_entries(&remote.uploads()[0].1)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["lib/mod.py"]);
    assert!(project.root().join("src").join(CACHE_FILE_NAME).is_file());
}
