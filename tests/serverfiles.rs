mod common;

use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_knowledge::error::KiraError;
use kira_knowledge::progress::NoProgress;
use kira_knowledge::serverfiles::ServerFiles;
use kira_knowledge::store::Store;

use common::MemoryRemote;

fn files(root: &tempfile::TempDir) -> ServerFiles<MemoryRemote> {
    let root = Utf8PathBuf::from_path_buf(root.path().to_path_buf()).unwrap();
    ServerFiles::new(Store::new_with_root(root), MemoryRemote::new())
}

#[test]
fn ensure_downloads_once_and_writes_sidecar() {
    let temp = tempfile::tempdir().unwrap();
    let files = files(&temp);
    files.remote().publish("GO", "terms.txt", b"first", "1");

    let path = files.ensure("GO", "terms.txt", &NoProgress).unwrap();
    assert_eq!(path, files.local_path("GO", "terms.txt"));
    assert_eq!(fs::read(path.as_std_path()).unwrap(), b"first");
    files.ensure("GO", "terms.txt", &NoProgress).unwrap();
    assert_eq!(files.remote().download_count(), 1);

    let info = files.local_info("GO", "terms.txt").unwrap().unwrap();
    assert_eq!(info.version, "1");
    assert_eq!(info.size, 5);
    assert!(!files.store().part_path("GO", "terms.txt").as_std_path().exists());
}

#[test]
fn newer_server_version_is_fetched() {
    let temp = tempfile::tempdir().unwrap();
    let files = files(&temp);
    files.remote().publish("GO", "terms.txt", b"first", "1");
    files.ensure("GO", "terms.txt", &NoProgress).unwrap();

    files.remote().publish("GO", "terms.txt", b"second", "2");
    let path = files.ensure("GO", "terms.txt", &NoProgress).unwrap();
    assert_eq!(fs::read(path.as_std_path()).unwrap(), b"second");
    assert_eq!(files.remote().download_count(), 2);
}

#[test]
fn unreachable_server_keeps_local_copy() {
    let temp = tempfile::tempdir().unwrap();
    let files = files(&temp);
    files.remote().publish("GO", "terms.txt", b"first", "1");
    files.ensure("GO", "terms.txt", &NoProgress).unwrap();

    files.remote().set_offline(true);
    let path = files.ensure("GO", "terms.txt", &NoProgress).unwrap();
    assert_eq!(fs::read(path.as_std_path()).unwrap(), b"first");

    assert_matches!(
        files.ensure("GO", "other.txt", &NoProgress),
        Err(KiraError::Network(_))
    );
}

#[test]
fn missing_remote_file_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let files = files(&temp);
    assert_matches!(
        files.ensure("GO", "absent.txt", &NoProgress),
        Err(KiraError::NotFound { .. })
    );
    assert!(!files.local_path("GO", "absent.txt").as_std_path().exists());
}

#[test]
fn concurrent_ensure_downloads_once() {
    let temp = tempfile::tempdir().unwrap();
    let files = Arc::new(files(&temp));
    let content = vec![7u8; 64 * 1024];
    files.remote().publish("Taxonomy", "big.db", &content, "1");

    let handles = (0..8)
        .map(|_| {
            let files = Arc::clone(&files);
            thread::spawn(move || {
                let path = files.ensure("Taxonomy", "big.db", &NoProgress).unwrap();
                fs::read(path.as_std_path()).unwrap()
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), content);
    }
    assert_eq!(files.remote().download_count(), 1);
}

#[test]
fn progress_is_monotone_and_completes() {
    let temp = tempfile::tempdir().unwrap();
    let files = files(&temp);
    files.remote().publish("GO", "terms.txt", b"payload", "1");

    let seen = Mutex::new(Vec::new());
    let record = |percent: f64| seen.lock().unwrap().push(percent);
    files.ensure("GO", "terms.txt", &record).unwrap();

    let seen = seen.into_inner().unwrap();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(seen.iter().all(|percent| (0.0..=100.0).contains(percent)));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[test]
fn list_remove_and_forced_download() {
    let temp = tempfile::tempdir().unwrap();
    let files = files(&temp);
    files.remote().publish("GO", "a.txt", b"a", "1");
    files.remote().publish("GO", "b.txt", b"b", "1");

    files.ensure("GO", "a.txt", &NoProgress).unwrap();
    assert_eq!(files.list("GO").unwrap(), vec!["a.txt"]);
    assert_eq!(files.list_remote("GO").unwrap(), vec!["a.txt", "b.txt"]);

    files.download("GO", "a.txt", &NoProgress).unwrap();
    assert_eq!(files.remote().download_count(), 2);

    files.remove("GO", "a.txt").unwrap();
    assert!(files.list("GO").unwrap().is_empty());
    assert_eq!(files.info("GO", "b.txt").unwrap().version, "1");
}
