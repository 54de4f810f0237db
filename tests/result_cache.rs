mod common;

use std::cell::Cell;

use camino::Utf8PathBuf;

use kira_knowledge::progress::NoProgress;
use kira_knowledge::result_cache::ResultCache;
use kira_knowledge::serverfiles::ServerFiles;
use kira_knowledge::store::Store;

use common::MemoryRemote;

fn setup() -> (tempfile::TempDir, ServerFiles<MemoryRemote>) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let files = ServerFiles::new(Store::new_with_root(root), MemoryRemote::new());
    files.remote().publish("GO", "dict.tab", b"a\tb\n", "1");
    files.ensure("GO", "dict.tab", &NoProgress).unwrap();
    (temp, files)
}

#[test]
fn same_args_hit_the_cache() {
    let (_temp, files) = setup();
    let cache = ResultCache::in_store(files.store(), "lengths", &[("GO", "dict.tab")]);
    let calls = Cell::new(0);
    let compute = |word: &str| {
        cache
            .get_or_compute(&files, word, || {
                calls.set(calls.get() + 1);
                Ok(word.len())
            })
            .unwrap()
    };

    assert_eq!(compute("abc"), 3);
    assert_eq!(compute("abc"), 3);
    assert_eq!(compute("de"), 2);
    assert_eq!(calls.get(), 2);
    assert_eq!(cache.len(), 2);
}

#[test]
fn dependency_update_recomputes_once() {
    let (_temp, files) = setup();
    let cache = ResultCache::in_store(files.store(), "lengths", &[("GO", "dict.tab")]);
    let calls = Cell::new(0);
    let compute = || {
        cache
            .get_or_compute(&files, &("abc", 1u8), || {
                calls.set(calls.get() + 1);
                Ok(vec!["a".to_string(), "b".to_string()])
            })
            .unwrap()
    };

    let first = compute();
    assert_eq!(compute(), first);
    assert_eq!(calls.get(), 1);

    files.remote().publish("GO", "dict.tab", b"a\tb\tc\n", "2");
    files.ensure("GO", "dict.tab", &NoProgress).unwrap();
    assert_eq!(compute(), first);
    assert_eq!(compute(), first);
    assert_eq!(calls.get(), 2);
}

#[test]
fn entries_survive_a_new_instance() {
    let (_temp, files) = setup();
    let calls = Cell::new(0);
    for _ in 0..2 {
        let cache = ResultCache::in_store(files.store(), "persisted", &[("GO", "dict.tab")]);
        let value = cache
            .get_or_compute(&files, &42u32, || {
                calls.set(calls.get() + 1);
                Ok(42u64 * 2)
            })
            .unwrap();
        assert_eq!(value, 84);
    }
    assert_eq!(calls.get(), 1);
}

#[test]
fn schema_version_invalidates_entries() {
    let (_temp, files) = setup();
    let calls = Cell::new(0);
    for version in ["1", "2"] {
        let cache = ResultCache::in_store(files.store(), "versioned", &[("GO", "dict.tab")])
            .with_version(version);
        cache
            .get_or_compute(&files, "key", || {
                calls.set(calls.get() + 1);
                Ok(version.to_string())
            })
            .unwrap();
    }
    assert_eq!(calls.get(), 2);
}
