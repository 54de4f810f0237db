use std::fs;
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::serverfiles::{RemoteFiles, ServerFiles};
use crate::store::Store;

pub const DEFAULT_CAPACITY: usize = 30;

/// Supplies the `datetime` stamp of a `(domain, filename)` dependency.
pub trait VersionSource {
    fn datetime(&self, domain: &str, filename: &str) -> Result<String, KiraError>;
}

impl<R: RemoteFiles> VersionSource for ServerFiles<R> {
    fn datetime(&self, domain: &str, filename: &str) -> Result<String, KiraError> {
        Ok(self.info(domain, filename)?.datetime)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: Vec<String>,
    /// Least recently used first.
    entries: Vec<(String, Vec<u8>)>,
}

/// Disk-backed memoization of a deterministic function whose inputs are
/// server files. The whole cache is dropped when any dependency changes.
///
/// `compute` must not call back into the same cache instance.
pub struct ResultCache {
    path: Utf8PathBuf,
    name: String,
    dependencies: Vec<(String, String)>,
    version: String,
    capacity: usize,
    lock: Mutex<()>,
}

impl ResultCache {
    pub fn new(path: Utf8PathBuf, name: &str, dependencies: &[(&str, &str)]) -> Self {
        Self {
            path,
            name: name.to_string(),
            dependencies: dependencies
                .iter()
                .map(|(domain, filename)| (domain.to_string(), filename.to_string()))
                .collect(),
            version: "1".to_string(),
            capacity: DEFAULT_CAPACITY,
            lock: Mutex::new(()),
        }
    }

    /// Cache file placed under `<root>/cache/<name>.bin`.
    pub fn in_store(store: &Store, name: &str, dependencies: &[(&str, &str)]) -> Self {
        let path = store.root().join("cache").join(format!("{name}.bin"));
        Self::new(path, name, dependencies)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Schema version appended to the dependency tuple.
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn current_version(&self, source: &dyn VersionSource) -> Result<Vec<String>, KiraError> {
        let mut version = self
            .dependencies
            .iter()
            .map(|(domain, filename)| source.datetime(domain, filename))
            .collect::<Result<Vec<_>, _>>()?;
        version.push(self.version.clone());
        Ok(version)
    }

    pub fn get_or_compute<A, T, F>(
        &self,
        source: &dyn VersionSource,
        args: &A,
        compute: F,
    ) -> Result<T, KiraError>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, KiraError>,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current_version(source)?;
        let key = self.key(args)?;

        let mut file = self.read_file();
        if file.version != current {
            if !file.entries.is_empty() {
                debug!(cache = %self.name, "dependency versions changed, purging result cache");
            }
            file = CacheFile {
                version: current,
                entries: Vec::new(),
            };
        }

        if let Some(position) = file.entries.iter().position(|(stored, _)| *stored == key) {
            let entry = file.entries.remove(position);
            match bincode::deserialize::<T>(&entry.1) {
                Ok(value) => {
                    file.entries.push(entry);
                    self.write_file(&file)?;
                    return Ok(value);
                }
                Err(err) => {
                    warn!(cache = %self.name, error = %err, "discarding undecodable cache entry");
                }
            }
        }

        let value = compute()?;
        let payload = bincode::serialize(&value).map_err(|err| KiraError::Cache(err.to_string()))?;
        file.entries.push((key, payload));
        while file.entries.len() > self.capacity {
            file.entries.remove(0);
        }
        self.write_file(&file)?;
        Ok(value)
    }

    pub fn len(&self) -> usize {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_file().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<(), KiraError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.path.as_std_path().exists() {
            fs::remove_file(self.path.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("remove {}: {err}", self.path)))?;
        }
        Ok(())
    }

    fn key<A: Serialize + ?Sized>(&self, args: &A) -> Result<String, KiraError> {
        let rendered =
            serde_json::to_string(args).map_err(|err| KiraError::Cache(err.to_string()))?;
        Ok(format!("{}{}", self.name, rendered))
    }

    fn read_file(&self) -> CacheFile {
        let Ok(buf) = fs::read(self.path.as_std_path()) else {
            return CacheFile::default();
        };
        match bincode::deserialize(&buf) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %self.path, error = %err, "failed to decode result cache, starting empty");
                CacheFile::default()
            }
        }
    }

    fn write_file(&self, file: &CacheFile) -> Result<(), KiraError> {
        let data = bincode::serialize(file).map_err(|err| KiraError::Cache(err.to_string()))?;
        Store::write_bytes_atomic(&self.path, &data)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    struct Versions(Mutex<HashMap<(String, String), String>>);

    impl VersionSource for Versions {
        fn datetime(&self, domain: &str, filename: &str) -> Result<String, KiraError> {
            self.0
                .lock()
                .unwrap()
                .get(&(domain.to_string(), filename.to_string()))
                .cloned()
                .ok_or_else(|| KiraError::NotFound {
                    domain: domain.to_string(),
                    filename: filename.to_string(),
                })
        }
    }

    fn versions(datetime: &str) -> Versions {
        let mut map = HashMap::new();
        map.insert(
            ("Taxonomy".to_string(), "ncbi_taxonomy.tar.gz".to_string()),
            datetime.to_string(),
        );
        Versions(Mutex::new(map))
    }

    #[test]
    fn lru_evicts_oldest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cache.bin")).unwrap();
        let cache = ResultCache::new(path, "square", &[("Taxonomy", "ncbi_taxonomy.tar.gz")])
            .with_capacity(2);
        let source = versions("2020-01-01");
        let calls = Cell::new(0);
        let square = |value: u32| {
            cache
                .get_or_compute(&source, &value, || {
                    calls.set(calls.get() + 1);
                    Ok(value * value)
                })
                .unwrap()
        };

        assert_eq!(square(2), 4);
        assert_eq!(square(3), 9);
        assert_eq!(square(2), 4);
        assert_eq!(calls.get(), 2);
        assert_eq!(square(4), 16);
        assert_eq!(cache.len(), 2);
        // 3 was least recently used
        assert_eq!(square(3), 9);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn missing_dependency_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cache.bin")).unwrap();
        let cache = ResultCache::new(path, "f", &[("GO", "missing.tar.gz")]);
        let err = cache
            .get_or_compute(&versions("x"), &1u8, || Ok(1u8))
            .unwrap_err();
        assert!(matches!(err, KiraError::NotFound { .. }));
    }
}
