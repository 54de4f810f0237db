use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDateTime, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// On-disk layout of the server-files cache: `<root>/<domain>/<filename>`
/// with a JSON sidecar `<filename>.info` next to each file.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            root: default_cache_root()?,
        })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn domain_dir(&self, domain: &str) -> Utf8PathBuf {
        self.root.join(domain)
    }

    pub fn local_path(&self, domain: &str, filename: &str) -> Utf8PathBuf {
        self.domain_dir(domain).join(filename)
    }

    pub fn info_path(&self, domain: &str, filename: &str) -> Utf8PathBuf {
        self.domain_dir(domain).join(format!("{filename}.info"))
    }

    pub fn part_path(&self, domain: &str, filename: &str) -> Utf8PathBuf {
        self.domain_dir(domain).join(format!("{filename}.part"))
    }

    /// True when both the file and its sidecar are present.
    pub fn exists(&self, domain: &str, filename: &str) -> bool {
        self.local_path(domain, filename).as_std_path().is_file()
            && self.info_path(domain, filename).as_std_path().is_file()
    }

    pub fn ensure_domain(&self, domain: &str) -> Result<(), KiraError> {
        let dir = self.domain_dir(domain);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {dir}: {err}")))
    }

    pub fn read_info(&self, domain: &str, filename: &str) -> Result<Option<FileInfo>, KiraError> {
        let path = self.info_path(domain, filename);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        let info = serde_json::from_str(&content)
            .map_err(|err| KiraError::Filesystem(format!("parse {path}: {err}")))?;
        Ok(Some(info))
    }

    pub fn write_info(&self, domain: &str, filename: &str, info: &FileInfo) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(info)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&self.info_path(domain, filename), &content)
    }

    /// Filenames in `domain` that carry a sidecar, sorted.
    pub fn list(&self, domain: &str) -> Result<Vec<String>, KiraError> {
        let dir = self.domain_dir(domain);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("list {dir}: {err}")))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".info") {
                if dir.join(stem).as_std_path().is_file() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remove(&self, domain: &str, filename: &str) -> Result<(), KiraError> {
        for path in [
            self.local_path(domain, filename),
            self.info_path(domain, filename),
        ] {
            if path.as_std_path().exists() {
                fs::remove_file(path.as_std_path())
                    .map_err(|err| KiraError::Filesystem(format!("remove {path}: {err}")))?;
            }
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".kira-kb")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}

pub fn default_cache_root() -> Result<Utf8PathBuf, KiraError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-knowledge")).ok()
        })
        .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
}

/// Sidecar metadata describing one server file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub datetime: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub version: String,
}

impl FileInfo {
    /// Value of a typed tag such as `#organism:hsa`.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("#{key}:");
        self.tags
            .iter()
            .find_map(|tag| tag.strip_prefix(prefix.as_str()))
    }

    pub fn organism(&self) -> Option<&str> {
        self.tag_value("organism")
    }

    /// Untyped tags, i.e. those without a `#key:` prefix.
    pub fn plain_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .map(String::as_str)
            .filter(|tag| !tag.starts_with('#'))
    }

    pub fn parsed_datetime(&self) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&self.datetime) {
            return Some(parsed.with_timezone(&Utc));
        }
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(&self.datetime, format).ok())
            .map(|naive| naive.and_utc())
    }
}
