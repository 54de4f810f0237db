use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};

use crate::config::ResolvedConfig;
use crate::error::KiraError;
use crate::progress::ProgressSink;
use crate::store::{FileInfo, Store};

/// Read access to a remote server-files repository.
pub trait RemoteFiles: Send + Sync {
    fn info(&self, domain: &str, filename: &str) -> Result<FileInfo, KiraError>;
    fn list(&self, domain: &str) -> Result<Vec<String>, KiraError>;
    /// Streams the file body into `destination`, returning the byte count.
    fn download(
        &self,
        domain: &str,
        filename: &str,
        destination: &mut dyn Write,
        progress: &dyn ProgressSink,
    ) -> Result<u64, KiraError>;
}

#[derive(Clone)]
pub struct HttpRemoteFiles {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpRemoteFiles {
    pub fn new(config: &ResolvedConfig) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-kb/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|err| KiraError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}/{}", self.base_url, path));
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    fn send(&self, path: &str, domain: &str, filename: &str) -> Result<Response, KiraError> {
        debug!(path, "server files request");
        let response = self
            .get(path)
            .send()
            .map_err(|err| KiraError::Network(format!("{domain}/{filename}: {err}")))?;
        check_status(response, domain, filename)
    }
}

fn check_status(response: Response, domain: &str, filename: &str) -> Result<Response, KiraError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(KiraError::NotAuthorized {
            domain: domain.to_string(),
            filename: filename.to_string(),
        }),
        StatusCode::NOT_FOUND => Err(KiraError::NotFound {
            domain: domain.to_string(),
            filename: filename.to_string(),
        }),
        status => {
            let message = response
                .text()
                .unwrap_or_else(|_| "server files request failed".to_string());
            Err(KiraError::Network(format!(
                "{domain}/{filename}: status {}: {message}",
                status.as_u16()
            )))
        }
    }
}

impl RemoteFiles for HttpRemoteFiles {
    fn info(&self, domain: &str, filename: &str) -> Result<FileInfo, KiraError> {
        let response = self.send(&format!("info/{domain}/{filename}"), domain, filename)?;
        response
            .json::<FileInfo>()
            .map_err(|err| KiraError::Network(format!("{domain}/{filename}: {err}")))
    }

    fn list(&self, domain: &str) -> Result<Vec<String>, KiraError> {
        let response = self.send(&format!("list/{domain}"), domain, "")?;
        let mut files = response
            .json::<Vec<String>>()
            .map_err(|err| KiraError::Network(format!("{domain}: {err}")))?;
        files.sort();
        Ok(files)
    }

    fn download(
        &self,
        domain: &str,
        filename: &str,
        destination: &mut dyn Write,
        progress: &dyn ProgressSink,
    ) -> Result<u64, KiraError> {
        let mut response = self.send(&format!("download/{domain}/{filename}"), domain, filename)?;
        let total = response.content_length();
        let mut buffer = vec![0u8; 64 * 1024];
        let mut written = 0u64;
        let mut last = -1i64;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| KiraError::Network(format!("{domain}/{filename}: {err}")))?;
            if read == 0 {
                break;
            }
            destination
                .write_all(&buffer[..read])
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            written += read as u64;
            if let Some(total) = total.filter(|total| *total > 0) {
                let percent = (written.min(total) * 100 / total) as i64;
                if percent > last {
                    last = percent;
                    progress.progress(percent as f64);
                }
            }
        }
        if last < 100 {
            progress.progress(100.0);
        }
        Ok(written)
    }
}

/// Versioned local mirror of a remote server-files repository.
pub struct ServerFiles<R: RemoteFiles> {
    store: Store,
    remote: R,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<R: RemoteFiles> ServerFiles<R> {
    pub fn new(store: Store, remote: R) -> Self {
        Self {
            store,
            remote,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn local_path(&self, domain: &str, filename: &str) -> Utf8PathBuf {
        self.store.local_path(domain, filename)
    }

    pub fn local_info(&self, domain: &str, filename: &str) -> Result<Option<FileInfo>, KiraError> {
        if !self.store.exists(domain, filename) {
            return Ok(None);
        }
        self.store.read_info(domain, filename)
    }

    /// Metadata of the local copy when present, otherwise of the server's.
    pub fn info(&self, domain: &str, filename: &str) -> Result<FileInfo, KiraError> {
        match self.local_info(domain, filename)? {
            Some(info) => Ok(info),
            None => self.remote.info(domain, filename),
        }
    }

    /// Locally installed files of `domain`.
    pub fn list(&self, domain: &str) -> Result<Vec<String>, KiraError> {
        self.store.list(domain)
    }

    pub fn list_remote(&self, domain: &str) -> Result<Vec<String>, KiraError> {
        self.remote.list(domain)
    }

    /// Returns the local path of `(domain, filename)`, downloading it first
    /// when it is missing or older than the server's copy.
    pub fn ensure(
        &self,
        domain: &str,
        filename: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, KiraError> {
        let lock = self.file_lock(domain, filename);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.local_path(domain, filename);
        let Some(local) = self.local_info(domain, filename)? else {
            let remote = self.remote.info(domain, filename)?;
            self.download_locked(domain, filename, remote, progress)?;
            return Ok(path);
        };

        match self.remote.info(domain, filename) {
            Ok(remote) if is_outdated(&local, &remote) => {
                info!(domain, filename, local = %local.version, remote = %remote.version, "updating server file");
                self.download_locked(domain, filename, remote, progress)?;
            }
            Ok(_) => debug!(domain, filename, "server file up to date"),
            Err(err) => {
                warn!(domain, filename, error = %err, "unable to check server version, using local copy");
            }
        }
        Ok(path)
    }

    /// Unconditionally refreshes the local copy from the server.
    pub fn download(
        &self,
        domain: &str,
        filename: &str,
        progress: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, KiraError> {
        let lock = self.file_lock(domain, filename);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let remote = self.remote.info(domain, filename)?;
        self.download_locked(domain, filename, remote, progress)?;
        Ok(self.local_path(domain, filename))
    }

    pub fn remove(&self, domain: &str, filename: &str) -> Result<(), KiraError> {
        let lock = self.file_lock(domain, filename);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(domain, filename)
    }

    fn file_lock(&self, domain: &str, filename: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(format!("{domain}/{filename}"))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn download_locked(
        &self,
        domain: &str,
        filename: &str,
        mut remote: FileInfo,
        progress: &dyn ProgressSink,
    ) -> Result<(), KiraError> {
        self.store.ensure_domain(domain)?;
        let part = self.store.part_path(domain, filename);
        let target = self.local_path(domain, filename);

        let result = (|| {
            let mut file = File::create(part.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("create {part}: {err}")))?;
            let size = self.remote.download(domain, filename, &mut file, progress)?;
            file.sync_all()
                .map_err(|err| KiraError::Filesystem(format!("sync {part}: {err}")))?;
            Ok::<u64, KiraError>(size)
        })();

        let size = match result {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(part.as_std_path());
                return Err(err);
            }
        };

        fs::rename(part.as_std_path(), target.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("rename {part}: {err}")))?;
        if remote.size == 0 {
            remote.size = size;
        }
        self.store.write_info(domain, filename, &remote)?;
        info!(domain, filename, size, "installed server file");
        Ok(())
    }
}

/// True when `local` is older than `remote`. Versions are compared first;
/// files without versions fall back to their timestamps.
pub fn is_outdated(local: &FileInfo, remote: &FileInfo) -> bool {
    if !local.version.is_empty() && !remote.version.is_empty() {
        return compare_versions(&local.version, &remote.version).is_lt();
    }
    match (local.parsed_datetime(), remote.parsed_datetime()) {
        (Some(local), Some(remote)) => local < remote,
        _ => local.datetime < remote.datetime,
    }
}

/// Orders dotted version strings segment by segment, numerically where both
/// segments are numbers.
pub fn compare_versions(left: &str, right: &str) -> std::cmp::Ordering {
    let mut left_parts = left.split(['.', '-']);
    let mut right_parts = right.split(['.', '-']);
    loop {
        match (left_parts.next(), right_parts.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(a), Some(b)) => {
                let ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(a), Ok(b)) => a.cmp(&b),
                    _ => a.cmp(b),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
        }
    }
}
