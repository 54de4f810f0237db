#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use kira_knowledge::error::KiraError;
use kira_knowledge::progress::ProgressSink;
use kira_knowledge::serverfiles::RemoteFiles;
use kira_knowledge::store::FileInfo;

/// In-process server holding files in memory.
#[derive(Default)]
pub struct MemoryRemote {
    files: Mutex<HashMap<(String, String), (FileInfo, Vec<u8>)>>,
    pub downloads: AtomicUsize,
    pub offline: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, domain: &str, filename: &str, content: &[u8], version: &str) {
        let info = FileInfo {
            title: filename.to_string(),
            tags: Vec::new(),
            datetime: format!("2024-01-0{version} 00:00:00"),
            size: content.len() as u64,
            version: version.to_string(),
        };
        self.files.lock().unwrap().insert(
            (domain.to_string(), filename.to_string()),
            (info, content.to_vec()),
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), KiraError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(KiraError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    fn entry(&self, domain: &str, filename: &str) -> Result<(FileInfo, Vec<u8>), KiraError> {
        self.check_online()?;
        self.files
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

impl RemoteFiles for MemoryRemote {
    fn info(&self, domain: &str, filename: &str) -> Result<FileInfo, KiraError> {
        Ok(self.entry(domain, filename)?.0)
    }

    fn list(&self, domain: &str) -> Result<Vec<String>, KiraError> {
        self.check_online()?;
        let mut names = self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|(stored, _)| stored == domain)
            .map(|(_, filename)| filename.clone())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn download(
        &self,
        domain: &str,
        filename: &str,
        destination: &mut dyn Write,
        progress: &dyn ProgressSink,
    ) -> Result<u64, KiraError> {
        let (_, content) = self.entry(domain, filename)?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        progress.progress(0.0);
        destination
            .write_all(&content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        progress.progress(100.0);
        Ok(content.len() as u64)
    }
}

/// `A`, `B is_a A`, `C is_a B`, with `B` in the `goslim_generic` subset.
pub const SMALL_OBO: &str = "format-version: 1.2
data-version: releases/2024-01-01
subsetdef: goslim_generic \"Generic GO slim\"

[Term]
id: GO:0000001
name: alpha
namespace: biological_process

[Term]
id: GO:0000002
name: beta
namespace: biological_process
alt_id: GO:0000020
subset: goslim_generic
is_a: GO:0000001 ! alpha

[Term]
id: GO:0000003
name: gamma
namespace: biological_process
is_a: GO:0000002 ! beta

[Typedef]
id: part_of
name: part of
is_transitive: true
";

pub const A: &str = "GO:0000001";
pub const B: &str = "GO:0000002";
pub const C: &str = "GO:0000003";

pub fn gaf_line(symbol: &str, term: &str, evidence: &str, aspect: &str) -> String {
    format!(
        "TEST\tID_{symbol}\t{symbol}\t\t{term}\tREF:1\t{evidence}\t\t{aspect}\t{symbol} protein\t{symbol}_alias\tgene\ttaxon:9606\t20240101\tTEST"
    )
}
