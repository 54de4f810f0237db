use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::error::KiraError;

fn member_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads members of a `.tar.gz` archive, keyed by base file name.
/// An empty `members` slice reads every regular file.
pub fn read_tar_gz(path: &Path, members: &[&str]) -> Result<BTreeMap<String, Vec<u8>>, KiraError> {
    let file = fs::File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut result = BTreeMap::new();

    let entries = archive
        .entries()
        .map_err(|err| KiraError::Archive(format!("{}: {err}", path.display())))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|err| KiraError::Archive(format!("{}: {err}", path.display())))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map(|entry_path| member_name(&entry_path))
            .map_err(|err| KiraError::Archive(err.to_string()))?;
        if !members.is_empty() && !members.contains(&name.as_str()) {
            continue;
        }
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|err| KiraError::Archive(format!("read {name}: {err}")))?;
        debug!(member = %name, bytes = contents.len(), "extracted archive member");
        result.insert(name, contents);
    }

    let missing = members
        .iter()
        .filter(|name| !result.contains_key(**name))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(KiraError::Archive(format!(
            "missing {missing:?} in {}",
            path.display()
        )));
    }
    Ok(result)
}

pub fn read_tar_gz_member(path: &Path, member: &str) -> Result<Vec<u8>, KiraError> {
    let mut members = read_tar_gz(path, &[member])?;
    members
        .remove(member)
        .ok_or_else(|| KiraError::Archive(format!("missing {member} in {}", path.display())))
}

/// Reads a plain, gzip-compressed or single-member `.tar.gz` file.
pub fn read_any(path: &Path) -> Result<Vec<u8>, KiraError> {
    let name = member_name(path);
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let members = read_tar_gz(path, &[])?;
        return members
            .into_values()
            .next()
            .ok_or_else(|| KiraError::Archive(format!("empty archive {}", path.display())));
    }
    let raw = fs::read(path)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
    if name.ends_with(".gz") {
        return decompress_gzip(&raw);
    }
    Ok(raw)
}

pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, KiraError> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|err| KiraError::Archive(format!("gzip: {err}")))?;
    Ok(decompressed)
}

/// Builds a `.tar.gz` image containing `members` in order.
pub fn tar_gz_bytes(members: &[(&str, &[u8])]) -> Result<Vec<u8>, KiraError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *content)
            .map_err(|err| KiraError::Archive(format!("append {name}: {err}")))?;
    }
    let encoder = builder
        .into_inner()
        .map_err(|err| KiraError::Archive(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| KiraError::Archive(err.to_string()))
}

pub fn gzip_bytes(content: &[u8]) -> Result<Vec<u8>, KiraError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .map_err(|err| KiraError::Archive(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| KiraError::Archive(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tar_gz_members_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack.tar.gz");
        let bytes = tar_gz_bytes(&[
            ("a.txt", b"alpha".as_slice()),
            ("nested/b.txt", b"beta".as_slice()),
        ])
        .unwrap();
        fs::write(&path, bytes).unwrap();

        let members = read_tar_gz(&path, &[]).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(read_tar_gz_member(&path, "b.txt").unwrap(), b"beta");
        assert!(read_tar_gz(&path, &["c.txt"]).is_err());
    }

    #[test]
    fn read_any_handles_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.gz");
        fs::write(&path, gzip_bytes(b"hello").unwrap()).unwrap();
        assert_eq!(read_any(&path).unwrap(), b"hello");
    }
}
