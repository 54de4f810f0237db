use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::store::default_cache_root;

pub const CONFIG_FILE: &str = "kira-kb.json";
pub const DEFAULT_SERVER_URL: &str = "http://orange.biolab.si/serverfiles-bio/";
pub const PASSWORD_ENV: &str = "KIRA_KB_PASSWORD";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub cache_root: Option<String>,
    #[serde(default)]
    pub result_cache_capacity: Option<usize>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub server_url: String,
    pub cache_root: Utf8PathBuf,
    pub result_cache_capacity: usize,
    pub http_timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `kira-kb.json` from the working directory when it exists.
    /// Without either, defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }
        if path.is_some() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let cache_root = match config.cache_root {
            Some(root) => Utf8PathBuf::from(root),
            None => default_cache_root()?,
        };
        let password = std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            server_url: config
                .server_url
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            cache_root,
            result_cache_capacity: config.result_cache_capacity.unwrap_or(30).max(1),
            http_timeout_secs: config.http_timeout_secs.unwrap_or(60),
            username: config.username.filter(|name| !name.trim().is_empty()),
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = Config {
            cache_root: Some("/tmp/kira-kb".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.server_url, DEFAULT_SERVER_URL);
        assert_eq!(resolved.result_cache_capacity, 30);
        assert_eq!(resolved.http_timeout_secs, 60);
        assert_eq!(resolved.cache_root, Utf8PathBuf::from("/tmp/kira-kb"));
    }

    #[test]
    fn blank_username_is_ignored() {
        let config = Config {
            cache_root: Some("/tmp/kira-kb".to_string()),
            username: Some("  ".to_string()),
            result_cache_capacity: Some(0),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.username, None);
        assert_eq!(resolved.result_cache_capacity, 1);
    }
}
