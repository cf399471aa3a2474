//! CLI configuration.
//!
//! Reads JSON from `~/.config/photoloom/config.json` unless `--config`
//! points elsewhere. Every section is optional and falls back to defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use photoloom_notify::WebhookConfig;
use photoloom_storage::StorageConfig;
use photoloom_transfer::ServiceConfig;
use photoloom_workers::WorkerPoolsConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    pub storage: StorageConfig,
    pub upload: ServiceConfig,
    pub pools: WorkerPoolsConfig,
    pub webhook: WebhookConfig,
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. A missing default file yields defaults,
    /// and a file that fails to parse is logged and ignored.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("config file {} does not exist", p.display());
                }
                p.to_path_buf()
            }
            None => config_file_path(),
        };

        if !file_path.exists() {
            tracing::debug!(path = %file_path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        match serde_json::from_str::<CliConfig>(&content) {
            Ok(config) => {
                if let StorageConfig::S3(settings) = &config.storage {
                    settings
                        .validate()
                        .with_context(|| format!("invalid storage in {}", file_path.display()))?;
                }
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %file_path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }
}

pub fn config_file_path() -> PathBuf {
    config_base_dir().join("photoloom").join("config.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"storage":{{"type":"memory"}},"upload":{{"chunkSize":1048576}}}}"#
        )
        .unwrap();

        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.upload.chunk_size, 1024 * 1024);
        assert_eq!(config.upload.presign_ttl_secs, 3600);
        assert_eq!(config.pools, WorkerPoolsConfig::default());
        assert!(config.webhook.base_url.is_none());
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_eq!(CliConfig::load(Some(file.path())).unwrap(), CliConfig::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("nope.json"))).is_err());
    }
}
