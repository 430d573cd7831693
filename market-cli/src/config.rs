//! Configuration file handling.
//!
//! The file lives at `<config dir>/market/config.toml` unless `--config`
//! points elsewhere. A missing file means defaults.

use std::path::{Path, PathBuf};

use market_client::{ClientConfig, ProxyConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

const APP_DIR: &str = "market";
const CONFIG_FILE: &str = "config.toml";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where the signed-in credential pair is kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,

    #[serde(flatten)]
    pub client: ClientConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Write the default configuration to `path` (or the default location).
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()
                .ok_or_else(|| AppError::config("no config directory on this platform"))?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::default().show()?)?;
        Ok(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply command line and environment overrides.
    pub fn with_overrides(
        mut self,
        base_url: Option<String>,
        timeout: Option<u64>,
        proxy: Option<String>,
    ) -> Self {
        if let Some(base_url) = base_url {
            self.client.base_url = base_url;
        }
        if let Some(timeout) = timeout {
            self.client.request_timeout_secs = timeout;
        }
        if let Some(proxy) = proxy {
            self.client.proxy = ProxyConfig::with_url(proxy);
        }
        self
    }

    pub fn credentials_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.credentials_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR).join(CREDENTIALS_FILE))
            .ok_or_else(|| AppError::config("no data directory on this platform"))
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_flattened_client_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
credentials_path = "/tmp/creds.json"
base_url = "https://market.example.com"
request_timeout_secs = 10

[proxy]
enabled = true
url = "http://proxy.local:3128"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.client.base_url, "https://market.example.com");
        assert_eq!(config.client.request_timeout_secs, 10);
        assert!(config.client.proxy.enabled);
        assert_eq!(
            config.credentials_path().unwrap(),
            PathBuf::from("/tmp/creds.json")
        );
    }

    #[test]
    fn test_reset_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        AppConfig::reset(Some(&path)).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_overrides_win() {
        let config = AppConfig::default().with_overrides(
            Some("http://10.0.0.2:8000".into()),
            Some(5),
            Some("http://127.0.0.1:3128".into()),
        );
        assert_eq!(config.client.base_url, "http://10.0.0.2:8000");
        assert_eq!(config.client.request_timeout_secs, 5);
        assert_eq!(
            config.client.proxy.url.as_deref(),
            Some("http://127.0.0.1:3128")
        );
    }
}
