//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ApiError, Result};

/// Default backend address used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Path of the realtime endpoint, relative to the base URL.
pub const DEFAULT_REALTIME_PATH: &str = "/socket-message";

/// Outgoing proxy. Disabled means direct connections, ignoring the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Route requests through a proxy at all.
    #[serde(default)]
    pub enabled: bool,
    /// `http` or `https` URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Basic auth, used only together with `password`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Without a URL, fall back to the system settings.
    #[serde(default)]
    pub use_system_proxy: bool,
}

impl ProxyConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled proxy at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Settings for [`MarketClient`](crate::MarketClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base URL; REST paths are appended to it.
    pub base_url: String,
    /// Realtime endpoint path.
    pub realtime_path: String,
    /// Per-request timeout in seconds. Zero disables the timeout.
    pub request_timeout_secs: u64,
    /// Idle connections kept per host. Zero keeps the reqwest default.
    pub pool_max_idle_per_host: usize,
    /// Outgoing proxy.
    pub proxy: ProxyConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            realtime_path: DEFAULT_REALTIME_PATH.to_string(),
            request_timeout_secs: 30,
            pool_max_idle_per_host: 0,
            proxy: ProxyConfig::disabled(),
        }
    }
}

impl ClientConfig {
    /// Config pointing at `base_url` with defaults for everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check that the configured URLs are usable.
    pub fn validate(&self) -> Result<()> {
        let base = self.parsed_base_url()?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::config(format!(
                "base_url must use http or https, got '{}'",
                base.scheme()
            )));
        }
        if !self.realtime_path.starts_with('/') {
            return Err(ApiError::config("realtime_path must start with '/'"));
        }
        if self.proxy.enabled {
            if let Some(proxy) = self.proxy.url.as_deref() {
                let proxy = Url::parse(proxy)
                    .map_err(|e| ApiError::config(format!("invalid proxy url: {e}")))?;
                if !matches!(proxy.scheme(), "http" | "https") {
                    return Err(ApiError::config(format!(
                        "proxy url must use http or https, got '{}'",
                        proxy.scheme()
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn parsed_base_url(&self) -> Result<Url> {
        Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::config(format!("invalid base_url '{}': {e}", self.base_url)))
    }

    /// WebSocket URL for the realtime connection.
    ///
    /// `http` maps to `ws` and `https` to `wss`; the Engine.IO query
    /// parameters are appended.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.parsed_base_url()?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ApiError::config("cannot derive websocket scheme from base_url"))?;

        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!(
            "{}{}/",
            base_path,
            self.realtime_path.trim_end_matches('/')
        ));
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_url_maps_scheme_and_path() {
        let config = ClientConfig::new("https://api.example.com/v1/");
        let url = config.realtime_url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.example.com/v1/socket-message/?EIO=4&transport=websocket"
        );

        let config = ClientConfig::new("http://192.168.0.10:8000");
        assert_eq!(
            config.realtime_url().unwrap().as_str(),
            "ws://192.168.0.10:8000/socket-message/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(ClientConfig::new("ftp://example.com").validate().is_err());
        assert!(ClientConfig::new("not a url").validate().is_err());

        let mut config = ClientConfig::default();
        config.realtime_path = "socket".into();
        assert!(config.validate().is_err());

        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_proxy_scheme() {
        let mut config = ClientConfig::default();
        config.proxy = ProxyConfig::with_url("socks5://127.0.0.1:1080");
        assert!(config.validate().is_err());

        config.proxy = ProxyConfig::with_url("http://127.0.0.1:3128");
        assert!(config.validate().is_ok());

        // A disabled proxy is never used, so its URL is not checked.
        config.proxy.enabled = false;
        config.proxy.url = Some("socks5://127.0.0.1:1080".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url":"http://localhost:9000"}"#).unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.realtime_path, DEFAULT_REALTIME_PATH);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(!config.proxy.enabled);
    }
}
