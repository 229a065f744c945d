//! Client configuration parsed from environment variables.

use std::path::PathBuf;

use crate::error::ErrorCode;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_STORE_PATH: &str = ".session-gate/store.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        "E_CONFIG_PARSE"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub store_path: PathBuf,
    pub timeouts: Timeouts,
    /// Overrides the default guest-allowed tab names when set.
    pub guest_tabs: Option<Vec<String>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            timeouts: Timeouts::default(),
            guest_tabs: None,
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `AUTH_API_BASE_URL`: identity server base URL (default `http://127.0.0.1:3000`)
    /// - `AUTH_STORE_PATH`: token store file (default `.session-gate/store.json`)
    /// - `AUTH_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AUTH_CONNECT_TIMEOUT_SECS`: default 10
    /// - `AUTH_GUEST_TABS`: comma-separated tab names reachable while signed out
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the base URL is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = parse_base_url(std::env::var("AUTH_API_BASE_URL").ok().as_deref())?;
        let store_path = std::env::var("AUTH_STORE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_STORE_PATH), PathBuf::from);
        let timeouts = Timeouts {
            request_secs: env_parse_u64("AUTH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("AUTH_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let guest_tabs = std::env::var("AUTH_GUEST_TABS").ok().map(|raw| parse_list(&raw));

        Ok(Self { api_base_url, store_path, timeouts, guest_tabs })
    }

    /// Replace the base URL, validated the same way as `AUTH_API_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `raw` is not http(s).
    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.api_base_url = parse_base_url(Some(raw))?;
        Ok(self)
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

pub(crate) fn parse_base_url(raw: Option<&str>) -> Result<String, ConfigError> {
    let url = raw.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(DEFAULT_API_BASE_URL);
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            var: "AUTH_API_BASE_URL",
            reason: format!("expected http:// or https:// URL, got '{url}'"),
        });
    }
    Ok(url.trim_end_matches('/').to_owned())
}

pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
