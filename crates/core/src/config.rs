// crates/core/src/config.rs
//! Portal client configuration.
//!
//! Layered: built-in defaults, then an optional TOML file, then environment
//! variables (`CIVIC_PORTAL_API_URL`, `CIVIC_PORTAL_WS_URL`,
//! `CIVIC_PORTAL_DATA_DIR`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Data directory could not be determined; set CIVIC_PORTAL_DATA_DIR")]
    NoDataDir,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Base URL every API path is joined onto.
    pub api_base_url: String,
    /// WebSocket endpoint for admin notifications.
    pub notifications_url: String,
    pub request_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
    pub login_path: String,
    pub refresh_path: String,
    pub complete_setup_path: String,
    /// Name of the HTTP-only cookie carrying the refresh token.
    pub refresh_cookie_name: String,
    pub data_dir: Option<PathBuf>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5001/api".into(),
            notifications_url: "ws://localhost:5000/ws/admin/notifications".into(),
            request_timeout_secs: 30,
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 5,
            login_path: "/auth/login".into(),
            refresh_path: "/auth/refresh-token".into(),
            complete_setup_path: "/admin/complete-setup".into(),
            refresh_cookie_name: "refreshToken".into(),
            data_dir: None,
        }
    }
}

impl PortalConfig {
    /// Load from `path` if given, else from the default config location when
    /// it exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match paths::default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CIVIC_PORTAL_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = std::env::var("CIVIC_PORTAL_WS_URL") {
            self.notifications_url = url;
        }
        if let Ok(dir) = std::env::var("CIVIC_PORTAL_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
        self.data_dir
            .clone()
            .or_else(paths::app_data_dir)
            .ok_or(ConfigError::NoDataDir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_backend_contract() {
        let c = PortalConfig::default();
        assert_eq!(c.request_timeout(), Duration::from_secs(30));
        assert_eq!(c.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(c.max_reconnect_attempts, 5);
        assert_eq!(c.refresh_path, "/auth/refresh-token");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = PortalConfig::from_toml(
            r#"
            api_base_url = "https://portal.example.gov/api/"
            max_reconnect_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(c.max_reconnect_attempts, 3);
        assert_eq!(c.reconnect_delay_secs, 5);
        assert_eq!(c.api_base_url, "https://portal.example.gov/api/");
    }

    #[test]
    fn test_from_file_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "request_timeout_secs = \"soon\"").unwrap();
        let err = PortalConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PortalConfig::from_file(Path::new("/nonexistent/civic/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
