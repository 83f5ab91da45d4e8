//! Agent configuration
//!
//! Handles:
//! - TOML config in the OS config directory (or `VIGIL_AGENT_CONFIG`)
//! - Legacy `key=value` files written for the first-generation agent
//! - Fallback to the `Unknown/Unknown` identity when nothing is readable

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("not valid TOML ({toml}) nor key=value (line {line})")]
    Unparseable { toml: String, line: usize },
    #[error("could not find config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub store_id: String,
    pub terminal_id: String,
    /// Process name whose presence makes the app status `Running`
    pub app_name: String,
    pub collector_url: String,
    pub report_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub ip_info_url: String,
    /// Replaces the platform reboot command, e.g. `["systemctl", "reboot"]`
    pub reboot_command: Option<Vec<String>>,
    pub speedtest: SpeedtestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedtestConfig {
    pub download_url: String,
    pub upload_url: String,
    pub upload_bytes: usize,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            store_id: UNKNOWN.to_string(),
            terminal_id: UNKNOWN.to_string(),
            app_name: "example.exe".to_string(),
            collector_url: "http://127.0.0.1:8080".to_string(),
            report_interval_secs: 10,
            retry_interval_secs: 5,
            ip_info_url: "http://ipinfo.io/json".to_string(),
            reboot_command: None,
            speedtest: SpeedtestConfig::default(),
        }
    }
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            download_url: "https://speed.cloudflare.com/__down?bytes=25000000".to_string(),
            upload_url: "https://speed.cloudflare.com/__up".to_string(),
            upload_bytes: 10_000_000,
            timeout_secs: 60,
        }
    }
}

impl AgentConfig {
    /// Loads the config, falling back to defaults with the unknown identity.
    /// A terminal that cannot read its config still reports.
    pub async fn load() -> Self {
        let path = match Self::config_file_path() {
            Ok(path) => path,
            Err(e) => {
                error!("[config] {}", e);
                return Self::default();
            }
        };
        match Self::load_from(&path).await {
            Ok(config) => {
                info!("[config] loaded {} ({},{})", path.display(), config.store_id, config.terminal_id);
                config
            }
            Err(e) => {
                error!("[config] error reading config file: {}", e);
                Self::default()
            }
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&content)
    }

    /// TOML first, then the legacy `name=value` format.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        match toml::from_str::<AgentConfig>(content) {
            Ok(config) => Ok(config),
            Err(toml_err) => Self::parse_legacy(content).map_err(|line| ConfigError::Unparseable {
                toml: toml_err.message().to_string(),
                line,
            }),
        }
    }

    /// Every non-blank line must be `name=value`. Returns the 1-based number
    /// of the first bad line on failure.
    fn parse_legacy(content: &str) -> Result<Self, usize> {
        let mut config = Self::default();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                return Err(index + 1);
            };
            let value = value.trim().to_string();
            match name.trim() {
                "store_id" => config.store_id = value,
                "terminal_id" => config.terminal_id = value,
                "app_name" => config.app_name = value,
                "server_url" | "collector_url" => config.collector_url = value,
                _ => {}
            }
        }
        Ok(config)
    }

    /// `VIGIL_AGENT_CONFIG`, else `<config_dir>/vigil-agent/config.toml`
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("VIGIL_AGENT_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("vigil-agent");
        path.push("config.toml");
        Ok(path)
    }

    /// Base URL for the `/ws/terminal` command link
    pub fn link_url(&self) -> String {
        let base = self.collector_url.trim_end_matches('/');
        let ws_base = base.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1);
        format!("{ws_base}/ws/terminal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.store_id, UNKNOWN);
        assert_eq!(config.terminal_id, UNKNOWN);
        assert_eq!(config.report_interval_secs, 10);
        assert_eq!(config.ip_info_url, "http://ipinfo.io/json");
    }

    #[test]
    fn test_toml_config() {
        let config = AgentConfig::parse(
            r#"
            store_id = "StoreA"
            terminal_id = "T1"
            collector_url = "http://collector:8080/"

            [speedtest]
            upload_bytes = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.store_id, "StoreA");
        assert_eq!(config.terminal_id, "T1");
        assert_eq!(config.speedtest.upload_bytes, 1000);
        assert_eq!(config.speedtest.timeout_secs, 60);
        assert_eq!(config.link_url(), "ws://collector:8080/ws/terminal");
    }

    #[test]
    fn test_legacy_config() {
        let config = AgentConfig::parse("store_id=StoreB\nterminal_id=T7\napp_name=pos.exe\n").unwrap();
        assert_eq!(config.store_id, "StoreB");
        assert_eq!(config.terminal_id, "T7");
        assert_eq!(config.app_name, "pos.exe");
    }

    #[test]
    fn test_legacy_numeric_value_stays_a_string() {
        let config = AgentConfig::parse("store_id=042\nterminal_id=3").unwrap();
        assert_eq!(config.store_id, "042");
        assert_eq!(config.terminal_id, "3");
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = AgentConfig::parse("store_id=StoreB\nthis line is broken\n").unwrap_err();
        assert!(matches!(err, ConfigError::Unparseable { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "store_id = \"StoreC\"\nterminal_id = \"T2\"").unwrap();
        let config = AgentConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.store_id, "StoreC");

        let missing = file.path().with_extension("missing");
        assert!(matches!(AgentConfig::load_from(&missing).await, Err(ConfigError::Io(..))));
    }

    #[test]
    fn test_https_link_url() {
        let config = AgentConfig {
            collector_url: "https://intranet.example.com".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(config.link_url(), "wss://intranet.example.com/ws/terminal");
    }
}
