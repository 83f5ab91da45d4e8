use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

use crate::error::CollectorError;
use crate::hub::DEFAULT_OBSERVER_QUEUE;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    pub bind: String,
    pub heartbeat_timeout_secs: u64,
    pub roster_path: String,
    pub log_path: String,
    pub observer_queue: usize,
    pub write_timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            heartbeat_timeout_secs: 20,
            roster_path: "expected_terminals.json".into(),
            log_path: "server_logs.txt".into(),
            observer_queue: DEFAULT_OBSERVER_QUEUE,
            write_timeout_secs: 5,
        }
    }
}

impl CollectorConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, CollectorError> {
        self.bind
            .parse()
            .map_err(|e| CollectorError::Config(format!("bind address {:?}: {}", self.bind, e)))
    }

    pub fn parse(text: &str) -> Result<Self, CollectorError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Individual `VIGIL_*` variables win over the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("VIGIL_BIND") {
            self.bind = bind;
        }
        if let Some(raw) = lookup("VIGIL_HEARTBEAT_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(secs) => self.heartbeat_timeout_secs = secs,
                Err(_) => warn!("[config] ignoring VIGIL_HEARTBEAT_TIMEOUT_SECS={raw:?}"),
            }
        }
        if let Some(path) = lookup("VIGIL_ROSTER") {
            self.roster_path = path;
        }
        if let Some(path) = lookup("VIGIL_LOG_FILE") {
            self.log_path = path;
        }
    }
}

pub async fn load_config() -> CollectorConfig {
    let path = std::env::var("VIGIL_COLLECTOR_CONFIG").unwrap_or_else(|_| "collector.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        CollectorConfig::parse(&txt).unwrap_or_else(|e| {
            warn!("[config] invalid {}: {}, using defaults", path, e);
            CollectorConfig::default()
        })
    } else {
        info!("[config] no {}, using defaults", path);
        CollectorConfig::default()
    };
    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    cfg
}
