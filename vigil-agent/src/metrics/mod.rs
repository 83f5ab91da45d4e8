//! Terminal probes
//!
//! Collects what a status report carries:
//! - Public IP and ISP from an ipinfo-style JSON endpoint
//! - Whether the monitored application process is running
//! - Memory usage percent

use serde_json::Value;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, error};

use crate::config::UNKNOWN;

pub const APP_RUNNING: &str = "Running";
pub const APP_NOT_RUNNING: &str = "Not running";

const IP_INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// One probe result
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub ip: String,
    pub isp: String,
    pub app_status: String,
    pub memory_usage_percent: Option<f64>,
}

pub struct TerminalProbe {
    http: reqwest::Client,
    ip_info_url: String,
    app_name: String,
    sys: System,
}

impl TerminalProbe {
    pub fn new(http: reqwest::Client, ip_info_url: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            http,
            ip_info_url: ip_info_url.into(),
            app_name: app_name.into(),
            sys: System::new(),
        }
    }

    pub async fn collect(&mut self) -> Telemetry {
        let (ip, isp) = self.ip_info().await;
        let app_status = app_status_label(self.app_running()).to_string();
        let memory_usage_percent = self.memory_percent();
        debug!("Probe: ip={} isp={} app={} mem={:?}", ip, isp, app_status, memory_usage_percent);
        Telemetry {
            ip,
            isp,
            app_status,
            memory_usage_percent,
        }
    }

    /// `(ip, isp)`; both `Unknown` when the lookup fails
    pub async fn ip_info(&self) -> (String, String) {
        let response = self.http.get(&self.ip_info_url).timeout(IP_INFO_TIMEOUT).send().await;
        let body = match response {
            Ok(response) => response.json::<Value>().await,
            Err(e) => {
                error!("Error fetching IP info: {}", e);
                return (UNKNOWN.to_string(), UNKNOWN.to_string());
            }
        };
        match body {
            Ok(body) => parse_ip_info(&body),
            Err(e) => {
                error!("Error decoding IP info: {}", e);
                (UNKNOWN.to_string(), UNKNOWN.to_string())
            }
        }
    }

    pub fn app_running(&mut self) -> bool {
        self.sys.refresh_processes();
        self.sys.processes().values().any(|p| p.name() == self.app_name)
    }

    pub fn memory_percent(&mut self) -> Option<f64> {
        self.sys.refresh_memory();
        memory_percent(self.sys.used_memory(), self.sys.total_memory())
    }
}

pub fn parse_ip_info(body: &Value) -> (String, String) {
    let field = |name: &str| body.get(name).and_then(Value::as_str).unwrap_or(UNKNOWN).to_string();
    (field("ip"), field("org"))
}

pub fn app_status_label(running: bool) -> &'static str {
    if running {
        APP_RUNNING
    } else {
        APP_NOT_RUNNING
    }
}

pub fn memory_percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let percent = used as f64 / total as f64 * 100.0;
    Some((percent * 10.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ip_info() {
        let body = json!({ "ip": "203.0.113.7", "org": "AS64500 Example ISP", "city": "Lyon" });
        assert_eq!(parse_ip_info(&body), ("203.0.113.7".to_string(), "AS64500 Example ISP".to_string()));

        let partial = json!({ "ip": "203.0.113.7" });
        assert_eq!(parse_ip_info(&partial).1, UNKNOWN);
    }

    #[test]
    fn test_memory_percent() {
        assert_eq!(memory_percent(512, 1024), Some(50.0));
        assert_eq!(memory_percent(1, 3), Some(33.3));
        assert_eq!(memory_percent(0, 0), None);
    }

    #[test]
    fn test_app_status_label() {
        assert_eq!(app_status_label(true), "Running");
        assert_eq!(app_status_label(false), "Not running");
    }

    #[tokio::test]
    async fn test_unreachable_ip_info_is_unknown() {
        let probe = TerminalProbe::new(reqwest::Client::new(), "http://127.0.0.1:1/json", "none");
        assert_eq!(probe.ip_info().await, (UNKNOWN.to_string(), UNKNOWN.to_string()));
    }

    #[test]
    fn test_local_probes() {
        let mut probe = TerminalProbe::new(reqwest::Client::new(), "http://127.0.0.1:1/json", "no-such-process-vigil");
        assert!(!probe.app_running());
        let memory = probe.memory_percent().unwrap();
        assert!(memory > 0.0 && memory <= 100.0);
    }
}
