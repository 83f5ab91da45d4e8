//! Periodic status reporting and change logging
//!
//! `ChangeTracker` diffs consecutive probes into activity log lines;
//! `CollectorReporter` posts reports and log lines over REST.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tracing::{error, info};

use crate::messages::{LogEntry, StatusReport};
use crate::metrics::{Telemetry, APP_NOT_RUNNING};

/// Remembers the previous probe; the first report has no predecessor, so
/// the app is assumed not running and the network taken from the initial probe.
pub struct ChangeTracker {
    last_ip: String,
    last_isp: String,
    last_app_status: String,
}

impl ChangeTracker {
    pub fn new(initial_ip: impl Into<String>, initial_isp: impl Into<String>) -> Self {
        Self {
            last_ip: initial_ip.into(),
            last_isp: initial_isp.into(),
            last_app_status: APP_NOT_RUNNING.to_string(),
        }
    }

    /// Log lines for every field that changed since the last observation
    pub fn observe(&mut self, telemetry: &Telemetry, at: DateTime<Local>) -> Vec<String> {
        let mut entries = Vec::new();
        let fields = [
            ("IP Change", &mut self.last_ip, &telemetry.ip),
            ("ISP Change", &mut self.last_isp, &telemetry.isp),
            ("App Status Change", &mut self.last_app_status, &telemetry.app_status),
        ];
        for (event, last, current) in fields {
            if last != current {
                entries.push(change_line(at, event, last, current));
                *last = current.clone();
            }
        }
        entries
    }
}

pub fn change_line(at: DateTime<Local>, event: &str, old: &str, new: &str) -> String {
    format!("{} - {}: From {} to {}\n", at.format("%Y-%m-%d %H:%M:%S"), event, old, new)
}

#[derive(Clone)]
pub struct CollectorReporter {
    http: reqwest::Client,
    base_url: String,
    store_id: String,
    terminal_id: String,
}

impl CollectorReporter {
    pub fn new(http: reqwest::Client, base_url: &str, store_id: impl Into<String>, terminal_id: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store_id: store_id.into(),
            terminal_id: terminal_id.into(),
        }
    }

    pub fn report_for(&self, telemetry: &Telemetry, sent_at: DateTime<Utc>) -> StatusReport {
        StatusReport {
            store_id: self.store_id.clone(),
            terminal_id: self.terminal_id.clone(),
            status: "connected".to_string(),
            ip: telemetry.ip.clone(),
            isp: telemetry.isp.clone(),
            app_status: telemetry.app_status.clone(),
            memory_usage_percent: telemetry.memory_usage_percent,
            download_mbps: None,
            upload_mbps: None,
            sent_at,
        }
    }

    pub async fn send_status(&self, report: &StatusReport) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/update", self.base_url))
            .json(report)
            .send()
            .await
            .context("Failed to send status update")?;
        info!("Status update response: {}", response.status());
        Ok(())
    }

    pub async fn send_log(&self, entry: &str) -> Result<()> {
        let body = LogEntry {
            store_id: &self.store_id,
            terminal_id: &self.terminal_id,
            log_entry: entry,
        };
        let response = self
            .http
            .post(format!("{}/log", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to send log to server")?;
        if !response.status().is_success() {
            error!("Failed to send log to server: {}", response.status());
        }
        Ok(())
    }
}
