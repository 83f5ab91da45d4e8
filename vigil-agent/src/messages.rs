//! Wire messages exchanged with the collector
//!
//! REST bodies for `/update` and `/log`, and the `{event, data}` frames of
//! the `/ws/terminal` command link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `POST /update` body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub store_id: String,
    pub terminal_id: String,
    pub status: String,
    pub ip: String,
    pub isp: String,
    pub app_status: String,
    pub memory_usage_percent: Option<f64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub sent_at: DateTime<Utc>,
}

/// `POST /log` body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry<'a> {
    pub store_id: &'a str,
    pub terminal_id: &'a str,
    pub log_entry: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTarget {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "terminal_id")]
    pub terminal_id: String,
}

/// Collector -> terminal
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum IncomingCommand {
    RebootCommand(CommandTarget),
    SpeedtestCommand(CommandTarget),
}

impl IncomingCommand {
    pub fn target(&self) -> &CommandTarget {
        match self {
            Self::RebootCommand(target) | Self::SpeedtestCommand(target) => target,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello<'a> {
    pub store_id: &'a str,
    pub terminal_id: &'a str,
    pub telemetry: Option<&'a StatusReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedtestResults<'a> {
    pub store_id: &'a str,
    pub terminal_id: &'a str,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
}

/// Terminal -> collector
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutgoingFrame<'a> {
    Hello(Hello<'a>),
    SpeedtestResults(SpeedtestResults<'a>),
}
