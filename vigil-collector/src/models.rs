//! Wire and domain types shared by every collector component.
//!
//! A terminal is keyed by `TerminalIdentity`, whose wire form is the
//! comma-joined `"store,terminal"` composite used as JSON object key in
//! snapshots and as payload of operator push events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

use crate::error::CollectorError;

pub const NOT_AVAILABLE: &str = "N/A";
pub const APP_NOT_RUNNING: &str = "Not running";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TerminalIdentity {
    store_id: String,
    terminal_id: String,
}

impl TerminalIdentity {
    pub fn new(store_id: &str, terminal_id: &str) -> Result<Self, CollectorError> {
        let valid = |part: &str| !part.trim().is_empty() && !part.contains(',');
        if !valid(store_id) || !valid(terminal_id) {
            return Err(CollectorError::MalformedIdentity(format!("{store_id},{terminal_id}")));
        }
        Ok(Self {
            store_id: store_id.to_string(),
            terminal_id: terminal_id.to_string(),
        })
    }

    /// Parse the `"store,terminal"` composite key.
    pub fn from_key(key: &str) -> Result<Self, CollectorError> {
        let (store, terminal) = key
            .split_once(',')
            .ok_or_else(|| CollectorError::MalformedIdentity(key.to_string()))?;
        Self::new(store, terminal).map_err(|_| CollectorError::MalformedIdentity(key.to_string()))
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn key(&self) -> String {
        format!("{},{}", self.store_id, self.terminal_id)
    }
}

impl fmt::Display for TerminalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.store_id, self.terminal_id)
    }
}

impl TryFrom<String> for TerminalIdentity {
    type Error = CollectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_key(&value)
    }
}

impl From<TerminalIdentity> for String {
    fn from(id: TerminalIdentity) -> Self {
        id.key()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalTelemetry {
    pub ip: String,
    pub isp: String,
    pub status: ConnectionStatus,
    pub app_status: String,
    pub memory_usage_percent: Option<f64>,
    pub logon_locked: Option<bool>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_heartbeat_at: Option<OffsetDateTime>,
    /// Agent-side send time of the report, when the agent supplied one.
    #[serde(with = "time::serde::rfc3339::option", default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<OffsetDateTime>,
}

impl TerminalTelemetry {
    /// Placeholder for an expected terminal that never reported.
    pub fn never_seen() -> Self {
        Self {
            ip: NOT_AVAILABLE.into(),
            isp: NOT_AVAILABLE.into(),
            status: ConnectionStatus::Disconnected,
            app_status: APP_NOT_RUNNING.into(),
            memory_usage_percent: None,
            logon_locked: None,
            download_mbps: None,
            upload_mbps: None,
            last_heartbeat_at: None,
            sent_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Point-in-time merged view, serialized as `{ "store,terminal": telemetry }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(pub BTreeMap<TerminalIdentity, TerminalTelemetry>);

impl Snapshot {
    pub fn get(&self, id: &TerminalIdentity) -> Option<&TerminalTelemetry> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TerminalIdentity, &TerminalTelemetry)> {
        self.0.iter()
    }
}

// POST /update body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateIn {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "terminal_id")]
    pub terminal_id: String,
    #[serde(default = "default_reported_status")]
    pub status: ConnectionStatus,
    #[serde(default = "not_available")]
    pub ip: String,
    #[serde(default = "not_available")]
    pub isp: String,
    #[serde(alias = "app_status", default = "app_not_running")]
    pub app_status: String,
    #[serde(alias = "memory_usage", default)]
    pub memory_usage_percent: Option<f64>,
    #[serde(alias = "logon_locked", default)]
    pub logon_locked: Option<bool>,
    #[serde(alias = "download_speed", default)]
    pub download_mbps: Option<f64>,
    #[serde(alias = "upload_speed", default)]
    pub upload_mbps: Option<f64>,
    #[serde(alias = "sent_at", with = "time::serde::rfc3339::option", default)]
    pub sent_at: Option<OffsetDateTime>,
}

impl StatusUpdateIn {
    pub fn identity(&self) -> Result<TerminalIdentity, CollectorError> {
        TerminalIdentity::new(&self.store_id, &self.terminal_id)
    }

    /// Telemetry as carried by the report; the registry stamps the heartbeat.
    pub fn telemetry(&self) -> TerminalTelemetry {
        TerminalTelemetry {
            ip: self.ip.clone(),
            isp: self.isp.clone(),
            status: self.status,
            app_status: self.app_status.clone(),
            memory_usage_percent: self.memory_usage_percent,
            logon_locked: self.logon_locked,
            download_mbps: self.download_mbps,
            upload_mbps: self.upload_mbps,
            last_heartbeat_at: None,
            sent_at: self.sent_at,
        }
    }
}

fn default_reported_status() -> ConnectionStatus {
    ConnectionStatus::Connected
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

fn app_not_running() -> String {
    APP_NOT_RUNNING.to_string()
}

// POST /log body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryIn {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "terminal_id")]
    pub terminal_id: String,
    #[serde(alias = "log_entry")]
    pub log_entry: String,
}

/// Addressed command target, as sent to terminals and accepted from operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTarget {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "terminal_id")]
    pub terminal_id: String,
}

impl From<&TerminalIdentity> for CommandTarget {
    fn from(id: &TerminalIdentity) -> Self {
        Self {
            store_id: id.store_id().to_string(),
            terminal_id: id.terminal_id().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedtestResult {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "terminal_id")]
    pub terminal_id: String,
    #[serde(alias = "download_speed", default)]
    pub download_mbps: Option<f64>,
    #[serde(alias = "upload_speed", default)]
    pub upload_mbps: Option<f64>,
}

/// Events pushed to observers over the broadcast hub.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ObserverEvent {
    UpdateStatus(Snapshot),
    SpeedtestResults(SpeedtestResult),
}

/// Operator requests accepted on the observer push channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ObserverRequest {
    RebootTerminal(String),
    PerformSpeedtest(String),
}

/// Commands delivered point-to-point to a terminal connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TerminalCommand {
    RebootCommand(CommandTarget),
    SpeedtestCommand(CommandTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Reboot,
    Speedtest,
}

impl CommandKind {
    pub fn for_target(self, id: &TerminalIdentity) -> TerminalCommand {
        match self {
            CommandKind::Reboot => TerminalCommand::RebootCommand(id.into()),
            CommandKind::Speedtest => TerminalCommand::SpeedtestCommand(id.into()),
        }
    }
}

/// Messages a terminal sends on its command link.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TerminalMessage {
    Hello(TerminalHello),
    SpeedtestResults(SpeedtestResult),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalHello {
    #[serde(alias = "store_id")]
    pub store_id: String,
    #[serde(alias = "terminal_id")]
    pub terminal_id: String,
    #[serde(default)]
    pub telemetry: Option<StatusUpdateIn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_roundtrip() {
        let id = TerminalIdentity::from_key("StoreA,T1").unwrap();
        assert_eq!(id.store_id(), "StoreA");
        assert_eq!(id.terminal_id(), "T1");
        assert_eq!(id.key(), "StoreA,T1");
    }

    #[test]
    fn test_malformed_identity_rejected() {
        for key in ["StoreA", ",T1", "StoreA,", "A,B,C", ""] {
            assert!(
                matches!(TerminalIdentity::from_key(key), Err(CollectorError::MalformedIdentity(_))),
                "{key} should be rejected"
            );
        }
        assert!(TerminalIdentity::new("  ", "T1").is_err());
    }

    #[test]
    fn test_snapshot_serializes_with_composite_keys() {
        let mut map = BTreeMap::new();
        map.insert(TerminalIdentity::new("StoreA", "T1").unwrap(), TerminalTelemetry::never_seen());
        let json = serde_json::to_value(Snapshot(map)).unwrap();

        let entry = &json["StoreA,T1"];
        assert_eq!(entry["ip"], "N/A");
        assert_eq!(entry["status"], "disconnected");
        assert_eq!(entry["appStatus"], "Not running");
        assert!(entry["lastHeartbeatAt"].is_null());
    }

    #[test]
    fn test_update_accepts_legacy_field_names() {
        let body = serde_json::json!({
            "store_id": "StoreA",
            "terminal_id": "T1",
            "status": "connected",
            "ip": "1.2.3.4",
            "isp": "ExampleISP",
            "app_status": "Running",
            "memory_usage": 41.5,
            "download_speed": null
        });
        let update: StatusUpdateIn = serde_json::from_value(body).unwrap();
        assert_eq!(update.identity().unwrap().key(), "StoreA,T1");
        assert_eq!(update.app_status, "Running");
        assert_eq!(update.memory_usage_percent, Some(41.5));
        assert_eq!(update.download_mbps, None);
    }

    #[test]
    fn test_update_defaults_missing_fields() {
        let body = serde_json::json!({"storeId": "StoreA", "terminalId": "T1"});
        let update: StatusUpdateIn = serde_json::from_value(body).unwrap();
        let telemetry = update.telemetry();
        assert_eq!(telemetry.status, ConnectionStatus::Connected);
        assert_eq!(telemetry.ip, "N/A");
        assert_eq!(telemetry.app_status, "Not running");
    }

    #[test]
    fn test_observer_request_parsing() {
        let raw = r#"{"event":"reboot_terminal","data":"StoreA,T1"}"#;
        match serde_json::from_str::<ObserverRequest>(raw).unwrap() {
            ObserverRequest::RebootTerminal(key) => assert_eq!(key, "StoreA,T1"),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_terminal_command_envelope() {
        let id = TerminalIdentity::new("StoreA", "T1").unwrap();
        let json = serde_json::to_value(CommandKind::Speedtest.for_target(&id)).unwrap();
        assert_eq!(json["event"], "speedtest_command");
        assert_eq!(json["data"]["storeId"], "StoreA");
        assert_eq!(json["data"]["terminalId"], "T1");
    }
}
