/*!
Wire payload builders for the collector contract

Every builder returns a `serde_json::Value` shaped exactly like what an
agent or an operator console sends, so tests exercise the real parsing.
*/

use serde_json::{json, Value};

pub struct PayloadBuilder;

impl PayloadBuilder {
    /// `POST /update` body of a healthy, connected terminal
    pub fn update<S: Into<String>>(store_id: S, terminal_id: S, ip: S) -> Value {
        json!({
            "storeId": store_id.into(),
            "terminalId": terminal_id.into(),
            "status": "connected",
            "ip": ip.into(),
            "isp": "ExampleISP",
            "appStatus": "Running",
            "memoryUsagePercent": 42.0,
            "logonLocked": false,
            "downloadMbps": null,
            "uploadMbps": null
        })
    }

    /// Same body as `update`, stamped with the agent-side send time
    pub fn update_sent_at<S: Into<String>>(store_id: S, terminal_id: S, ip: S, sent_at: chrono::DateTime<chrono::Utc>) -> Value {
        let mut body = Self::update(store_id, terminal_id, ip);
        body["sentAt"] = Value::String(sent_at.to_rfc3339());
        body
    }

    /// `POST /update` body as the legacy snake_case agent sent it
    pub fn legacy_update<S: Into<String>>(store_id: S, terminal_id: S, ip: S) -> Value {
        json!({
            "store_id": store_id.into(),
            "terminal_id": terminal_id.into(),
            "status": "connected",
            "ip": ip.into(),
            "isp": "ExampleISP",
            "app_status": "Not running",
            "memory_usage": 55.5
        })
    }

    /// `POST /log` body
    pub fn log_entry<S: Into<String>>(store_id: S, terminal_id: S, entry: S) -> Value {
        json!({
            "storeId": store_id.into(),
            "terminalId": terminal_id.into(),
            "logEntry": entry.into()
        })
    }

    /// `POST /load_expected_terminals` body
    pub fn roster(stores: &[(&str, &[&str])]) -> Value {
        let mut roster = serde_json::Map::new();
        for (store, terminals) in stores {
            roster.insert(store.to_string(), json!(terminals));
        }
        Value::Object(roster)
    }

    /// Command target for `/commands/*`
    pub fn target<S: Into<String>>(store_id: S, terminal_id: S) -> Value {
        json!({ "storeId": store_id.into(), "terminalId": terminal_id.into() })
    }

    /// First frame on `/ws/terminal`
    pub fn hello<S: Into<String>>(store_id: S, terminal_id: S, telemetry: Option<Value>) -> Value {
        json!({
            "event": "hello",
            "data": {
                "storeId": store_id.into(),
                "terminalId": terminal_id.into(),
                "telemetry": telemetry
            }
        })
    }

    /// Terminal -> collector speedtest results frame
    pub fn speedtest_results<S: Into<String>>(store_id: S, terminal_id: S, down: Option<f64>, up: Option<f64>) -> Value {
        json!({
            "event": "speedtest_results",
            "data": {
                "storeId": store_id.into(),
                "terminalId": terminal_id.into(),
                "downloadMbps": down,
                "uploadMbps": up
            }
        })
    }

    /// Operator frame on `/ws`, addressed by `"store,terminal"`
    pub fn reboot_request(key: &str) -> Value {
        json!({ "event": "reboot_terminal", "data": key })
    }

    pub fn speedtest_request(key: &str) -> Value {
        json!({ "event": "perform_speedtest", "data": key })
    }
}
