/*!
Test harness for collector integration tests

Wraps a `CollectorClient` with:
- polling helpers that wait for the merged status to settle
- a record of every push frame seen by the test
- expectations and assertions over those frames
*/

use crate::client::{CollectorClient, PushClient};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Full harness against one running collector
pub struct TestHarness {
    pub client: CollectorClient,
    frames: Vec<Value>,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    event: String,
    expected_count: usize,
}

impl TestHarness {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        env_logger::try_init().ok();

        Self {
            client: CollectorClient::new(base_url),
            frames: Vec::new(),
            expectations: Vec::new(),
        }
    }

    /// Opens an observer on `/ws`
    pub async fn observer(&self) -> Result<PushClient> {
        PushClient::connect(&self.client.ws_url("/ws")).await
    }

    /// Opens a terminal link on `/ws/terminal` and sends its hello
    pub async fn terminal(&self, store_id: &str, terminal_id: &str, telemetry: Option<Value>) -> Result<PushClient> {
        let mut link = PushClient::connect(&self.client.ws_url("/ws/terminal")).await?;
        link.send(&crate::PayloadBuilder::hello(store_id, terminal_id, telemetry)).await?;
        log::info!("📟 Terminal {},{} said hello", store_id, terminal_id);
        Ok(link)
    }

    /// Expects `count` frames named `event` among the recorded ones
    pub fn expect_events(&mut self, event: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            event: event.to_string(),
            expected_count: count,
        });
        self
    }

    /// Records frames from `push` until it stays quiet for `quiet_ms`
    pub async fn record(&mut self, push: &mut PushClient, quiet_ms: u64) -> Result<usize> {
        let mut recorded = 0;
        while let Some(frame) = push.next_event(Duration::from_millis(quiet_ms)).await? {
            self.frames.push(frame);
            recorded += 1;
        }
        log::info!("🎞️ Recorded {} push frames", recorded);
        Ok(recorded)
    }

    pub fn frames(&self) -> &[Value] {
        &self.frames
    }

    /// Latest recorded `data` of frames named `event`
    pub fn last_event(&self, event: &str) -> Option<&Value> {
        self.frames.iter().rev().find(|f| f["event"] == event).map(|f| &f["data"])
    }

    pub fn verify_expectations(&self) -> Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());

        for expectation in &self.expectations {
            let actual_count = self.frames.iter().filter(|f| f["event"] == expectation.event.as_str()).count();
            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for event '{}': expected {} frames, got {}",
                    expectation.event,
                    expectation.expected_count,
                    actual_count
                );
            }
            log::info!("✅ Event '{}': {} frames as expected", expectation.event, actual_count);
        }
        Ok(())
    }

    /// Polls `GET /status` until `path` equals `expected`
    ///
    /// Paths are dot-separated, starting with the `"store,terminal"` key,
    /// e.g. `"StoreA,T1.status"`.
    pub async fn wait_for_status(&self, path: &str, expected: &Value, timeout_ms: u64) -> Result<bool> {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let snapshot = self.client.status().await?;
            if get_nested_field(&snapshot, path) == Some(expected) {
                log::info!("✅ Status reached {} = {}", path, expected);
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        log::warn!("⏰ Timeout waiting for {} = {}", path, expected);
        Ok(false)
    }

    /// Assert that a field of the latest `update_status` frame has a value
    pub fn assert_field_equals(&self, path: &str, expected: &Value) -> Result<()> {
        let Some(snapshot) = self.last_event("update_status") else {
            anyhow::bail!("No update_status frame recorded");
        };
        match get_nested_field(snapshot, path) {
            Some(actual) if actual == expected => {
                log::info!("✅ Field '{}' = {:?}", path, expected);
                Ok(())
            }
            Some(actual) => anyhow::bail!("Field '{}' mismatch: expected {:?}, got {:?}", path, expected, actual),
            None => anyhow::bail!("Field '{}' not found in latest snapshot", path),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let mut event_counts = HashMap::new();
        for frame in &self.frames {
            let event = frame["event"].as_str().unwrap_or("<unnamed>").to_string();
            *event_counts.entry(event).or_insert(0) += 1;
        }
        TestStats {
            total_frames: self.frames.len(),
            event_counts,
        }
    }

    pub fn reset(&mut self) {
        self.frames.clear();
        self.expectations.clear();
        log::info!("🧹 Test harness reset");
    }
}

pub fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_frames: usize,
    pub event_counts: HashMap<String, usize>,
}

impl TestStats {
    pub fn print(&self) {
        println!("📊 Push statistics:");
        println!("  Total frames: {}", self.total_frames);
        for (event, count) in &self.event_counts {
            println!("    {}: {} frames", event, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_field_with_terminal_keys() {
        let snapshot = json!({ "StoreA,T1": { "status": "connected", "ip": "1.2.3.4" } });
        assert_eq!(get_nested_field(&snapshot, "StoreA,T1.status"), Some(&json!("connected")));
        assert_eq!(get_nested_field(&snapshot, "StoreA,T2.status"), None);
        assert_eq!(get_nested_field(&snapshot, "StoreA,T1.ip.octet"), None);
    }

    #[test]
    fn test_expectations_over_recorded_frames() {
        let mut harness = TestHarness::new("http://127.0.0.1:1");
        harness.frames.push(json!({ "event": "update_status", "data": { "S,T": { "status": "disconnected" } } }));
        harness.frames.push(json!({ "event": "update_status", "data": { "S,T": { "status": "connected" } } }));
        harness.frames.push(json!({ "event": "speedtest_results", "data": {} }));

        harness.expect_events("update_status", 2).expect_events("speedtest_results", 1);
        harness.verify_expectations().unwrap();
        harness.assert_field_equals("S,T.status", &json!("connected")).unwrap();
        assert!(harness.assert_field_equals("S,T.ip", &json!("x")).is_err());

        let stats = harness.get_stats();
        assert_eq!(stats.total_frames, 3);
        assert_eq!(stats.event_counts["update_status"], 2);

        harness.reset();
        assert!(harness.frames().is_empty());
    }
}
