//! Staleness Sweeper: flips terminals whose heartbeat is older than the
//! timeout to disconnected, and publishes one snapshot per cycle when
//! anything changed.

use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::hub::BroadcastHub;
use crate::merger::merge;
use crate::models::TerminalIdentity;
use crate::registry::LivenessRegistry;
use crate::roster::RosterStore;

#[derive(Debug, Default, PartialEq)]
pub struct SweepReport {
    pub transitioned: Vec<TerminalIdentity>,
    /// Number of observers the batch snapshot was queued for.
    pub notified: Option<usize>,
}

#[derive(Clone)]
pub struct StalenessSweeper {
    registry: LivenessRegistry,
    roster: RosterStore,
    hub: BroadcastHub,
    timeout: Duration,
}

impl StalenessSweeper {
    pub fn new(registry: LivenessRegistry, roster: RosterStore, hub: BroadcastHub, timeout: Duration) -> Self {
        Self { registry, roster, hub, timeout }
    }

    /// One cycle. Transitions are batched into a single publish.
    pub fn sweep_once(&self, now: OffsetDateTime) -> SweepReport {
        let timeout = time::Duration::try_from(self.timeout).unwrap_or(time::Duration::MAX);
        let transitioned = self.registry.mark_stale_older_than(now, timeout);
        if transitioned.is_empty() {
            debug!("[sweeper] no stale terminals");
            return SweepReport::default();
        }

        for id in &transitioned {
            info!("[sweeper] terminal {} marked as disconnected", id);
        }
        let notified = self
            .hub
            .publish_snapshot(|| merge(&self.roster.current(), &self.registry.snapshot_all()));
        info!("[sweeper] {} terminal(s) went stale, notified {} observer(s)", transitioned.len(), notified);

        SweepReport { transitioned, notified: Some(notified) }
    }

    /// Runs `sweep_once` every `timeout` until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        info!("[sweeper] starting (timeout: {}s)", self.timeout.as_secs());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.timeout);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sweep_once(OffsetDateTime::now_utc());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, TerminalTelemetry};
    use crate::roster::Roster;
    use time::macros::datetime;

    fn id(store: &str, terminal: &str) -> TerminalIdentity {
        TerminalIdentity::new(store, terminal).unwrap()
    }

    fn connected(ip: &str) -> TerminalTelemetry {
        TerminalTelemetry {
            ip: ip.into(),
            isp: "ExampleISP".into(),
            status: ConnectionStatus::Connected,
            ..TerminalTelemetry::never_seen()
        }
    }

    fn fixture() -> (StalenessSweeper, LivenessRegistry, BroadcastHub) {
        let registry = LivenessRegistry::new();
        let roster = RosterStore::new(Roster::from_entries([("StoreA", vec!["T1", "T2", "T3"])]));
        let hub = BroadcastHub::default();
        let sweeper = StalenessSweeper::new(registry.clone(), roster, hub.clone(), Duration::from_secs(20));
        (sweeper, registry, hub)
    }

    #[tokio::test]
    async fn test_simultaneous_timeouts_produce_one_broadcast() {
        let (sweeper, registry, hub) = fixture();
        let t0 = datetime!(2026-01-01 10:00:00 UTC);
        registry.report(&id("StoreA", "T1"), connected("1.1.1.1"), t0);
        registry.report(&id("StoreA", "T2"), connected("2.2.2.2"), t0);
        registry.report(&id("StoreA", "T3"), connected("3.3.3.3"), t0 + time::Duration::seconds(30));

        let mut observer = hub.attach(Default::default);
        observer.rx.recv().await.unwrap();

        let report = sweeper.sweep_once(t0 + time::Duration::seconds(31));
        assert_eq!(report.transitioned.len(), 2);
        assert_eq!(report.notified, Some(1));

        let message = observer.rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["data"]["StoreA,T1"]["status"], "disconnected");
        assert_eq!(value["data"]["StoreA,T2"]["status"], "disconnected");
        assert_eq!(value["data"]["StoreA,T3"]["status"], "connected");
        assert!(observer.rx.try_recv().is_err(), "exactly one broadcast per cycle");
    }

    #[tokio::test]
    async fn test_quiet_cycle_does_not_broadcast() {
        let (sweeper, registry, hub) = fixture();
        let t0 = datetime!(2026-01-01 10:00:00 UTC);
        registry.report(&id("StoreA", "T1"), connected("1.1.1.1"), t0);

        let mut observer = hub.attach(Default::default);
        observer.rx.recv().await.unwrap();

        assert_eq!(sweeper.sweep_once(t0 + time::Duration::seconds(5)), SweepReport::default());
        assert!(observer.rx.try_recv().is_err());
    }

    #[test]
    fn test_stale_entry_keeps_its_history() {
        let (sweeper, registry, _hub) = fixture();
        let t0 = datetime!(2026-01-01 10:00:00 UTC);
        registry.report(&id("StoreA", "T1"), connected("1.2.3.4"), t0);

        sweeper.sweep_once(t0 + time::Duration::seconds(21));
        let entry = registry.get(&id("StoreA", "T1")).unwrap();
        assert_eq!(entry.status, ConnectionStatus::Disconnected);
        assert_eq!(entry.ip, "1.2.3.4");
        assert_eq!(entry.isp, "ExampleISP");

        // Already disconnected: the next cycle has nothing to do.
        assert!(sweeper.sweep_once(t0 + time::Duration::seconds(60)).transitioned.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_sweeps_on_start() {
        let registry = LivenessRegistry::new();
        let hub = BroadcastHub::default();
        let sweeper = StalenessSweeper::new(
            registry.clone(),
            RosterStore::default(),
            hub.clone(),
            Duration::from_secs(1),
        );
        let long_ago = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        registry.report(&id("StoreA", "T1"), connected("1.1.1.1"), long_ago);

        let handle = sweeper.spawn();
        // The first interval tick fires immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.connected_count(), 0);
        handle.abort();
    }
}
