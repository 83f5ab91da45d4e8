use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::service::MonitorService;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectorHealth {
    pub uptime_seconds: u64,
    pub roster_size: u32,
    pub terminals_tracked: u32,
    pub terminals_connected: u32,
    pub observers: u32,
    pub live_links: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, service: &MonitorService) -> CollectorHealth {
        CollectorHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            roster_size: service.roster().current().len() as u32,
            terminals_tracked: service.registry().len() as u32,
            terminals_connected: service.registry().connected_count() as u32,
            observers: service.hub().observer_count() as u32,
            live_links: service.dispatcher().live_links() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity_log::ActivityLog;
    use crate::roster::Roster;
    use std::time::Duration;

    #[test]
    fn test_health_counts() {
        let service = MonitorService::new(
            Roster::from_entries([("StoreA", vec!["T1", "T2"])]),
            ActivityLog::new(std::env::temp_dir().join("vigil-health-test.log")),
            Duration::from_secs(20),
            8,
        );
        let _observer = service.attach_observer();

        let health = HealthTracker::new().get_health(&service);
        assert_eq!(health.roster_size, 2);
        assert_eq!(health.terminals_tracked, 0);
        assert_eq!(health.observers, 1);
        assert_eq!(health.live_links, 0);
    }
}
