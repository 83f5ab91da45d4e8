//! Liveness Registry: last-reported telemetry per terminal.
//!
//! Every mutation takes the write lock for the whole operation and readers
//! copy the map under the read lock, so a snapshot is never torn across
//! entries. Nothing here awaits while a lock is held.

use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::models::{ConnectionStatus, TerminalIdentity, TerminalTelemetry};
use crate::state::{new_rw_state, SharedRw};

pub type RegistryMap = HashMap<TerminalIdentity, TerminalTelemetry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Applied,
    /// Older than what is already stored; nothing changed.
    OutOfOrder,
}

#[derive(Clone, Default)]
pub struct LivenessRegistry {
    entries: SharedRw<RegistryMap>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self { entries: new_rw_state(HashMap::new()) }
    }

    /// Upserts a report received at `received_at`. Every field is overwritten
    /// with what the report carries. Ordering uses the receive time only;
    /// `sent_at` is the agent's clock and is stored as-is.
    pub fn report(
        &self,
        id: &TerminalIdentity,
        mut telemetry: TerminalTelemetry,
        received_at: OffsetDateTime,
    ) -> ReportOutcome {
        let mut entries = self.entries.write();

        if let Some(current) = entries.get(id) {
            if current.last_heartbeat_at.is_some_and(|seen| received_at < seen) {
                debug!("[registry] ignoring out-of-order report for {}", id);
                return ReportOutcome::OutOfOrder;
            }
        } else {
            info!("[registry] first report from {}", id);
        }

        telemetry.last_heartbeat_at = Some(received_at);
        entries.insert(id.clone(), telemetry);
        ReportOutcome::Applied
    }

    /// Copy of the whole map taken under one lock acquisition.
    pub fn snapshot_all(&self) -> RegistryMap {
        self.entries.read().clone()
    }

    pub fn get(&self, id: &TerminalIdentity) -> Option<TerminalTelemetry> {
        self.entries.read().get(id).cloned()
    }

    /// Flips the entry to disconnected. Returns whether a transition happened.
    pub fn mark_stale(&self, id: &TerminalIdentity) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(entry) if entry.status != ConnectionStatus::Disconnected => {
                entry.status = ConnectionStatus::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Marks every connected entry whose heartbeat is older than `timeout` as
    /// disconnected, in a single critical section. Returns the transitioned
    /// identities.
    pub fn mark_stale_older_than(&self, now: OffsetDateTime, timeout: time::Duration) -> Vec<TerminalIdentity> {
        let mut entries = self.entries.write();
        let mut transitioned = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if entry.status == ConnectionStatus::Disconnected {
                continue;
            }
            let stale = entry
                .last_heartbeat_at
                .map_or(true, |seen| now - seen > timeout);
            if stale {
                entry.status = ConnectionStatus::Disconnected;
                transitioned.push(id.clone());
            }
        }
        transitioned
    }

    pub fn remove(&self, id: &TerminalIdentity) -> Option<TerminalTelemetry> {
        self.entries.write().remove(id)
    }

    /// Removes every entry rejected by `keep`, atomically.
    pub fn retain(&self, mut keep: impl FnMut(&TerminalIdentity) -> bool) -> Vec<TerminalIdentity> {
        let mut entries = self.entries.write();
        let mut removed = Vec::new();
        entries.retain(|id, _| {
            let kept = keep(id);
            if !kept {
                removed.push(id.clone());
            }
            kept
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connected_count(&self) -> usize {
        self.entries.read().values().filter(|t| t.is_connected()).count()
    }
}
