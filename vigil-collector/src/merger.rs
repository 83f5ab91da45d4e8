//! Snapshot Merger: roster + registry -> one point-in-time view.

use std::collections::BTreeMap;

use crate::models::{Snapshot, TerminalTelemetry};
use crate::registry::RegistryMap;
use crate::roster::Roster;

/// Every expected terminal is present (a never-seen placeholder when it has
/// not reported), followed by every reporter the roster does not know about.
pub fn merge(roster: &Roster, registry: &RegistryMap) -> Snapshot {
    let mut merged = BTreeMap::new();

    for id in roster.identities() {
        let telemetry = registry
            .get(&id)
            .cloned()
            .unwrap_or_else(TerminalTelemetry::never_seen);
        merged.insert(id, telemetry);
    }

    for (id, telemetry) in registry {
        merged.entry(id.clone()).or_insert_with(|| telemetry.clone());
    }

    Snapshot(merged)
}
