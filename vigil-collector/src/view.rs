//! Operator-facing status view: snapshot rows flagged against the roster.
//! The snapshot itself carries no expected/unexpected notion.

use serde::Serialize;

use crate::models::{ConnectionStatus, Snapshot};
use crate::roster::Roster;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub store_id: String,
    pub terminal_id: String,
    pub ip: String,
    pub isp: String,
    pub status: ConnectionStatus,
    pub app_status: String,
    pub expected: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub online: usize,
    pub offline: usize,
    pub unexpected: usize,
    pub terminals: Vec<StatusRow>,
}

pub fn build_view(roster: &Roster, snapshot: &Snapshot) -> StatusView {
    let mut view = StatusView::default();
    // Snapshot keys are ordered, so rows come out sorted by store then terminal.
    for (id, telemetry) in snapshot.iter() {
        let expected = roster.contains(id);
        if telemetry.is_connected() {
            view.online += 1;
        } else {
            view.offline += 1;
        }
        if !expected {
            view.unexpected += 1;
        }
        view.terminals.push(StatusRow {
            store_id: id.store_id().to_string(),
            terminal_id: id.terminal_id().to_string(),
            ip: telemetry.ip.clone(),
            isp: telemetry.isp.clone(),
            status: telemetry.status,
            app_status: telemetry.app_status.clone(),
            expected,
        });
    }
    view
}
