//! MonitorService: the single owner of roster, registry, hub, dispatcher and
//! activity log. HTTP and WebSocket handlers only go through this type.

use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::activity_log::ActivityLog;
use crate::dispatcher::{CommandDispatcher, ConnectionId, DispatchOutcome, TerminalSession};
use crate::error::CollectorError;
use crate::hub::{BroadcastHub, Observer, ObserverId};
use crate::merger::merge;
use crate::models::{
    CommandKind, ConnectionStatus, LogEntryIn, Snapshot, SpeedtestResult, StatusUpdateIn, TerminalHello,
    TerminalIdentity, TerminalTelemetry,
};
use crate::registry::{LivenessRegistry, ReportOutcome};
use crate::roster::{Roster, RosterStore};
use crate::sweeper::{StalenessSweeper, SweepReport};
use crate::view::{build_view, StatusView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Removed,
    /// The identity is on the roster; flushing it is a no-op.
    Expected,
    NotFound,
}

#[derive(Clone)]
pub struct MonitorService {
    roster: RosterStore,
    registry: LivenessRegistry,
    hub: BroadcastHub,
    dispatcher: CommandDispatcher,
    sweeper: StalenessSweeper,
    log: ActivityLog,
}

impl MonitorService {
    pub fn new(roster: Roster, log: ActivityLog, heartbeat_timeout: Duration, observer_queue: usize) -> Self {
        let roster = RosterStore::new(roster);
        let registry = LivenessRegistry::new();
        let hub = BroadcastHub::new(observer_queue);
        let dispatcher = CommandDispatcher::new(hub.clone());
        let sweeper = StalenessSweeper::new(registry.clone(), roster.clone(), hub.clone(), heartbeat_timeout);
        Self { roster, registry, hub, dispatcher, sweeper, log }
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn registry(&self) -> &LivenessRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn sweeper(&self) -> &StalenessSweeper {
        &self.sweeper
    }

    pub fn snapshot(&self) -> Snapshot {
        merge(&self.roster.current(), &self.registry.snapshot_all())
    }

    pub fn status_view(&self) -> StatusView {
        let roster = self.roster.current();
        build_view(&roster, &merge(&roster, &self.registry.snapshot_all()))
    }

    fn broadcast(&self) -> usize {
        self.hub.publish_snapshot(|| self.snapshot())
    }

    // ---- ingestion ----

    /// `POST /update`. A malformed identity never reaches the registry.
    pub fn report(&self, update: &StatusUpdateIn) -> Result<ReportOutcome, CollectorError> {
        let id = update.identity()?;
        Ok(self.report_at(&id, update.telemetry(), OffsetDateTime::now_utc()))
    }

    pub fn report_at(&self, id: &TerminalIdentity, telemetry: TerminalTelemetry, now: OffsetDateTime) -> ReportOutcome {
        let outcome = self.registry.report(id, telemetry, now);
        if outcome == ReportOutcome::Applied {
            self.broadcast();
        }
        outcome
    }

    pub fn sweep_once(&self, now: OffsetDateTime) -> SweepReport {
        self.sweeper.sweep_once(now)
    }

    // ---- administration ----

    pub fn replace_roster(&self, roster: Roster) {
        self.roster.replace(roster);
        self.broadcast();
    }

    /// Removes every reporter that is not on the roster.
    pub fn flush_unknown(&self) -> Vec<TerminalIdentity> {
        let roster = self.roster.current();
        let mut removed = self.registry.retain(|id| roster.contains(id));
        removed.sort();
        if !removed.is_empty() {
            info!("[service] flushed {} unknown terminal(s)", removed.len());
            self.broadcast();
        }
        removed
    }

    pub fn flush(&self, id: &TerminalIdentity) -> FlushOutcome {
        if self.roster.current().contains(id) {
            info!("[service] {} is expected, flush ignored", id);
            return FlushOutcome::Expected;
        }
        match self.registry.remove(id) {
            Some(_) => {
                self.broadcast();
                FlushOutcome::Removed
            }
            None => FlushOutcome::NotFound,
        }
    }

    // ---- observers ----

    pub fn attach_observer(&self) -> Observer {
        self.hub.attach(|| self.snapshot())
    }

    pub fn detach_observer(&self, id: ObserverId) {
        self.hub.detach(id);
    }

    // ---- terminal connections and commands ----

    /// Transport connect: registers the live link and performs the implicit
    /// report, from the hello's telemetry or else the last known telemetry.
    pub fn terminal_connected(
        &self,
        hello: &TerminalHello,
        now: OffsetDateTime,
    ) -> Result<(TerminalIdentity, TerminalSession), CollectorError> {
        let id = TerminalIdentity::new(&hello.store_id, &hello.terminal_id)?;

        let telemetry = match &hello.telemetry {
            Some(update) => {
                if update.identity().ok().as_ref() != Some(&id) {
                    warn!("[service] hello telemetry for {} carries another identity, using link identity", id);
                }
                update.telemetry()
            }
            None => self.registry.get(&id).unwrap_or_else(TerminalTelemetry::never_seen),
        };
        let telemetry = TerminalTelemetry { status: ConnectionStatus::Connected, ..telemetry };

        let session = self.dispatcher.connect(&id);
        self.report_at(&id, telemetry, now);
        Ok((id, session))
    }

    /// Transport close. Liveness is left to the sweeper.
    pub fn terminal_disconnected(&self, id: &TerminalIdentity, conn_id: ConnectionId) {
        self.dispatcher.disconnect(id, conn_id);
    }

    pub fn dispatch(&self, id: &TerminalIdentity, kind: CommandKind) -> DispatchOutcome {
        self.dispatcher.dispatch(id, kind)
    }

    /// Operator command addressed by `"store,terminal"` key.
    pub fn dispatch_key(&self, key: &str, kind: CommandKind) -> Result<DispatchOutcome, CollectorError> {
        let id = TerminalIdentity::from_key(key)?;
        info!("[service] received {:?} command for {}", kind, id);
        Ok(self.dispatch(&id, kind))
    }

    pub fn relay_speedtest_result(&self, result: SpeedtestResult) -> usize {
        self.dispatcher.relay_speedtest_result(result)
    }

    // ---- activity log ----

    pub async fn append_log(&self, entry: &LogEntryIn) -> Result<(), CollectorError> {
        self.log.append(entry).await
    }

    pub async fn log_lines(&self) -> Result<Vec<String>, CollectorError> {
        self.log.lines().await
    }
}
