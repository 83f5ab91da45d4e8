//! Command Dispatcher: point-to-point routing of operator commands to the
//! live connection of the addressed terminal, and relay of terminal results
//! back to observers.
//!
//! Delivery is best-effort: no queueing for absent terminals, no retry.
//! Nothing here touches the liveness registry.

use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::BroadcastHub;
use crate::models::{CommandKind, ObserverEvent, SpeedtestResult, TerminalCommand, TerminalIdentity};
use crate::state::{new_state, Shared};

pub type ConnectionId = Uuid;

const LINK_QUEUE: usize = 16;

struct TerminalLink {
    conn_id: ConnectionId,
    tx: mpsc::Sender<TerminalCommand>,
}

/// Receiving end of a terminal connection's command queue.
pub struct TerminalSession {
    pub conn_id: ConnectionId,
    pub rx: mpsc::Receiver<TerminalCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    NoLiveConnection,
}

impl DispatchOutcome {
    pub fn delivered(self) -> bool {
        self == DispatchOutcome::Delivered
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    links: Shared<HashMap<TerminalIdentity, TerminalLink>>,
    hub: BroadcastHub,
}

impl CommandDispatcher {
    pub fn new(hub: BroadcastHub) -> Self {
        Self { links: new_state(HashMap::new()), hub }
    }

    /// Registers a live connection for `id`. A newer connection for the same
    /// terminal replaces the older one, whose queue is closed.
    pub fn connect(&self, id: &TerminalIdentity) -> TerminalSession {
        let (tx, rx) = mpsc::channel(LINK_QUEUE);
        let conn_id = Uuid::new_v4();
        let previous = self.links.lock().insert(id.clone(), TerminalLink { conn_id, tx });
        if let Some(old) = previous {
            info!("[dispatcher] {} reconnected, superseding connection {}", id, old.conn_id);
        } else {
            info!("[dispatcher] {} connected ({})", id, conn_id);
        }
        TerminalSession { conn_id, rx }
    }

    /// Drops the link only if it still belongs to `conn_id`, so the close of
    /// a superseded connection leaves the newer one in place.
    pub fn disconnect(&self, id: &TerminalIdentity, conn_id: ConnectionId) -> bool {
        let mut links = self.links.lock();
        match links.get(id) {
            Some(link) if link.conn_id == conn_id => {
                links.remove(id);
                info!("[dispatcher] {} disconnected ({})", id, conn_id);
                true
            }
            _ => false,
        }
    }

    pub fn dispatch(&self, id: &TerminalIdentity, kind: CommandKind) -> DispatchOutcome {
        let mut links = self.links.lock();
        let Some(link) = links.get(id) else {
            debug!("[dispatcher] no live connection for {}, dropping {:?}", id, kind);
            return DispatchOutcome::NoLiveConnection;
        };

        match link.tx.try_send(kind.for_target(id)) {
            Ok(()) => {
                info!("[dispatcher] sent {:?} to {}", kind, id);
                DispatchOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                warn!("[dispatcher] command queue of {} is full, dropping {:?}", id, kind);
                DispatchOutcome::NoLiveConnection
            }
            Err(TrySendError::Closed(_)) => {
                links.remove(id);
                debug!("[dispatcher] connection of {} already closed, dropping {:?}", id, kind);
                DispatchOutcome::NoLiveConnection
            }
        }
    }

    /// Relays a terminal's speedtest results to every observer, unmodified.
    pub fn relay_speedtest_result(&self, result: SpeedtestResult) -> usize {
        info!(
            "[dispatcher] speedtest results from {},{}: down={:?} up={:?}",
            result.store_id, result.terminal_id, result.download_mbps, result.upload_mbps
        );
        self.hub.publish(&ObserverEvent::SpeedtestResults(result))
    }

    pub fn is_connected(&self, id: &TerminalIdentity) -> bool {
        self.links.lock().contains_key(id)
    }

    pub fn live_links(&self) -> usize {
        self.links.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandTarget, Snapshot};

    fn id(store: &str, terminal: &str) -> TerminalIdentity {
        TerminalIdentity::new(store, terminal).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_reaches_only_the_addressed_terminal() {
        let dispatcher = CommandDispatcher::new(BroadcastHub::default());
        let mut t1 = dispatcher.connect(&id("StoreA", "T1"));
        let mut t2 = dispatcher.connect(&id("StoreA", "T2"));

        let outcome = dispatcher.dispatch(&id("StoreA", "T1"), CommandKind::Reboot);
        assert!(outcome.delivered());

        let command = t1.rx.recv().await.unwrap();
        assert_eq!(
            command,
            TerminalCommand::RebootCommand(CommandTarget { store_id: "StoreA".into(), terminal_id: "T1".into() })
        );
        assert!(t2.rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_without_connection_is_dropped() {
        let dispatcher = CommandDispatcher::new(BroadcastHub::default());
        let outcome = dispatcher.dispatch(&id("StoreA", "T1"), CommandKind::Speedtest);
        assert_eq!(outcome, DispatchOutcome::NoLiveConnection);
    }

    #[test]
    fn test_stale_close_does_not_drop_newer_connection() {
        let dispatcher = CommandDispatcher::new(BroadcastHub::default());
        let key = id("StoreA", "T1");
        let old = dispatcher.connect(&key);
        let new = dispatcher.connect(&key);

        assert!(!dispatcher.disconnect(&key, old.conn_id));
        assert!(dispatcher.is_connected(&key));
        assert!(dispatcher.disconnect(&key, new.conn_id));
        assert!(!dispatcher.is_connected(&key));
        assert!(!dispatcher.disconnect(&key, new.conn_id));
    }

    #[tokio::test]
    async fn test_superseded_connection_queue_is_closed() {
        let dispatcher = CommandDispatcher::new(BroadcastHub::default());
        let key = id("StoreA", "T1");
        let mut old = dispatcher.connect(&key);
        let _new = dispatcher.connect(&key);
        assert!(old.rx.recv().await.is_none());
    }

    #[test]
    fn test_closed_connection_is_pruned_on_dispatch() {
        let dispatcher = CommandDispatcher::new(BroadcastHub::default());
        let key = id("StoreA", "T1");
        drop(dispatcher.connect(&key));

        assert_eq!(dispatcher.dispatch(&key, CommandKind::Reboot), DispatchOutcome::NoLiveConnection);
        assert_eq!(dispatcher.live_links(), 0);
    }

    #[tokio::test]
    async fn test_speedtest_results_are_relayed_to_observers() {
        let hub = BroadcastHub::default();
        let dispatcher = CommandDispatcher::new(hub.clone());
        let mut observer = hub.attach(Snapshot::default);
        observer.rx.recv().await.unwrap();

        let relayed = dispatcher.relay_speedtest_result(SpeedtestResult {
            store_id: "StoreA".into(),
            terminal_id: "T1".into(),
            download_mbps: Some(95.2),
            upload_mbps: Some(11.4),
        });
        assert_eq!(relayed, 1);

        let message = observer.rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["event"], "speedtest_results");
        assert_eq!(value["data"]["downloadMbps"], 95.2);
        assert_eq!(value["data"]["terminalId"], "T1");
    }
}
