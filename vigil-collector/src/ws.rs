//! WebSocket push channels.
//!
//! `/ws` carries observer traffic: merged snapshots and speedtest results
//! out, operator commands in. `/ws/terminal` is the per-terminal command
//! link: a `hello` first, then commands out and speedtest results in.
//! Each socket gets a writer task with a bounded write timeout so a stalled
//! peer only ever stalls its own socket.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::models::{CommandKind, ObserverRequest, TerminalMessage};
use crate::service::MonitorService;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn observer_socket(socket: WebSocket, service: MonitorService, write_timeout: Duration) {
    let (sink, mut stream) = socket.split();
    let observer = service.attach_observer();
    let observer_id = observer.id;

    let mut writer = tokio::spawn(forward(sink, observer.rx, write_timeout, |message| Some(message.to_string())));

    let reader = async {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => handle_observer_request(&service, text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut writer => debug!("[ws] observer {} writer finished", observer_id),
        _ = reader => debug!("[ws] observer {} closed its socket", observer_id),
    }
    writer.abort();
    service.detach_observer(observer_id);
}

fn handle_observer_request(service: &MonitorService, text: &str) {
    let request = match serde_json::from_str::<ObserverRequest>(text) {
        Ok(request) => request,
        Err(e) => {
            warn!("[ws] ignoring observer message: {}", e);
            return;
        }
    };
    let (key, kind) = match &request {
        ObserverRequest::RebootTerminal(key) => (key, CommandKind::Reboot),
        ObserverRequest::PerformSpeedtest(key) => (key, CommandKind::Speedtest),
    };
    if let Err(e) = service.dispatch_key(key, kind) {
        warn!("[ws] dropping {:?} command: {}", kind, e);
    }
}

pub async fn terminal_socket(socket: WebSocket, service: MonitorService, write_timeout: Duration) {
    let (sink, mut stream) = socket.split();

    let hello = match tokio::time::timeout(HELLO_TIMEOUT, read_hello(&mut stream)).await {
        Ok(Some(hello)) => hello,
        Ok(None) => {
            warn!("[ws] terminal link closed before hello");
            return;
        }
        Err(_) => {
            warn!("[ws] terminal link sent no hello within {}s", HELLO_TIMEOUT.as_secs());
            return;
        }
    };

    let (id, session) = match service.terminal_connected(&hello, OffsetDateTime::now_utc()) {
        Ok(connected) => connected,
        Err(e) => {
            warn!("[ws] rejecting terminal link: {}", e);
            return;
        }
    };
    let conn_id = session.conn_id;
    info!("[ws] terminal {} linked", id);

    let mut writer = tokio::spawn(forward(sink, session.rx, write_timeout, |command| {
        serde_json::to_string(&command)
            .map_err(|e| error!("[ws] failed to serialize terminal command: {}", e))
            .ok()
    }));

    let reader = async {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<TerminalMessage>(text.as_str()) {
                    Ok(TerminalMessage::SpeedtestResults(result)) => {
                        if result.store_id == id.store_id() && result.terminal_id == id.terminal_id() {
                            service.relay_speedtest_result(result);
                        } else {
                            warn!(
                                "[ws] dropping speedtest results for {},{} sent on the link of {}",
                                result.store_id, result.terminal_id, id
                            );
                        }
                    }
                    Ok(TerminalMessage::Hello(_)) => debug!("[ws] duplicate hello from {}", id),
                    Err(e) => warn!("[ws] ignoring message from {}: {}", id, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut writer => debug!("[ws] terminal {} writer finished", id),
        _ = reader => debug!("[ws] terminal {} closed its link", id),
    }
    writer.abort();
    service.terminal_disconnected(&id, conn_id);
}

async fn read_hello(stream: &mut SplitStream<WebSocket>) -> Option<crate::models::TerminalHello> {
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<TerminalMessage>(text.as_str()) {
                Ok(TerminalMessage::Hello(hello)) => return Some(hello),
                Ok(_) => warn!("[ws] expected hello on terminal link"),
                Err(e) => warn!("[ws] invalid hello: {}", e),
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Drains `rx` into the socket. Items `encode` rejects are skipped. Ends
/// when the queue closes, the peer goes away, or one write exceeds
/// `write_timeout`.
async fn forward<T, S>(mut sink: S, mut rx: mpsc::Receiver<T>, write_timeout: Duration, encode: impl Fn(T) -> Option<String>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(item) = rx.recv().await {
        let Some(text) = encode(item) else { continue };
        let send = sink.send(Message::Text(text.into()));
        match tokio::time::timeout(write_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("[ws] write failed: {}", e);
                return;
            }
            Err(_) => {
                warn!("[ws] write timed out after {}s", write_timeout.as_secs());
                return;
            }
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_skips_items_that_fail_to_encode() {
        let (tx, rx) = mpsc::channel(4);
        let (sink, out) = futures::channel::mpsc::unbounded::<Message>();
        for n in [1u32, 2, 3] {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        forward(sink, rx, Duration::from_secs(1), |n| (n != 2).then(|| n.to_string())).await;

        let sent: Vec<String> = out
            .filter_map(|message| async move {
                match message {
                    Message::Text(text) => Some(text.as_str().to_string()),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(sent, vec!["1".to_string(), "3".to_string()]);
    }
}
