//! Command link to the collector (`/ws/terminal`)
//!
//! Connects, says hello with the freshest report, then serves reboot and
//! speedtest commands until the socket drops. A lost link is retried at a
//! fixed interval forever.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::execution::CommandExecutor;
use crate::messages::{Hello, IncomingCommand, OutgoingFrame, SpeedtestResults, StatusReport};
use crate::speedtest::SpeedtestRunner;

const REPLY_QUEUE: usize = 8;

pub struct CommandLink {
    url: String,
    store_id: String,
    terminal_id: String,
    retry_interval: Duration,
    executor: Arc<CommandExecutor>,
    speedtest: Arc<SpeedtestRunner>,
    latest: watch::Receiver<Option<StatusReport>>,
}

impl CommandLink {
    pub fn new(
        url: String,
        store_id: String,
        terminal_id: String,
        retry_interval: Duration,
        executor: CommandExecutor,
        speedtest: SpeedtestRunner,
        latest: watch::Receiver<Option<StatusReport>>,
    ) -> Self {
        Self {
            url,
            store_id,
            terminal_id,
            retry_interval,
            executor: Arc::new(executor),
            speedtest: Arc::new(speedtest),
            latest,
        }
    }

    pub async fn run(self) {
        loop {
            match self.session().await {
                Ok(()) => info!("Disconnected from server"),
                Err(e) => warn!("Command link unavailable: {:#}", e),
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// One connection lifetime
    async fn session(&self) -> Result<()> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("connect {}", self.url))?;
        let (mut sink, mut stream) = socket.split();
        info!("Connected to server");

        let hello = {
            let latest = self.latest.borrow();
            serde_json::to_string(&OutgoingFrame::Hello(Hello {
                store_id: &self.store_id,
                terminal_id: &self.terminal_id,
                telemetry: latest.as_ref(),
            }))?
        };
        sink.send(Message::Text(hello)).await.context("send hello")?;

        let (reply_tx, mut reply_rx) = mpsc::channel::<String>(REPLY_QUEUE);
        loop {
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else { break };
                    let text = match message.context("read from collector")? {
                        Message::Text(text) => text,
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    match serde_json::from_str::<IncomingCommand>(&text) {
                        Ok(command) => self.handle(command, &reply_tx),
                        Err(e) => debug!("Ignoring frame: {}", e),
                    }
                }
                Some(reply) = reply_rx.recv() => {
                    sink.send(Message::Text(reply)).await.context("send reply")?;
                }
            }
        }
        Ok(())
    }

    /// Commands addressed to another terminal are ignored. Both commands run
    /// off the read loop; replies come back through `replies`.
    fn handle(&self, command: IncomingCommand, replies: &mpsc::Sender<String>) {
        let target = command.target();
        if target.store_id != self.store_id || target.terminal_id != self.terminal_id {
            warn!("Ignoring command for {},{}", target.store_id, target.terminal_id);
            return;
        }

        match command {
            IncomingCommand::RebootCommand(_) => {
                info!("Received reboot command for {}-{}", self.store_id, self.terminal_id);
                let executor = Arc::clone(&self.executor);
                tokio::spawn(async move {
                    let result = executor.reboot().await;
                    debug!("Reboot finished in {}ms (success: {})", result.execution_time_ms, result.success);
                });
            }
            IncomingCommand::SpeedtestCommand(_) => {
                info!("Received speedtest command for {}-{}", self.store_id, self.terminal_id);
                let speedtest = Arc::clone(&self.speedtest);
                let store_id = self.store_id.clone();
                let terminal_id = self.terminal_id.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    let (download_mbps, upload_mbps) = speedtest.run().await;
                    let reply = match serde_json::to_string(&OutgoingFrame::SpeedtestResults(SpeedtestResults {
                        store_id: &store_id,
                        terminal_id: &terminal_id,
                        download_mbps,
                        upload_mbps,
                    })) {
                        Ok(reply) => reply,
                        Err(e) => {
                            error!("Failed to encode speedtest results: {}", e);
                            return;
                        }
                    };
                    if replies.send(reply).await.is_err() {
                        debug!("Link closed before speedtest results could be sent");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeedtestConfig;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn link(url: String, latest: watch::Receiver<Option<StatusReport>>) -> CommandLink {
        link_with_download(url, latest, "http://127.0.0.1:1/down".to_string())
    }

    fn link_with_download(
        url: String,
        latest: watch::Receiver<Option<StatusReport>>,
        download_url: String,
    ) -> CommandLink {
        let speedtest = SpeedtestRunner::new(
            reqwest::Client::new(),
            SpeedtestConfig {
                download_url,
                upload_url: "http://127.0.0.1:1/up".to_string(),
                upload_bytes: 16,
                timeout_secs: 3,
            },
        );
        CommandLink::new(
            url,
            "StoreA".to_string(),
            "T1".to_string(),
            Duration::from_millis(50),
            CommandExecutor::new(Some(vec!["true".to_string()])),
            speedtest,
            latest,
        )
    }

    async fn next_json<S>(stream: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_hello_then_speedtest_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/terminal", listener.local_addr().unwrap());
        let (_tx, rx) = watch::channel(None);
        tokio::spawn(link(url, rx).run());

        let (tcp, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(tcp).await.unwrap();

        let hello = next_json(&mut socket).await;
        assert_eq!(hello["event"], "hello");
        assert_eq!(hello["data"]["storeId"], "StoreA");
        assert!(hello["data"]["telemetry"].is_null());

        let foreign = json!({ "event": "speedtest_command", "data": { "storeId": "StoreA", "terminalId": "T2" } });
        socket.send(Message::Text(foreign.to_string())).await.unwrap();
        let ours = json!({ "event": "speedtest_command", "data": { "storeId": "StoreA", "terminalId": "T1" } });
        socket.send(Message::Text(ours.to_string())).await.unwrap();

        let reply = next_json(&mut socket).await;
        assert_eq!(reply["event"], "speedtest_results");
        assert_eq!(reply["data"]["terminalId"], "T1");
        assert!(reply["data"]["downloadMbps"].is_null());
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/terminal", listener.local_addr().unwrap());
        let (tx, rx) = watch::channel(None);
        tokio::spawn(link(url, rx).run());

        let (tcp, _) = listener.accept().await.unwrap();
        let mut first = accept_async(tcp).await.unwrap();
        next_json(&mut first).await;

        let report = StatusReport {
            store_id: "StoreA".to_string(),
            terminal_id: "T1".to_string(),
            status: "connected".to_string(),
            ip: "1.2.3.4".to_string(),
            isp: "ISP".to_string(),
            app_status: "Running".to_string(),
            memory_usage_percent: Some(10.0),
            download_mbps: None,
            upload_mbps: None,
            sent_at: chrono::Utc::now(),
        };
        tx.send(Some(report)).unwrap();
        drop(first);

        let (tcp, _) = listener.accept().await.unwrap();
        let mut second = accept_async(tcp).await.unwrap();
        let hello = next_json(&mut second).await;
        assert_eq!(hello["data"]["telemetry"]["ip"], "1.2.3.4");
    }

    #[tokio::test]
    async fn test_link_keeps_reading_during_speedtest() {
        // Accepts connections and never answers them.
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let download_url = format!("http://{}/down", silent.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((tcp, _)) = silent.accept().await {
                held.push(tcp);
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/terminal", listener.local_addr().unwrap());
        let (_tx, rx) = watch::channel(None);
        tokio::spawn(link_with_download(url, rx, download_url).run());

        let (tcp, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(tcp).await.unwrap();
        next_json(&mut socket).await;

        let ours = json!({ "event": "speedtest_command", "data": { "storeId": "StoreA", "terminalId": "T1" } });
        socket.send(Message::Text(ours.to_string())).await.unwrap();
        socket.send(Message::Ping(b"alive".to_vec())).await.unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Message::Pong(data) = socket.next().await.unwrap().unwrap() {
                    return data;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(pong, b"alive".to_vec());

        let reply = next_json(&mut socket).await;
        assert_eq!(reply["event"], "speedtest_results");
        assert!(reply["data"]["downloadMbps"].is_null());
    }
}
