/*!
HTTP and WebSocket clients for driving a running collector from tests
*/

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Thin reqwest wrapper over the collector REST API
#[derive(Clone)]
pub struct CollectorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CollectorClient {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body, returning the status code and the decoded reply
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<(u16, Value)> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(u16, Value)> {
        let response = self.http.delete(self.url(path)).send().await?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    pub async fn update(&self, body: &Value) -> Result<(u16, Value)> {
        self.post_json("/update", body).await
    }

    pub async fn status(&self) -> Result<Value> {
        self.get_json("/status").await
    }

    pub async fn status_view(&self) -> Result<Value> {
        self.get_json("/status/view").await
    }

    pub async fn log(&self, body: &Value) -> Result<(u16, Value)> {
        self.post_json("/log", body).await
    }

    pub async fn logs(&self) -> Result<Vec<String>> {
        Ok(serde_json::from_value(self.get_json("/logs").await?)?)
    }

    pub async fn load_roster(&self, roster: &Value) -> Result<(u16, Value)> {
        self.post_json("/load_expected_terminals", roster).await
    }

    pub async fn flush_unknown(&self) -> Result<Vec<String>> {
        let (_, body) = self.post_json("/terminals/flush_unknown", &Value::Null).await?;
        Ok(serde_json::from_value(body["removed"].clone())?)
    }

    pub async fn command(&self, kind: &str, target: &Value) -> Result<bool> {
        let (_, body) = self.post_json(&format!("/commands/{kind}"), target).await?;
        Ok(body["delivered"].as_bool().unwrap_or(false))
    }

    pub fn ws_url(&self, path: &str) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{ws_base}{path}")
    }
}

/// A WebSocket peer speaking the `{event, data}` envelope, usable both as
/// observer (`/ws`) and as terminal (`/ws/terminal`)
pub struct PushClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url).await.with_context(|| format!("connect {url}"))?;
        log::info!("🔌 Connected push client to {}", url);
        Ok(Self { socket })
    }

    pub async fn send(&mut self, frame: &Value) -> Result<()> {
        self.socket.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Next `{event, data}` frame, or `None` on timeout or close
    pub async fn next_event(&mut self, timeout: Duration) -> Result<Option<Value>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.socket.next()).await;
            match next {
                Err(_) => return Ok(None),
                Ok(None) => return Ok(None),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(Message::Text(text)))) => return Ok(Some(serde_json::from_str(&text)?)),
                Ok(Some(Ok(Message::Close(_)))) => return Ok(None),
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    /// Skips frames until one named `event` arrives
    pub async fn wait_for(&mut self, event: &str, timeout: Duration) -> Result<Option<Value>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_event(remaining).await? {
                Some(frame) if frame["event"] == event => return Ok(Some(frame["data"].clone())),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}
