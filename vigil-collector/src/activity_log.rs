//! Flat append-only activity log fed by `POST /log`.
//! Not part of the liveness state model.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CollectorError;
use crate::models::LogEntryIn;

#[derive(Clone)]
pub struct ActivityLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Arc::new(Mutex::new(())) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &LogEntryIn) -> Result<(), CollectorError> {
        let line = format_line(entry);
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("[log] appended entry for {},{}", entry.store_id, entry.terminal_id);
        Ok(())
    }

    /// Lines as stored, each keeping its trailing newline. A log that was
    /// never written reads as empty.
    pub async fn lines(&self) -> Result<Vec<String>, CollectorError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text.split_inclusive('\n').map(str::to_string).collect())
    }
}

fn format_line(entry: &LogEntryIn) -> String {
    let mut line = format!("Store: {}, Terminal: {} - {}", entry.store_id, entry.terminal_id, entry.log_entry);
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line
}
