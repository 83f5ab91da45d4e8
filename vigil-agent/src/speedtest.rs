//! Throughput measurement against plain HTTP endpoints

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::SpeedtestConfig;

pub struct SpeedtestRunner {
    http: reqwest::Client,
    config: SpeedtestConfig,
}

impl SpeedtestRunner {
    pub fn new(http: reqwest::Client, config: SpeedtestConfig) -> Self {
        Self { http, config }
    }

    /// `(download, upload)` in Mbps; a failed leg is `None`
    pub async fn run(&self) -> (Option<f64>, Option<f64>) {
        let download = self.download().await.map_err(|e| error!("Error performing download test: {:#}", e)).ok();
        let upload = self.upload().await.map_err(|e| error!("Error performing upload test: {:#}", e)).ok();
        info!("Speedtest: download={:?} upload={:?} Mbps", download, upload);
        (download, upload)
    }

    async fn download(&self) -> Result<f64> {
        let start = Instant::now();
        let body = self
            .http
            .get(&self.config.download_url)
            .timeout(self.timeout())
            .send()
            .await
            .context("download request")?
            .error_for_status()?
            .bytes()
            .await
            .context("download body")?;
        Ok(mbps(body.len(), start.elapsed()))
    }

    async fn upload(&self) -> Result<f64> {
        let payload = vec![0u8; self.config.upload_bytes];
        let start = Instant::now();
        self.http
            .post(&self.config.upload_url)
            .timeout(self.timeout())
            .body(payload)
            .send()
            .await
            .context("upload request")?
            .error_for_status()?;
        Ok(mbps(self.config.upload_bytes, start.elapsed()))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }
}

pub fn mbps(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let mbps = bytes as f64 * 8.0 / secs / 1_000_000.0;
    (mbps * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbps() {
        assert_eq!(mbps(12_500_000, Duration::from_secs(1)), 100.0);
        assert_eq!(mbps(1_000_000, Duration::from_secs(4)), 2.0);
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_give_no_numbers() {
        let runner = SpeedtestRunner::new(
            reqwest::Client::new(),
            SpeedtestConfig {
                download_url: "http://127.0.0.1:1/down".to_string(),
                upload_url: "http://127.0.0.1:1/up".to_string(),
                upload_bytes: 16,
                timeout_secs: 2,
            },
        );
        assert_eq!(runner.run().await, (None, None));
    }
}
