//! Vigil Agent - terminal-side reporter for the Vigil collector
//!
//! This agent keeps the collector informed about one terminal:
//! - Periodic status reports (public IP, ISP, app status, memory)
//! - Activity log lines when IP, ISP or app status change
//! - A command link serving reboot and speedtest requests

mod config;
mod execution;
mod link;
mod messages;
mod metrics;
mod reporter;
mod speedtest;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::AgentConfig;
use execution::CommandExecutor;
use link::CommandLink;
use metrics::TerminalProbe;
use reporter::{ChangeTracker, CollectorReporter};
use speedtest::SpeedtestRunner;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🤖 Vigil Agent starting...");

    let config = AgentConfig::load().await;
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let mut probe = TerminalProbe::new(http.clone(), &config.ip_info_url, &config.app_name);
    let reporter = CollectorReporter::new(http.clone(), &config.collector_url, &config.store_id, &config.terminal_id);

    let (initial_ip, initial_isp) = probe.ip_info().await;
    let mut tracker = ChangeTracker::new(initial_ip, initial_isp);

    let executor = CommandExecutor::new(config.reboot_command.clone());
    info!("Reboot command: {:?}", executor.reboot_command());

    let (latest_tx, latest_rx) = watch::channel(None);
    let link = CommandLink::new(
        config.link_url(),
        config.store_id.clone(),
        config.terminal_id.clone(),
        Duration::from_secs(config.retry_interval_secs),
        executor,
        SpeedtestRunner::new(http, config.speedtest.clone()),
        latest_rx,
    );
    tokio::spawn(link.run());

    info!(
        "Agent initialized - terminal {},{} reporting to {}",
        config.store_id, config.terminal_id, config.collector_url
    );

    let mut report_timer = interval(Duration::from_secs(config.report_interval_secs.max(1)));
    report_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        report_timer.tick().await;

        let telemetry = probe.collect().await;
        for entry in tracker.observe(&telemetry, Local::now()) {
            if let Err(e) = reporter.send_log(&entry).await {
                error!("Error sending log to server: {:#}", e);
            }
        }

        let report = reporter.report_for(&telemetry, Utc::now());
        if let Err(e) = reporter.send_status(&report).await {
            error!("Error: {:#}", e);
        }
        latest_tx.send_replace(Some(report));
    }
}
