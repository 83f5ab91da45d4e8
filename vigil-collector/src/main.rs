/**
 * VIGIL COLLECTOR - main entry point
 *
 * Loads configuration and the expected roster, starts the staleness
 * sweeper, then serves the REST API and WebSocket push channels.
 */

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil_collector::activity_log::ActivityLog;
use vigil_collector::config::load_config;
use vigil_collector::health::HealthTracker;
use vigil_collector::http::{build_router, AppState};
use vigil_collector::roster::Roster;
use vigil_collector::MonitorService;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    let roster = match Roster::load(&cfg.roster_path).await {
        Ok(roster) => roster,
        Err(e) => {
            warn!("[collector] failed to load roster {}: {}", cfg.roster_path, e);
            Roster::default()
        }
    };

    let log = ActivityLog::new(&cfg.log_path);
    info!("[collector] activity log at {}", log.path().display());
    let service = MonitorService::new(roster, log, cfg.heartbeat_timeout(), cfg.observer_queue);

    let _sweeper = service.sweeper().clone().spawn();

    let app_state = AppState {
        service,
        health_tracker: HealthTracker::new(),
        write_timeout: cfg.write_timeout(),
    };
    let app = build_router(app_state);

    let addr = cfg.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("[collector] listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("[collector] shutting down");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}

