/**
 * VIGIL COLLECTOR REST API
 *
 * Agents report through `POST /update` and `POST /log`. Operators and
 * dashboards read `/status`, `/status/view` and `/logs`, replace the roster,
 * flush unknown reporters and issue commands. Push traffic goes through the
 * WebSocket routes in `ws.rs`.
 *
 * Errors are answered as `{ "ok": false, "msg": ... }` with a 4xx/5xx code.
 */

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, warn};

use crate::error::CollectorError;
use crate::health::{CollectorHealth, HealthTracker};
use crate::models::{CommandKind, CommandTarget, LogEntryIn, Snapshot, StatusUpdateIn, TerminalIdentity};
use crate::registry::ReportOutcome;
use crate::roster::Roster;
use crate::service::{FlushOutcome, MonitorService};
use crate::view::StatusView;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub service: MonitorService,
    pub health_tracker: HealthTracker,
    pub write_timeout: Duration,
}

type ApiResult = Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)>;

fn reject(code: StatusCode, msg: impl ToString) -> (StatusCode, Json<Value>) {
    (code, Json(json!({ "ok": false, "msg": msg.to_string() })))
}

fn reject_error(e: CollectorError) -> (StatusCode, Json<Value>) {
    match e {
        CollectorError::MalformedIdentity(_) => reject(StatusCode::BAD_REQUEST, e),
        _ => {
            error!("[http] {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/status", get(get_status))
        .route("/api/status", get(get_status))
        .route("/status/view", get(get_status_view))
        .route("/update", post(post_update))
        .route("/log", post(post_log))
        .route("/logs", get(get_logs))
        .route("/load_expected_terminals", post(load_expected_terminals))
        .route("/terminals/flush_unknown", post(flush_unknown))
        .route("/terminals/{key}", delete(flush_terminal))
        .route("/commands/reboot", post(command_reboot))
        .route("/commands/speedtest", post(command_speedtest))
        .route("/ws", get(observer_ws))
        .route("/ws/terminal", get(terminal_ws))
        .with_state(app_state)
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<Snapshot> {
    Json(app.service.snapshot())
}

// GET /status/view
async fn get_status_view(State(app): State<AppState>) -> Json<StatusView> {
    Json(app.service.status_view())
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<CollectorHealth> {
    Json(app.health_tracker.get_health(&app.service))
}

// POST /update
async fn post_update(State(app): State<AppState>, Json(update): Json<StatusUpdateIn>) -> ApiResult {
    match app.service.report(&update) {
        Ok(ReportOutcome::Applied) => Ok((StatusCode::OK, Json(json!({ "message": "Status updated" })))),
        Ok(ReportOutcome::OutOfOrder) => Ok((StatusCode::ACCEPTED, Json(json!({ "message": "Stale report ignored" })))),
        Err(e) => {
            warn!("[http] rejected update: {}", e);
            Err(reject_error(e))
        }
    }
}

// POST /log
async fn post_log(State(app): State<AppState>, Json(entry): Json<LogEntryIn>) -> ApiResult {
    app.service.append_log(&entry).await.map_err(reject_error)?;
    Ok((StatusCode::OK, Json(json!({ "message": "Log saved" }))))
}

// GET /logs
async fn get_logs(State(app): State<AppState>) -> Result<Json<Vec<String>>, (StatusCode, Json<Value>)> {
    app.service.log_lines().await.map(Json).map_err(reject_error)
}

// POST /load_expected_terminals
async fn load_expected_terminals(State(app): State<AppState>, Json(roster): Json<Roster>) -> Json<Value> {
    app.service.replace_roster(roster);
    Json(json!({ "success": true }))
}

// POST /terminals/flush_unknown
async fn flush_unknown(State(app): State<AppState>) -> Json<Value> {
    let removed: Vec<String> = app.service.flush_unknown().iter().map(TerminalIdentity::key).collect();
    Json(json!({ "removed": removed }))
}

// DELETE /terminals/{key}
async fn flush_terminal(State(app): State<AppState>, Path(key): Path<String>) -> ApiResult {
    let id = TerminalIdentity::from_key(&key).map_err(reject_error)?;
    let (removed, msg) = match app.service.flush(&id) {
        FlushOutcome::Removed => (true, "removed"),
        FlushOutcome::Expected => (false, "expected terminal, not flushed"),
        FlushOutcome::NotFound => (false, "not tracked"),
    };
    Ok((StatusCode::OK, Json(json!({ "removed": removed, "msg": msg }))))
}

async fn dispatch(app: &AppState, target: &CommandTarget, kind: CommandKind) -> ApiResult {
    let id = TerminalIdentity::new(&target.store_id, &target.terminal_id).map_err(reject_error)?;
    let outcome = app.service.dispatch(&id, kind);
    Ok((StatusCode::OK, Json(json!({ "delivered": outcome.delivered() }))))
}

// POST /commands/reboot
async fn command_reboot(State(app): State<AppState>, Json(target): Json<CommandTarget>) -> ApiResult {
    dispatch(&app, &target, CommandKind::Reboot).await
}

// POST /commands/speedtest
async fn command_speedtest(State(app): State<AppState>, Json(target): Json<CommandTarget>) -> ApiResult {
    dispatch(&app, &target, CommandKind::Speedtest).await
}

// GET /ws
async fn observer_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::observer_socket(socket, app.service, app.write_timeout))
}

// GET /ws/terminal
async fn terminal_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::terminal_socket(socket, app.service, app.write_timeout))
}
