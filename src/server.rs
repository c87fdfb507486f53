use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::monitor::{
    BreakerSnapshot, CyclePhase, CycleResult, EventBus, MonitorEvent, Scheduler, SchedulerState,
    TriggerOutcome,
};
use crate::notify::{DispatchReport, Dispatcher, Notification};

const RECENT_NOTIFICATIONS: usize = 20;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardView {
    pub status_line: Option<String>,
    pub cycle: Option<u64>,
    pub phase: Option<CyclePhase>,
    pub halted: bool,
    pub recent_notifications: VecDeque<Notification>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Latest observer-facing state, kept current by following the event bus.
#[derive(Clone, Default)]
pub struct StatusBoard {
    view: Arc<RwLock<BoardView>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn view(&self) -> BoardView {
        self.view.read().await.clone()
    }

    pub async fn apply(&self, event: MonitorEvent) {
        let mut view = self.view.write().await;
        match event {
            MonitorEvent::Phase { cycle, phase } => {
                view.cycle = Some(cycle);
                view.phase = Some(phase);
            }
            MonitorEvent::Status { line } => view.status_line = Some(line),
            MonitorEvent::CycleFinished { cycle, .. } => view.cycle = Some(cycle),
            MonitorEvent::Notification { notification } => {
                if view.recent_notifications.len() == RECENT_NOTIFICATIONS {
                    view.recent_notifications.pop_front();
                }
                view.recent_notifications.push_back(notification);
            }
            MonitorEvent::Halted { .. } => view.halted = true,
        }
        view.updated_at = Some(Utc::now());
    }

    pub fn follow(&self, bus: &EventBus) -> JoinHandle<()> {
        let board = self.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => board.apply(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status board lagged behind events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct ApiState {
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    board: StatusBoard,
}

impl ApiState {
    pub fn new(scheduler: Scheduler, dispatcher: Dispatcher, board: StatusBoard) -> Self {
        Self {
            scheduler,
            dispatcher,
            board,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    state: SchedulerState,
    interval_secs: u64,
    breaker: BreakerSnapshot,
    channels: Vec<String>,
    last_result: Option<CycleResult>,
    board: BoardView,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    state: SchedulerState,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/check", post(check))
        .route("/v1/stop", post(stop))
        .route("/v1/notify/test", post(notify_test))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the status API until `shutdown` is cancelled.
pub async fn run_server(state: ApiState, bind: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("status API listening on http://{bind}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse { status: "ok" })
}

async fn status(State(state): State<ApiState>) -> Json<ApiResponse<StatusResponse>> {
    ok(StatusResponse {
        state: state.scheduler.state(),
        interval_secs: state.scheduler.interval().as_secs(),
        breaker: state.scheduler.breaker(),
        channels: state.dispatcher.channel_names(),
        last_result: state.scheduler.last_result(),
        board: state.board.view().await,
    })
}

async fn check(State(state): State<ApiState>) -> ApiResult<CycleResult> {
    match state.scheduler.trigger_now().await {
        TriggerOutcome::Completed(result) => Ok(ok(*result)),
        TriggerOutcome::Busy => Err(ApiError::conflict("a check is already running")),
        TriggerOutcome::Halted => Err(ApiError::conflict(
            "monitoring halted after repeated login failures",
        )),
        TriggerOutcome::Stopped => Err(ApiError::conflict("monitoring has been stopped")),
    }
}

async fn stop(State(state): State<ApiState>) -> Json<ApiResponse<StopResponse>> {
    state.scheduler.stop();
    ok(StopResponse {
        state: state.scheduler.state(),
    })
}

async fn notify_test(State(state): State<ApiState>) -> Json<ApiResponse<DispatchReport>> {
    ok(state.dispatcher.send_test().await)
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::monitor::cycle::tests::{harness, table, Harness};
    use crate::monitor::BreakerState;
    use crate::session::FixtureScript;

    fn api(h: &Harness) -> ApiState {
        let scheduler = Scheduler::new(h.orchestrator.clone(), Duration::from_secs(1200));
        ApiState::new(
            scheduler,
            h.orchestrator.dispatcher().clone(),
            StatusBoard::new(),
        )
    }

    #[tokio::test]
    async fn status_reports_idle_scheduler() {
        let h = harness(vec![FixtureScript::login_rejected()], 3);
        let Json(body) = status(State(api(&h))).await;
        assert!(body.ok);
        assert_eq!(body.data.state, SchedulerState::Idle);
        assert_eq!(body.data.breaker.state, BreakerState::Armed);
        assert_eq!(body.data.channels, vec!["first", "second"]);
        assert!(body.data.last_result.is_none());
    }

    #[tokio::test]
    async fn manual_check_returns_cycle_result() {
        let h = harness(
            vec![FixtureScript::with_table(table(&[[
                "Algorithms", "70", "BA", "3", "Passed",
            ]]))],
            3,
        );
        let state = api(&h);
        let Json(body) = check(State(state.clone())).await.expect("check runs");
        assert_eq!(body.data.change_count, 1);
        let Json(status_body) = status(State(state)).await;
        assert!(status_body.data.last_result.is_some());
    }

    #[tokio::test]
    async fn check_conflicts_once_halted() {
        let h = harness(vec![FixtureScript::login_rejected()], 1);
        let state = api(&h);
        let Json(first) = check(State(state.clone())).await.expect("first check");
        assert!(first.data.halted);

        let err = check(State(state)).await.expect_err("halted");
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn stop_marks_scheduler_for_shutdown() {
        let h = harness(vec![FixtureScript::login_rejected()], 3);
        let state = api(&h);
        let Json(body) = stop(State(state.clone())).await;
        assert!(body.ok);
        assert!(state.scheduler.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn board_tracks_status_and_notifications() {
        let board = StatusBoard::new();
        board
            .apply(MonitorEvent::Status {
                line: "Last check: 09:30 (success)".to_string(),
            })
            .await;
        for i in 0..(RECENT_NOTIFICATIONS + 5) {
            board
                .apply(MonitorEvent::Notification {
                    notification: Notification {
                        title: format!("n{i}"),
                        body: String::new(),
                    },
                })
                .await;
        }
        board
            .apply(MonitorEvent::Halted {
                consecutive_failures: 3,
            })
            .await;

        let view = board.view().await;
        assert_eq!(view.status_line.as_deref(), Some("Last check: 09:30 (success)"));
        assert_eq!(view.recent_notifications.len(), RECENT_NOTIFICATIONS);
        assert_eq!(
            view.recent_notifications.front().map(|n| n.title.as_str()),
            Some("n5")
        );
        assert!(view.halted);
    }

    #[tokio::test]
    async fn board_follows_the_bus() {
        let bus = EventBus::new();
        let board = StatusBoard::new();
        let follower = board.follow(&bus);
        bus.status("Monitoring stopped");
        drop(bus);
        follower.await.expect("follower ends when the bus closes");
        assert_eq!(
            board.view().await.status_line.as_deref(),
            Some("Monitoring stopped")
        );
    }
}
