//! Read-only HTTP status surface.
//!
//! Handlers only read the latest published snapshots; nothing here can
//! mutate governor or coordinator state.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use wd_core::types::{CoordinationState, DaemonRuntimeState, HealthView, RestartAttempt};

use crate::governor::GovernorSnapshot;

/// Receivers for every snapshot the API serves.
#[derive(Clone)]
pub struct StatusState {
    pub governor: watch::Receiver<GovernorSnapshot>,
    pub coordinator: watch::Receiver<CoordinationState>,
    pub health: watch::Receiver<HealthView>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub daemons: Vec<DaemonRuntimeState>,
    pub running: usize,
    pub startup_order: Vec<String>,
    pub pending: Vec<String>,
    pub coordinator: CoordinationState,
    pub health: HealthView,
}

pub fn status_router(state: StatusState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/daemons", get(list_daemons))
        .route("/api/daemons/{name}", get(get_daemon))
        .route("/api/coordinator", get(get_coordinator))
        .route("/api/restarts", get(list_restarts))
        .route("/api/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let governor = state.governor.borrow().clone();
    Json(StatusResponse {
        running: governor.running_count(),
        daemons: governor.daemons,
        startup_order: governor.startup_order,
        pending: governor.pending,
        coordinator: state.coordinator.borrow().clone(),
        health: *state.health.borrow(),
    })
}

async fn list_daemons(State(state): State<StatusState>) -> Json<Vec<DaemonRuntimeState>> {
    Json(state.governor.borrow().daemons.clone())
}

async fn get_daemon(State(state): State<StatusState>, Path(name): Path<String>) -> Response {
    let found = state.governor.borrow().daemon(&name).cloned();
    match found {
        Some(daemon) => Json(daemon).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("unknown daemon: {name}")})),
        )
            .into_response(),
    }
}

async fn get_coordinator(State(state): State<StatusState>) -> Json<CoordinationState> {
    Json(state.coordinator.borrow().clone())
}

async fn list_restarts(State(state): State<StatusState>) -> Json<Vec<RestartAttempt>> {
    Json(state.governor.borrow().restarts.clone())
}

async fn get_health(State(state): State<StatusState>) -> Json<HealthView> {
    Json(*state.health.borrow())
}
