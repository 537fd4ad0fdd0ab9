//! Local control endpoint of a running launcher.
//!
//! The `start` process owns the server session; `stop`, `status` and
//! `reset-world` invocations reach it through this loopback HTTP API.

pub mod client;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::supervisor::console::ConsoleLine;
use crate::supervisor::state_machine;
use crate::supervisor::Supervisor;

/// IPC 요청/응답 타입
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: state_machine::State,
    pub pid: Option<u32>,
    pub working_dir: String,
    pub command: Option<String>,
    pub uptime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    pub state: state_machine::State,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub seed: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleQuery {
    pub since: Option<u64>,
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleResponse {
    pub lines: Vec<ConsoleLine>,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<Supervisor>,
    pub working_dir: PathBuf,
    pub properties_file: PathBuf,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(
        supervisor: Arc<Supervisor>,
        working_dir: PathBuf,
        properties_file: PathBuf,
        listen_addr: &str,
    ) -> Self {
        Self {
            supervisor,
            working_dir,
            properties_file,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(status_handler))
            .route("/api/stop", post(stop_handler))
            .route("/api/console", get(console_handler))
            .route("/api/world/reset", post(reset_world_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("Control endpoint listening on http://{}", self.listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// GET /api/status
async fn status_handler(State(state): State<IPCServer>) -> impl IntoResponse {
    let session = state.supervisor.session(&state.working_dir);
    let body = match session {
        Some(s) if s.state().is_active() => StatusResponse {
            state: s.state(),
            pid: Some(s.pid),
            working_dir: s.working_dir().display().to_string(),
            command: Some(s.command().display()),
            uptime_seconds: Some(s.uptime_seconds()),
        },
        _ => StatusResponse {
            state: state_machine::State::Stopped,
            pid: None,
            working_dir: std::fs::canonicalize(&state.working_dir)
                .unwrap_or_else(|_| state.working_dir.clone())
                .display()
                .to_string(),
            command: None,
            uptime_seconds: None,
        },
    };
    Json(body)
}

/// POST /api/stop
async fn stop_handler(State(state): State<IPCServer>) -> impl IntoResponse {
    match state.supervisor.stop(&state.working_dir).await {
        Ok(_) => {
            let current = state.supervisor.state(&state.working_dir);
            (StatusCode::OK, Json(StopResponse { success: true, state: current })).into_response()
        }
        Err(e) => {
            tracing::warn!("Stop request failed: {}", e);
            e.into_response()
        }
    }
}

/// GET /api/console?since=0&count=100
async fn console_handler(
    State(state): State<IPCServer>,
    Query(params): Query<ConsoleQuery>,
) -> impl IntoResponse {
    let Some(session) = state.supervisor.session(&state.working_dir) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No server session"})),
        )
            .into_response();
    };

    let lines = match (params.since, params.count) {
        (Some(since), _) => session.console_since(since).await,
        (None, Some(count)) => session.recent_console(count).await,
        (None, None) => session.recent_console(100).await,
    };
    (StatusCode::OK, Json(ConsoleResponse { lines })).into_response()
}

/// POST /api/world/reset
async fn reset_world_handler(
    State(state): State<IPCServer>,
    Json(req): Json<ResetRequest>,
) -> impl IntoResponse {
    match state
        .supervisor
        .reset_world(&state.working_dir, &state.properties_file, &req.seed)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(json!({"success": true, "report": report}))).into_response(),
        Err(e) => {
            tracing::error!("World reset failed: {}", e);
            e.into_response()
        }
    }
}
