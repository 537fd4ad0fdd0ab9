//! Supervisor 전용 에러 타입. 에러 종류를 구분하여 IPC 핸들러와 CLI에서
//! 적절한 HTTP 상태 코드 / 종료 코드를 돌려줄 수 있게 합니다.

use axum::http::StatusCode;
use std::path::PathBuf;

/// Failures surfaced by the supervisor and the world reset procedure.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Server in '{0}' is already running")]
    AlreadyRunning(PathBuf),

    #[error("Server in '{0}' is not running")]
    NotRunning(PathBuf),

    #[error("Server in '{0}' is running; stop it before resetting the world")]
    ServerRunning(PathBuf),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server stream I/O failed: {0}")]
    StreamIo(String),

    #[error("World backup to '{path}' failed: {source}")]
    BackupIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Writing '{path}' failed: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyRunning(_) | Self::NotRunning(_) | Self::ServerRunning(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Self::Spawn { .. }
            | Self::StreamIo(_)
            | Self::BackupIo { .. }
            | Self::ConfigIo { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::NotRunning(_) => "NOT_RUNNING",
            Self::ServerRunning(_) => "SERVER_RUNNING",
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::StreamIo(_) => "STREAM_IO",
            Self::BackupIo { .. } => "BACKUP_IO",
            Self::ConfigIo { .. } => "CONFIG_IO",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// axum 핸들러에서 SupervisorError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for SupervisorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}
