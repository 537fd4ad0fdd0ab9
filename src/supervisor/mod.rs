pub mod console;
pub mod error;
pub mod launch;
pub mod monitor;
pub mod session;
pub mod state_machine;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::LauncherConfig;
use crate::world::{self, ResetReport};
use error::SupervisorError;
use launch::LaunchCommand;
use session::{ExitHandle, ServerSession, SessionOptions};
use state_machine::State;

type SessionMap = HashMap<PathBuf, Arc<ServerSession>>;

/// Tracks server sessions by working directory.
///
/// At most one session per directory is active; a `Stopped` session stays in
/// the map until the next start replaces it.
pub struct Supervisor {
    sessions: Mutex<SessionMap>,
    options: SessionOptions,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl Supervisor {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self::new(SessionOptions {
            stop_command: config.server.stop_command.clone(),
            console_buffer_size: config.console_buffer_size,
            ..SessionOptions::default()
        })
    }

    /// Mutex 락 획득 헬퍼
    fn lock(&self) -> Result<MutexGuard<'_, SessionMap>, SupervisorError> {
        self.sessions.lock().map_err(|e| {
            tracing::error!("Session map lock poisoned: {}", e);
            SupervisorError::Internal(anyhow::anyhow!("session map lock poisoned"))
        })
    }

    /// Sessions are keyed by canonical path so `.` and its absolute form match.
    fn key(working_dir: &Path) -> PathBuf {
        std::fs::canonicalize(working_dir).unwrap_or_else(|_| working_dir.to_path_buf())
    }

    /// Start a server in `working_dir`. Returns as soon as the process is
    /// spawned; readiness arrives later through the session state.
    pub fn start(
        &self,
        command: LaunchCommand,
        working_dir: &Path,
    ) -> Result<Arc<ServerSession>, SupervisorError> {
        let key = Self::key(working_dir);
        // 확인부터 등록까지 락을 유지 (같은 디렉토리 중복 시작 방지)
        let mut sessions = self.lock()?;
        if let Some(existing) = sessions.get(&key) {
            if existing.state().is_active() {
                return Err(SupervisorError::AlreadyRunning(key));
            }
        }

        tracing::info!("Starting server in {}", key.display());
        let session = ServerSession::spawn(command, &key, &self.options)?;
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Ask the server in `working_dir` to shut down gracefully.
    ///
    /// The returned handle resolves when the process has exited.
    pub async fn stop(&self, working_dir: &Path) -> Result<ExitHandle, SupervisorError> {
        let session = self
            .session(working_dir)
            .ok_or_else(|| SupervisorError::NotRunning(Self::key(working_dir)))?;
        session.request_stop().await
    }

    /// Block the calling task until the session's process has exited.
    pub async fn await_exit(session: &ServerSession) -> Result<ExitStatus, SupervisorError> {
        session.exit_handle().wait().await
    }

    pub fn session(&self, working_dir: &Path) -> Option<Arc<ServerSession>> {
        let key = Self::key(working_dir);
        self.lock().ok()?.get(&key).cloned()
    }

    /// `Stopped` when no session was ever started for the directory.
    pub fn state(&self, working_dir: &Path) -> State {
        self.session(working_dir)
            .map(|s| s.state())
            .unwrap_or(State::Stopped)
    }

    /// Sessions that still have a process.
    pub fn active_sessions(&self) -> Vec<Arc<ServerSession>> {
        match self.lock() {
            Ok(map) => map.values().filter(|s| s.state().is_active()).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Back up the worlds, rewrite the seed and delete the worlds so the next
    /// start generates a new one. Refused while a server runs in `working_dir`.
    pub async fn reset_world(
        &self,
        working_dir: &Path,
        properties_file: &Path,
        seed: &str,
    ) -> Result<ResetReport, SupervisorError> {
        let state = self.state(working_dir);
        if state.is_active() {
            tracing::warn!("World reset refused: server is {}", state);
            return Err(SupervisorError::ServerRunning(Self::key(working_dir)));
        }

        let working_dir = working_dir.to_path_buf();
        let properties_file = properties_file.to_path_buf();
        let seed = seed.to_string();
        tokio::task::spawn_blocking(move || world::reset_world(&working_dir, &properties_file, &seed))
            .await
            .map_err(|e| SupervisorError::Internal(anyhow::anyhow!("world reset worker failed: {}", e)))?
    }
}
