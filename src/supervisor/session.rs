//! Server Session - one spawned server process and everything attached to it
//!
//! A session owns:
//! - the child process (inside its exit-waiter task, so the handle is
//!   released on every exit path)
//! - the stdin write side, used exactly once for the stop command
//! - a merged stdout/stderr stream consumed by the [`OutputMonitor`]
//! - the console buffer and the event broadcast

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::console::{unix_now, ConsoleBuffer, ConsoleLine, LineSource, LogLevel};
use super::error::SupervisorError;
use super::launch::LaunchCommand;
use super::monitor::{pump_lines, MonitorOutcome, OutputMonitor, RawLine, ServerEvent};
use super::state_machine::{State, StateMachine};

/// How long the exit waiter lets the monitor drain buffered output once the
/// server process is gone. Descendants that inherited the pipes can keep
/// them open indefinitely.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for the monitor to reach end of stream, giving up after
/// [`OUTPUT_DRAIN_TIMEOUT`].
async fn drain_monitor(mut task: JoinHandle<MonitorOutcome>) -> MonitorOutcome {
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::error!("Output monitor task failed: {}", e);
            MonitorOutcome::default()
        }
        Err(_) => {
            tracing::warn!("Server output still open after exit, detaching the monitor");
            task.abort();
            MonitorOutcome {
                stream_error: Some("output still open after process exit".to_string()),
                ..MonitorOutcome::default()
            }
        }
    }
}

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Console command that asks the server to shut down
    pub stop_command: String,
    pub console_buffer_size: usize,
    /// Regex with a `level` group used to tag console lines
    pub log_pattern: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stop_command: "stop".to_string(),
            console_buffer_size: super::console::DEFAULT_CONSOLE_BUFFER,
            log_pattern: Some(super::console::SERVER_LOG_PATTERN.to_string()),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub struct SessionExit {
    /// Exit status, or why waiting on the process failed
    pub status: Result<ExitStatus, String>,
    pub monitor: MonitorOutcome,
}

/// Resolves once the session's process has terminated.
#[derive(Debug, Clone)]
pub struct ExitHandle {
    rx: watch::Receiver<Option<SessionExit>>,
}

impl ExitHandle {
    /// Wait for process exit. Dropping the future cancels only the wait.
    pub async fn wait(mut self) -> Result<ExitStatus, SupervisorError> {
        let exit = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SupervisorError::StreamIo("exit waiter ended without a status".into()))?
            .clone();
        match exit {
            Some(SessionExit { status: Ok(status), .. }) => Ok(status),
            Some(SessionExit { status: Err(e), .. }) => Err(SupervisorError::StreamIo(e)),
            None => Err(SupervisorError::StreamIo("exit waiter ended without a status".into())),
        }
    }

    /// The exit record, if the process is already gone.
    pub fn try_exit(&self) -> Option<SessionExit> {
        self.rx.borrow().clone()
    }
}

pub struct ServerSession {
    pub pid: u32,
    /// Unix timestamp (seconds)
    pub started_at: u64,
    working_dir: PathBuf,
    command: LaunchCommand,
    stop_command: String,
    state: Arc<StateMachine>,
    stdin: Mutex<Option<ChildStdin>>,
    console: Arc<Mutex<ConsoleBuffer>>,
    events: broadcast::Sender<ServerEvent>,
    /// Receiver created before any task runs, handed to the first subscriber
    first_events: std::sync::Mutex<Option<broadcast::Receiver<ServerEvent>>>,
    exit_rx: watch::Receiver<Option<SessionExit>>,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("pid", &self.pid)
            .field("working_dir", &self.working_dir)
            .field("state", &self.state())
            .finish()
    }
}

impl ServerSession {
    /// Spawn the server process and its reader, monitor and waiter tasks.
    ///
    /// Must run inside a tokio runtime. On success the session is `Starting`;
    /// on failure nothing was spawned and the state machine is discarded.
    pub fn spawn(
        command: LaunchCommand,
        working_dir: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<Self>, SupervisorError> {
        let state = Arc::new(StateMachine::new());
        state.transition(State::Starting).map_err(anyhow::Error::from)?;

        let mut child = command
            .to_command(working_dir)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take();
        tracing::info!("Started '{}' in {} (PID {})", command.display(), working_dir.display(), pid);

        let (events, first_rx) = broadcast::channel::<ServerEvent>(2048);
        let (exit_tx, exit_rx) = watch::channel::<Option<SessionExit>>(None);
        let console = Arc::new(Mutex::new(ConsoleBuffer::with_capacity(options.console_buffer_size)));

        let level_pattern = options.log_pattern.as_deref().and_then(|pat| match Regex::new(pat) {
            Ok(re) => Some(Arc::new(re)),
            Err(e) => {
                tracing::warn!("Invalid log pattern '{}': {}, falling back to default", pat, e);
                None
            }
        });

        // ── merged stdout/stderr ─────────────────────────────
        let (line_tx, line_rx) = mpsc::channel::<io::Result<RawLine>>(1024);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, LineSource::Stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, LineSource::Stderr, line_tx.clone()));
        }
        drop(line_tx);

        let monitor = OutputMonitor::new(state.clone(), console.clone(), events.clone(), level_pattern);
        let monitor_task = tokio::spawn(monitor.run(line_rx));

        // ── process waiter ───────────────────────────────────
        {
            let state = state.clone();
            let console = console.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let status = child.wait().await;
                // child 핸들은 여기서 해제됨
                drop(child);

                if state.state() == State::Starting {
                    tracing::warn!("Server exited before it finished starting");
                }
                state.finish();

                let monitor = drain_monitor(monitor_task).await;
                let (msg, code, status) = match status {
                    Ok(status) => (format!("Process exited with {}", status), status.code(), Ok(status)),
                    Err(e) => (format!("Failed to wait for process: {}", e), None, Err(e.to_string())),
                };
                tracing::info!("{}", msg);
                console.lock().await.push(LineSource::System, msg, LogLevel::Info);

                let _ = events.send(ServerEvent::Exited { code });
                let _ = exit_tx.send(Some(SessionExit { status, monitor }));
            });
        }

        Ok(Arc::new(Self {
            pid,
            started_at: unix_now(),
            working_dir: working_dir.to_path_buf(),
            command,
            stop_command: options.stop_command.clone(),
            state,
            stdin: Mutex::new(stdin),
            console,
            events,
            first_events: std::sync::Mutex::new(Some(first_rx)),
            exit_rx,
        }))
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn command(&self) -> &LaunchCommand {
        &self.command
    }

    pub fn state(&self) -> State {
        self.state.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Wait until the session reaches `target` or stops.
    pub async fn wait_for_state(&self, target: State) -> State {
        self.state.wait_for(|s| s == target || s == State::Stopped).await
    }

    /// Subscribe to session events. The first subscriber also receives every
    /// event published since spawn.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        let first = self.first_events.lock().ok().and_then(|mut slot| slot.take());
        first.unwrap_or_else(|| self.events.subscribe())
    }

    pub async fn console_since(&self, since_id: u64) -> Vec<ConsoleLine> {
        self.console.lock().await.since(since_id)
    }

    pub async fn recent_console(&self, count: usize) -> Vec<ConsoleLine> {
        self.console.lock().await.tail(count)
    }

    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            rx: self.exit_rx.clone(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        unix_now().saturating_sub(self.started_at)
    }

    /// Send the stop command and close stdin.
    ///
    /// Only `Starting`/`Running` sessions accept it; the session is moved to
    /// `Stopping` before the write.
    pub async fn request_stop(&self) -> Result<ExitHandle, SupervisorError> {
        let mut stdin = {
            let mut slot = self.stdin.lock().await;
            let current = self.state();
            if !current.is_live() {
                return Err(SupervisorError::NotRunning(self.working_dir.clone()));
            }
            let stdin = slot
                .take()
                .ok_or_else(|| SupervisorError::NotRunning(self.working_dir.clone()))?;
            if let Err(e) = self.state.transition(State::Stopping) {
                // 프로세스가 그 사이에 종료됨
                tracing::debug!("Stop raced with exit: {}", e);
                return Err(SupervisorError::NotRunning(self.working_dir.clone()));
            }
            stdin
        };

        tracing::info!("Sending '{}' to server (PID {})", self.stop_command, self.pid);
        let line = format!("{}\n", self.stop_command);
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
            stdin.shutdown().await
        }
        .await;
        drop(stdin);

        if let Err(e) = written {
            tracing::error!("Failed to send stop command: {}, marking session stopped", e);
            // stdin is gone, so no later stop can reach the server either
            self.state.finish();
            return Err(SupervisorError::StreamIo(format!("writing stop command: {}", e)));
        }
        Ok(self.exit_handle())
    }
}
