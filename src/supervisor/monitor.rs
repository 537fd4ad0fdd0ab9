//! Output Monitor - reads the merged server output and drives the session
//! state from marker lines.
//!
//! - `Done (` + `s)!` on one line: initialization finished → `Running`
//! - `Stopping server`: server-side shutdown began → `Stopping`
//!
//! Every line, marker or not, is forwarded to the console buffer and to
//! event subscribers untouched.

use std::io;
use std::sync::Arc;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{broadcast, mpsc, Mutex};

use super::console::{ConsoleBuffer, ConsoleLine, LineSource, LogLevel};
use super::state_machine::{State, StateMachine};

pub const READY_MARKER_PREFIX: &str = "Done (";
pub const READY_MARKER_SUFFIX: &str = "s)!";
pub const STOPPING_MARKER: &str = "Stopping server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Ready,
    Stopping,
}

/// Classify a line of server output.
pub fn classify_line(line: &str) -> Option<Marker> {
    if line.contains(READY_MARKER_PREFIX) && line.contains(READY_MARKER_SUFFIX) {
        Some(Marker::Ready)
    } else if line.contains(STOPPING_MARKER) {
        Some(Marker::Stopping)
    } else {
        None
    }
}

/// One raw line read from a child pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub source: LineSource,
    pub content: String,
}

/// Events published to session subscribers.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Line(ConsoleLine),
    ServerReady,
    ServerStopping,
    Exited { code: Option<i32> },
}

/// What the monitor saw before the stream ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorOutcome {
    pub lines: u64,
    pub ready_seen: bool,
    pub stopping_seen: bool,
    /// First read error on either pipe, if any.
    pub stream_error: Option<String>,
}

pub struct OutputMonitor {
    state: Arc<StateMachine>,
    console: Arc<Mutex<ConsoleBuffer>>,
    events: broadcast::Sender<ServerEvent>,
    level_pattern: Option<Arc<Regex>>,
}

impl OutputMonitor {
    pub fn new(
        state: Arc<StateMachine>,
        console: Arc<Mutex<ConsoleBuffer>>,
        events: broadcast::Sender<ServerEvent>,
        level_pattern: Option<Arc<Regex>>,
    ) -> Self {
        Self {
            state,
            console,
            events,
            level_pattern,
        }
    }

    /// Consume lines until every sender is gone (both pipes closed).
    pub async fn run(self, mut lines: mpsc::Receiver<io::Result<RawLine>>) -> MonitorOutcome {
        let mut outcome = MonitorOutcome::default();

        while let Some(item) = lines.recv().await {
            match item {
                Ok(line) => self.observe(line, &mut outcome).await,
                Err(e) => {
                    tracing::error!("Failed to read server output: {}, marking session stopped", e);
                    if outcome.stream_error.is_none() {
                        outcome.stream_error = Some(e.to_string());
                    }
                    self.state.finish();
                }
            }
        }

        tracing::debug!(
            "Output stream closed after {} lines (ready: {}, stopping: {})",
            outcome.lines,
            outcome.ready_seen,
            outcome.stopping_seen
        );
        outcome
    }

    async fn observe(&self, line: RawLine, outcome: &mut MonitorOutcome) {
        outcome.lines += 1;

        match classify_line(&line.content) {
            Some(Marker::Ready) if !outcome.ready_seen => {
                outcome.ready_seen = true;
                match self.state.transition(State::Running) {
                    Ok(()) => {
                        tracing::info!("Server finished starting");
                        let _ = self.events.send(ServerEvent::ServerReady);
                    }
                    Err(e) => tracing::debug!("Ready marker ignored: {}", e),
                }
            }
            Some(Marker::Stopping) if !outcome.stopping_seen => {
                outcome.stopping_seen = true;
                if self.state.state().is_live() {
                    if let Err(e) = self.state.transition(State::Stopping) {
                        tracing::debug!("Stopping marker ignored: {}", e);
                    }
                }
                tracing::info!("Server is shutting down");
                let _ = self.events.send(ServerEvent::ServerStopping);
            }
            _ => {}
        }

        let level = LogLevel::classify(line.source, &line.content, self.level_pattern.as_deref());
        let console_line = self.console.lock().await.push(line.source, line.content, level);
        let _ = self.events.send(ServerEvent::Line(console_line));
    }
}

/// Read `reader` line by line into `tx` until EOF or the first read error.
///
/// Bytes that are not valid UTF-8 are replaced rather than failing the read.
pub async fn pump_lines<R>(reader: R, source: LineSource, tx: mpsc::Sender<io::Result<RawLine>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let content = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(Ok(RawLine { source, content })).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_for(state: Arc<StateMachine>) -> (OutputMonitor, broadcast::Receiver<ServerEvent>, Arc<Mutex<ConsoleBuffer>>) {
        let console = Arc::new(Mutex::new(ConsoleBuffer::default()));
        let (tx, rx) = broadcast::channel(256);
        (OutputMonitor::new(state, console.clone(), tx, None), rx, console)
    }

    fn starting() -> Arc<StateMachine> {
        let sm = Arc::new(StateMachine::new());
        sm.transition(State::Starting).unwrap();
        sm
    }

    async fn feed(monitor: OutputMonitor, lines: &[&str]) -> MonitorOutcome {
        let (tx, rx) = mpsc::channel(64);
        for line in lines {
            tx.send(Ok(RawLine {
                source: LineSource::Stdout,
                content: line.to_string(),
            }))
            .await
            .unwrap();
        }
        drop(tx);
        monitor.run(rx).await
    }

    #[test]
    fn classify_markers() {
        assert_eq!(
            classify_line("[12:00:01 INFO]: Done (3.456s)! For help, type \"help\""),
            Some(Marker::Ready)
        );
        assert_eq!(classify_line("[12:05:00 INFO]: Stopping server"), Some(Marker::Stopping));
        // both substrings are required
        assert_eq!(classify_line("Done (preparing spawn area)"), None);
        assert_eq!(classify_line("Loaded 7 recipes)!"), None);
        assert_eq!(classify_line("Starting minecraft server version 1.21"), None);
    }

    #[tokio::test]
    async fn ready_marker_sets_running_once() {
        let state = starting();
        let (monitor, mut events, _) = monitor_for(state.clone());
        let outcome = feed(
            monitor,
            &[
                "Starting minecraft server",
                "Done (2.1s)! For help, type \"help\"",
                "Done (9.9s)! again",
            ],
        )
        .await;

        assert!(outcome.ready_seen);
        assert_eq!(outcome.lines, 3);
        assert_eq!(state.state(), State::Running);

        let mut ready_events = 0;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, ServerEvent::ServerReady) {
                ready_events += 1;
            }
        }
        assert_eq!(ready_events, 1);
    }

    #[tokio::test]
    async fn stopping_marker_sets_stopping() {
        let state = starting();
        let (monitor, _events, _) = monitor_for(state.clone());
        let outcome = feed(monitor, &["Done (1.0s)!", "Stopping server", "Saving chunks"]).await;
        assert!(outcome.stopping_seen);
        assert_eq!(state.state(), State::Stopping);
    }

    #[tokio::test]
    async fn stopping_during_startup() {
        let state = starting();
        let (monitor, _events, _) = monitor_for(state.clone());
        feed(monitor, &["Failed to bind to port", "Stopping server"]).await;
        assert_eq!(state.state(), State::Stopping);
    }

    #[tokio::test]
    async fn no_markers_leaves_state_to_supervisor() {
        let state = starting();
        let (monitor, _events, console) = monitor_for(state.clone());
        let outcome = feed(monitor, &["Error: Unable to access jarfile paper.jar"]).await;
        assert!(!outcome.ready_seen);
        assert!(!outcome.stopping_seen);
        assert_eq!(state.state(), State::Starting);
        assert_eq!(console.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn stream_error_is_recorded() {
        let state = starting();
        let (monitor, _events, _) = monitor_for(state.clone());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
            .await
            .unwrap();
        // a late ready marker must not revive the session
        tx.send(Ok(RawLine {
            source: LineSource::Stdout,
            content: "Done (1.0s)!".to_string(),
        }))
        .await
        .unwrap();
        drop(tx);
        let outcome = monitor.run(rx).await;
        assert_eq!(outcome.stream_error.as_deref(), Some("pipe closed"));
        assert_eq!(state.state(), State::Stopped);
    }

    #[tokio::test]
    async fn pump_splits_lines() {
        let input: &[u8] = b"first\r\nsecond\n\xffthird";
        let (tx, mut rx) = mpsc::channel(8);
        pump_lines(input, LineSource::Stderr, tx).await;

        let mut got = Vec::new();
        while let Some(item) = rx.recv().await {
            got.push(item.unwrap());
        }
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].content, "first");
        assert_eq!(got[1].content, "second");
        assert_eq!(got[2].content, "\u{fffd}third");
        assert!(got.iter().all(|l| l.source == LineSource::Stderr));
    }
}
