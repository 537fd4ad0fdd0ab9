//! Server console history.
//!
//! Every line the server prints, plus the launcher's own notices, is kept
//! with a sequential id starting at 1. Pollers pass the last id they saw to
//! `GET /api/console?since=<id>`; `since=0` means from the beginning.

use std::collections::VecDeque;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default number of console lines kept per session.
pub const DEFAULT_CONSOLE_BUFFER: usize = 10_000;

/// Level tag of Paper/Spigot console lines: `[12:00:00 INFO]:` or
/// `[Server thread/WARN]:`.
pub const SERVER_LOG_PATTERN: &str = r"[\s/](?P<level>INFO|WARN|ERROR|DEBUG|FATAL)\]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub id: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    pub source: LineSource,
    pub content: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LineSource {
    Stdout,
    Stderr,
    /// Notices from the launcher itself
    System,
}

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Map a console level tag. `FATAL` counts as `Error`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" => Some(Self::Warn),
            "ERROR" | "FATAL" => Some(Self::Error),
            _ => None,
        }
    }

    /// Level recorded for a line. Untagged lines are `Info`; anything the
    /// server wrote to stderr is at least `Warn`.
    pub fn classify(source: LineSource, line: &str, pattern: Option<&Regex>) -> Self {
        let tagged = pattern
            .and_then(|re| re.captures(line))
            .and_then(|caps| caps.name("level"))
            .and_then(|m| Self::from_tag(m.as_str()))
            .unwrap_or(Self::Info);
        match source {
            LineSource::Stderr => tagged.max(Self::Warn),
            _ => tagged,
        }
    }
}

/// Bounded console history. The oldest lines are evicted first.
pub struct ConsoleBuffer {
    lines: VecDeque<ConsoleLine>,
    last_id: u64,
    capacity: usize,
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CONSOLE_BUFFER)
    }
}

impl ConsoleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            last_id: 0,
            capacity,
        }
    }

    /// Append a line and return the stored copy.
    pub fn push(&mut self, source: LineSource, content: String, level: LogLevel) -> ConsoleLine {
        self.last_id += 1;
        let line = ConsoleLine {
            id: self.last_id,
            timestamp: unix_now(),
            source,
            content,
            level,
        };
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// Id of the newest line, 0 before the first push.
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Lines printed after `last_seen`, oldest first.
    pub fn since(&self, last_seen: u64) -> Vec<ConsoleLine> {
        // ids are contiguous, so the offset into the buffer is arithmetic
        let first_id = self.last_id + 1 - self.lines.len() as u64;
        let skip = last_seen.saturating_sub(first_id - 1) as usize;
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// The newest `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> Vec<ConsoleLine> {
        let skip = self.lines.len().saturating_sub(count);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub(crate) fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: usize) -> ConsoleBuffer {
        let mut buf = ConsoleBuffer::with_capacity(capacity);
        for i in 0..count {
            buf.push(LineSource::Stdout, format!("[12:00:00 INFO]: tick {}", i), LogLevel::Info);
        }
        buf
    }

    #[test]
    fn since_zero_returns_everything() {
        let buf = filled(100, 3);
        let lines = buf.since(0);
        assert_eq!(lines.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(buf.last_id(), 3);
        assert!(buf.since(3).is_empty());
        assert_eq!(buf.since(2)[0].content, "[12:00:00 INFO]: tick 2");
    }

    #[test]
    fn eviction_keeps_ids_and_paging() {
        let buf = filled(4, 10);
        assert_eq!(buf.len(), 4);
        // a poller that fell behind gets what is left
        assert_eq!(buf.since(2).first().map(|l| l.id), Some(7));
        assert_eq!(buf.since(8).iter().map(|l| l.id).collect::<Vec<_>>(), vec![9, 10]);
        assert_eq!(buf.tail(2).iter().map(|l| l.id).collect::<Vec<_>>(), vec![9, 10]);
        assert_eq!(buf.tail(50).len(), 4);
    }

    #[test]
    fn empty_buffer() {
        let buf = ConsoleBuffer::default();
        assert!(buf.is_empty());
        assert!(buf.since(0).is_empty());
        assert!(buf.tail(5).is_empty());
    }

    #[test]
    fn classify_paper_lines() {
        let re = Regex::new(SERVER_LOG_PATTERN).unwrap();
        let level = |source, line| LogLevel::classify(source, line, Some(&re));

        assert_eq!(level(LineSource::Stdout, "[09:12:44] [Server thread/WARN]: Can't keep up!"), LogLevel::Warn);
        assert_eq!(level(LineSource::Stdout, "[09:12:44 FATAL]: Failed to bind to port"), LogLevel::Error);
        assert_eq!(level(LineSource::Stdout, "[mcMMO] Loading locale"), LogLevel::Info);
        // stderr never drops below Warn, but keeps a higher tag
        assert_eq!(level(LineSource::Stderr, "Picked up JAVA_TOOL_OPTIONS"), LogLevel::Warn);
        assert_eq!(level(LineSource::Stderr, "[09:12:44 ERROR]: boom"), LogLevel::Error);
        assert_eq!(LogLevel::classify(LineSource::Stdout, "[09:12:44 ERROR]: x", None), LogLevel::Info);
    }
}
