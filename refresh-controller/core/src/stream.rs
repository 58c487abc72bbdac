//! Wire types shared by the streaming subsystems.
//!
//! Every stream is a sequence of length-prefixed JSON frames: one logical
//! event per frame, periodic heartbeats, and a terminal error frame carrying
//! a reconnection hint before the session closes.

use crate::plugins::CatalogEvent;
use crate::records::EventRecord;
use crate::Scope;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Duration;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Suggested client backoff carried on terminal error frames.
pub const RECONNECT_HINT: Duration = Duration::from_secs(3);

/// Why a session was closed by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    /// The per-client send queue filled; the client should reconnect.
    SlowConsumer,
    Shutdown,
    Revoked,
    StreamError,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::SlowConsumer => f.write_str("slow consumer"),
            CloseReason::Shutdown => f.write_str("shutting down"),
            CloseReason::Revoked => f.write_str("permission revoked"),
            CloseReason::StreamError => f.write_str("stream error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub pod: String,
    pub container: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFrame {
    pub scope: String,
    #[serde(flatten)]
    pub line: LogLine,
    /// True while the subsystem serves polled list-logs instead of a live
    /// stream.
    pub fallback_active: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub event: EventRecord,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeltaAction {
    Apply,
    Delete,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFrame {
    pub action: DeltaAction,
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub message: String,
    pub reason: CloseReason,
    pub reconnect_after_ms: u64,
}

impl ErrorFrame {
    pub fn new(reason: CloseReason, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason,
            reconnect_after_ms: RECONNECT_HINT.as_millis() as u64,
        }
    }
}

/// One logical event on a stream.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamFrame {
    Heartbeat { seq: u64 },
    Error(ErrorFrame),
    Log(LogFrame),
    Event(EventFrame),
    Resource(ResourceFrame),
    Catalog { event: CatalogEvent },
}

/// Lines kept per scope in the log ring.
pub const LOG_RING_CAPACITY: usize = 4000;

#[derive(Debug)]
struct ScopeLogs {
    lines: std::collections::VecDeque<LogLine>,
    fallback_active: bool,
    tx: tokio::sync::broadcast::Sender<LogFrame>,
}

impl ScopeLogs {
    fn new() -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(256);
        Self {
            lines: std::collections::VecDeque::new(),
            fallback_active: false,
            tx,
        }
    }
}

/// Bounded per-scope log rings with live fan-out.
///
/// The log stream subsystem appends; sessions replay the ring and then tail
/// the broadcast; the `object-logs` builder snapshots it for fetches.
#[derive(Debug)]
pub struct LogStore {
    capacity: usize,
    scopes: parking_lot::RwLock<std::collections::HashMap<Scope, ScopeLogs>>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            scopes: parking_lot::RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn append(&self, scope: &Scope, line: LogLine) {
        let mut scopes = self.scopes.write();
        let entry = scopes
            .entry(scope.clone())
            .or_insert_with(ScopeLogs::new);
        if entry.lines.len() == self.capacity {
            entry.lines.pop_front();
        }
        entry.lines.push_back(line.clone());
        let _ = entry.tx.send(LogFrame {
            scope: scope.to_string(),
            line,
            fallback_active: entry.fallback_active,
        });
    }

    pub fn set_fallback(&self, scope: &Scope, active: bool) {
        let mut scopes = self.scopes.write();
        scopes
            .entry(scope.clone())
            .or_insert_with(ScopeLogs::new)
            .fallback_active = active;
    }

    /// Current ring contents plus the fallback flag.
    pub fn snapshot(&self, scope: &Scope) -> (Vec<LogLine>, bool) {
        let scopes = self.scopes.read();
        match scopes.get(scope) {
            Some(entry) => (
                entry.lines.iter().cloned().collect(),
                entry.fallback_active,
            ),
            None => (Vec::new(), false),
        }
    }

    /// Subscribes to live appends for a scope, creating the ring if absent.
    pub fn subscribe(&self, scope: &Scope) -> tokio::sync::broadcast::Receiver<LogFrame> {
        let mut scopes = self.scopes.write();
        scopes
            .entry(scope.clone())
            .or_insert_with(ScopeLogs::new)
            .tx
            .subscribe()
    }

    /// Drops a scope's ring so a restarted stream is a cold start.
    pub fn reset(&self, scope: &Scope) {
        self.scopes.write().remove(scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_tag_their_variant() {
        let v = serde_json::to_value(StreamFrame::Heartbeat { seq: 7 }).unwrap();
        assert_eq!(v.get("type"), Some(&serde_json::json!("heartbeat")));

        let v = serde_json::to_value(StreamFrame::Error(ErrorFrame::new(
            CloseReason::SlowConsumer,
            "queue full",
        )))
        .unwrap();
        assert_eq!(v.get("type"), Some(&serde_json::json!("error")));
        assert_eq!(v.get("reason"), Some(&serde_json::json!("slowConsumer")));
        assert_eq!(v.get("reconnectAfterMs"), Some(&serde_json::json!(3000)));
    }

    fn line(text: &str) -> LogLine {
        LogLine {
            pod: "api-1".into(),
            container: "app".into(),
            text: text.into(),
            timestamp: None,
        }
    }

    #[test]
    fn log_ring_is_bounded_and_fans_out() {
        let store = LogStore::new(2);
        let scope = Scope::workload("team-a", "Deployment", "api");
        let mut rx = store.subscribe(&scope);

        for text in ["a", "b", "c"] {
            store.append(&scope, line(text));
        }

        let (lines, fallback) = store.snapshot(&scope);
        assert!(!fallback);
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c"]);

        assert_eq!(rx.try_recv().unwrap().line.text, "a");
    }

    #[test]
    fn reset_restores_a_cold_start() {
        let store = LogStore::default();
        let scope = Scope::workload("team-a", "Deployment", "api");
        store.append(&scope, line("a"));
        store.set_fallback(&scope, true);
        store.reset(&scope);
        assert_eq!(store.snapshot(&scope), (Vec::new(), false));
    }
}
