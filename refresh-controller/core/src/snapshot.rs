use crate::Scope;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// An immutable, sequenced payload for a `(domain, scope)` pair.
///
/// `sequence` increases strictly per pair for the process lifetime;
/// `reset_count` increments whenever the payload was rebuilt from scratch
/// rather than refreshed. Mutation always replaces the whole record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub payload: serde_json::Value,
    pub sequence: u64,
    pub generated_at: DateTime<Utc>,
    pub reset_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Snapshot {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Options threaded from a fetch request down into the builder.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildOptions {
    /// Set on user-initiated fetches so builders may reset filters and skip
    /// cache reuse.
    pub is_manual: bool,

    /// Requests a full rebuild; bumps the snapshot's `reset_count`.
    pub reset: bool,
}

/// Reduces cached cluster state into a domain payload for one scope.
///
/// Builders are pure functions of the informer caches, clients, and
/// configuration. They must respect cancellation (the caller enforces the
/// per-domain build timeout) and must not hold index locks across awaits.
#[async_trait::async_trait]
pub trait BuildSnapshot: Send + Sync {
    async fn build(&self, scope: &Scope, opts: BuildOptions) -> Result<serde_json::Value>;

    /// Whether the caches this builder reads have completed their initial
    /// sync. Builders queried before sync report `initialising` instead of
    /// running.
    fn synced(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_omits_absent_error() {
        let snap = Snapshot {
            payload: serde_json::json!({"ok": true}),
            sequence: 3,
            generated_at: Utc::now(),
            reset_count: 1,
            error: None,
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert!(v.get("generatedAt").is_some());
        assert!(v.get("resetCount").is_some());
        assert!(v.get("error").is_none());
    }
}
