use crate::{Scope, Snapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Lifecycle of a live `(domain, scope)` subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DomainStatus {
    #[default]
    Idle,
    /// Subscribed before the backing caches completed their initial sync.
    Initialising,
    /// First build in flight.
    Loading,
    /// A refresh is replacing an already-ready snapshot.
    Updating,
    Ready,
    Error,
}

/// Counters surfaced alongside a subscription's data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStats {
    pub builds: u64,
    pub build_errors: u64,
    pub consecutive_errors: u32,
}

/// Per-subscription state owned by the orchestrator's store.
///
/// Created on first subscription, replaced wholesale on every orchestrator
/// write, torn down once the subscriber count reaches zero and the grace
/// period elapses.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedDomainState {
    pub status: DomainStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Arc<Snapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RefreshStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_auto_refresh: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_manual_refresh: Option<DateTime<Utc>>,
    pub is_manual: bool,
    pub dropped_auto_refreshes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl ScopedDomainState {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope: Some(scope),
            ..Self::default()
        }
    }

    pub fn sequence(&self) -> u64 {
        self.data.as_ref().map(|s| s.sequence).unwrap_or(0)
    }
}
