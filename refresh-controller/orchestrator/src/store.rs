//! Per-subscription state, owned exclusively by the orchestrator.
//!
//! The outer map takes a coarse read lock; each `(domain, scope)` entry has
//! its own fine lock plus a watch channel publishing every state change to
//! subscribers. Writes to one entry are linearisable: subscribers observe
//! snapshots in strictly increasing sequence order.

use ahash::AHashMap as HashMap;
use chrono::Utc;
use glimpse_refresh_core::{
    DomainName, DomainStatus, RefreshStats, Scope, ScopedDomainState, Snapshot,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Default)]
pub struct ScopedDomainStore {
    domains: RwLock<HashMap<DomainName, Arc<DomainScopes>>>,
}

#[derive(Default)]
struct DomainScopes {
    scopes: RwLock<HashMap<Scope, Arc<ScopeEntry>>>,
}

pub struct ScopeEntry {
    state: Mutex<EntryState>,
    tx: watch::Sender<ScopedDomainState>,
}

struct EntryState {
    public: ScopedDomainState,
    subscribers: usize,
    /// Bumped on every subscription change so a pending grace-period
    /// teardown can tell whether it is stale.
    epoch: u64,
    sequence: u64,
    reset_count: u64,
    stats: RefreshStats,
    last_build_started: Option<Instant>,
}

// === impl ScopedDomainStore ===

impl ScopedDomainStore {
    pub fn entry(&self, domain: &DomainName, scope: &Scope) -> Arc<ScopeEntry> {
        let scopes = {
            let domains = self.domains.read();
            domains.get(domain).cloned()
        };
        let scopes = match scopes {
            Some(scopes) => scopes,
            None => self
                .domains
                .write()
                .entry(domain.clone())
                .or_default()
                .clone(),
        };

        if let Some(entry) = scopes.scopes.read().get(scope) {
            return entry.clone();
        }
        let entry = scopes
            .scopes
            .write()
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(ScopeEntry::new(scope.clone())))
            .clone();
        entry
    }

    pub fn get(&self, domain: &DomainName, scope: &Scope) -> Option<Arc<ScopeEntry>> {
        let scopes = self.domains.read().get(domain).cloned()?;
        let entry = scopes.scopes.read().get(scope).cloned();
        entry
    }

    pub fn remove(&self, domain: &DomainName, scope: &Scope) {
        if let Some(scopes) = self.domains.read().get(domain) {
            scopes.scopes.write().remove(scope);
        }
    }

    /// Scopes with at least one live subscriber, dormant scopes excluded.
    pub fn active_scopes(&self, domain: &DomainName) -> Vec<Scope> {
        let Some(scopes) = self.domains.read().get(domain).cloned() else {
            return Vec::new();
        };
        let scopes = scopes.scopes.read();
        scopes
            .iter()
            .filter(|(scope, entry)| !scope.is_inactive() && entry.subscriber_count() > 0)
            .map(|(scope, _)| scope.clone())
            .collect()
    }

    /// Total live subscribers across a domain's scopes.
    pub fn subscriber_total(&self, domain: &DomainName) -> usize {
        let Some(scopes) = self.domains.read().get(domain).cloned() else {
            return 0;
        };
        let scopes = scopes.scopes.read();
        scopes.values().map(|entry| entry.subscriber_count()).sum()
    }

    pub fn states(&self, domain: &DomainName) -> Vec<ScopedDomainState> {
        let Some(scopes) = self.domains.read().get(domain).cloned() else {
            return Vec::new();
        };
        let scopes = scopes.scopes.read();
        scopes.values().map(|entry| entry.state()).collect()
    }
}

// === impl ScopeEntry ===

impl ScopeEntry {
    fn new(scope: Scope) -> Self {
        let public = ScopedDomainState::new(scope);
        let (tx, _) = watch::channel(public.clone());
        Self {
            state: Mutex::new(EntryState {
                public,
                subscribers: 0,
                epoch: 0,
                sequence: 0,
                reset_count: 0,
                stats: RefreshStats::default(),
                last_build_started: None,
            }),
            tx,
        }
    }

    pub fn state(&self) -> ScopedDomainState {
        self.state.lock().public.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScopedDomainState> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers
    }

    /// Returns `(count, epoch)` after incrementing.
    pub fn add_subscriber(&self) -> (usize, u64) {
        let mut state = self.state.lock();
        state.subscribers += 1;
        state.epoch += 1;
        (state.subscribers, state.epoch)
    }

    pub fn remove_subscriber(&self) -> (usize, u64) {
        let mut state = self.state.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        state.epoch += 1;
        (state.subscribers, state.epoch)
    }

    /// Whether a grace-period teardown armed at `epoch` is still current.
    pub fn teardown_still_valid(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        state.subscribers == 0 && state.epoch == epoch
    }

    pub fn last_build_started(&self) -> Option<Instant> {
        self.state.lock().last_build_started
    }

    pub fn sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    pub(crate) fn mark_initialising(&self) {
        let mut state = self.state.lock();
        state.public.status = DomainStatus::Initialising;
        self.publish(&mut state);
    }

    pub(crate) fn mark_building(&self, is_manual: bool) {
        let mut state = self.state.lock();
        state.last_build_started = Some(Instant::now());
        state.public.is_manual = is_manual;
        state.public.status = if state.public.data.is_some() {
            DomainStatus::Updating
        } else {
            DomainStatus::Loading
        };
        self.publish(&mut state);
    }

    pub(crate) fn publish_success(
        &self,
        payload: serde_json::Value,
        is_manual: bool,
        reset: bool,
    ) -> Arc<Snapshot> {
        let mut state = self.state.lock();
        state.sequence += 1;
        if reset {
            state.reset_count += 1;
        }
        state.stats.builds += 1;
        state.stats.consecutive_errors = 0;

        let snapshot = Arc::new(Snapshot {
            payload,
            sequence: state.sequence,
            generated_at: Utc::now(),
            reset_count: state.reset_count,
            error: None,
        });

        let now = Utc::now();
        state.public.status = DomainStatus::Ready;
        state.public.data = Some(snapshot.clone());
        state.public.error = None;
        state.public.stats = Some(state.stats);
        state.public.last_updated = Some(now);
        state.public.is_manual = is_manual;
        if is_manual {
            state.public.last_manual_refresh = Some(now);
        } else {
            state.public.last_auto_refresh = Some(now);
        }
        self.publish(&mut state);
        snapshot
    }

    /// Records a failed build. The previous data snapshot stays available.
    pub(crate) fn publish_error(&self, message: String, is_manual: bool) -> Arc<Snapshot> {
        let mut state = self.state.lock();
        state.sequence += 1;
        state.stats.builds += 1;
        state.stats.build_errors += 1;
        state.stats.consecutive_errors += 1;

        let snapshot = Arc::new(Snapshot {
            payload: state
                .public
                .data
                .as_ref()
                .map(|s| s.payload.clone())
                .unwrap_or(serde_json::Value::Null),
            sequence: state.sequence,
            generated_at: Utc::now(),
            reset_count: state.reset_count,
            error: Some(message.clone()),
        });

        state.public.status = DomainStatus::Error;
        state.public.error = Some(message);
        state.public.stats = Some(state.stats);
        state.public.last_updated = Some(Utc::now());
        state.public.is_manual = is_manual;
        self.publish(&mut state);
        snapshot
    }

    pub(crate) fn drop_auto_refresh(&self) {
        let mut state = self.state.lock();
        state.public.dropped_auto_refreshes += 1;
        self.publish(&mut state);
    }

    fn publish(&self, state: &mut EntryState) {
        let _ = self.tx.send(state.public.clone());
    }
}
