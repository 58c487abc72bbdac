//! On-demand snapshot computation with per-`(domain, scope)` single-flight.

use crate::{metrics::OrchestratorMetrics, store::ScopedDomainStore};
use ahash::AHashMap as HashMap;
use glimpse_refresh_core::{BuildOptions, DomainName, DomainRegistry, Scope, Snapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unknown domain: {0}")]
    UnknownDomain(DomainName),
    #[error("domain {0} is not a streaming domain")]
    NotStreaming(DomainName),
    #[error("refresh subsystem is stopped")]
    Stopped,
}

/// Outcome of a fetch. Builders queried before their caches synced do not
/// mint snapshots; they report `Initialising` instead.
#[derive(Clone, Debug)]
pub enum FetchOutcome {
    Built(Arc<Snapshot>),
    Initialising,
}

impl FetchOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, FetchOutcome::Built(snapshot) if snapshot.error.is_some())
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            FetchOutcome::Built(snapshot) => Some(snapshot),
            FetchOutcome::Initialising => None,
        }
    }
}

#[derive(Clone)]
struct InFlight {
    started: Instant,
    rx: watch::Receiver<Option<FetchOutcome>>,
}

pub struct SnapshotService {
    registry: Arc<DomainRegistry>,
    store: Arc<ScopedDomainStore>,
    inflight: Mutex<HashMap<(DomainName, Scope), InFlight>>,
    metrics: OrchestratorMetrics,
    stopped: watch::Receiver<bool>,
}

impl SnapshotService {
    pub fn new(
        registry: Arc<DomainRegistry>,
        store: Arc<ScopedDomainStore>,
        metrics: OrchestratorMetrics,
        stopped: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            inflight: Mutex::new(HashMap::new()),
            metrics,
            stopped,
        })
    }

    pub fn store(&self) -> &Arc<ScopedDomainStore> {
        &self.store
    }

    /// Whether a build for the pair is currently in flight. Auto-refresh
    /// ticks drop instead of queueing behind one.
    pub fn is_inflight(&self, domain: &DomainName, scope: &Scope) -> bool {
        self.inflight
            .lock()
            .contains_key(&(domain.clone(), scope.clone()))
    }

    /// Computes a snapshot, coalescing concurrent requesters onto a single
    /// build.
    ///
    /// Non-manual callers join any in-flight build. A manual caller joins a
    /// build only if it started after the request arrived; otherwise it
    /// awaits the in-flight result and then issues (or joins) one fresh
    /// build, so a burst of manual fetches costs at most one extra build.
    pub async fn fetch(
        &self,
        domain: &DomainName,
        scope: &Scope,
        opts: BuildOptions,
    ) -> Result<FetchOutcome, FetchError> {
        if *self.stopped.borrow() {
            return Err(FetchError::Stopped);
        }
        let registered = self
            .registry
            .get(domain)
            .ok_or_else(|| FetchError::UnknownDomain(domain.clone()))?;

        let key = (domain.clone(), scope.clone());
        let arrived = Instant::now();

        loop {
            let existing = self.inflight.lock().get(&key).cloned();
            if let Some(inflight) = existing {
                let fresh_enough = !opts.is_manual || inflight.started >= arrived;
                let outcome = Self::await_inflight(inflight).await;
                match outcome {
                    Some(outcome) if fresh_enough => return Ok(outcome),
                    // Manual fetch over a stale build, or the leader died:
                    // go around and build fresh.
                    _ => continue,
                }
            }

            let (tx, rx) = watch::channel(None);
            {
                let mut inflight = self.inflight.lock();
                if inflight.contains_key(&key) {
                    continue;
                }
                inflight.insert(
                    key.clone(),
                    InFlight {
                        started: Instant::now(),
                        rx,
                    },
                );
            }

            let outcome = self.run_build(registered, scope, opts).await;
            self.inflight.lock().remove(&key);
            let _ = tx.send(Some(outcome.clone()));
            return Ok(outcome);
        }
    }

    async fn await_inflight(mut inflight: InFlight) -> Option<FetchOutcome> {
        loop {
            if let Some(outcome) = inflight.rx.borrow().clone() {
                return Some(outcome);
            }
            if inflight.rx.changed().await.is_err() {
                return inflight.rx.borrow().clone();
            }
        }
    }

    async fn run_build(
        &self,
        registered: &glimpse_refresh_core::RegisteredDomain,
        scope: &Scope,
        opts: BuildOptions,
    ) -> FetchOutcome {
        let entry = self.store.entry(&registered.name, scope);

        if !registered.builder.synced() {
            entry.mark_initialising();
            return FetchOutcome::Initialising;
        }

        entry.mark_building(opts.is_manual);
        self.metrics.record_build(&registered.name);

        let built = tokio::time::timeout(
            registered.refresh.timeout,
            registered.builder.build(scope, opts),
        )
        .await;

        let snapshot = match built {
            Ok(Ok(payload)) => entry.publish_success(payload, opts.is_manual, opts.reset),
            Ok(Err(error)) => {
                debug!(domain = %registered.name, %scope, %error, "Build failed");
                self.metrics.record_build_error(&registered.name);
                entry.publish_error(error.to_string(), opts.is_manual)
            }
            Err(_) => {
                debug!(domain = %registered.name, %scope, "Build timed out");
                self.metrics.record_build_error(&registered.name);
                entry.publish_error("build timed out".to_string(), opts.is_manual)
            }
        };
        FetchOutcome::Built(snapshot)
    }
}
