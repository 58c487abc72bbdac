//! Per-domain auto-refresh tasks.
//!
//! One task per registered domain reads a ticker plus a wake channel and
//! sweeps the domain's subscribed scopes. Ticks that land while a scope's
//! build is in flight are dropped and counted; consecutive error sweeps
//! stretch the interval geometrically until the first success.

use crate::{
    backoff::Backoff, metrics::OrchestratorMetrics, service::SnapshotService,
    store::ScopedDomainStore,
};
use glimpse_refresh_core::{registry::RefreshSettings, BuildOptions, DomainName};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{trace, Instrument};

pub(crate) struct RefresherHandle {
    pub(crate) wake: mpsc::Sender<()>,
}

pub(crate) fn spawn(
    domain: DomainName,
    settings: RefreshSettings,
    service: Arc<SnapshotService>,
    store: Arc<ScopedDomainStore>,
    metrics: OrchestratorMetrics,
    shutdown: drain::Watch,
) -> RefresherHandle {
    let (wake_tx, wake_rx) = mpsc::channel(1);
    tokio::spawn(
        run(domain.clone(), settings, service, store, metrics, wake_rx, shutdown)
            .instrument(tracing::info_span!("refresher", domain = %domain)),
    );
    RefresherHandle { wake: wake_tx }
}

async fn run(
    domain: DomainName,
    settings: RefreshSettings,
    service: Arc<SnapshotService>,
    store: Arc<ScopedDomainStore>,
    metrics: OrchestratorMetrics,
    mut wake: mpsc::Receiver<()>,
    shutdown: drain::Watch,
) {
    let release = shutdown.signaled();
    tokio::pin!(release);

    let mut backoff = Backoff::new(settings.interval);
    let mut next_tick = Instant::now() + backoff.interval();

    loop {
        tokio::select! {
            _ = &mut release => return,
            _ = tokio::time::sleep_until(next_tick) => {}
            woken = wake.recv() => {
                if woken.is_none() {
                    return;
                }
            }
        }

        let mut errored = false;
        let mut succeeded = false;
        for scope in store.active_scopes(&domain) {
            // Never overlap builds for one scope; drop the tick instead.
            if service.is_inflight(&domain, &scope) {
                if let Some(entry) = store.get(&domain, &scope) {
                    entry.drop_auto_refresh();
                }
                metrics.record_dropped_auto_refresh(&domain);
                continue;
            }

            // Suppress bursts: skip scopes built more recently than the
            // cooldown.
            let recently_built = store
                .get(&domain, &scope)
                .and_then(|entry| entry.last_build_started())
                .is_some_and(|at| at.elapsed() < settings.cooldown);
            if recently_built {
                trace!(%scope, "Within cooldown; skipping");
                continue;
            }

            match service
                .fetch(&domain, &scope, BuildOptions::default())
                .await
            {
                Ok(outcome) => {
                    if outcome.is_error() {
                        errored = true;
                    } else {
                        succeeded = true;
                    }
                }
                Err(_) => return,
            }
        }

        if errored && !succeeded {
            backoff.record_error();
        } else if succeeded {
            backoff.record_success();
        }
        next_tick = Instant::now() + backoff.interval();
    }
}
