//! Background permission revalidation.
//!
//! Serving stale snapshots on a revoked credential is worse than going down
//! cleanly, so any previously-allowed verb flipping to a definitive denial
//! shuts the subsystem down; the outer process re-initialises with a fresh
//! identity. Review errors are transient and ignored.

use glimpse_refresh_k8s_index::PermissionChecker;
use glimpse_refresh_orchestrator::RefreshOrchestrator;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info};

/// Per-key review deadline during a sweep.
const REVIEW_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct Revalidator {
    pub(crate) checker: Arc<PermissionChecker>,
    pub(crate) orchestrator: RefreshOrchestrator,
    /// Root drain signal, shared with the subsystem's own shutdown path.
    pub(crate) shutdown: Arc<Mutex<Option<drain::Signal>>>,
    /// Sweep period (the permission cache TTL).
    pub(crate) period: Duration,
    /// Deadline for the manager shutdown on revocation.
    pub(crate) check_timeout: Duration,
}

impl Revalidator {
    /// Runs until the subsystem stops or a revocation is detected. The task
    /// is terminal either way.
    pub(crate) async fn run(self) {
        loop {
            tokio::time::sleep(self.period).await;
            if self.orchestrator.is_stopped() {
                return;
            }

            for key in self.checker.allowed_snapshot() {
                let rechecked =
                    tokio::time::timeout(REVIEW_TIMEOUT, self.checker.recheck(&key)).await;
                match rechecked {
                    Ok(Ok(decision)) if !decision.allowed => {
                        info!(%key, "Previously-granted permission revoked; stopping refresh subsystem");
                        self.orchestrator.shutdown(self.check_timeout).await;
                        let signal = self.shutdown.lock().take();
                        if let Some(signal) = signal {
                            let _ = tokio::time::timeout(self.check_timeout, signal.drain()).await;
                        }
                        return;
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => debug!(%key, %error, "Revalidation review failed"),
                    Err(_) => debug!(%key, "Revalidation review timed out"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap as HashMap;
    use glimpse_refresh_core::{
        registry::{RefreshSettings, ScopeKind},
        BuildOptions, BuildSnapshot, Decision, DomainName, DomainRegistry, PermissionKey,
        RegisteredDomain, RegistrationKind, Scope, Verb,
    };
    use glimpse_refresh_k8s_index::AccessReviewer;
    use glimpse_refresh_orchestrator::{
        OrchestratorConfig, OrchestratorMetrics, RefreshOrchestrator,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Flips from allow to deny when `revoked` is set.
    struct FlippableReviewer {
        revoked: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl AccessReviewer for FlippableReviewer {
        async fn review(&self, _key: &PermissionKey) -> anyhow::Result<Decision> {
            if self.revoked.load(Ordering::SeqCst) {
                Ok(Decision::deny("credential revoked"))
            } else {
                Ok(Decision::allow())
            }
        }
    }

    struct CountingBuilder {
        builds: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BuildSnapshot for CountingBuilder {
        async fn build(
            &self,
            _: &Scope,
            _: BuildOptions,
        ) -> anyhow::Result<serde_json::Value> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn revocation_stops_the_subsystem_within_one_sweep() {
        let revoked = Arc::new(AtomicBool::new(false));
        let checker = PermissionChecker::new(
            Arc::new(FlippableReviewer {
                revoked: revoked.clone(),
            }),
            tokio::time::Duration::from_secs(300),
        );

        // Seed the cache with an allowed key, as the gate preflight would.
        let key = PermissionKey::new("", "nodes", Verb::List);
        assert!(checker.can(&key).await.unwrap().allowed);
        assert_eq!(checker.allowed_snapshot(), vec![key]);

        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = DomainRegistry::default();
        registry
            .register(RegisteredDomain {
                name: "nodes".into(),
                scope_kind: ScopeKind::Global,
                registration: RegistrationKind::Watch,
                streaming: false,
                refresh: RefreshSettings {
                    interval: tokio::time::Duration::from_secs(5),
                    cooldown: tokio::time::Duration::from_millis(1),
                    timeout: tokio::time::Duration::from_secs(10),
                },
                context: None,
                builder: Arc::new(CountingBuilder {
                    builds: builds.clone(),
                }),
            })
            .unwrap();
        let orchestrator = RefreshOrchestrator::new(
            Arc::new(registry),
            HashMap::new(),
            OrchestratorMetrics::default(),
            OrchestratorConfig::default(),
        );
        let domain: DomainName = "nodes".into();
        orchestrator
            .set_scoped_domain_enabled(&domain, &Scope::cluster(), true)
            .await
            .unwrap();

        let (signal, watch) = drain::channel();
        drop(watch);
        let task = tokio::spawn(
            Revalidator {
                checker,
                orchestrator: orchestrator.clone(),
                shutdown: Arc::new(Mutex::new(Some(signal))),
                period: tokio::time::Duration::from_secs(300),
                check_timeout: tokio::time::Duration::from_secs(10),
            }
            .run(),
        );

        // First sweep: still allowed, subsystem keeps refreshing.
        tokio::time::advance(tokio::time::Duration::from_secs(301)).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert!(!orchestrator.is_stopped());
        let before = builds.load(Ordering::SeqCst);
        assert!(before >= 1);

        // Revoke; the next sweep must stop the subsystem and exit.
        revoked.store(true, Ordering::SeqCst);
        tokio::time::advance(tokio::time::Duration::from_secs(301)).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        task.await.unwrap();
        assert!(orchestrator.is_stopped());

        // No new snapshots are produced after revocation.
        let settled = builds.load(Ordering::SeqCst);
        tokio::time::advance(tokio::time::Duration::from_secs(60)).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(builds.load(Ordering::SeqCst), settled);
    }
}
