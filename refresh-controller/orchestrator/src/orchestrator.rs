//! The central refresh scheduler.

use crate::{
    metrics::OrchestratorMetrics,
    refresher::{self, RefresherHandle},
    service::{FetchError, SnapshotService},
    store::ScopedDomainStore,
};
use ahash::AHashMap as HashMap;
use glimpse_refresh_core::{
    BuildOptions, DomainName, DomainRegistry, Scope, ScopedDomainState, StreamingDomain,
    ViewContext, ViewContextPatch,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info_span, warn, Instrument};

/// Grace period between the last unsubscribe and teardown, sized to survive
/// UI tab flicker.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub grace_period: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

struct StreamTask {
    signal: drain::Signal,
    join: JoinHandle<()>,
}

impl StreamTask {
    async fn stop(self) {
        self.signal.drain().await;
        let _ = self.join.await;
    }
}

struct Inner {
    registry: Arc<DomainRegistry>,
    service: Arc<SnapshotService>,
    store: Arc<ScopedDomainStore>,
    metrics: OrchestratorMetrics,
    view: RwLock<ViewContext>,
    refreshers: HashMap<DomainName, RefresherHandle>,
    streaming: HashMap<DomainName, Arc<dyn StreamingDomain>>,
    streams: tokio::sync::Mutex<HashMap<(DomainName, Scope), StreamTask>>,
    /// Current scope and enabled flag for the coarse singleton API.
    singletons: Mutex<HashMap<DomainName, (Scope, bool)>>,
    shutdown: Mutex<Option<drain::Signal>>,
    stopped_tx: watch::Sender<bool>,
    grace: Duration,
}

/// Owns the scoped-domain store, the per-domain refreshers, and the
/// streaming task handles. Everything else holds clones of this handle.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    inner: Arc<Inner>,
}

impl RefreshOrchestrator {
    pub fn new(
        registry: Arc<DomainRegistry>,
        streaming: HashMap<DomainName, Arc<dyn StreamingDomain>>,
        metrics: OrchestratorMetrics,
        config: OrchestratorConfig,
    ) -> Self {
        let (signal, tasks) = drain::channel();
        let (stopped_tx, stopped_rx) = watch::channel(false);
        let store = Arc::new(ScopedDomainStore::default());
        let service = SnapshotService::new(
            registry.clone(),
            store.clone(),
            metrics.clone(),
            stopped_rx,
        );

        let refreshers = registry
            .iter()
            .map(|domain| {
                let handle = refresher::spawn(
                    domain.name.clone(),
                    domain.refresh,
                    service.clone(),
                    store.clone(),
                    metrics.clone(),
                    tasks.clone(),
                );
                (domain.name.clone(), handle)
            })
            .collect();
        // Only the refresher tasks hold shutdown watches; keeping one here
        // would stall the drain.
        drop(tasks);

        Self {
            inner: Arc::new(Inner {
                registry,
                service,
                store,
                metrics,
                view: RwLock::new(ViewContext::default()),
                refreshers,
                streaming,
                streams: tokio::sync::Mutex::new(HashMap::new()),
                singletons: Mutex::new(HashMap::new()),
                shutdown: Mutex::new(Some(signal)),
                stopped_tx,
                grace: config.grace_period,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.inner.registry
    }

    pub fn view_context(&self) -> ViewContext {
        self.inner.view.read().clone()
    }

    pub fn state(&self, domain: &DomainName, scope: &Scope) -> Option<ScopedDomainState> {
        self.inner.store.get(domain, scope).map(|entry| entry.state())
    }

    pub fn subscribe(
        &self,
        domain: &DomainName,
        scope: &Scope,
    ) -> watch::Receiver<ScopedDomainState> {
        self.inner.store.entry(domain, scope).subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped_tx.borrow()
    }

    /// Merges a partial view descriptor. Meaningful changes schedule a
    /// manual refresh for every domain bound to the changed fields; the
    /// scheduled pairs are returned.
    pub fn update_context(&self, patch: ViewContextPatch) -> Vec<(DomainName, Scope)> {
        let (changed, view) = {
            let mut view = self.inner.view.write();
            let changed = view.apply(patch);
            (changed, view.clone())
        };
        if changed.is_empty() {
            return Vec::new();
        }
        debug!(?changed, "View context changed");

        let scheduled: Vec<(DomainName, Scope)> = self
            .inner
            .registry
            .context_dependents(&changed, &view)
            .map(|(name, scope)| (name.clone(), scope))
            .collect();
        for (domain, scope) in &scheduled {
            self.spawn_fetch(domain.clone(), scope.clone(), true);
        }
        scheduled
    }

    /// Fans a manual refresh out to every domain whose context binding
    /// selects a scope under the current view.
    pub fn trigger_manual_refresh_for_context(&self) -> Vec<(DomainName, Scope)> {
        let view = self.view_context();
        let scheduled: Vec<(DomainName, Scope)> = self
            .inner
            .registry
            .iter()
            .filter_map(|domain| {
                let binding = domain.context.as_ref()?;
                let scope = (binding.scope)(&view)?;
                Some((domain.name.clone(), scope))
            })
            .collect();
        for (domain, scope) in &scheduled {
            self.spawn_fetch(domain.clone(), scope.clone(), true);
        }
        scheduled
    }

    /// Executes one build and returns the resulting subscription state.
    pub async fn fetch_scoped_domain(
        &self,
        domain: &DomainName,
        scope: &Scope,
        opts: BuildOptions,
    ) -> Result<ScopedDomainState, FetchError> {
        self.inner.service.fetch(domain, scope, opts).await?;
        Ok(self.inner.store.entry(domain, scope).state())
    }

    /// Adjusts the subscriber count for `(domain, scope)`.
    ///
    /// The first subscription triggers an initial fetch and, for streaming
    /// domains, task startup. The last unsubscription schedules teardown
    /// after the grace period so tab flicker does not thrash state.
    pub async fn set_scoped_domain_enabled(
        &self,
        domain: &DomainName,
        scope: &Scope,
        enabled: bool,
    ) -> Result<(), FetchError> {
        let registered = self
            .inner
            .registry
            .get(domain)
            .ok_or_else(|| FetchError::UnknownDomain(domain.clone()))?;
        let streaming = registered.streaming;
        let entry = self.inner.store.entry(domain, scope);

        if enabled {
            let (count, _) = entry.add_subscriber();
            self.inner
                .metrics
                .set_subscriptions(domain, self.inner.store.subscriber_total(domain) as i64);
            if count == 1 && !scope.is_inactive() {
                self.spawn_fetch(domain.clone(), scope.clone(), false);
                if streaming {
                    self.inner.start_stream(domain, scope).await;
                }
            }
        } else {
            let (count, epoch) = entry.remove_subscriber();
            self.inner
                .metrics
                .set_subscriptions(domain, self.inner.store.subscriber_total(domain) as i64);
            if count == 0 {
                let inner = self.inner.clone();
                let domain = domain.clone();
                let scope = scope.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(inner.grace).await;
                    let Some(entry) = inner.store.get(&domain, &scope) else {
                        return;
                    };
                    if !entry.teardown_still_valid(epoch) {
                        return;
                    }
                    debug!(%domain, %scope, "Tearing down idle subscription");
                    inner.stop_stream(&domain, &scope).await;
                    inner.store.remove(&domain, &scope);
                });
            }
        }
        Ok(())
    }

    pub async fn start_streaming_domain(
        &self,
        domain: &DomainName,
        scope: &Scope,
    ) -> Result<(), FetchError> {
        self.require_streaming(domain)?;
        self.inner.start_stream(domain, scope).await;
        Ok(())
    }

    pub async fn stop_streaming_domain(
        &self,
        domain: &DomainName,
        scope: &Scope,
    ) -> Result<(), FetchError> {
        self.require_streaming(domain)?;
        self.inner.stop_stream(domain, scope).await;
        Ok(())
    }

    /// Stops and restarts a streaming task. Unless `reset` is false the
    /// domain's sequence-carrying state is dropped first, making the restart
    /// indistinguishable from a cold start.
    pub async fn restart_streaming_domain(
        &self,
        domain: &DomainName,
        scope: &Scope,
        reset: bool,
    ) -> Result<(), FetchError> {
        self.require_streaming(domain)?;
        self.inner.stop_stream(domain, scope).await;
        if reset {
            if let Some(streaming) = self.inner.streaming.get(domain) {
                streaming.reset(scope);
            }
        }
        self.inner.start_stream(domain, scope).await;
        Ok(())
    }

    /// Fire-and-forget refresh of a streaming domain; the receiver resolves
    /// once the refresh has been processed.
    pub fn refresh_streaming_domain_once(
        &self,
        domain: &DomainName,
        scope: &Scope,
    ) -> Result<oneshot::Receiver<()>, FetchError> {
        self.require_streaming(domain)?;
        let streaming = self
            .inner
            .streaming
            .get(domain)
            .ok_or_else(|| FetchError::NotStreaming(domain.clone()))?;
        Ok(streaming.refresh_once(scope))
    }

    /// Coarse singleton variant: re-scopes the domain, moving any live
    /// subscription to the new scope.
    pub async fn set_domain_scope(
        &self,
        domain: &DomainName,
        scope: Scope,
    ) -> Result<(), FetchError> {
        let (old_scope, enabled) = {
            let singletons = self.inner.singletons.lock();
            singletons
                .get(domain)
                .cloned()
                .unwrap_or_else(|| (Scope::cluster(), false))
        };
        if old_scope != scope && enabled {
            self.set_scoped_domain_enabled(domain, &old_scope, false)
                .await?;
            self.set_scoped_domain_enabled(domain, &scope, true).await?;
        }
        self.inner
            .singletons
            .lock()
            .insert(domain.clone(), (scope, enabled));
        Ok(())
    }

    pub async fn set_domain_enabled(
        &self,
        domain: &DomainName,
        enabled: bool,
    ) -> Result<(), FetchError> {
        let (scope, currently) = {
            let singletons = self.inner.singletons.lock();
            singletons
                .get(domain)
                .cloned()
                .unwrap_or_else(|| (Scope::cluster(), false))
        };
        if currently != enabled {
            self.set_scoped_domain_enabled(domain, &scope, enabled)
                .await?;
        }
        self.inner
            .singletons
            .lock()
            .insert(domain.clone(), (scope, enabled));
        Ok(())
    }

    /// Wakes a domain's refresher out of its tick interval.
    pub fn wake(&self, domain: &DomainName) {
        if let Some(handle) = self.inner.refreshers.get(domain) {
            let _ = handle.wake.try_send(());
        }
    }

    /// Stops every refresher, streaming task, and further build, bounded by
    /// `deadline`. The orchestrator is terminal afterwards.
    pub async fn shutdown(&self, deadline: Duration) {
        let signal = self.inner.shutdown.lock().take();
        let _ = self.inner.stopped_tx.send(true);

        let streams: Vec<StreamTask> = {
            let mut streams = self.inner.streams.lock().await;
            streams.drain().map(|(_, task)| task).collect()
        };

        let drained = tokio::time::timeout(deadline, async {
            for task in streams {
                task.stop().await;
            }
            if let Some(signal) = signal {
                signal.drain().await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown deadline elapsed before tasks drained");
        }
    }

    fn require_streaming(&self, domain: &DomainName) -> Result<(), FetchError> {
        let registered = self
            .inner
            .registry
            .get(domain)
            .ok_or_else(|| FetchError::UnknownDomain(domain.clone()))?;
        if !registered.streaming {
            return Err(FetchError::NotStreaming(domain.clone()));
        }
        Ok(())
    }

    fn spawn_fetch(&self, domain: DomainName, scope: Scope, is_manual: bool) {
        let service = self.inner.service.clone();
        let opts = BuildOptions {
            is_manual,
            reset: false,
        };
        tokio::spawn(async move {
            if let Err(error) = service.fetch(&domain, &scope, opts).await {
                debug!(%domain, %scope, %error, "Scheduled fetch failed");
            }
        });
    }
}

impl Inner {
    async fn start_stream(&self, domain: &DomainName, scope: &Scope) {
        let Some(streaming) = self.streaming.get(domain).cloned() else {
            warn!(%domain, "No streaming task wired for domain");
            return;
        };
        let key = (domain.clone(), scope.clone());
        let mut streams = self.streams.lock().await;
        if streams.contains_key(&key) {
            return;
        }

        let (signal, shutdown) = drain::channel();
        let task_scope = scope.clone();
        let task_domain = domain.clone();
        let join = tokio::spawn(
            async move {
                if let Err(error) = streaming.run(task_scope, shutdown).await {
                    warn!(%error, domain = %task_domain, "Streaming task failed");
                }
            }
            .instrument(info_span!("stream", %domain, %scope)),
        );
        streams.insert(key, StreamTask { signal, join });
    }

    async fn stop_stream(&self, domain: &DomainName, scope: &Scope) {
        let task = {
            let mut streams = self.streams.lock().await;
            streams.remove(&(domain.clone(), scope.clone()))
        };
        if let Some(task) = task {
            task.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_refresh_core::{
        registry::{ContextBinding, RefreshSettings, ScopeKind},
        BuildSnapshot, ContextField, ObjectPanel, RegisteredDomain, RegistrationKind,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBuilder {
        builds: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl BuildSnapshot for CountingBuilder {
        async fn build(
            &self,
            _scope: &Scope,
            _opts: BuildOptions,
        ) -> anyhow::Result<serde_json::Value> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(serde_json::json!({}))
        }
    }

    fn domain(
        name: &str,
        interval: Duration,
        delay: Duration,
        streaming: bool,
        context: Option<ContextBinding>,
    ) -> (RegisteredDomain, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let registered = RegisteredDomain {
            name: name.into(),
            scope_kind: ScopeKind::Global,
            registration: RegistrationKind::Watch,
            streaming,
            refresh: RefreshSettings {
                interval,
                cooldown: Duration::from_millis(1),
                timeout: Duration::from_secs(10),
            },
            context,
            builder: Arc::new(CountingBuilder {
                builds: builds.clone(),
                delay,
            }),
        };
        (registered, builds)
    }

    fn panel_binding() -> ContextBinding {
        ContextBinding {
            fields: &[ContextField::ObjectPanel],
            scope: |view| {
                let panel = &view.object_panel;
                if !panel.is_open {
                    return None;
                }
                Some(Scope::object(
                    panel.namespace.as_deref()?,
                    panel.kind.as_deref()?,
                    panel.name.as_deref()?,
                ))
            },
        }
    }

    fn orchestrator(
        domains: Vec<RegisteredDomain>,
        streaming: HashMap<DomainName, Arc<dyn StreamingDomain>>,
    ) -> RefreshOrchestrator {
        let mut registry = DomainRegistry::default();
        for d in domains {
            registry.register(d).unwrap();
        }
        RefreshOrchestrator::new(
            Arc::new(registry),
            streaming,
            OrchestratorMetrics::default(),
            OrchestratorConfig::default(),
        )
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn context_change_refreshes_only_dependent_domains() {
        let (details, detail_builds) = domain(
            "object-details",
            Duration::from_secs(600),
            Duration::ZERO,
            false,
            Some(panel_binding()),
        );
        let (logs, log_builds) = domain(
            "object-logs",
            Duration::from_secs(600),
            Duration::ZERO,
            false,
            Some(panel_binding()),
        );
        let (nodes, node_builds) = domain(
            "nodes",
            Duration::from_secs(600),
            Duration::ZERO,
            false,
            Some(ContextBinding {
                fields: &[ContextField::CurrentView],
                scope: |view| {
                    (view.current_view.as_deref() == Some("nodes")).then(Scope::cluster)
                },
            }),
        );
        let orch = orchestrator(vec![details, logs, nodes], HashMap::new());

        let scheduled = orch.update_context(ViewContextPatch {
            object_panel: Some(ObjectPanel {
                is_open: true,
                kind: Some("Pod".into()),
                name: Some("api-1".into()),
                namespace: Some("team-a".into()),
            }),
            ..Default::default()
        });

        let expected_scope = Scope::from("team-a:pod:api-1");
        assert_eq!(
            scheduled,
            vec![
                ("object-details".into(), expected_scope.clone()),
                ("object-logs".into(), expected_scope.clone()),
            ]
        );

        settle().await;
        assert_eq!(detail_builds.load(Ordering::SeqCst), 1);
        assert_eq!(log_builds.load(Ordering::SeqCst), 1);
        assert_eq!(node_builds.load(Ordering::SeqCst), 0);

        let state = orch.state(&"object-details".into(), &expected_scope).unwrap();
        assert!(state.is_manual);
        assert_eq!(state.sequence(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_after_grace_stops_fetching_until_resubscribed() {
        let (pods, builds) = domain(
            "pods",
            Duration::from_secs(5),
            Duration::ZERO,
            false,
            None,
        );
        let orch = orchestrator(vec![pods], HashMap::new());
        let domain_name: DomainName = "pods".into();
        let scope = Scope::workload("team-a", "Deployment", "api");

        orch.set_scoped_domain_enabled(&domain_name, &scope, true)
            .await
            .unwrap();
        settle().await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // Auto-refresh covers the subscribed scope.
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert!(builds.load(Ordering::SeqCst) >= 2);

        orch.set_scoped_domain_enabled(&domain_name, &scope, false)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        settle().await;
        assert!(orch.state(&domain_name, &scope).is_none());

        // No further builds while unsubscribed.
        let settled = builds.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(builds.load(Ordering::SeqCst), settled);

        // Resubscribing starts fresh.
        orch.set_scoped_domain_enabled(&domain_name, &scope, true)
            .await
            .unwrap();
        settle().await;
        assert_eq!(builds.load(Ordering::SeqCst), settled + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscription_within_grace_cancels_teardown() {
        let (pods, _builds) = domain(
            "pods",
            Duration::from_secs(600),
            Duration::ZERO,
            false,
            None,
        );
        let orch = orchestrator(vec![pods], HashMap::new());
        let domain_name: DomainName = "pods".into();
        let scope = Scope::from("team-a");

        orch.set_scoped_domain_enabled(&domain_name, &scope, true)
            .await
            .unwrap();
        orch.set_scoped_domain_enabled(&domain_name, &scope, false)
            .await
            .unwrap();
        // Tab flicker: resubscribe inside the grace period.
        orch.set_scoped_domain_enabled(&domain_name, &scope, true)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        settle().await;

        assert!(orch.state(&domain_name, &scope).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_dropped_and_counted() {
        // Builds take three times the refresh interval.
        let (pods, builds) = domain(
            "pods",
            Duration::from_secs(2),
            Duration::from_secs(7),
            false,
            None,
        );
        let orch = orchestrator(vec![pods], HashMap::new());
        let domain_name: DomainName = "pods".into();
        let scope = Scope::from("team-a");

        orch.set_scoped_domain_enabled(&domain_name, &scope, true)
            .await
            .unwrap();
        settle().await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // Two ticks land while the initial build sleeps.
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;

        let state = orch.state(&domain_name, &scope).unwrap();
        assert!(state.dropped_auto_refreshes >= 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    struct RecordingStream {
        runs: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl StreamingDomain for RecordingStream {
        async fn run(&self, _scope: Scope, shutdown: drain::Watch) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            shutdown.signaled().await;
            Ok(())
        }

        fn reset(&self, _scope: &Scope) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_lifecycle_follows_subscriptions() {
        let (events, _builds) = domain(
            "events",
            Duration::from_secs(600),
            Duration::ZERO,
            true,
            None,
        );
        let runs = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let mut streaming: HashMap<DomainName, Arc<dyn StreamingDomain>> = HashMap::new();
        streaming.insert(
            "events".into(),
            Arc::new(RecordingStream {
                runs: runs.clone(),
                resets: resets.clone(),
            }),
        );
        let orch = orchestrator(vec![events], streaming);
        let domain_name: DomainName = "events".into();
        let scope = Scope::from("team-a");

        orch.set_scoped_domain_enabled(&domain_name, &scope, true)
            .await
            .unwrap();
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Restart resets sequence-carrying state by default.
        orch.restart_streaming_domain(&domain_name, &scope, true)
            .await
            .unwrap();
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        // `reset: false` keeps it.
        orch.restart_streaming_domain(&domain_name, &scope, false)
            .await
            .unwrap();
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        // Teardown stops the task.
        orch.set_scoped_domain_enabled(&domain_name, &scope, false)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;
        settle().await;
        assert!(orch.inner.streams.lock().await.is_empty());

        // Non-streaming domains refuse stream control.
        assert!(matches!(
            orch.start_streaming_domain(&"missing".into(), &scope).await,
            Err(FetchError::UnknownDomain(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_terminal() {
        let (pods, builds) = domain(
            "pods",
            Duration::from_secs(2),
            Duration::ZERO,
            false,
            None,
        );
        let orch = orchestrator(vec![pods], HashMap::new());
        let domain_name: DomainName = "pods".into();
        let scope = Scope::from("team-a");

        orch.set_scoped_domain_enabled(&domain_name, &scope, true)
            .await
            .unwrap();
        settle().await;
        let before = builds.load(Ordering::SeqCst);

        orch.shutdown(Duration::from_secs(10)).await;
        assert!(orch.is_stopped());

        assert!(matches!(
            orch.fetch_scoped_domain(&domain_name, &scope, BuildOptions::default())
                .await,
            Err(FetchError::Stopped)
        ));

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(builds.load(Ordering::SeqCst), before);
    }
}
