//! Subsystem construction and lifecycle.

use crate::{config::Config, revalidator::Revalidator};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use glimpse_refresh_core::{
    stream::LogStore, DomainName, PermissionIssue, PermissionKey, StreamingDomain, Verb,
};
use glimpse_refresh_http::{
    resources::SessionDriven, CatalogStreams, EventStreams, LogStreams, RefreshApi,
    ResourceStreams,
};
use glimpse_refresh_k8s_api::Client;
use glimpse_refresh_k8s_index::{
    domains::{registration_table, DomainDeps},
    gate::{preflight_keys, PermissionGate},
    usage::{ApiUsageSource, PollerMode, UsagePoller},
    ApiAccessReviewer, ClusterInfo, InformerHub, PermissionChecker,
};
use glimpse_refresh_orchestrator::{
    OrchestratorConfig, OrchestratorMetrics, RefreshOrchestrator,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// One refresh subsystem, instantiable once per cluster without cross-talk:
/// every collaborator threads through `Config` and nothing global escapes.
pub struct Subsystem {
    orchestrator: RefreshOrchestrator,
    api: RefreshApi,
    hub: Arc<InformerHub>,
    issues: Vec<PermissionIssue>,
    shutdown: Arc<Mutex<Option<drain::Signal>>>,
    watch: drain::Watch,
    check_timeout: tokio::time::Duration,
}

impl Subsystem {
    /// Builds the subsystem: primes permissions, walks the registration
    /// table, installs the usage poller, and spawns the orchestrator,
    /// streaming subsystems, and revalidator.
    ///
    /// Permission denials downgrade domains and are never fatal here; only a
    /// missing hard dependency fails construction.
    pub async fn new(
        client: Client,
        config: Config,
        metrics: OrchestratorMetrics,
    ) -> Result<Self> {
        let (signal, watch) = drain::channel();

        let checker = PermissionChecker::new(
            Arc::new(ApiAccessReviewer::new(client.clone())),
            config.permission_cache_ttl,
        );
        let hub = InformerHub::new(
            client.clone(),
            checker.clone(),
            watch.clone(),
            config.resync_interval,
        );

        let cluster = Arc::new(ClusterInfo {
            id: config.cluster_id.clone(),
            name: if config.cluster_name.is_empty() {
                config.cluster_id.clone()
            } else {
                config.cluster_name.clone()
            },
        });

        let usage = install_usage_poller(&client, &checker, &config, watch.clone()).await;
        let logs_store = Arc::new(LogStore::default());

        let deps = DomainDeps {
            cluster: cluster.clone(),
            index: hub.index(),
            ready: hub.ready_rx(),
            usage: usage.handle(),
            client: client.clone(),
            dynamic: config.dynamic_client.clone(),
            logs: logs_store.clone(),
            details: config.object_details.clone(),
            helm: config.helm.clone(),
            catalog: config.catalog.clone(),
        };
        let entries = registration_table(&deps);

        hub.prime_permissions(preflight_keys(&entries), config.permission_preflight_timeout)
            .await;

        let outcome = PermissionGate::register_all(hub.as_ref(), entries).await?;
        for issue in &outcome.issues {
            debug!(domain = %issue.domain, resource = %issue.resource, error = %issue.error,
                "Domain downgraded by permissions");
        }
        let registry = Arc::new(outcome.registry);
        info!(domains = registry.len(), issues = outcome.issues.len(), "Domain registry populated");

        let log_streams = LogStreams::new(client.clone(), hub.index(), logs_store);
        let event_streams = EventStreams::new(hub.index());
        let resource_streams = ResourceStreams::new(
            config.dynamic_client.clone().unwrap_or_else(|| client.clone()),
            checker.clone(),
        );
        let catalog_streams = config.catalog.clone().map(CatalogStreams::new);

        let mut streaming: HashMap<DomainName, Arc<dyn StreamingDomain>> = HashMap::new();
        streaming.insert("object-logs".into(), log_streams.clone());
        streaming.insert("events".into(), event_streams.clone());
        streaming.insert("resources".into(), Arc::new(SessionDriven));
        if let Some(catalog) = &catalog_streams {
            streaming.insert("catalog".into(), catalog.clone());
        }

        let orchestrator = RefreshOrchestrator::new(
            registry,
            streaming,
            metrics,
            OrchestratorConfig::default(),
        );

        let api = RefreshApi::new(
            orchestrator.clone(),
            outcome.issues.clone(),
            hub.ready_rx(),
            log_streams,
            event_streams,
            resource_streams,
            catalog_streams,
            watch.clone(),
        );

        let shutdown = Arc::new(Mutex::new(Some(signal)));
        tokio::spawn(
            Revalidator {
                checker,
                orchestrator: orchestrator.clone(),
                shutdown: shutdown.clone(),
                period: config.permission_cache_ttl,
                check_timeout: config.permission_check_timeout,
            }
            .run(),
        );

        Ok(Self {
            orchestrator,
            api,
            hub,
            issues: outcome.issues,
            shutdown,
            watch,
            check_timeout: config.permission_check_timeout,
        })
    }

    pub fn api(&self) -> RefreshApi {
        self.api.clone()
    }

    pub fn orchestrator(&self) -> RefreshOrchestrator {
        self.orchestrator.clone()
    }

    pub fn permission_issues(&self) -> &[PermissionIssue] {
        &self.issues
    }

    pub fn has_synced(&self) -> bool {
        self.hub.has_synced()
    }

    /// Shutdown watch handed to the API server so sessions close with the
    /// subsystem.
    pub fn shutdown_watch(&self) -> drain::Watch {
        self.watch.clone()
    }

    /// Stops the orchestrator and drains every watch, session, and poller.
    pub async fn shutdown(self) {
        self.orchestrator.shutdown(self.check_timeout).await;
        let signal = self.shutdown.lock().take();
        // Our own watch clone must go before draining.
        drop(self.watch);
        drop(self.hub);
        drop(self.api);
        if let Some(signal) = signal {
            let _ = tokio::time::timeout(self.check_timeout, signal.drain()).await;
        }
    }
}

async fn install_usage_poller(
    client: &Client,
    checker: &Arc<PermissionChecker>,
    config: &Config,
    shutdown: drain::Watch,
) -> UsagePoller {
    if !metrics_api_present(client).await {
        info!("Metrics API not found; node and pod usage disabled");
        return UsagePoller::disabled("Metrics API not found");
    }

    let nodes = checker
        .can(&PermissionKey::new("metrics.k8s.io", "nodes", Verb::List))
        .await;
    let pods = checker
        .can(&PermissionKey::new("metrics.k8s.io", "pods", Verb::List))
        .await;
    match (nodes, pods) {
        (Ok(nodes), Ok(pods)) if !nodes.allowed || !pods.allowed => {
            info!("Metrics API present but not listable; usage disabled");
            UsagePoller::disabled("Insufficient permissions for Metrics API")
        }
        // Probe errors are transient; sample optimistically and let the
        // poller log failures.
        _ => UsagePoller::spawn(
            Arc::new(ApiUsageSource::new(client.clone())),
            PollerMode::Demand,
            config.metrics_interval,
            shutdown,
        ),
    }
}

async fn metrics_api_present(client: &Client) -> bool {
    match client
        .list_api_group_resources("metrics.k8s.io/v1beta1")
        .await
    {
        Ok(resources) => resources.resources.iter().any(|r| r.name == "nodes"),
        Err(error) => {
            debug!(%error, "Metrics API discovery failed");
            false
        }
    }
}
