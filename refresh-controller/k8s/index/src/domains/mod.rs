//! Domain builders and the ordered registration table.
//!
//! The table order is part of the contract: entries that start informers
//! come first so later domains find their caches warming already.

mod catalog;
mod config;
mod events;
mod helm;
mod nodes;
mod object;
mod overview;
mod pods;
mod rbac;
mod resources;
mod workloads;

pub use self::{
    catalog::CatalogBuilder,
    config::ConfigListBuilder,
    events::EventsBuilder,
    helm::HelmBuilder,
    nodes::{NodesBuilder, NodesListBuilder},
    object::{ObjectDetailsBuilder, ObjectLogsBuilder},
    overview::{OverviewBuilder, OverviewListBuilder},
    pods::PodsBuilder,
    rbac::RbacListBuilder,
    resources::ResourcesBuilder,
    workloads::WorkloadsBuilder,
};

use crate::{
    cluster::SharedIndex,
    cluster_info::ClusterInfo,
    gate::{RegistrationEntry, RegistrationMode},
    hub::WatchKind,
    usage::UsageHandle,
};
use glimpse_refresh_core::{
    payload::{
        ClusterOverview, ConfigPayload, EventsPayload, HelmPayload, NodesPayload, PodsPayload,
        RbacPayload, WorkloadsPayload,
    },
    plugins::{HelmFactory, ObjectCatalogService, ObjectDetailsProvider},
    registry::{ContextBinding, RefreshSettings, ScopeKind},
    stream::LogStore,
    BuildSnapshot, ContextField, GroupResource, PermissionKey, Scope, Verb, ViewContext,
};
use glimpse_refresh_k8s_api::Client;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// Everything the registration table needs to construct builders.
#[derive(Clone)]
pub struct DomainDeps {
    pub cluster: Arc<ClusterInfo>,
    pub index: SharedIndex,
    /// Informer readiness; watch-backed builders report `initialising`
    /// until it is true.
    pub ready: watch::Receiver<bool>,
    pub usage: UsageHandle,
    pub client: Client,
    /// Client used for dynamic (custom-resource) access. Hard dependency of
    /// the `resources` domain.
    pub dynamic: Option<Client>,
    pub logs: Arc<LogStore>,
    pub details: Option<Arc<dyn ObjectDetailsProvider>>,
    pub helm: Option<Arc<dyn HelmFactory>>,
    pub catalog: Option<Arc<dyn ObjectCatalogService>>,
}

fn namespace_scope(view: &ViewContext) -> Option<Scope> {
    view.active_namespace_view.clone().map(Scope::namespace)
}

fn object_panel_scope(view: &ViewContext) -> Option<Scope> {
    let panel = &view.object_panel;
    if !panel.is_open {
        return None;
    }
    Some(Scope::object(
        panel.namespace.as_deref()?,
        panel.kind.as_deref()?,
        panel.name.as_deref()?,
    ))
}

/// The ordered registration table.
pub fn registration_table(deps: &DomainDeps) -> Vec<RegistrationEntry> {
    let mut entries = Vec::new();

    // cluster-overview
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(OverviewBuilder::new(deps.index, deps.cluster, deps.ready))
                    as Arc<dyn BuildSnapshot>
            })
        };
        let fallback = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(OverviewListBuilder::new(deps.client, deps.cluster))
                    as Arc<dyn BuildSnapshot>
            })
        };
        let meta = deps.cluster.meta();
        entries.push(RegistrationEntry {
            name: "cluster-overview".into(),
            scope_kind: ScopeKind::Global,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(10)),
            context: Some(ContextBinding {
                fields: &[ContextField::CurrentView, ContextField::ActiveClusterView],
                scope: |_| Some(Scope::cluster()),
            }),
            mode: RegistrationMode::ListWatch {
                resources: vec![
                    GroupResource::core("pods"),
                    GroupResource::core("nodes"),
                    GroupResource::core("namespaces"),
                    GroupResource::core("events"),
                ],
                watches: vec![
                    WatchKind::Pods,
                    WatchKind::Nodes,
                    WatchKind::Namespaces,
                    WatchKind::Events,
                ],
                build,
                fallback: Some(fallback),
                denied: denied(ClusterOverview::denied(meta)),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        });
    }

    // nodes
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(NodesBuilder::new(
                    deps.index,
                    deps.cluster,
                    deps.usage,
                    deps.ready,
                )) as Arc<dyn BuildSnapshot>
            })
        };
        let fallback = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(NodesListBuilder::new(deps.client, deps.cluster, deps.usage))
                    as Arc<dyn BuildSnapshot>
            })
        };
        let meta = deps.cluster.meta();
        entries.push(RegistrationEntry {
            name: "nodes".into(),
            scope_kind: ScopeKind::Global,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(15)),
            context: Some(ContextBinding {
                fields: &[ContextField::CurrentView],
                scope: |view| {
                    (view.current_view.as_deref() == Some("nodes")).then(Scope::cluster)
                },
            }),
            mode: RegistrationMode::ListWatch {
                resources: vec![GroupResource::core("nodes")],
                watches: vec![WatchKind::Nodes],
                build,
                fallback: Some(fallback),
                denied: denied(NodesPayload::denied(meta)),
            },
            require: None,
            skip_if: None,
            extra_preflight: vec![
                PermissionKey::new("metrics.k8s.io", "nodes", Verb::List),
                PermissionKey::new("metrics.k8s.io", "pods", Verb::List),
            ],
        });
    }

    // namespace-workloads
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(WorkloadsBuilder::new(deps.index, deps.cluster, deps.ready))
                    as Arc<dyn BuildSnapshot>
            })
        };
        let meta = deps.cluster.meta();
        entries.push(RegistrationEntry {
            name: "namespace-workloads".into(),
            scope_kind: ScopeKind::Namespaced,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(10)),
            context: Some(ContextBinding {
                fields: &[ContextField::ActiveNamespaceView, ContextField::CurrentView],
                scope: namespace_scope,
            }),
            mode: RegistrationMode::ListWatch {
                resources: vec![
                    GroupResource::new("apps", "deployments"),
                    GroupResource::new("apps", "replicasets"),
                    GroupResource::new("apps", "statefulsets"),
                    GroupResource::new("apps", "daemonsets"),
                    GroupResource::core("pods"),
                ],
                watches: vec![
                    WatchKind::Deployments,
                    WatchKind::ReplicaSets,
                    WatchKind::StatefulSets,
                    WatchKind::DaemonSets,
                    WatchKind::Pods,
                ],
                build,
                fallback: None,
                denied: denied(WorkloadsPayload::denied(meta)),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        });
    }

    // pods
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(PodsBuilder::new(
                    deps.index,
                    deps.cluster,
                    deps.usage,
                    deps.ready,
                )) as Arc<dyn BuildSnapshot>
            })
        };
        let meta = deps.cluster.meta();
        entries.push(RegistrationEntry {
            name: "pods".into(),
            scope_kind: ScopeKind::WorkloadKeyed,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(5)),
            context: None,
            mode: RegistrationMode::ListWatch {
                resources: vec![
                    GroupResource::core("pods"),
                    GroupResource::new("apps", "replicasets"),
                ],
                watches: vec![WatchKind::Pods, WatchKind::ReplicaSets],
                build,
                fallback: None,
                denied: denied(PodsPayload::denied(meta)),
            },
            require: None,
            skip_if: None,
            extra_preflight: vec![PermissionKey::new("metrics.k8s.io", "pods", Verb::List)],
        });
    }

    // namespace-rbac
    {
        let client = deps.client.clone();
        let cluster = deps.cluster.clone();
        let meta = deps.cluster.meta();
        entries.push(RegistrationEntry {
            name: "namespace-rbac".into(),
            scope_kind: ScopeKind::Namespaced,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(30)),
            context: Some(ContextBinding {
                fields: &[ContextField::ActiveNamespaceView],
                scope: namespace_scope,
            }),
            mode: RegistrationMode::List {
                resources: vec![
                    GroupResource::new("rbac.authorization.k8s.io", "roles"),
                    GroupResource::new("rbac.authorization.k8s.io", "rolebindings"),
                ],
                allow_any: false,
                build: Box::new(move |listable| {
                    Arc::new(RbacListBuilder::new(client, cluster, listable))
                        as Arc<dyn BuildSnapshot>
                }),
                denied: denied(RbacPayload::denied(meta)),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        });
    }

    // namespace-config
    {
        let client = deps.client.clone();
        let cluster = deps.cluster.clone();
        let meta = deps.cluster.meta();
        entries.push(RegistrationEntry {
            name: "namespace-config".into(),
            scope_kind: ScopeKind::Namespaced,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(30)),
            context: Some(ContextBinding {
                fields: &[ContextField::ActiveNamespaceView],
                scope: namespace_scope,
            }),
            mode: RegistrationMode::List {
                resources: vec![
                    GroupResource::core("configmaps"),
                    GroupResource::core("secrets"),
                ],
                allow_any: true,
                build: Box::new(move |listable| {
                    Arc::new(ConfigListBuilder::new(client, cluster, listable))
                        as Arc<dyn BuildSnapshot>
                }),
                denied: denied(ConfigPayload::denied(meta)),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        });
    }

    // events
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(EventsBuilder::new(deps.index, deps.cluster, deps.ready))
                    as Arc<dyn BuildSnapshot>
            })
        };
        let meta = deps.cluster.meta();
        entries.push(RegistrationEntry {
            name: "events".into(),
            scope_kind: ScopeKind::Namespaced,
            streaming: true,
            refresh: RefreshSettings::with_interval(Duration::from_secs(30)),
            context: Some(ContextBinding {
                fields: &[ContextField::ActiveNamespaceView],
                scope: |view| Some(
                    view.active_namespace_view
                        .clone()
                        .map(Scope::namespace)
                        .unwrap_or_else(Scope::cluster),
                ),
            }),
            mode: RegistrationMode::ListWatch {
                resources: vec![GroupResource::core("events")],
                watches: vec![WatchKind::Events],
                build,
                fallback: None,
                denied: denied(EventsPayload::denied(meta)),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        });
    }

    // object-details
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(ObjectDetailsBuilder::new(
                    deps.index,
                    deps.cluster,
                    deps.details,
                )) as Arc<dyn BuildSnapshot>
            })
        };
        entries.push(RegistrationEntry {
            name: "object-details".into(),
            scope_kind: ScopeKind::ObjectKeyed,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(10)),
            context: Some(ContextBinding {
                fields: &[ContextField::ObjectPanel],
                scope: object_panel_scope,
            }),
            mode: RegistrationMode::Direct { build },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        });
    }

    // object-logs
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(ObjectLogsBuilder::new(deps.logs, deps.cluster))
                    as Arc<dyn BuildSnapshot>
            })
        };
        entries.push(RegistrationEntry {
            name: "object-logs".into(),
            scope_kind: ScopeKind::ObjectKeyed,
            streaming: true,
            refresh: RefreshSettings::with_interval(Duration::from_secs(10)),
            context: Some(ContextBinding {
                fields: &[ContextField::ObjectPanel],
                scope: object_panel_scope,
            }),
            mode: RegistrationMode::Direct { build },
            require: None,
            skip_if: None,
            extra_preflight: vec![PermissionKey::new("", "pods", Verb::Get)
                .with_subresource("log")],
        });
    }

    // resources
    {
        let build = {
            let deps = deps.clone();
            Box::new(move || {
                Arc::new(ResourcesBuilder::new(deps.dynamic, deps.cluster))
                    as Arc<dyn BuildSnapshot>
            })
        };
        let dynamic_present = deps.dynamic.is_some();
        entries.push(RegistrationEntry {
            name: "resources".into(),
            scope_kind: ScopeKind::Global,
            streaming: true,
            refresh: RefreshSettings::with_interval(Duration::from_secs(60)),
            context: None,
            mode: RegistrationMode::Direct { build },
            require: Some(Box::new(move || {
                anyhow::ensure!(dynamic_present, "dynamic client not configured");
                Ok(())
            })),
            skip_if: None,
            extra_preflight: Vec::new(),
        });
    }

    // helm-releases
    {
        let helm = deps.helm.clone();
        let cluster = deps.cluster.clone();
        let meta = deps.cluster.meta();
        let helm_absent = deps.helm.is_none();
        entries.push(RegistrationEntry {
            name: "helm-releases".into(),
            scope_kind: ScopeKind::Namespaced,
            streaming: false,
            refresh: RefreshSettings::with_interval(Duration::from_secs(30)),
            context: Some(ContextBinding {
                fields: &[ContextField::ActiveNamespaceView],
                scope: namespace_scope,
            }),
            mode: RegistrationMode::List {
                resources: vec![GroupResource::core("secrets")],
                allow_any: false,
                build: Box::new(move |_| {
                    Arc::new(HelmBuilder::new(
                        helm.expect("skip_if guards absent helm factory"),
                        cluster,
                    )) as Arc<dyn BuildSnapshot>
                }),
                denied: denied(HelmPayload::denied(meta)),
            },
            require: None,
            skip_if: Some(Box::new(move || helm_absent)),
            extra_preflight: Vec::new(),
        });
    }

    // catalog
    {
        let catalog = deps.catalog.clone();
        let cluster = deps.cluster.clone();
        let catalog_absent = deps.catalog.is_none();
        entries.push(RegistrationEntry {
            name: "catalog".into(),
            scope_kind: ScopeKind::Global,
            streaming: true,
            refresh: RefreshSettings::with_interval(Duration::from_secs(60)),
            context: None,
            mode: RegistrationMode::Direct {
                build: Box::new(move || {
                    Arc::new(CatalogBuilder::new(
                        catalog.expect("skip_if guards absent catalog service"),
                        cluster,
                    )) as Arc<dyn BuildSnapshot>
                }),
            },
            require: None,
            skip_if: Some(Box::new(move || catalog_absent)),
            extra_preflight: Vec::new(),
        });
    }

    entries
}

fn denied(payload: impl serde::Serialize + Send + 'static) -> crate::gate::BuilderCtor {
    Box::new(move || {
        let payload = serde_json::to_value(&payload)
            .expect("denied payloads serialize infallibly");
        Arc::new(DeniedBuilder { payload }) as Arc<dyn BuildSnapshot>
    })
}

/// Occupies a domain slot with a schema-compatible `permissionDenied`
/// payload.
struct DeniedBuilder {
    payload: serde_json::Value,
}

#[async_trait::async_trait]
impl BuildSnapshot for DeniedBuilder {
    async fn build(
        &self,
        _scope: &Scope,
        _opts: glimpse_refresh_core::BuildOptions,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_client() -> Client {
        let (svc, _handle) = tower_test::mock::pair::<
            http::Request<kube::client::Body>,
            http::Response<kube::client::Body>,
        >();
        Client::new(svc, "default")
    }

    fn deps(helm: bool, catalog: bool) -> DomainDeps {
        let (_tx, ready) = watch::channel(true);
        DomainDeps {
            cluster: Arc::new(ClusterInfo {
                id: "c1".into(),
                name: "test".into(),
            }),
            index: crate::cluster::ClusterIndex::shared(),
            ready,
            usage: UsageHandle::disabled("Metrics API not found"),
            client: mock_client(),
            dynamic: Some(mock_client()),
            logs: Arc::new(LogStore::default()),
            details: None,
            helm: helm.then(|| unreachable_helm()),
            catalog: catalog.then(|| unreachable_catalog()),
        }
    }

    fn unreachable_helm() -> Arc<dyn HelmFactory> {
        struct Never;
        #[async_trait::async_trait]
        impl HelmFactory for Never {
            async fn list_releases(
                &self,
                _: Option<&str>,
            ) -> anyhow::Result<Vec<glimpse_refresh_core::plugins::HelmRelease>> {
                Ok(Vec::new())
            }
        }
        Arc::new(Never)
    }

    fn unreachable_catalog() -> Arc<dyn ObjectCatalogService> {
        struct Never;
        #[async_trait::async_trait]
        impl ObjectCatalogService for Never {
            async fn entries(
                &self,
            ) -> anyhow::Result<Vec<glimpse_refresh_core::plugins::CatalogEntry>> {
                Ok(Vec::new())
            }

            fn watch(
                &self,
            ) -> futures::stream::BoxStream<'static, glimpse_refresh_core::plugins::CatalogEvent>
            {
                Box::pin(futures::stream::pending())
            }
        }
        Arc::new(Never)
    }

    /// Table order is part of the registry contract.
    #[test]
    fn table_order_is_stable() {
        let entries = registration_table(&deps(true, true));
        let names: Vec<_> = entries.iter().map(|e| e.name.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "cluster-overview",
                "nodes",
                "namespace-workloads",
                "pods",
                "namespace-rbac",
                "namespace-config",
                "events",
                "object-details",
                "object-logs",
                "resources",
                "helm-releases",
                "catalog",
            ]
        );
    }

    #[test]
    fn plugin_domains_skip_when_unconfigured() {
        let entries = registration_table(&deps(false, false));
        let helm = entries
            .into_iter()
            .find(|e| e.name.as_str() == "helm-releases")
            .unwrap();
        assert!(helm.skip_if.map(|skip| skip()).unwrap_or(false));
    }

    #[test]
    fn object_panel_scope_matches_the_panel() {
        let mut view = ViewContext::default();
        assert!(object_panel_scope(&view).is_none());
        view.object_panel = glimpse_refresh_core::ObjectPanel {
            is_open: true,
            kind: Some("Pod".into()),
            name: Some("api-1".into()),
            namespace: Some("team-a".into()),
        };
        assert_eq!(
            object_panel_scope(&view),
            Some(Scope::from("team-a:pod:api-1"))
        );
    }
}
