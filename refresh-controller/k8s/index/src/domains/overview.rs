use crate::{cluster::SharedIndex, cluster_info::ClusterInfo, convert};
use anyhow::Result;
use glimpse_refresh_core::{
    payload::{ClusterOverview, NodeTotals},
    BuildOptions, BuildSnapshot, Scope,
};
use glimpse_refresh_k8s_api::{self as k8s, Api, Client, ListParams};
use std::sync::Arc;
use tokio::sync::watch;

const WARNING_LIMIT: usize = 20;

/// Watch-backed cluster overview.
pub struct OverviewBuilder {
    index: SharedIndex,
    cluster: Arc<ClusterInfo>,
    ready: watch::Receiver<bool>,
}

impl OverviewBuilder {
    pub fn new(index: SharedIndex, cluster: Arc<ClusterInfo>, ready: watch::Receiver<bool>) -> Self {
        Self {
            index,
            cluster,
            ready,
        }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for OverviewBuilder {
    async fn build(&self, _scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let payload = {
            let idx = self.index.read();
            let nodes = idx.nodes();
            ClusterOverview {
                cluster: self.cluster.meta(),
                permission_denied: false,
                nodes: NodeTotals {
                    total: nodes.len(),
                    ready: nodes.iter().filter(|n| n.ready).count(),
                },
                pods: idx.pod_totals(None),
                namespaces: idx.namespace_count(),
                recent_warnings: idx.recent_warnings(WARNING_LIMIT),
            }
        };
        Ok(serde_json::to_value(payload)?)
    }

    fn synced(&self) -> bool {
        *self.ready.borrow()
    }
}

/// List-only fallback: queries the API on every build instead of reading
/// watch caches.
pub struct OverviewListBuilder {
    client: Client,
    cluster: Arc<ClusterInfo>,
}

impl OverviewListBuilder {
    pub fn new(client: Client, cluster: Arc<ClusterInfo>) -> Self {
        Self { client, cluster }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for OverviewListBuilder {
    async fn build(&self, _scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let params = ListParams::default();
        let nodes = Api::<k8s::Node>::all(self.client.clone())
            .list(&params)
            .await?;
        let pods = Api::<k8s::Pod>::all(self.client.clone())
            .list(&params)
            .await?;
        let namespaces = Api::<k8s::Namespace>::all(self.client.clone())
            .list(&params)
            .await?;
        let events = Api::<k8s::Event>::all(self.client.clone())
            .list(&params)
            .await?;

        let node_records: Vec<_> = nodes.into_iter().map(convert::node).collect();
        let mut pod_totals = glimpse_refresh_core::payload::PodTotals::default();
        for pod in pods {
            let record = convert::pod(pod);
            pod_totals.total += 1;
            match record.phase.as_str() {
                "Running" => pod_totals.running += 1,
                "Pending" => pod_totals.pending += 1,
                "Failed" => pod_totals.failed += 1,
                "Succeeded" => pod_totals.succeeded += 1,
                _ => {}
            }
        }
        let mut warnings: Vec<_> = events
            .into_iter()
            .map(convert::event)
            .filter(|ev| ev.is_warning())
            .collect();
        warnings.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        warnings.truncate(WARNING_LIMIT);

        let payload = ClusterOverview {
            cluster: self.cluster.meta(),
            permission_denied: false,
            nodes: NodeTotals {
                total: node_records.len(),
                ready: node_records.iter().filter(|n| n.ready).count(),
            },
            pods: pod_totals,
            namespaces: namespaces.items.len(),
            recent_warnings: warnings,
        };
        Ok(serde_json::to_value(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterIndex;
    use glimpse_refresh_k8s_api::ObjectMeta;
    use kubert::index::{IndexClusterResource, IndexNamespacedResource};

    #[tokio::test]
    async fn reduces_the_index_into_totals() {
        let index = ClusterIndex::shared();
        {
            let mut idx = index.write();
            IndexClusterResource::<k8s::Node>::apply(
                &mut *idx,
                k8s::Node {
                    metadata: ObjectMeta {
                        name: Some("worker-0".into()),
                        ..Default::default()
                    },
                    status: Some(k8s::NodeStatus {
                        conditions: Some(vec![
                            k8s::api::core::v1::NodeCondition {
                                type_: "Ready".into(),
                                status: "True".into(),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
            IndexNamespacedResource::<k8s::Pod>::apply(
                &mut *idx,
                k8s::Pod {
                    metadata: ObjectMeta {
                        name: Some("api-1".into()),
                        namespace: Some("team-a".into()),
                        ..Default::default()
                    },
                    status: Some(k8s::PodStatus {
                        phase: Some("Running".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
        }

        let (_tx, ready) = watch::channel(true);
        let builder = OverviewBuilder::new(
            index,
            Arc::new(ClusterInfo {
                id: "c1".into(),
                name: "test".into(),
            }),
            ready,
        );
        let value = builder
            .build(&Scope::cluster(), BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(value["cluster"]["id"], "c1");
        assert_eq!(value["permissionDenied"], false);
        assert_eq!(value["nodes"]["total"], 1);
        assert_eq!(value["nodes"]["ready"], 1);
        assert_eq!(value["pods"]["running"], 1);
    }

    #[test]
    fn reports_initialising_until_synced() {
        let (tx, ready) = watch::channel(false);
        let builder = OverviewBuilder::new(
            ClusterIndex::shared(),
            Arc::new(ClusterInfo {
                id: "c1".into(),
                name: "test".into(),
            }),
            ready,
        );
        assert!(!builder.synced());
        tx.send(true).unwrap();
        assert!(builder.synced());
    }
}
