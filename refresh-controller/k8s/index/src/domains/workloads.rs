use crate::{cluster::SharedIndex, cluster_info::ClusterInfo};
use anyhow::Result;
use glimpse_refresh_core::{payload::WorkloadsPayload, BuildOptions, BuildSnapshot, Scope};
use std::sync::Arc;
use tokio::sync::watch;

/// Namespace workload summary from the watch caches. A `__cluster__` scope
/// aggregates across all namespaces.
pub struct WorkloadsBuilder {
    index: SharedIndex,
    cluster: Arc<ClusterInfo>,
    ready: watch::Receiver<bool>,
}

impl WorkloadsBuilder {
    pub fn new(index: SharedIndex, cluster: Arc<ClusterInfo>, ready: watch::Receiver<bool>) -> Self {
        Self {
            index,
            cluster,
            ready,
        }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for WorkloadsBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let ns = scope.as_namespace();
        let payload = {
            let idx = self.index.read();
            let mut deployments = idx.deployments_in(ns);
            let mut stateful_sets = idx.stateful_sets_in(ns);
            let mut daemon_sets = idx.daemon_sets_in(ns);
            deployments.sort_by(|a, b| a.name.cmp(&b.name));
            stateful_sets.sort_by(|a, b| a.name.cmp(&b.name));
            daemon_sets.sort_by(|a, b| a.name.cmp(&b.name));
            WorkloadsPayload {
                cluster: self.cluster.meta(),
                permission_denied: false,
                namespace: ns.map(|ns| ns.to_string()),
                deployments,
                stateful_sets,
                daemon_sets,
                pods: idx.pod_totals(ns),
            }
        };
        Ok(serde_json::to_value(payload)?)
    }

    fn synced(&self) -> bool {
        *self.ready.borrow()
    }
}
