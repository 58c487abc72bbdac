use crate::{cluster::SharedIndex, cluster_info::ClusterInfo, usage::UsageHandle};
use anyhow::{bail, Result};
use glimpse_refresh_core::{
    payload::{PodSummary, PodsPayload},
    BuildOptions, BuildSnapshot, Scope,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Pod listings keyed by workload, node, or namespace scope.
pub struct PodsBuilder {
    index: SharedIndex,
    cluster: Arc<ClusterInfo>,
    usage: UsageHandle,
    ready: watch::Receiver<bool>,
}

impl PodsBuilder {
    pub fn new(
        index: SharedIndex,
        cluster: Arc<ClusterInfo>,
        usage: UsageHandle,
        ready: watch::Receiver<bool>,
    ) -> Self {
        Self {
            index,
            cluster,
            usage,
            ready,
        }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for PodsBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        self.usage.mark_active();
        let payload = {
            let idx = self.index.read();
            let (records, workload) = if let Some(workload) = scope.parse_workload() {
                let pods = idx.pods_for_workload(&workload);
                let descriptor = format!(
                    "{}:{}:{}",
                    workload.namespace, workload.kind, workload.name
                );
                (pods, Some(descriptor))
            } else if let Some(node) = scope.parse_node() {
                (idx.pods_on_node_records(node), None)
            } else if let Some(ns) = scope.as_namespace() {
                (idx.pods_in(ns), None)
            } else {
                bail!("pods domain requires a workload, node, or namespace scope");
            };

            let mut pods: Vec<PodSummary> = records
                .into_iter()
                .map(|pod| {
                    let usage = self.usage.pod_usage(&pod.namespace, &pod.name);
                    PodSummary { usage, pod }
                })
                .collect();
            pods.sort_by(|a, b| a.pod.name.cmp(&b.pod.name));

            PodsPayload {
                cluster: self.cluster.meta(),
                permission_denied: false,
                workload,
                pods,
            }
        };
        Ok(serde_json::to_value(payload)?)
    }

    fn synced(&self) -> bool {
        *self.ready.borrow()
    }
}
