use crate::cluster_info::ClusterInfo;
use anyhow::{anyhow, Result};
use glimpse_refresh_core::{
    payload::{DiscoveredKind, ResourcesPayload},
    BuildOptions, BuildSnapshot, Scope,
};
use glimpse_refresh_k8s_api::Client;
use kube::discovery::{verbs, Discovery, Scope as ApiScope};
use std::sync::Arc;

/// Discovers the kinds the resource stream can serve. Requires the dynamic
/// client; the gate fails construction when it is absent.
pub struct ResourcesBuilder {
    client: Option<Client>,
    cluster: Arc<ClusterInfo>,
}

impl ResourcesBuilder {
    pub fn new(client: Option<Client>, cluster: Arc<ClusterInfo>) -> Self {
        Self { client, cluster }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for ResourcesBuilder {
    async fn build(&self, _scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| anyhow!("dynamic client not configured"))?;

        let discovery = Discovery::new(client).run().await?;
        let mut kinds = Vec::new();
        for group in discovery.groups() {
            for (resource, capabilities) in group.recommended_resources() {
                if !capabilities.supports_operation(verbs::LIST)
                    || !capabilities.supports_operation(verbs::WATCH)
                {
                    continue;
                }
                kinds.push(DiscoveredKind {
                    group: resource.group.clone(),
                    version: resource.version.clone(),
                    kind: resource.kind.clone(),
                    plural: resource.plural.clone(),
                    namespaced: capabilities.scope == ApiScope::Namespaced,
                });
            }
        }
        kinds.sort_by(|a, b| (&a.group, &a.kind).cmp(&(&b.group, &b.kind)));

        let payload = ResourcesPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            kinds,
        };
        Ok(serde_json::to_value(payload)?)
    }
}
