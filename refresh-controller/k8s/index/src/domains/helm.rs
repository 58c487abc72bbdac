use crate::cluster_info::ClusterInfo;
use anyhow::Result;
use glimpse_refresh_core::{
    payload::HelmPayload, plugins::HelmFactory, BuildOptions, BuildSnapshot, Scope,
};
use std::sync::Arc;

/// Helm release listing via the configured factory. Skipped at registration
/// when no factory is supplied.
pub struct HelmBuilder {
    helm: Arc<dyn HelmFactory>,
    cluster: Arc<ClusterInfo>,
}

impl HelmBuilder {
    pub fn new(helm: Arc<dyn HelmFactory>, cluster: Arc<ClusterInfo>) -> Self {
        Self { helm, cluster }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for HelmBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let ns = scope.as_namespace();
        let mut releases = self.helm.list_releases(ns).await?;
        releases.sort_by(|a, b| a.name.cmp(&b.name));
        let payload = HelmPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            namespace: ns.map(|ns| ns.to_string()),
            releases,
        };
        Ok(serde_json::to_value(payload)?)
    }
}
