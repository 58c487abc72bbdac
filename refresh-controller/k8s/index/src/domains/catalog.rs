use crate::cluster_info::ClusterInfo;
use anyhow::Result;
use glimpse_refresh_core::{
    payload::CatalogPayload, plugins::ObjectCatalogService, BuildOptions, BuildSnapshot, Scope,
};
use std::sync::Arc;

/// Catalog snapshot from the configured service; the catalog stream serves
/// live deltas.
pub struct CatalogBuilder {
    catalog: Arc<dyn ObjectCatalogService>,
    cluster: Arc<ClusterInfo>,
}

impl CatalogBuilder {
    pub fn new(catalog: Arc<dyn ObjectCatalogService>, cluster: Arc<ClusterInfo>) -> Self {
        Self { catalog, cluster }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for CatalogBuilder {
    async fn build(&self, _scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let mut entries = self.catalog.entries().await?;
        entries.sort_by(|a, b| (&a.kind, &a.name).cmp(&(&b.kind, &b.name)));
        let payload = CatalogPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            entries,
        };
        Ok(serde_json::to_value(payload)?)
    }
}
