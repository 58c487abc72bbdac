use crate::{cluster::SharedIndex, cluster_info::ClusterInfo};
use anyhow::{anyhow, Result};
use glimpse_refresh_core::{
    payload::{LogsPayload, ObjectDetailsPayload},
    plugins::ObjectDetailsProvider,
    stream::LogStore,
    BuildOptions, BuildSnapshot, Scope,
};
use std::sync::Arc;
use tracing::debug;

/// Object-panel detail documents: a summary from the watch cache plus the
/// configured provider's extended detail when one is present.
pub struct ObjectDetailsBuilder {
    index: SharedIndex,
    cluster: Arc<ClusterInfo>,
    provider: Option<Arc<dyn ObjectDetailsProvider>>,
}

impl ObjectDetailsBuilder {
    pub fn new(
        index: SharedIndex,
        cluster: Arc<ClusterInfo>,
        provider: Option<Arc<dyn ObjectDetailsProvider>>,
    ) -> Self {
        Self {
            index,
            cluster,
            provider,
        }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for ObjectDetailsBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let object = scope
            .parse_object()
            .ok_or_else(|| anyhow!("object-details requires a <ns>:<kind>:<name> scope"))?;

        let (summary, events) = {
            let idx = self.index.read();
            (idx.object_summary(&object), idx.events_for_object(&object))
        };

        let details = match &self.provider {
            Some(provider) => match provider.details(&object).await {
                Ok(details) => Some(details),
                Err(error) => {
                    debug!(%error, kind = %object.kind, name = %object.name, "Detail provider failed");
                    None
                }
            },
            None => None,
        };

        let payload = ObjectDetailsPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            object: Some(object),
            summary,
            details,
            events,
        };
        Ok(serde_json::to_value(payload)?)
    }
}

/// Snapshot view over the shared log rings; the live tail is served by the
/// log stream subsystem.
pub struct ObjectLogsBuilder {
    logs: Arc<LogStore>,
    cluster: Arc<ClusterInfo>,
}

impl ObjectLogsBuilder {
    pub fn new(logs: Arc<LogStore>, cluster: Arc<ClusterInfo>) -> Self {
        Self { logs, cluster }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for ObjectLogsBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let (lines, fallback_active) = self.logs.snapshot(scope);
        let payload = LogsPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            scope: scope.to_string(),
            lines,
            fallback_active,
        };
        Ok(serde_json::to_value(payload)?)
    }
}
