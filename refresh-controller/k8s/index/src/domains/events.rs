use crate::{cluster::SharedIndex, cluster_info::ClusterInfo};
use anyhow::Result;
use glimpse_refresh_core::{payload::EventsPayload, BuildOptions, BuildSnapshot, Scope};
use std::sync::Arc;
use tokio::sync::watch;

/// Initial event snapshot for the events stream and for plain fetches.
/// Live deltas flow through the index's broadcast channel instead.
pub struct EventsBuilder {
    index: SharedIndex,
    cluster: Arc<ClusterInfo>,
    ready: watch::Receiver<bool>,
}

impl EventsBuilder {
    pub fn new(index: SharedIndex, cluster: Arc<ClusterInfo>, ready: watch::Receiver<bool>) -> Self {
        Self {
            index,
            cluster,
            ready,
        }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for EventsBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let ns = scope.as_namespace();
        let payload = {
            let idx = self.index.read();
            let events = match scope.parse_object() {
                Some(object) => idx.events_for_object(&object),
                None => idx.events_in(ns),
            };
            EventsPayload {
                cluster: self.cluster.meta(),
                permission_denied: false,
                namespace: ns.map(|ns| ns.to_string()),
                events,
            }
        };
        Ok(serde_json::to_value(payload)?)
    }

    fn synced(&self) -> bool {
        *self.ready.borrow()
    }
}
