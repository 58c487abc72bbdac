use crate::{cluster_info::ClusterInfo, convert};
use anyhow::Result;
use glimpse_refresh_core::{
    payload::ConfigPayload, BuildOptions, BuildSnapshot, GroupResource, Scope,
};
use glimpse_refresh_k8s_api::{self as k8s, Api, Client, ListParams};
use std::sync::Arc;

/// ConfigMap/Secret key counts. Registered `allow_any`: with partial
/// permission the invisible kind is reported in `omitted` so the UI can say
/// why half the view is empty.
pub struct ConfigListBuilder {
    client: Client,
    cluster: Arc<ClusterInfo>,
    listable: Vec<GroupResource>,
}

impl ConfigListBuilder {
    pub fn new(client: Client, cluster: Arc<ClusterInfo>, listable: Vec<GroupResource>) -> Self {
        Self {
            client,
            cluster,
            listable,
        }
    }

    fn allows(&self, resource: &str) -> bool {
        self.listable.iter().any(|r| r.resource == resource)
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for ConfigListBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let ns = scope.as_namespace();
        let params = ListParams::default();
        let mut entries = Vec::new();
        let mut omitted = Vec::new();

        if self.allows("configmaps") {
            let api = match ns {
                Some(ns) => Api::<k8s::ConfigMap>::namespaced(self.client.clone(), ns),
                None => Api::<k8s::ConfigMap>::all(self.client.clone()),
            };
            entries.extend(api.list(&params).await?.into_iter().map(convert::config_map));
        } else {
            omitted.push("configmaps".to_string());
        }

        if self.allows("secrets") {
            let api = match ns {
                Some(ns) => Api::<k8s::Secret>::namespaced(self.client.clone(), ns),
                None => Api::<k8s::Secret>::all(self.client.clone()),
            };
            entries.extend(api.list(&params).await?.into_iter().map(convert::secret));
        } else {
            omitted.push("secrets".to_string());
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let payload = ConfigPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            namespace: ns.map(|ns| ns.to_string()),
            entries,
            omitted,
        };
        Ok(serde_json::to_value(payload)?)
    }
}
