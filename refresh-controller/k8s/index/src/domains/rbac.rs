use crate::{cluster_info::ClusterInfo, convert};
use anyhow::Result;
use glimpse_refresh_core::{
    payload::RbacPayload, BuildOptions, BuildSnapshot, GroupResource, Scope,
};
use glimpse_refresh_k8s_api::{self as k8s, Api, Client, ListParams};
use std::sync::Arc;

/// Role/RoleBinding listing. Always list-only: RBAC reads are on-demand and
/// rare enough that a watch cache is not worth its memory.
pub struct RbacListBuilder {
    client: Client,
    cluster: Arc<ClusterInfo>,
    listable: Vec<GroupResource>,
}

impl RbacListBuilder {
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
impl BuildSnapshot for RbacListBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        let ns = scope.as_namespace();
        let params = ListParams::default();

        let roles = if self.allows("roles") {
            let api = match ns {
                Some(ns) => Api::<k8s::Role>::namespaced(self.client.clone(), ns),
                None => Api::<k8s::Role>::all(self.client.clone()),
            };
            api.list(&params)
                .await?
                .into_iter()
                .map(convert::role)
                .collect()
        } else {
            Vec::new()
        };

        let role_bindings = if self.allows("rolebindings") {
            let api = match ns {
                Some(ns) => Api::<k8s::RoleBinding>::namespaced(self.client.clone(), ns),
                None => Api::<k8s::RoleBinding>::all(self.client.clone()),
            };
            api.list(&params)
                .await?
                .into_iter()
                .map(convert::role_binding)
                .collect()
        } else {
            Vec::new()
        };

        let payload = RbacPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            namespace: ns.map(|ns| ns.to_string()),
            roles,
            role_bindings,
        };
        Ok(serde_json::to_value(payload)?)
    }
}
