use crate::{cluster::SharedIndex, cluster_info::ClusterInfo, convert, usage::UsageHandle};
use anyhow::Result;
use glimpse_refresh_core::{
    payload::{NodeSummary, NodesPayload},
    BuildOptions, BuildSnapshot, Scope,
};
use glimpse_refresh_k8s_api::{self as k8s, Api, Client, ListParams};
use std::sync::Arc;
use tokio::sync::watch;

fn summarise(
    records: Vec<glimpse_refresh_core::records::NodeRecord>,
    usage: &UsageHandle,
    pods_on: impl Fn(&str) -> usize,
) -> Vec<NodeSummary> {
    records
        .into_iter()
        .map(|node| {
            let sample = usage.node_usage(&node.name);
            let pods = pods_on(&node.name);
            NodeSummary {
                usage: sample,
                pods,
                node,
            }
        })
        .collect()
}

/// Watch-backed node listing with usage samples.
pub struct NodesBuilder {
    index: SharedIndex,
    cluster: Arc<ClusterInfo>,
    usage: UsageHandle,
    ready: watch::Receiver<bool>,
}

impl NodesBuilder {
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
impl BuildSnapshot for NodesBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        self.usage.mark_active();
        let payload = {
            let idx = self.index.read();
            let records = match scope.parse_node() {
                Some(name) => idx.nodes().into_iter().filter(|n| n.name == name).collect(),
                None => idx.nodes(),
            };
            NodesPayload {
                cluster: self.cluster.meta(),
                permission_denied: false,
                nodes: summarise(records, &self.usage, |name| idx.pods_on_node(name)),
                usage_unavailable: self.usage.unavailable_reason(),
            }
        };
        Ok(serde_json::to_value(payload)?)
    }

    fn synced(&self) -> bool {
        *self.ready.borrow()
    }
}

/// List-only fallback used when watch permission is missing. Pod placement
/// counts are unavailable in this mode.
pub struct NodesListBuilder {
    client: Client,
    cluster: Arc<ClusterInfo>,
    usage: UsageHandle,
}

impl NodesListBuilder {
    pub fn new(client: Client, cluster: Arc<ClusterInfo>, usage: UsageHandle) -> Self {
        Self {
            client,
            cluster,
            usage,
        }
    }
}

#[async_trait::async_trait]
impl BuildSnapshot for NodesListBuilder {
    async fn build(&self, scope: &Scope, _opts: BuildOptions) -> Result<serde_json::Value> {
        self.usage.mark_active();
        let nodes = Api::<k8s::Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;
        let records: Vec<_> = nodes
            .into_iter()
            .map(convert::node)
            .filter(|n| scope.parse_node().map(|name| n.name == name).unwrap_or(true))
            .collect();
        let payload = NodesPayload {
            cluster: self.cluster.meta(),
            permission_denied: false,
            nodes: summarise(records, &self.usage, |_| 0),
            usage_unavailable: self.usage.unavailable_reason(),
        };
        Ok(serde_json::to_value(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::client::Body;
    use tower_test::mock;

    #[tokio::test]
    async fn list_fallback_produces_a_populated_snapshot() {
        let (svc, mut handle) =
            mock::pair::<http::Request<Body>, http::Response<Body>>();
        let client = kube::Client::new(svc, "default");

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("list request");
            assert_eq!(request.uri().path(), "/api/v1/nodes");
            let list = serde_json::json!({
                "apiVersion": "v1",
                "kind": "NodeList",
                "metadata": {},
                "items": [{
                    "metadata": {"name": "worker-0"},
                    "status": {
                        "conditions": [{"type": "Ready", "status": "True"}],
                        "nodeInfo": {
                            "kubeletVersion": "v1.33.1",
                            "architecture": "amd64", "bootID": "", "containerRuntimeVersion": "",
                            "kernelVersion": "", "kubeProxyVersion": "", "machineID": "",
                            "operatingSystem": "linux", "osImage": "", "systemUUID": ""
                        }
                    }
                }]
            });
            send.send_response(
                http::Response::builder()
                    .status(200)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&list).unwrap()))
                    .unwrap(),
            );
        });

        let builder = NodesListBuilder::new(
            client,
            Arc::new(ClusterInfo {
                id: "c1".into(),
                name: "test".into(),
            }),
            UsageHandle::disabled("Metrics API not found"),
        );
        let value = builder
            .build(&Scope::cluster(), BuildOptions::default())
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(value["nodes"][0]["name"], "worker-0");
        assert_eq!(value["nodes"][0]["ready"], true);
        assert_eq!(value["usageUnavailable"], "Metrics API not found");
    }
}
