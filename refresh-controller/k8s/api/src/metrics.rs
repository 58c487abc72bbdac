//! `metrics.k8s.io/v1beta1` resource types.
//!
//! The metrics API serves aggregated usage documents rather than CRDs, so
//! there is no generated client type; `kube::Resource` is implemented by
//! hand to make the types usable with typed `Api` handles.

use k8s_openapi::apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::Time};
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeMap};

pub const METRICS_GROUP: &str = "metrics.k8s.io";
pub const METRICS_VERSION: &str = "v1beta1";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub metadata: ObjectMeta,
    pub timestamp: Option<Time>,
    pub window: Option<String>,
    /// `cpu` and `memory` usage quantities.
    pub usage: BTreeMap<String, Quantity>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetrics {
    pub metadata: ObjectMeta,
    pub timestamp: Option<Time>,
    pub window: Option<String>,
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetrics {
    pub name: String,
    pub usage: BTreeMap<String, Quantity>,
}

impl PodMetrics {
    /// Sums container usage for the named resource (`cpu` or `memory`).
    pub fn usage_total(&self, resource: &str) -> Vec<&Quantity> {
        self.containers
            .iter()
            .filter_map(|c| c.usage.get(resource))
            .collect()
    }
}

impl kube::Resource for NodeMetrics {
    type DynamicType = ();
    type Scope = k8s_openapi::ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "NodeMetrics".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        METRICS_GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        METRICS_VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "nodes".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl kube::Resource for PodMetrics {
    type DynamicType = ();
    type Scope = k8s_openapi::NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "PodMetrics".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        METRICS_GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        METRICS_VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "pods".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_metrics_deserialize() {
        let raw = serde_json::json!({
            "metadata": {"name": "worker-0"},
            "timestamp": "2024-05-01T12:00:00Z",
            "window": "20s",
            "usage": {"cpu": "231m", "memory": "4420Mi"}
        });
        let m: NodeMetrics = serde_json::from_value(raw).unwrap();
        assert_eq!(m.metadata.name.as_deref(), Some("worker-0"));
        assert_eq!(m.usage.get("cpu").unwrap().0, "231m");
    }

    #[test]
    fn pod_metrics_sum_across_containers() {
        let raw = serde_json::json!({
            "metadata": {"name": "api-1", "namespace": "team-a"},
            "containers": [
                {"name": "app", "usage": {"cpu": "100m", "memory": "64Mi"}},
                {"name": "sidecar", "usage": {"cpu": "10m", "memory": "16Mi"}}
            ]
        });
        let m: PodMetrics = serde_json::from_value(raw).unwrap();
        let total: u64 = m
            .usage_total("cpu")
            .into_iter()
            .filter_map(crate::quantity::cpu_millis)
            .sum();
        assert_eq!(total, 110);
    }
}
