//! Typed domain payloads.
//!
//! Every payload embeds the cluster identity and a `permissionDenied` flag
//! so denied-stub registrations stay schema-compatible with their real
//! counterparts.

use crate::records::{
    ConfigRecord, EventRecord, NodeRecord, PodRecord, RoleBindingRecord, RoleRecord, UsageSample,
    WorkloadRecord,
};
use crate::ObjectRef;
use serde::Serialize;

/// Stable id and display name stamped into every snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMeta {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTotals {
    pub total: usize,
    pub ready: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTotals {
    pub total: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub succeeded: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOverview {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    pub nodes: NodeTotals,
    pub pods: PodTotals,
    pub namespaces: usize,
    pub recent_warnings: Vec<EventRecord>,
}

impl ClusterOverview {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    #[serde(flatten)]
    pub node: NodeRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSample>,
    pub pods: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodesPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    pub nodes: Vec<NodeSummary>,
    /// Set when the metrics poller is disabled; explains the missing usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_unavailable: Option<String>,
}

impl NodesPayload {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadsPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub deployments: Vec<WorkloadRecord>,
    pub stateful_sets: Vec<WorkloadRecord>,
    pub daemon_sets: Vec<WorkloadRecord>,
    pub pods: PodTotals,
}

impl WorkloadsPayload {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    #[serde(flatten)]
    pub pod: PodRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSample>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodsPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    pub pods: Vec<PodSummary>,
}

impl PodsPayload {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub roles: Vec<RoleRecord>,
    pub role_bindings: Vec<RoleBindingRecord>,
}

impl RbacPayload {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub entries: Vec<ConfigRecord>,
    /// Resource kinds the principal may not list; rendered but empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub omitted: Vec<String>,
}

impl ConfigPayload {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub events: Vec<EventRecord>,
}

impl EventsPayload {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetailsPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectRef>,
    /// Summary assembled from the watch cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
    /// Extended detail from the configured provider, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub events: Vec<EventRecord>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    pub scope: String,
    pub lines: Vec<crate::stream::LogLine>,
    pub fallback_active: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub releases: Vec<crate::plugins::HelmRelease>,
}

impl HelmPayload {
    pub fn denied(cluster: ClusterMeta) -> Self {
        Self {
            cluster,
            permission_denied: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    pub entries: Vec<crate::plugins::CatalogEntry>,
}

/// A kind the resource stream can serve, with its observed capabilities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesPayload {
    pub cluster: ClusterMeta,
    pub permission_denied: bool,
    pub kinds: Vec<DiscoveredKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_stub_is_schema_compatible() {
        let real = serde_json::to_value(RbacPayload {
            cluster: ClusterMeta {
                id: "c1".into(),
                name: "prod".into(),
            },
            permission_denied: false,
            namespace: None,
            roles: vec![RoleRecord::default()],
            role_bindings: Vec::new(),
        })
        .unwrap();
        let denied = serde_json::to_value(RbacPayload::denied(ClusterMeta::default())).unwrap();

        assert_eq!(denied.get("permissionDenied"), Some(&serde_json::json!(true)));
        // Denied payloads carry the same top-level fields as the real shape.
        for key in ["cluster", "permissionDenied", "roles", "roleBindings"] {
            assert!(real.get(key).is_some(), "real payload missing {key}");
            assert!(denied.get(key).is_some(), "denied payload missing {key}");
        }
    }
}
