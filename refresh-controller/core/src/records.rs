//! Slim records the watch cache keeps per resource kind.
//!
//! The cluster index reduces full Kubernetes objects into these as events
//! arrive, so builders never touch raw API types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub name: String,
    pub image: String,
    pub ready: bool,
    /// `running`, `waiting:<reason>`, or `terminated:<reason>`.
    pub state: String,
    pub restarts: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub phase: String,
    pub ready_containers: u32,
    pub total_containers: u32,
    pub restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,
    pub containers: Vec<ContainerRecord>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PodRecord {
    /// Whether a workload scope's `(kind, name)` owns this pod, either
    /// directly or through an intermediate ReplicaSet (`<name>-<hash>`).
    pub fn owned_by(&self, kind: &str, name: &str) -> bool {
        match &self.owner {
            Some(owner) => {
                if owner.kind.eq_ignore_ascii_case(kind) && owner.name == name {
                    return true;
                }
                // Deployments own pods through ReplicaSets named
                // `<deployment>-<pod-template-hash>`.
                kind.eq_ignore_ascii_case("deployment")
                    && owner.kind == "ReplicaSet"
                    && owner
                        .name
                        .rsplit_once('-')
                        .is_some_and(|(prefix, _)| prefix == name)
            }
            None => kind.eq_ignore_ascii_case("pod") && self.name == name,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRecord {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub name: String,
    pub ready: bool,
    pub unschedulable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub kubelet_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_ip: Option<String>,
    pub allocatable_cpu_millis: u64,
    pub allocatable_memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRecord {
    pub name: String,
    pub phase: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Reference to the object an event concerns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTarget {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub namespace: String,
    pub name: String,
    /// `Normal` or `Warning`.
    pub severity: String,
    pub reason: String,
    pub message: String,
    pub target: EventTarget,
    pub count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl EventRecord {
    pub fn is_warning(&self) -> bool {
        self.severity.eq_ignore_ascii_case("warning")
    }

    pub fn concerns(&self, kind: &str, name: &str, namespace: &str) -> bool {
        self.target.kind.eq_ignore_ascii_case(kind)
            && self.target.name == name
            && self.target.namespace.as_deref().unwrap_or(&self.namespace) == namespace
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigKind {
    ConfigMap,
    Secret,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub name: String,
    pub namespace: String,
    pub kind: ConfigKind,
    /// Key count only; values never leave the cluster index.
    pub keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub name: String,
    pub namespace: String,
    pub rules: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBindingRecord {
    pub name: String,
    pub namespace: String,
    pub role_ref: String,
    pub subjects: usize,
}

/// A point-in-time usage sample for a node or pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSample {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub sampled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_ownership_traverses_replicasets() {
        let pod = PodRecord {
            name: "api-6d4b7-x2v".into(),
            namespace: "team-a".into(),
            owner: Some(OwnerRef {
                kind: "ReplicaSet".into(),
                name: "api-6d4b7".into(),
            }),
            ..Default::default()
        };
        assert!(pod.owned_by("Deployment", "api"));
        assert!(pod.owned_by("ReplicaSet", "api-6d4b7"));
        assert!(!pod.owned_by("Deployment", "web"));
        assert!(!pod.owned_by("StatefulSet", "api"));
    }

    #[test]
    fn bare_pods_match_pod_scopes_only() {
        let pod = PodRecord {
            name: "one-off".into(),
            namespace: "team-a".into(),
            ..Default::default()
        };
        assert!(pod.owned_by("Pod", "one-off"));
        assert!(!pod.owned_by("Deployment", "one-off"));
    }

    #[test]
    fn event_targets_default_to_the_event_namespace() {
        let ev = EventRecord {
            namespace: "team-a".into(),
            target: EventTarget {
                kind: "Pod".into(),
                name: "api-1".into(),
                namespace: None,
            },
            ..Default::default()
        };
        assert!(ev.concerns("pod", "api-1", "team-a"));
        assert!(!ev.concerns("pod", "api-1", "team-b"));
    }
}
