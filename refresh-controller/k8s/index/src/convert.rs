//! Reduces full Kubernetes objects into the slim records the index keeps.

use chrono::{DateTime, Utc};
use glimpse_refresh_core::records::{
    ConfigKind, ConfigRecord, ContainerRecord, EventRecord, EventTarget, NamespaceRecord,
    NodeRecord, OwnerRef, PodRecord, RoleBindingRecord, RoleRecord, WorkloadRecord,
};
use glimpse_refresh_k8s_api::{self as k8s, quantity, ResourceExt};
use std::collections::BTreeMap;

fn creation(meta: &k8s::ObjectMeta) -> Option<DateTime<Utc>> {
    meta.creation_timestamp.as_ref().map(|t| t.0)
}

fn labels(meta: &k8s::ObjectMeta) -> BTreeMap<String, String> {
    meta.labels.clone().unwrap_or_default()
}

pub(crate) fn pod(pod: k8s::Pod) -> PodRecord {
    let name = pod.name_unchecked();
    let namespace = pod.namespace().unwrap_or_default();
    let status = pod.status.as_ref();

    let phase = if pod.metadata.deletion_timestamp.is_some() {
        "Terminating".to_string()
    } else {
        status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    };

    let containers: Vec<ContainerRecord> = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| {
                    let state = cs
                        .state
                        .as_ref()
                        .map(|state| {
                            if state.running.is_some() {
                                "running".to_string()
                            } else if let Some(waiting) = &state.waiting {
                                format!(
                                    "waiting:{}",
                                    waiting.reason.as_deref().unwrap_or("unknown")
                                )
                            } else if let Some(term) = &state.terminated {
                                format!(
                                    "terminated:{}",
                                    term.reason.as_deref().unwrap_or("unknown")
                                )
                            } else {
                                "unknown".to_string()
                            }
                        })
                        .unwrap_or_else(|| "unknown".to_string());
                    ContainerRecord {
                        name: cs.name.clone(),
                        image: cs.image.clone(),
                        ready: cs.ready,
                        state,
                        restarts: cs.restart_count.max(0) as u32,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let owner = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| {
            refs.iter()
                .find(|r| r.controller == Some(true))
                .or_else(|| refs.first())
        })
        .map(|r| OwnerRef {
            kind: r.kind.clone(),
            name: r.name.clone(),
        });

    PodRecord {
        ready_containers: containers.iter().filter(|c| c.ready).count() as u32,
        total_containers: pod
            .spec
            .as_ref()
            .map(|s| s.containers.len() as u32)
            .unwrap_or_default(),
        restarts: containers.iter().map(|c| c.restarts).sum(),
        node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        pod_ip: status.and_then(|s| s.pod_ip.clone()),
        labels: labels(&pod.metadata),
        created_at: creation(&pod.metadata),
        containers,
        owner,
        phase,
        name,
        namespace,
    }
}

fn template_images(template: Option<&k8s::api::core::v1::PodTemplateSpec>) -> Vec<String> {
    template
        .and_then(|t| t.spec.as_ref())
        .map(|spec| spec.containers.iter().filter_map(|c| c.image.clone()).collect())
        .unwrap_or_default()
}

pub(crate) fn deployment(d: k8s::Deployment) -> WorkloadRecord {
    WorkloadRecord {
        name: d.name_unchecked(),
        namespace: d.namespace().unwrap_or_default(),
        kind: "Deployment".to_string(),
        desired_replicas: d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        ready_replicas: d
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or_default(),
        updated_replicas: d
            .status
            .as_ref()
            .and_then(|s| s.updated_replicas)
            .unwrap_or_default(),
        images: template_images(d.spec.as_ref().map(|s| &s.template)),
        labels: labels(&d.metadata),
        created_at: creation(&d.metadata),
    }
}

pub(crate) fn replica_set(rs: k8s::ReplicaSet) -> WorkloadRecord {
    WorkloadRecord {
        name: rs.name_unchecked(),
        namespace: rs.namespace().unwrap_or_default(),
        kind: "ReplicaSet".to_string(),
        desired_replicas: rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        ready_replicas: rs
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or_default(),
        updated_replicas: 0,
        images: template_images(rs.spec.as_ref().and_then(|s| s.template.as_ref())),
        labels: labels(&rs.metadata),
        created_at: creation(&rs.metadata),
    }
}

pub(crate) fn stateful_set(ss: k8s::StatefulSet) -> WorkloadRecord {
    WorkloadRecord {
        name: ss.name_unchecked(),
        namespace: ss.namespace().unwrap_or_default(),
        kind: "StatefulSet".to_string(),
        desired_replicas: ss.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        ready_replicas: ss
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or_default(),
        updated_replicas: ss
            .status
            .as_ref()
            .and_then(|s| s.updated_replicas)
            .unwrap_or_default(),
        images: template_images(ss.spec.as_ref().map(|s| &s.template)),
        labels: labels(&ss.metadata),
        created_at: creation(&ss.metadata),
    }
}

pub(crate) fn daemon_set(ds: k8s::DaemonSet) -> WorkloadRecord {
    let status = ds.status.as_ref();
    WorkloadRecord {
        name: ds.name_unchecked(),
        namespace: ds.namespace().unwrap_or_default(),
        kind: "DaemonSet".to_string(),
        desired_replicas: status
            .map(|s| s.desired_number_scheduled)
            .unwrap_or_default(),
        ready_replicas: status.map(|s| s.number_ready).unwrap_or_default(),
        updated_replicas: status
            .and_then(|s| s.updated_number_scheduled)
            .unwrap_or_default(),
        images: template_images(ds.spec.as_ref().map(|s| &s.template)),
        labels: labels(&ds.metadata),
        created_at: creation(&ds.metadata),
    }
}

pub(crate) fn node(node: k8s::Node) -> NodeRecord {
    let status = node.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    let roles = node
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
                .filter(|role| !role.is_empty())
                .map(|role| role.to_string())
                .collect()
        })
        .unwrap_or_default();

    let allocatable = status.and_then(|s| s.allocatable.as_ref());
    NodeRecord {
        name: node.name_unchecked(),
        ready,
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
        roles,
        kubelet_version: status
            .and_then(|s| s.node_info.as_ref())
            .map(|info| info.kubelet_version.clone())
            .unwrap_or_default(),
        internal_ip: status
            .and_then(|s| s.addresses.as_ref())
            .and_then(|addrs| {
                addrs
                    .iter()
                    .find(|a| a.type_ == "InternalIP")
                    .map(|a| a.address.clone())
            }),
        allocatable_cpu_millis: allocatable
            .and_then(|a| a.get("cpu"))
            .and_then(quantity::cpu_millis)
            .unwrap_or_default(),
        allocatable_memory_bytes: allocatable
            .and_then(|a| a.get("memory"))
            .and_then(quantity::memory_bytes)
            .unwrap_or_default(),
        created_at: creation(&node.metadata),
    }
}

pub(crate) fn namespace(ns: k8s::Namespace) -> NamespaceRecord {
    NamespaceRecord {
        name: ns.name_unchecked(),
        phase: ns
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Active".to_string()),
        labels: labels(&ns.metadata),
        created_at: creation(&ns.metadata),
    }
}

pub(crate) fn event(ev: k8s::Event) -> EventRecord {
    let target = EventTarget {
        kind: ev.involved_object.kind.clone().unwrap_or_default(),
        name: ev.involved_object.name.clone().unwrap_or_default(),
        namespace: ev.involved_object.namespace.clone(),
    };
    let namespace = ev
        .metadata
        .namespace
        .clone()
        .or_else(|| target.namespace.clone())
        .unwrap_or_default();

    EventRecord {
        name: ev.name_unchecked(),
        severity: ev.type_.unwrap_or_else(|| "Normal".to_string()),
        reason: ev.reason.unwrap_or_default(),
        message: ev.message.unwrap_or_default(),
        count: ev.count.unwrap_or(1),
        first_seen: ev.first_timestamp.map(|t| t.0),
        last_seen: ev
            .last_timestamp
            .map(|t| t.0)
            .or_else(|| ev.event_time.map(|t| t.0)),
        target,
        namespace,
    }
}

pub(crate) fn config_map(cm: k8s::ConfigMap) -> ConfigRecord {
    ConfigRecord {
        name: cm.name_unchecked(),
        namespace: cm.namespace().unwrap_or_default(),
        kind: ConfigKind::ConfigMap,
        keys: cm.data.as_ref().map(|d| d.len()).unwrap_or_default()
            + cm.binary_data.as_ref().map(|d| d.len()).unwrap_or_default(),
        created_at: creation(&cm.metadata),
    }
}

pub(crate) fn secret(secret: k8s::Secret) -> ConfigRecord {
    ConfigRecord {
        name: secret.name_unchecked(),
        namespace: secret.namespace().unwrap_or_default(),
        kind: ConfigKind::Secret,
        keys: secret.data.as_ref().map(|d| d.len()).unwrap_or_default(),
        created_at: creation(&secret.metadata),
    }
}

pub(crate) fn role(role: k8s::Role) -> RoleRecord {
    RoleRecord {
        name: role.name_unchecked(),
        namespace: role.namespace().unwrap_or_default(),
        rules: role.rules.as_ref().map(|r| r.len()).unwrap_or_default(),
    }
}

pub(crate) fn role_binding(rb: k8s::RoleBinding) -> RoleBindingRecord {
    RoleBindingRecord {
        name: rb.name_unchecked(),
        namespace: rb.namespace().unwrap_or_default(),
        role_ref: rb.role_ref.name.clone(),
        subjects: rb.subjects.as_ref().map(|s| s.len()).unwrap_or_default(),
    }
}
