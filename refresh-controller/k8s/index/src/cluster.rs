//! The shared watch cache.
//!
//! A single `ClusterIndex` holds slim records for every kind the watch-backed
//! domains read. Watch dispatch tasks own all mutation; builders take the
//! read lock, copy the subset they need, and release it before reducing.

use crate::convert;
use ahash::AHashMap as HashMap;
use glimpse_refresh_core::{
    payload::PodTotals,
    records::{EventRecord, NamespaceRecord, NodeRecord, PodRecord, WorkloadRecord},
    ObjectRef, WorkloadRef,
};
use glimpse_refresh_k8s_api as k8s;
use kubert::index::{ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

pub type SharedIndex = Arc<RwLock<ClusterIndex>>;

/// Events kept per namespace; older entries are evicted by last-seen time.
const EVENTS_PER_NAMESPACE: usize = 500;

const EVENT_FANOUT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct NamespacedMap<R> {
    by_ns: HashMap<String, HashMap<String, R>>,
}

impl<R: Clone> NamespacedMap<R> {
    fn insert(&mut self, ns: String, name: String, record: R) {
        self.by_ns.entry(ns).or_default().insert(name, record);
    }

    fn remove(&mut self, ns: &str, name: &str) {
        if let Some(names) = self.by_ns.get_mut(ns) {
            names.remove(name);
            if names.is_empty() {
                self.by_ns.remove(ns);
            }
        }
    }

    fn replace(&mut self, records: impl IntoIterator<Item = (String, String, R)>) {
        self.by_ns.clear();
        for (ns, name, record) in records {
            self.insert(ns, name, record);
        }
    }

    fn get(&self, ns: &str, name: &str) -> Option<&R> {
        self.by_ns.get(ns)?.get(name)
    }

    fn values_in(&self, ns: &str) -> Vec<R> {
        self.by_ns
            .get(ns)
            .map(|names| names.values().cloned().collect())
            .unwrap_or_default()
    }

    fn all(&self) -> impl Iterator<Item = &R> {
        self.by_ns.values().flat_map(|names| names.values())
    }
}

/// All indexing state for one cluster.
#[derive(Debug)]
pub struct ClusterIndex {
    pods: NamespacedMap<PodRecord>,
    deployments: NamespacedMap<WorkloadRecord>,
    replica_sets: NamespacedMap<WorkloadRecord>,
    stateful_sets: NamespacedMap<WorkloadRecord>,
    daemon_sets: NamespacedMap<WorkloadRecord>,
    events: NamespacedMap<EventRecord>,
    nodes: HashMap<String, NodeRecord>,
    namespaces: HashMap<String, NamespaceRecord>,

    /// Bumped on every mutation; refreshers wake on change.
    revision: u64,
    revision_tx: watch::Sender<u64>,

    /// Live event fan-out for the event stream. Lossy for slow receivers by
    /// construction.
    events_tx: broadcast::Sender<EventRecord>,
}

// === impl ClusterIndex ===

impl ClusterIndex {
    pub fn shared() -> SharedIndex {
        let (revision_tx, _) = watch::channel(0);
        let (events_tx, _) = broadcast::channel(EVENT_FANOUT_CAPACITY);
        Arc::new(RwLock::new(Self {
            pods: NamespacedMap::default(),
            deployments: NamespacedMap::default(),
            replica_sets: NamespacedMap::default(),
            stateful_sets: NamespacedMap::default(),
            daemon_sets: NamespacedMap::default(),
            events: NamespacedMap::default(),
            nodes: HashMap::default(),
            namespaces: HashMap::default(),
            revision: 0,
            revision_tx,
            events_tx,
        }))
    }

    fn touch(&mut self) {
        self.revision += 1;
        let _ = self.revision_tx.send(self.revision);
    }

    pub fn revision_rx(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventRecord> {
        self.events_tx.subscribe()
    }

    // --- read accessors -----------------------------------------------------

    pub fn pods_in(&self, ns: &str) -> Vec<PodRecord> {
        self.pods.values_in(ns)
    }

    pub fn pod(&self, ns: &str, name: &str) -> Option<PodRecord> {
        self.pods.get(ns, name).cloned()
    }

    pub fn pods_for_workload(&self, workload: &WorkloadRef) -> Vec<PodRecord> {
        self.pods
            .values_in(&workload.namespace)
            .into_iter()
            .filter(|pod| pod.owned_by(&workload.kind, &workload.name))
            .collect()
    }

    pub fn pod_totals(&self, ns: Option<&str>) -> PodTotals {
        let mut totals = PodTotals::default();
        let count = |totals: &mut PodTotals, pod: &PodRecord| {
            totals.total += 1;
            match pod.phase.as_str() {
                "Running" => totals.running += 1,
                "Pending" => totals.pending += 1,
                "Failed" => totals.failed += 1,
                "Succeeded" => totals.succeeded += 1,
                _ => {}
            }
        };
        match ns {
            Some(ns) => {
                for pod in self.pods.values_in(ns) {
                    count(&mut totals, &pod);
                }
            }
            None => {
                for pod in self.pods.all() {
                    count(&mut totals, pod);
                }
            }
        }
        totals
    }

    pub fn pods_on_node(&self, node: &str) -> usize {
        self.pods
            .all()
            .filter(|pod| pod.node.as_deref() == Some(node))
            .count()
    }

    pub fn pods_on_node_records(&self, node: &str) -> Vec<PodRecord> {
        self.pods
            .all()
            .filter(|pod| pod.node.as_deref() == Some(node))
            .cloned()
            .collect()
    }

    /// Workload listings; `None` aggregates across all namespaces.
    pub fn deployments_in(&self, ns: Option<&str>) -> Vec<WorkloadRecord> {
        match ns {
            Some(ns) => self.deployments.values_in(ns),
            None => self.deployments.all().cloned().collect(),
        }
    }

    pub fn stateful_sets_in(&self, ns: Option<&str>) -> Vec<WorkloadRecord> {
        match ns {
            Some(ns) => self.stateful_sets.values_in(ns),
            None => self.stateful_sets.all().cloned().collect(),
        }
    }

    pub fn daemon_sets_in(&self, ns: Option<&str>) -> Vec<WorkloadRecord> {
        match ns {
            Some(ns) => self.daemon_sets.values_in(ns),
            None => self.daemon_sets.all().cloned().collect(),
        }
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Cluster-wide warnings, most recent first.
    pub fn recent_warnings(&self, limit: usize) -> Vec<EventRecord> {
        let mut warnings: Vec<_> = self
            .events
            .all()
            .filter(|ev| ev.is_warning())
            .cloned()
            .collect();
        warnings.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        warnings.truncate(limit);
        warnings
    }

    /// Events for one namespace (or the whole cluster), most recent first.
    pub fn events_in(&self, ns: Option<&str>) -> Vec<EventRecord> {
        let mut events: Vec<_> = match ns {
            Some(ns) => self.events.values_in(ns),
            None => self.events.all().cloned().collect(),
        };
        events.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        events
    }

    pub fn events_for_object(&self, object: &ObjectRef) -> Vec<EventRecord> {
        let mut events: Vec<_> = self
            .events
            .values_in(&object.namespace)
            .into_iter()
            .filter(|ev| ev.concerns(&object.kind, &object.name, &object.namespace))
            .collect();
        events.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        events
    }

    /// Serialises the cached record for an object-panel target, if the kind
    /// is one the index mirrors.
    pub fn object_summary(&self, object: &ObjectRef) -> Option<serde_json::Value> {
        let to_value = |v: serde_json::Result<serde_json::Value>| v.ok();
        match object.kind.as_str() {
            "pod" => self
                .pods
                .get(&object.namespace, &object.name)
                .and_then(|r| to_value(serde_json::to_value(r))),
            "deployment" => self
                .deployments
                .get(&object.namespace, &object.name)
                .and_then(|r| to_value(serde_json::to_value(r))),
            "replicaset" => self
                .replica_sets
                .get(&object.namespace, &object.name)
                .and_then(|r| to_value(serde_json::to_value(r))),
            "statefulset" => self
                .stateful_sets
                .get(&object.namespace, &object.name)
                .and_then(|r| to_value(serde_json::to_value(r))),
            "daemonset" => self
                .daemon_sets
                .get(&object.namespace, &object.name)
                .and_then(|r| to_value(serde_json::to_value(r))),
            "node" => self
                .nodes
                .get(&object.name)
                .and_then(|r| to_value(serde_json::to_value(r))),
            _ => None,
        }
    }

    // --- event bookkeeping --------------------------------------------------

    fn apply_event(&mut self, record: EventRecord) {
        let ns = record.namespace.clone();
        let _ = self.events_tx.send(record.clone());
        self.events.insert(ns.clone(), record.name.clone(), record);

        // Evict the stalest entries once the namespace exceeds its ring.
        if let Some(names) = self.events.by_ns.get_mut(&ns) {
            while names.len() > EVENTS_PER_NAMESPACE {
                let oldest = names
                    .iter()
                    .min_by(|(_, a), (_, b)| a.last_seen.cmp(&b.last_seen))
                    .map(|(name, _)| name.clone());
                match oldest {
                    Some(name) => {
                        names.remove(&name);
                    }
                    None => break,
                }
            }
        }
        self.touch();
    }
}

// === watch dispatch ===

impl IndexNamespacedResource<k8s::Pod> for ClusterIndex {
    fn apply(&mut self, pod: k8s::Pod) {
        let record = convert::pod(pod);
        self.pods
            .insert(record.namespace.clone(), record.name.clone(), record);
        self.touch();
    }

    fn delete(&mut self, ns: String, name: String) {
        self.pods.remove(&ns, &name);
        self.touch();
    }

    fn reset(&mut self, pods: Vec<k8s::Pod>, _removed: NamespacedRemoved) {
        self.pods.replace(pods.into_iter().map(|p| {
            let record = convert::pod(p);
            (record.namespace.clone(), record.name.clone(), record)
        }));
        self.touch();
    }
}

impl IndexNamespacedResource<k8s::Deployment> for ClusterIndex {
    fn apply(&mut self, deploy: k8s::Deployment) {
        let record = convert::deployment(deploy);
        self.deployments
            .insert(record.namespace.clone(), record.name.clone(), record);
        self.touch();
    }

    fn delete(&mut self, ns: String, name: String) {
        self.deployments.remove(&ns, &name);
        self.touch();
    }

    fn reset(&mut self, deploys: Vec<k8s::Deployment>, _removed: NamespacedRemoved) {
        self.deployments.replace(deploys.into_iter().map(|d| {
            let record = convert::deployment(d);
            (record.namespace.clone(), record.name.clone(), record)
        }));
        self.touch();
    }
}

impl IndexNamespacedResource<k8s::ReplicaSet> for ClusterIndex {
    fn apply(&mut self, rs: k8s::ReplicaSet) {
        let record = convert::replica_set(rs);
        self.replica_sets
            .insert(record.namespace.clone(), record.name.clone(), record);
        self.touch();
    }

    fn delete(&mut self, ns: String, name: String) {
        self.replica_sets.remove(&ns, &name);
        self.touch();
    }

    fn reset(&mut self, sets: Vec<k8s::ReplicaSet>, _removed: NamespacedRemoved) {
        self.replica_sets.replace(sets.into_iter().map(|rs| {
            let record = convert::replica_set(rs);
            (record.namespace.clone(), record.name.clone(), record)
        }));
        self.touch();
    }
}

impl IndexNamespacedResource<k8s::StatefulSet> for ClusterIndex {
    fn apply(&mut self, ss: k8s::StatefulSet) {
        let record = convert::stateful_set(ss);
        self.stateful_sets
            .insert(record.namespace.clone(), record.name.clone(), record);
        self.touch();
    }

    fn delete(&mut self, ns: String, name: String) {
        self.stateful_sets.remove(&ns, &name);
        self.touch();
    }

    fn reset(&mut self, sets: Vec<k8s::StatefulSet>, _removed: NamespacedRemoved) {
        self.stateful_sets.replace(sets.into_iter().map(|ss| {
            let record = convert::stateful_set(ss);
            (record.namespace.clone(), record.name.clone(), record)
        }));
        self.touch();
    }
}

impl IndexNamespacedResource<k8s::DaemonSet> for ClusterIndex {
    fn apply(&mut self, ds: k8s::DaemonSet) {
        let record = convert::daemon_set(ds);
        self.daemon_sets
            .insert(record.namespace.clone(), record.name.clone(), record);
        self.touch();
    }

    fn delete(&mut self, ns: String, name: String) {
        self.daemon_sets.remove(&ns, &name);
        self.touch();
    }

    fn reset(&mut self, sets: Vec<k8s::DaemonSet>, _removed: NamespacedRemoved) {
        self.daemon_sets.replace(sets.into_iter().map(|ds| {
            let record = convert::daemon_set(ds);
            (record.namespace.clone(), record.name.clone(), record)
        }));
        self.touch();
    }
}

impl IndexNamespacedResource<k8s::Event> for ClusterIndex {
    fn apply(&mut self, ev: k8s::Event) {
        self.apply_event(convert::event(ev));
    }

    fn delete(&mut self, ns: String, name: String) {
        self.events.remove(&ns, &name);
        self.touch();
    }

    fn reset(&mut self, events: Vec<k8s::Event>, _removed: NamespacedRemoved) {
        // A re-list is not a stream of fresh events; rebuild silently.
        self.events.replace(events.into_iter().map(|ev| {
            let record = convert::event(ev);
            (record.namespace.clone(), record.name.clone(), record)
        }));
        self.touch();
    }
}

impl IndexClusterResource<k8s::Node> for ClusterIndex {
    fn apply(&mut self, node: k8s::Node) {
        let record = convert::node(node);
        self.nodes.insert(record.name.clone(), record);
        self.touch();
    }

    fn delete(&mut self, name: String) {
        self.nodes.remove(&name);
        self.touch();
    }

    fn reset(&mut self, nodes: Vec<k8s::Node>, _removed: ClusterRemoved) {
        self.nodes = nodes
            .into_iter()
            .map(|n| {
                let record = convert::node(n);
                (record.name.clone(), record)
            })
            .collect();
        self.touch();
    }
}

impl IndexClusterResource<k8s::Namespace> for ClusterIndex {
    fn apply(&mut self, ns: k8s::Namespace) {
        let record = convert::namespace(ns);
        self.namespaces.insert(record.name.clone(), record);
        self.touch();
    }

    fn delete(&mut self, name: String) {
        self.namespaces.remove(&name);
        self.touch();
    }

    fn reset(&mut self, namespaces: Vec<k8s::Namespace>, _removed: ClusterRemoved) {
        self.namespaces = namespaces
            .into_iter()
            .map(|ns| {
                let record = convert::namespace(ns);
                (record.name.clone(), record)
            })
            .collect();
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_refresh_k8s_api::ObjectMeta;

    fn pod(ns: &str, name: &str, node: Option<&str>, phase: &str) -> k8s::Pod {
        k8s::Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(k8s::PodSpec {
                node_name: node.map(|n| n.to_string()),
                ..Default::default()
            }),
            status: Some(k8s::PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    fn event(ns: &str, name: &str, severity: &str, target: (&str, &str)) -> k8s::Event {
        k8s::Event {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            type_: Some(severity.to_string()),
            reason: Some("Test".to_string()),
            involved_object: k8s::api::core::v1::ObjectReference {
                kind: Some(target.0.to_string()),
                name: Some(target.1.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn pod_totals_by_phase_and_namespace() {
        let index = ClusterIndex::shared();
        {
            let mut idx = index.write();
            IndexNamespacedResource::<k8s::Pod>::apply(&mut idx, pod("team-a", "api-1", Some("worker-0"), "Running"));
            IndexNamespacedResource::<k8s::Pod>::apply(&mut idx, pod("team-a", "api-2", Some("worker-1"), "Pending"));
            IndexNamespacedResource::<k8s::Pod>::apply(&mut idx, pod("team-b", "job-1", None, "Succeeded"));
        }

        let idx = index.read();
        let all = idx.pod_totals(None);
        assert_eq!((all.total, all.running, all.pending, all.succeeded), (3, 1, 1, 1));
        let team_a = idx.pod_totals(Some("team-a"));
        assert_eq!(team_a.total, 2);
        assert_eq!(idx.pods_on_node("worker-0"), 1);
    }

    #[test]
    fn reset_replaces_the_kind_wholesale() {
        let index = ClusterIndex::shared();
        IndexNamespacedResource::<k8s::Pod>::apply(&mut *index.write(), pod("team-a", "api-1", None, "Running"));
        IndexNamespacedResource::<k8s::Pod>::reset(
            &mut *index.write(),
            vec![pod("team-b", "web-1", None, "Running")],
            NamespacedRemoved::default(),
        );

        let idx = index.read();
        assert!(idx.pod("team-a", "api-1").is_none());
        assert!(idx.pod("team-b", "web-1").is_some());
    }

    #[test]
    fn events_fan_out_and_filter_by_object() {
        let index = ClusterIndex::shared();
        let mut rx = index.read().subscribe_events();

        IndexNamespacedResource::<k8s::Event>::apply(
            &mut *index.write(),
            event("team-a", "ev-1", "Warning", ("Pod", "api-1")),
        );
        IndexNamespacedResource::<k8s::Event>::apply(
            &mut *index.write(),
            event("team-a", "ev-2", "Normal", ("Pod", "other")),
        );

        let idx = index.read();
        let object = ObjectRef {
            namespace: "team-a".into(),
            kind: "pod".into(),
            name: "api-1".into(),
        };
        assert_eq!(idx.events_for_object(&object).len(), 1);
        assert_eq!(idx.recent_warnings(10).len(), 1);
        drop(idx);

        assert_eq!(rx.try_recv().unwrap().name, "ev-1");
        assert_eq!(rx.try_recv().unwrap().name, "ev-2");
    }

    #[test]
    fn revision_bumps_on_every_mutation() {
        let index = ClusterIndex::shared();
        let rx = index.read().revision_rx();
        assert_eq!(*rx.borrow(), 0);
        IndexNamespacedResource::<k8s::Pod>::apply(&mut *index.write(), pod("team-a", "api-1", None, "Running"));
        assert_eq!(*rx.borrow(), 1);
        IndexNamespacedResource::<k8s::Pod>::delete(
            &mut *index.write(),
            "team-a".into(),
            "api-1".into(),
        );
        assert_eq!(*rx.borrow(), 2);
    }
}
