//! Owns the shared watch caches.
//!
//! Watches start lazily the first time a registration asks for a kind and
//! run until subsystem shutdown. Each dispatch task consumes one watcher
//! stream, feeds the cluster index, and tracks readiness: a kind is ready
//! once its initial list completed, and degrades while the watcher re-lists.

use crate::{
    cluster::{ClusterIndex, SharedIndex},
    permissions::PermissionChecker,
};
use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use futures::prelude::*;
use glimpse_refresh_core::{Decision, GroupResource, PermissionKey, Verb};
use glimpse_refresh_k8s_api::{self as k8s, Api, Client, ResourceExt};
use kube::runtime::watcher::{self, watcher};
use kubert::index::{IndexClusterResource, IndexNamespacedResource, NamespacedRemoved};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, sync::Arc};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

/// Kinds the hub knows how to mirror into the cluster index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Pods,
    Deployments,
    ReplicaSets,
    StatefulSets,
    DaemonSets,
    Events,
    Nodes,
    Namespaces,
}

impl WatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchKind::Pods => "pods",
            WatchKind::Deployments => "deployments",
            WatchKind::ReplicaSets => "replicasets",
            WatchKind::StatefulSets => "statefulsets",
            WatchKind::DaemonSets => "daemonsets",
            WatchKind::Events => "events",
            WatchKind::Nodes => "nodes",
            WatchKind::Namespaces => "namespaces",
        }
    }
}

/// Aggregates per-kind ready flags into one readiness watch.
struct ReadyAggregate {
    flags: RwLock<Vec<(&'static str, watch::Receiver<bool>)>>,
    tx: watch::Sender<bool>,
}

impl ReadyAggregate {
    fn new() -> Arc<Self> {
        // Vacuously synced until the first watch registers.
        let (tx, _) = watch::channel(true);
        Arc::new(Self {
            flags: RwLock::new(Vec::new()),
            tx,
        })
    }

    fn register(&self, kind: &'static str, rx: watch::Receiver<bool>) {
        self.flags.write().push((kind, rx));
        self.update();
    }

    fn update(&self) {
        let synced = self.flags.read().iter().all(|(_, rx)| *rx.borrow());
        let _ = self.tx.send(synced);
    }

    fn synced(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

pub struct InformerHub {
    client: Client,
    index: SharedIndex,
    checker: Arc<PermissionChecker>,
    shutdown: drain::Watch,
    ready: Arc<ReadyAggregate>,
    started: Mutex<AHashSet<WatchKind>>,
    /// Server-side watch expiry; bounds how long a dropped delta can go
    /// unnoticed before the watcher re-establishes.
    resync: Duration,
}

// === impl InformerHub ===

impl InformerHub {
    pub fn new(
        client: Client,
        checker: Arc<PermissionChecker>,
        shutdown: drain::Watch,
        resync: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            index: ClusterIndex::shared(),
            checker,
            shutdown,
            ready: ReadyAggregate::new(),
            started: Mutex::new(AHashSet::new()),
            resync,
        })
    }

    fn watcher_config(&self) -> watcher::Config {
        watcher::Config {
            timeout: Some(self.resync.as_secs().clamp(10, 3600) as u32),
            ..Default::default()
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn index(&self) -> SharedIndex {
        self.index.clone()
    }

    pub fn checker(&self) -> Arc<PermissionChecker> {
        self.checker.clone()
    }

    /// True once every started watch has completed its initial list.
    pub fn has_synced(&self) -> bool {
        self.ready.synced()
    }

    pub fn ready_rx(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub async fn can_list_resource(&self, resource: &GroupResource) -> Result<Decision> {
        self.checker
            .can(&PermissionKey::new(
                resource.group.clone(),
                resource.resource.clone(),
                Verb::List,
            ))
            .await
    }

    pub async fn can_watch_resource(&self, resource: &GroupResource) -> Result<Decision> {
        self.checker
            .can(&PermissionKey::new(
                resource.group.clone(),
                resource.resource.clone(),
                Verb::Watch,
            ))
            .await
    }

    pub async fn prime_permissions(&self, keys: Vec<PermissionKey>, deadline: Duration) {
        self.checker.prime(keys, deadline).await
    }

    pub fn permission_allowed_snapshot(&self) -> Vec<PermissionKey> {
        self.checker.allowed_snapshot()
    }

    /// Starts the watches a registration needs. Idempotent per kind.
    pub fn start(&self, kinds: &[WatchKind]) {
        for &kind in kinds {
            if !self.started.lock().insert(kind) {
                continue;
            }
            match kind {
                WatchKind::Pods => self.spawn_namespaced::<k8s::Pod>(kind),
                WatchKind::Deployments => self.spawn_namespaced::<k8s::Deployment>(kind),
                WatchKind::ReplicaSets => self.spawn_namespaced::<k8s::ReplicaSet>(kind),
                WatchKind::StatefulSets => self.spawn_namespaced::<k8s::StatefulSet>(kind),
                WatchKind::DaemonSets => self.spawn_namespaced::<k8s::DaemonSet>(kind),
                WatchKind::Events => self.spawn_namespaced::<k8s::Event>(kind),
                WatchKind::Nodes => self.spawn_cluster::<k8s::Node>(kind),
                WatchKind::Namespaces => self.spawn_cluster::<k8s::Namespace>(kind),
            }
        }
    }

    fn spawn_namespaced<T>(&self, kind: WatchKind)
    where
        T: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
        ClusterIndex: IndexNamespacedResource<T>,
    {
        let api = Api::<T>::all(self.client.clone());
        let stream = watcher(api, self.watcher_config());
        let (ready_tx, ready_rx) = watch::channel(false);
        self.ready.register(kind.as_str(), ready_rx);
        tokio::spawn(
            dispatch_namespaced(
                self.index.clone(),
                stream,
                ready_tx,
                self.ready.clone(),
                self.shutdown.clone(),
            )
            .instrument(info_span!("watch", kind = kind.as_str())),
        );
    }

    fn spawn_cluster<T>(&self, kind: WatchKind)
    where
        T: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
        ClusterIndex: IndexClusterResource<T>,
    {
        let api = Api::<T>::all(self.client.clone());
        let stream = watcher(api, self.watcher_config());
        let (ready_tx, ready_rx) = watch::channel(false);
        self.ready.register(kind.as_str(), ready_rx);
        tokio::spawn(
            dispatch_cluster(
                self.index.clone(),
                stream,
                ready_tx,
                self.ready.clone(),
                self.shutdown.clone(),
            )
            .instrument(info_span!("watch", kind = kind.as_str())),
        );
    }
}

fn set_ready(ready_tx: &watch::Sender<bool>, aggregate: &ReadyAggregate, ready: bool) {
    if *ready_tx.borrow() != ready {
        let _ = ready_tx.send(ready);
        aggregate.update();
    }
}

async fn dispatch_namespaced<T>(
    index: SharedIndex,
    stream: impl Stream<Item = watcher::Result<watcher::Event<T>>>,
    ready_tx: watch::Sender<bool>,
    aggregate: Arc<ReadyAggregate>,
    shutdown: drain::Watch,
) where
    T: kube::Resource + Clone + Debug,
    ClusterIndex: IndexNamespacedResource<T>,
{
    tokio::pin!(stream);
    let release = shutdown.signaled();
    tokio::pin!(release);

    let mut buffer: Vec<T> = Vec::new();
    let mut known: AHashMap<String, AHashSet<String>> = AHashMap::new();

    loop {
        let event = tokio::select! {
            _ = &mut release => return,
            next = stream.next() => match next {
                None => return,
                Some(Ok(event)) => event,
                Some(Err(error)) => {
                    tracing::warn!(%error, "Watch stream error");
                    continue;
                }
            },
        };

        match event {
            watcher::Event::Init => {
                buffer.clear();
                set_ready(&ready_tx, &aggregate, false);
            }
            watcher::Event::InitApply(resource) => buffer.push(resource),
            watcher::Event::InitDone => {
                let mut next_known: AHashMap<String, AHashSet<String>> = AHashMap::new();
                for resource in &buffer {
                    next_known
                        .entry(resource.namespace().unwrap_or_default())
                        .or_default()
                        .insert(resource.name_unchecked());
                }
                let mut removed = NamespacedRemoved::default();
                for (ns, names) in &known {
                    for name in names {
                        if !next_known.get(ns).is_some_and(|set| set.contains(name)) {
                            removed.entry(ns.clone()).or_default().insert(name.clone());
                        }
                    }
                }
                known = next_known;
                IndexNamespacedResource::<T>::reset(&mut *index.write(), std::mem::take(&mut buffer), removed);
                set_ready(&ready_tx, &aggregate, true);
            }
            watcher::Event::Apply(resource) => {
                known
                    .entry(resource.namespace().unwrap_or_default())
                    .or_default()
                    .insert(resource.name_unchecked());
                IndexNamespacedResource::<T>::apply(&mut *index.write(), resource);
            }
            watcher::Event::Delete(resource) => {
                let ns = resource.namespace().unwrap_or_default();
                let name = resource.name_unchecked();
                if let Some(names) = known.get_mut(&ns) {
                    names.remove(&name);
                }
                IndexNamespacedResource::<T>::delete(&mut *index.write(), ns, name);
            }
        }
    }
}

async fn dispatch_cluster<T>(
    index: SharedIndex,
    stream: impl Stream<Item = watcher::Result<watcher::Event<T>>>,
    ready_tx: watch::Sender<bool>,
    aggregate: Arc<ReadyAggregate>,
    shutdown: drain::Watch,
) where
    T: kube::Resource + Clone + Debug,
    ClusterIndex: IndexClusterResource<T>,
{
    tokio::pin!(stream);
    let release = shutdown.signaled();
    tokio::pin!(release);

    let mut buffer: Vec<T> = Vec::new();
    let mut known: AHashSet<String> = AHashSet::new();

    loop {
        let event = tokio::select! {
            _ = &mut release => return,
            next = stream.next() => match next {
                None => return,
                Some(Ok(event)) => event,
                Some(Err(error)) => {
                    tracing::warn!(%error, "Watch stream error");
                    continue;
                }
            },
        };

        match event {
            watcher::Event::Init => {
                buffer.clear();
                set_ready(&ready_tx, &aggregate, false);
            }
            watcher::Event::InitApply(resource) => buffer.push(resource),
            watcher::Event::InitDone => {
                let next_known: AHashSet<String> =
                    buffer.iter().map(|r| r.name_unchecked()).collect();
                let removed = known
                    .iter()
                    .filter(|name| !next_known.contains(*name))
                    .cloned()
                    .collect();
                known = next_known;
                IndexClusterResource::<T>::reset(&mut *index.write(), std::mem::take(&mut buffer), removed);
                set_ready(&ready_tx, &aggregate, true);
            }
            watcher::Event::Apply(resource) => {
                known.insert(resource.name_unchecked());
                IndexClusterResource::<T>::apply(&mut *index.write(), resource);
            }
            watcher::Event::Delete(resource) => {
                let name = resource.name_unchecked();
                known.remove(&name);
                IndexClusterResource::<T>::delete(&mut *index.write(), name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ns: &str, name: &str) -> k8s::Pod {
        k8s::Pod {
            metadata: k8s::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dispatch_tracks_readiness_and_feeds_the_index() {
        let index = ClusterIndex::shared();
        let aggregate = ReadyAggregate::new();
        let (ready_tx, ready_rx) = watch::channel(false);
        aggregate.register("pods", ready_rx.clone());
        assert!(!aggregate.synced());

        let (signal, shutdown) = drain::channel();
        let events: Vec<watcher::Result<watcher::Event<k8s::Pod>>> = vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(pod("team-a", "api-1"))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Apply(pod("team-a", "api-2"))),
        ];
        let stream = futures::stream::iter(events).chain(futures::stream::pending());

        let task = tokio::spawn(dispatch_namespaced(
            index.clone(),
            stream,
            ready_tx,
            aggregate.clone(),
            shutdown,
        ));

        // Yield until the dispatcher has drained the buffered events.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert!(aggregate.synced());
        assert!(index.read().pod("team-a", "api-1").is_some());
        assert!(index.read().pod("team-a", "api-2").is_some());

        signal.drain().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn relist_drops_stale_entries() {
        let index = ClusterIndex::shared();
        let aggregate = ReadyAggregate::new();
        let (ready_tx, ready_rx) = watch::channel(false);
        aggregate.register("pods", ready_rx);

        let (signal, shutdown) = drain::channel();
        let events: Vec<watcher::Result<watcher::Event<k8s::Pod>>> = vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(pod("team-a", "api-1"))),
            Ok(watcher::Event::InitDone),
            // The watcher desynced and re-listed without api-1.
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(pod("team-a", "api-2"))),
            Ok(watcher::Event::InitDone),
        ];
        let stream = futures::stream::iter(events).chain(futures::stream::pending());

        let task = tokio::spawn(dispatch_namespaced(
            index.clone(),
            stream,
            ready_tx,
            aggregate.clone(),
            shutdown,
        ));
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert!(index.read().pod("team-a", "api-1").is_none());
        assert!(index.read().pod("team-a", "api-2").is_some());

        signal.drain().await;
        task.await.unwrap();
    }
}
