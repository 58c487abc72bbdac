//! Dynamic resource streaming.
//!
//! Each client session gets its own watcher over an arbitrary
//! group/version/kind with optional selectors. Sessions are denied up front
//! for kinds the principal cannot list and watch.

use anyhow::Result;
use futures::prelude::*;
use glimpse_refresh_core::{
    stream::{DeltaAction, ResourceFrame, StreamFrame},
    Decision, GroupResource, PermissionKey, Scope, StreamingDomain, Verb,
};
use glimpse_refresh_k8s_api::{Api, ApiResource, DynamicObject, GroupVersionKind, ResourceExt};
use glimpse_refresh_k8s_index::PermissionChecker;
use kube::runtime::watcher::{self, watcher};
use kube::Client;
use std::sync::Arc;
use tracing::warn;

/// A client's requested watch target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceQuery {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ResourceQuery {
    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

pub struct ResourceStreams {
    client: Client,
    checker: Arc<PermissionChecker>,
}

impl ResourceStreams {
    pub fn new(client: Client, checker: Arc<PermissionChecker>) -> Arc<Self> {
        Arc::new(Self { client, checker })
    }

    /// Verifies list+watch capability for the requested kind. A definitive
    /// denial of either verb denies the session.
    pub async fn authorize(&self, query: &ResourceQuery) -> Result<()> {
        let resource = GroupResource::new(
            query.group.clone(),
            // Authorisation wants the plural resource; the inferred name
            // matches how ApiResource derives it from the kind.
            ApiResource::from_gvk(&query.gvk()).plural,
        );
        for verb in [Verb::List, Verb::Watch] {
            let key = PermissionKey::new(resource.group.clone(), resource.resource.clone(), verb);
            match self.checker.can(&key).await? {
                Decision { allowed: true, .. } => {}
                Decision { reason, .. } => anyhow::bail!(
                    "{key} denied{}",
                    reason.map(|r| format!(": {r}")).unwrap_or_default()
                ),
            }
        }
        Ok(())
    }

    /// Opens the per-session watcher and returns its frame stream.
    pub fn watch(&self, query: &ResourceQuery) -> impl Stream<Item = StreamFrame> + Send + Unpin {
        let api_resource = ApiResource::from_gvk(&query.gvk());
        let api: Api<DynamicObject> = match &query.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        };

        let mut config = watcher::Config::default();
        if let Some(labels) = &query.label_selector {
            config = config.labels(labels);
        }
        if let Some(fields) = &query.field_selector {
            config = config.fields(fields);
        }

        let query = query.clone();
        let stream = watcher(api, config).filter_map(move |event| {
            let query = query.clone();
            async move {
                match event {
                    Ok(watcher::Event::Apply(object))
                    | Ok(watcher::Event::InitApply(object)) => {
                        Some(to_frame(&query, DeltaAction::Apply, object))
                    }
                    Ok(watcher::Event::Delete(object)) => {
                        Some(to_frame(&query, DeltaAction::Delete, object))
                    }
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                    Err(error) => {
                        warn!(%error, "Resource watch error");
                        None
                    }
                }
            }
        });
        Box::pin(stream)
    }
}

fn to_frame(query: &ResourceQuery, action: DeltaAction, object: DynamicObject) -> StreamFrame {
    StreamFrame::Resource(ResourceFrame {
        action,
        group: query.group.clone(),
        version: query.version.clone(),
        kind: query.kind.clone(),
        namespace: object.namespace(),
        name: object.name_any(),
        resource_version: object.resource_version(),
        object: serde_json::to_value(&object).ok(),
    })
}

/// Placeholder streaming-domain wiring: resource streams are session-driven,
/// so the orchestrator-managed task only supervises shutdown.
pub struct SessionDriven;

#[async_trait::async_trait]
impl StreamingDomain for SessionDriven {
    async fn run(&self, _scope: Scope, shutdown: drain::Watch) -> anyhow::Result<()> {
        let _ = shutdown.signaled().await;
        Ok(())
    }
}
