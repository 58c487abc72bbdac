//! Cluster event streaming.
//!
//! The shared events informer feeds the cluster index, which fans every
//! event out on a broadcast channel. One pump task per subscribed scope
//! filters that firehose into a per-scope channel that client sessions
//! drain. Informer disconnects are absorbed upstream: the watcher re-lists
//! and the pump simply resumes; no historical replay happens here.

use glimpse_refresh_core::{
    records::EventRecord,
    stream::{EventFrame, StreamFrame},
    Scope, StreamingDomain,
};
use glimpse_refresh_k8s_index::SharedIndex;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const SCOPE_FANOUT_CAPACITY: usize = 256;

pub struct EventStreams {
    index: SharedIndex,
    scopes: Mutex<HashMap<Scope, broadcast::Sender<StreamFrame>>>,
}

impl EventStreams {
    pub fn new(index: SharedIndex) -> Arc<Self> {
        Arc::new(Self {
            index,
            scopes: Mutex::new(HashMap::new()),
        })
    }

    fn scope_tx(&self, scope: &Scope) -> broadcast::Sender<StreamFrame> {
        self.scopes
            .lock()
            .entry(scope.clone())
            .or_insert_with(|| broadcast::channel(SCOPE_FANOUT_CAPACITY).0)
            .clone()
    }

    /// Client sessions subscribe to the per-scope fan-out.
    pub fn subscribe(&self, scope: &Scope) -> broadcast::Receiver<StreamFrame> {
        self.scope_tx(scope).subscribe()
    }

    fn matches(scope: &Scope, event: &EventRecord) -> bool {
        if scope.is_cluster() {
            return true;
        }
        if let Some(object) = scope.parse_object() {
            return event.concerns(&object.kind, &object.name, &object.namespace);
        }
        match scope.as_namespace() {
            Some(ns) => event.namespace == ns,
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl StreamingDomain for EventStreams {
    async fn run(&self, scope: Scope, shutdown: drain::Watch) -> anyhow::Result<()> {
        let tx = self.scope_tx(&scope);
        let mut rx = self.index.read().subscribe_events();
        let release = shutdown.signaled();
        tokio::pin!(release);

        loop {
            tokio::select! {
                _ = &mut release => {
                    self.scopes.lock().remove(&scope);
                    return Ok(());
                }
                event = rx.recv() => match event {
                    Ok(event) if Self::matches(&scope, &event) => {
                        let _ = tx.send(StreamFrame::Event(EventFrame { event }));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        trace!(missed, %scope, "Event fan-out lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}
