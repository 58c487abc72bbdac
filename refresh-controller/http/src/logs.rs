//! Pod log streaming.
//!
//! One pump task per scope opens follow-mode log streams for the scope's
//! pods and containers, merges lines into the shared bounded ring, and fans
//! appends out to sessions. When a stream cannot open (a pod still
//! initialising, say) the pump degrades to polled list-logs and keeps
//! retrying the stream, returning to live tailing on success.

use chrono::{DateTime, Utc};
use futures::{prelude::*, stream, stream::SelectAll, AsyncBufReadExt};
use glimpse_refresh_core::{
    stream::{LogFrame, LogLine, LogStore},
    Scope, StreamingDomain, WorkloadRef,
};
use glimpse_refresh_k8s_api::{Api, Client, LogParams, Pod};
use glimpse_refresh_k8s_index::SharedIndex;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Duration;
use tracing::{debug, trace};

/// First stream retry after degrading to list-logs.
const RETRY_INITIAL: Duration = Duration::from_secs(3);
/// Stream retry and list-logs poll period while degraded.
const RETRY_PERIOD: Duration = Duration::from_secs(10);
/// Lines requested when a stream or poll opens.
const TAIL_LINES: i64 = 200;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LogTarget {
    namespace: String,
    pod: String,
    container: Option<String>,
}

impl LogTarget {
    fn key(&self) -> (String, String) {
        (
            self.pod.clone(),
            self.container.clone().unwrap_or_default(),
        )
    }
}

enum PumpEnd {
    Shutdown,
    Refresh(oneshot::Sender<()>),
    Failed,
}

type MergedLines = SelectAll<stream::BoxStream<'static, (LogTarget, std::io::Result<String>)>>;

pub struct LogStreams {
    client: Client,
    index: SharedIndex,
    store: Arc<LogStore>,
    refresh: Mutex<HashMap<Scope, mpsc::Sender<oneshot::Sender<()>>>>,
}

impl LogStreams {
    pub fn new(client: Client, index: SharedIndex, store: Arc<LogStore>) -> Arc<Self> {
        Arc::new(Self {
            client,
            index,
            store,
            refresh: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Ring replay plus live tail subscription for a session.
    pub fn attach(&self, scope: &Scope) -> (Vec<LogLine>, bool, broadcast::Receiver<LogFrame>) {
        let rx = self.store.subscribe(scope);
        let (lines, fallback) = self.store.snapshot(scope);
        (lines, fallback, rx)
    }

    /// One-shot fetch of a crashed container's previous logs.
    pub async fn fetch_previous(&self, scope: &Scope) -> anyhow::Result<Vec<LogLine>> {
        let mut lines = Vec::new();
        for target in self.resolve_targets(scope) {
            let api = Api::<Pod>::namespaced(self.client.clone(), &target.namespace);
            let params = LogParams {
                container: target.container.clone(),
                previous: true,
                timestamps: true,
                tail_lines: Some(TAIL_LINES),
                ..Default::default()
            };
            match api.logs(&target.pod, &params).await {
                Ok(raw) => {
                    for line in raw.lines() {
                        lines.push(parse_line(&target, line));
                    }
                }
                Err(error) => {
                    debug!(%error, pod = %target.pod, "No previous logs");
                }
            }
        }
        Ok(lines)
    }

    fn resolve_targets(&self, scope: &Scope) -> Vec<LogTarget> {
        let idx = self.index.read();
        let pods = if let Some(workload) = scope.parse_workload() {
            idx.pods_for_workload(&workload)
        } else if let Some(object) = scope.parse_object() {
            if object.kind == "pod" {
                idx.pod(&object.namespace, &object.name)
                    .into_iter()
                    .collect()
            } else {
                idx.pods_for_workload(&WorkloadRef {
                    namespace: object.namespace,
                    kind: object.kind,
                    name: object.name,
                })
            }
        } else {
            Vec::new()
        };

        pods.into_iter()
            .flat_map(|pod| {
                if pod.containers.is_empty() {
                    vec![LogTarget {
                        namespace: pod.namespace.clone(),
                        pod: pod.name.clone(),
                        container: None,
                    }]
                } else {
                    pod.containers
                        .iter()
                        .map(|c| LogTarget {
                            namespace: pod.namespace.clone(),
                            pod: pod.name.clone(),
                            container: Some(c.name.clone()),
                        })
                        .collect()
                }
            })
            .collect()
    }

    async fn open_streams(&self, targets: &[LogTarget]) -> anyhow::Result<MergedLines> {
        let mut merged = SelectAll::new();
        for target in targets {
            let api = Api::<Pod>::namespaced(self.client.clone(), &target.namespace);
            let params = LogParams {
                container: target.container.clone(),
                follow: true,
                timestamps: true,
                tail_lines: Some(TAIL_LINES),
                ..Default::default()
            };
            let reader = api.log_stream(&target.pod, &params).await?;
            let target = target.clone();
            merged.push(Box::pin(
                reader.lines().map(move |line| (target.clone(), line)),
            ) as stream::BoxStream<'static, _>);
        }
        Ok(merged)
    }

    /// Tails open streams until shutdown, a refresh request, or a stream
    /// failure.
    async fn tail(
        &self,
        scope: &Scope,
        mut merged: MergedLines,
        last_seen: &mut HashMap<(String, String), DateTime<Utc>>,
        release: &mut (impl Future<Output = drain::ReleaseShutdown> + Unpin),
        refresh: &mut mpsc::Receiver<oneshot::Sender<()>>,
    ) -> PumpEnd {
        loop {
            tokio::select! {
                _ = &mut *release => return PumpEnd::Shutdown,
                ack = refresh.recv() => match ack {
                    Some(ack) => return PumpEnd::Refresh(ack),
                    None => return PumpEnd::Shutdown,
                },
                line = merged.next() => match line {
                    Some((target, Ok(raw))) => {
                        self.append(scope, &target, &raw, last_seen);
                    }
                    Some((target, Err(error))) => {
                        debug!(%error, pod = %target.pod, "Log stream broke");
                        return PumpEnd::Failed;
                    }
                    None => {
                        trace!(%scope, "All log streams ended");
                        return PumpEnd::Failed;
                    }
                },
            }
        }
    }

    /// One polled list-logs round while degraded.
    async fn poll_once(
        &self,
        scope: &Scope,
        targets: &[LogTarget],
        last_seen: &mut HashMap<(String, String), DateTime<Utc>>,
    ) {
        for target in targets {
            let api = Api::<Pod>::namespaced(self.client.clone(), &target.namespace);
            let params = LogParams {
                container: target.container.clone(),
                timestamps: true,
                tail_lines: Some(TAIL_LINES),
                ..Default::default()
            };
            match api.logs(&target.pod, &params).await {
                Ok(raw) => {
                    for line in raw.lines() {
                        self.append(scope, target, line, last_seen);
                    }
                }
                Err(error) => {
                    trace!(%error, pod = %target.pod, "List-logs poll failed");
                }
            }
        }
    }

    /// Appends a line unless it was already seen for this pod/container.
    fn append(
        &self,
        scope: &Scope,
        target: &LogTarget,
        raw: &str,
        last_seen: &mut HashMap<(String, String), DateTime<Utc>>,
    ) {
        let line = parse_line(target, raw);
        if let Some(ts) = line.timestamp {
            let key = target.key();
            if last_seen.get(&key).is_some_and(|seen| *seen >= ts) {
                return;
            }
            last_seen.insert(key, ts);
        }
        self.store.append(scope, line);
    }
}

fn parse_line(target: &LogTarget, raw: &str) -> LogLine {
    let (timestamp, text) = match raw.split_once(' ') {
        Some((ts, rest)) => match DateTime::parse_from_rfc3339(ts) {
            Ok(parsed) => (Some(parsed.with_timezone(&Utc)), rest.to_string()),
            Err(_) => (None, raw.to_string()),
        },
        None => (None, raw.to_string()),
    };
    LogLine {
        pod: target.pod.clone(),
        container: target.container.clone().unwrap_or_default(),
        text,
        timestamp,
    }
}

#[async_trait::async_trait]
impl StreamingDomain for LogStreams {
    async fn run(&self, scope: Scope, shutdown: drain::Watch) -> anyhow::Result<()> {
        let (refresh_tx, mut refresh_rx) = mpsc::channel(4);
        self.refresh.lock().insert(scope.clone(), refresh_tx);

        let mut release = Box::pin(shutdown.signaled());
        let mut last_seen: HashMap<(String, String), DateTime<Utc>> = HashMap::new();
        let mut retry_delay = RETRY_INITIAL;

        loop {
            let targets = self.resolve_targets(&scope);
            if targets.is_empty() {
                trace!(%scope, "No log targets yet");
                tokio::select! {
                    _ = &mut release => break,
                    ack = refresh_rx.recv() => {
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        continue;
                    }
                    _ = tokio::time::sleep(RETRY_PERIOD) => continue,
                }
            }

            match self.open_streams(&targets).await {
                Ok(merged) => {
                    self.store.set_fallback(&scope, false);
                    retry_delay = RETRY_INITIAL;
                    match self
                        .tail(&scope, merged, &mut last_seen, &mut release, &mut refresh_rx)
                        .await
                    {
                        PumpEnd::Shutdown => break,
                        PumpEnd::Refresh(ack) => {
                            let _ = ack.send(());
                            continue;
                        }
                        PumpEnd::Failed => continue,
                    }
                }
                Err(error) => {
                    debug!(%error, %scope, "Log stream unavailable; serving polled logs");
                    self.store.set_fallback(&scope, true);
                    self.poll_once(&scope, &targets, &mut last_seen).await;
                    tokio::select! {
                        _ = &mut release => break,
                        ack = refresh_rx.recv() => {
                            if let Some(ack) = ack {
                                let _ = ack.send(());
                            }
                        }
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                    retry_delay = RETRY_PERIOD;
                }
            }
        }

        self.refresh.lock().remove(&scope);
        Ok(())
    }

    fn reset(&self, scope: &Scope) {
        self.store.reset(scope);
    }

    fn refresh_once(&self, scope: &Scope) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let sender = self.refresh.lock().get(scope).cloned();
        match sender {
            Some(sender) => match sender.try_send(tx) {
                Ok(()) => rx,
                Err(mpsc::error::TrySendError::Full(tx))
                | Err(mpsc::error::TrySendError::Closed(tx)) => {
                    let _ = tx.send(());
                    rx
                }
            },
            None => {
                // No pump running for the scope; nothing to refresh.
                let _ = tx.send(());
                rx
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(pod: &str, container: Option<&str>) -> LogTarget {
        LogTarget {
            namespace: "team-a".into(),
            pod: pod.into(),
            container: container.map(|c| c.to_string()),
        }
    }

    #[test]
    fn lines_parse_their_leading_timestamp() {
        let line = parse_line(
            &target("api-1", Some("app")),
            "2024-05-01T12:00:00.123456789Z listening on :8080",
        );
        assert_eq!(line.text, "listening on :8080");
        assert!(line.timestamp.is_some());
        assert_eq!(line.pod, "api-1");
        assert_eq!(line.container, "app");

        let bare = parse_line(&target("api-1", None), "no timestamp here");
        assert!(bare.timestamp.is_none());
        assert_eq!(bare.text, "no timestamp here");
    }

    #[test]
    fn duplicate_lines_are_dropped_by_timestamp() {
        let store = Arc::new(LogStore::default());
        let streams = LogStreams {
            client: crate::mux::tests::mock_client(),
            index: glimpse_refresh_k8s_index::cluster::ClusterIndex::shared(),
            store: store.clone(),
            refresh: Mutex::new(HashMap::new()),
        };
        let scope = Scope::workload("team-a", "Deployment", "api");
        let mut last_seen = HashMap::new();
        let t = target("api-1", Some("app"));

        streams.append(&scope, &t, "2024-05-01T12:00:00Z a", &mut last_seen);
        streams.append(&scope, &t, "2024-05-01T12:00:00Z a", &mut last_seen);
        streams.append(&scope, &t, "2024-05-01T12:00:01Z b", &mut last_seen);

        let (lines, _) = store.snapshot(&scope);
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
