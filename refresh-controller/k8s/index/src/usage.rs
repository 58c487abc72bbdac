//! Node and pod usage sampling from the metrics API.
//!
//! One poller serves all domains through a shared, age-bounded table.
//! Demand mode decays to idle when no consumer has read metrics within
//! three intervals; a disabled poller satisfies the same interface and
//! explains itself instead of sampling.

use anyhow::Result;
use glimpse_refresh_core::records::UsageSample;
use glimpse_refresh_k8s_api::{
    metrics::{NodeMetrics, PodMetrics},
    quantity, Api, Client, ListParams, ResourceExt,
};
use ahash::AHashMap as HashMap;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info_span, Instrument};

/// Samples older than `AGE_FACTOR x interval` are dropped.
const AGE_FACTOR: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerMode {
    /// Fixed-interval sampling.
    Active,
    /// Fixed-interval sampling that pauses while no consumer is active.
    Demand,
}

#[derive(Debug, Default)]
pub struct UsageBatch {
    pub nodes: Vec<(String, UsageSample)>,
    pub pods: Vec<((String, String), UsageSample)>,
}

/// Produces one usage batch per poll. Seam for tests.
#[async_trait::async_trait]
pub trait UsageSource: Send + Sync {
    async fn sample(&self) -> Result<UsageBatch>;
}

pub struct ApiUsageSource {
    client: Client,
}

impl ApiUsageSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl UsageSource for ApiUsageSource {
    async fn sample(&self) -> Result<UsageBatch> {
        let now = Utc::now();
        let mut batch = UsageBatch::default();

        let nodes = Api::<NodeMetrics>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;
        for item in nodes {
            let sample = UsageSample {
                cpu_millis: item
                    .usage
                    .get("cpu")
                    .and_then(quantity::cpu_millis)
                    .unwrap_or_default(),
                memory_bytes: item
                    .usage
                    .get("memory")
                    .and_then(quantity::memory_bytes)
                    .unwrap_or_default(),
                sampled_at: item.timestamp.as_ref().map(|t| t.0).unwrap_or(now),
            };
            batch.nodes.push((item.name_unchecked(), sample));
        }

        let pods = Api::<PodMetrics>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;
        for item in pods {
            let cpu_millis = item
                .usage_total("cpu")
                .into_iter()
                .filter_map(quantity::cpu_millis)
                .sum();
            let memory_bytes = item
                .usage_total("memory")
                .into_iter()
                .filter_map(quantity::memory_bytes)
                .sum();
            let sample = UsageSample {
                cpu_millis,
                memory_bytes,
                sampled_at: item.timestamp.as_ref().map(|t| t.0).unwrap_or(now),
            };
            batch
                .pods
                .push(((item.namespace().unwrap_or_default(), item.name_unchecked()), sample));
        }

        Ok(batch)
    }
}

#[derive(Debug, Default)]
struct UsageTable {
    nodes: HashMap<String, (UsageSample, Instant)>,
    pods: HashMap<(String, String), (UsageSample, Instant)>,
}

#[derive(Debug)]
struct UsageInner {
    table: RwLock<UsageTable>,
    last_active: RwLock<Instant>,
    interval: Duration,
    unavailable: Option<String>,
}

/// Shared read handle to the usage table.
#[derive(Clone, Debug)]
pub struct UsageHandle(Arc<UsageInner>);

impl UsageHandle {
    fn new(interval: Duration) -> Self {
        Self(Arc::new(UsageInner {
            table: RwLock::new(UsageTable::default()),
            last_active: RwLock::new(Instant::now()),
            interval,
            unavailable: None,
        }))
    }

    /// A handle whose samples are permanently empty, carrying the reason.
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self(Arc::new(UsageInner {
            table: RwLock::new(UsageTable::default()),
            last_active: RwLock::new(Instant::now()),
            interval: Duration::from_secs(30),
            unavailable: Some(reason.into()),
        }))
    }

    pub fn unavailable_reason(&self) -> Option<String> {
        self.0.unavailable.clone()
    }

    /// Records consumer activity; demand pollers sample only while recently
    /// marked.
    pub fn mark_active(&self) {
        *self.0.last_active.write() = Instant::now();
    }

    fn idle(&self) -> bool {
        self.0.last_active.read().elapsed() > self.0.interval * AGE_FACTOR
    }

    fn max_age(&self) -> Duration {
        self.0.interval * AGE_FACTOR
    }

    pub fn node_usage(&self, name: &str) -> Option<UsageSample> {
        let table = self.0.table.read();
        let (sample, at) = table.nodes.get(name)?;
        (at.elapsed() <= self.max_age()).then_some(*sample)
    }

    pub fn pod_usage(&self, namespace: &str, name: &str) -> Option<UsageSample> {
        let table = self.0.table.read();
        let (sample, at) = table
            .pods
            .get(&(namespace.to_string(), name.to_string()))?;
        (at.elapsed() <= self.max_age()).then_some(*sample)
    }

    fn merge(&self, batch: UsageBatch) {
        let now = Instant::now();
        let max_age = self.max_age();
        let mut table = self.0.table.write();
        for (name, sample) in batch.nodes {
            table.nodes.insert(name, (sample, now));
        }
        for (key, sample) in batch.pods {
            table.pods.insert(key, (sample, now));
        }
        table.nodes.retain(|_, (_, at)| at.elapsed() <= max_age);
        table.pods.retain(|_, (_, at)| at.elapsed() <= max_age);
    }
}

/// The installed poller variant.
pub enum UsagePoller {
    Polling { handle: UsageHandle, mode: PollerMode },
    Disabled { handle: UsageHandle },
}

impl UsagePoller {
    /// Spawns the sampling task and returns the shared handle.
    pub fn spawn(
        source: Arc<dyn UsageSource>,
        mode: PollerMode,
        interval: Duration,
        shutdown: drain::Watch,
    ) -> Self {
        let handle = UsageHandle::new(interval);
        let poll_handle = handle.clone();
        tokio::spawn(
            async move {
                let release = shutdown.signaled();
                tokio::pin!(release);
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = &mut release => return,
                        _ = ticker.tick() => {}
                    }
                    if mode == PollerMode::Demand && poll_handle.idle() {
                        continue;
                    }
                    match source.sample().await {
                        Ok(batch) => poll_handle.merge(batch),
                        Err(error) => debug!(%error, "Usage sample failed"),
                    }
                }
            }
            .instrument(info_span!("usage_poller")),
        );
        Self::Polling { handle, mode }
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::Disabled {
            handle: UsageHandle::disabled(reason),
        }
    }

    pub fn handle(&self) -> UsageHandle {
        match self {
            UsagePoller::Polling { handle, .. } => handle.clone(),
            UsagePoller::Disabled { handle } => handle.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        samples: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl UsageSource for CountingSource {
        async fn sample(&self) -> Result<UsageBatch> {
            self.samples.fetch_add(1, Ordering::SeqCst);
            Ok(UsageBatch {
                nodes: vec![(
                    "worker-0".to_string(),
                    UsageSample {
                        cpu_millis: 100,
                        memory_bytes: 1 << 30,
                        sampled_at: Utc::now(),
                    },
                )],
                pods: Vec::new(),
            })
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn demand_poller_decays_to_idle() {
        let source = Arc::new(CountingSource {
            samples: AtomicUsize::new(0),
        });
        let (signal, shutdown) = drain::channel();
        let poller = UsagePoller::spawn(
            source.clone(),
            PollerMode::Demand,
            Duration::from_secs(10),
            shutdown,
        );
        let handle = poller.handle();

        // Active consumer: ticks sample.
        handle.mark_active();
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        let after_first = source.samples.load(Ordering::SeqCst);
        assert!(after_first >= 1);
        assert!(handle.node_usage("worker-0").is_some());

        // No activity for longer than three intervals: sampling stops.
        tokio::time::advance(Duration::from_secs(40)).await;
        settle().await;
        let when_idle = source.samples.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(source.samples.load(Ordering::SeqCst), when_idle);

        // Activity resumes sampling.
        handle.mark_active();
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert!(source.samples.load(Ordering::SeqCst) > when_idle);

        signal.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn samples_age_out() {
        let handle = UsageHandle::new(Duration::from_secs(10));
        handle.merge(UsageBatch {
            nodes: vec![(
                "worker-0".to_string(),
                UsageSample {
                    cpu_millis: 1,
                    memory_bytes: 1,
                    sampled_at: Utc::now(),
                },
            )],
            pods: Vec::new(),
        });
        assert!(handle.node_usage("worker-0").is_some());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(handle.node_usage("worker-0").is_none());
    }

    #[test]
    fn disabled_poller_reports_its_reason() {
        let poller = UsagePoller::disabled("Metrics API not found");
        let handle = poller.handle();
        assert_eq!(
            handle.unavailable_reason().as_deref(),
            Some("Metrics API not found")
        );
        assert!(handle.node_usage("worker-0").is_none());
    }
}
