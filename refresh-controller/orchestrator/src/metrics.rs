//! Prometheus metrics for the refresh orchestrator.

use glimpse_refresh_core::DomainName;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DomainLabels {
    domain: String,
}

impl DomainLabels {
    fn new(domain: &DomainName) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }
}

#[derive(Clone, Default)]
pub struct OrchestratorMetrics {
    builds: Family<DomainLabels, Counter>,
    build_errors: Family<DomainLabels, Counter>,
    dropped_auto_refreshes: Family<DomainLabels, Counter>,
    subscriptions: Family<DomainLabels, Gauge>,
}

impl OrchestratorMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "builds",
            "Count of snapshot builds per domain",
            metrics.builds.clone(),
        );
        prom.register(
            "build_errors",
            "Count of failed snapshot builds per domain",
            metrics.build_errors.clone(),
        );
        prom.register(
            "dropped_auto_refreshes",
            "Count of auto-refresh ticks dropped while a build was in flight",
            metrics.dropped_auto_refreshes.clone(),
        );
        prom.register(
            "subscriptions",
            "Gauge of live scope subscriptions per domain",
            metrics.subscriptions.clone(),
        );
        metrics
    }

    pub(crate) fn record_build(&self, domain: &DomainName) {
        self.builds.get_or_create(&DomainLabels::new(domain)).inc();
    }

    pub(crate) fn record_build_error(&self, domain: &DomainName) {
        self.build_errors
            .get_or_create(&DomainLabels::new(domain))
            .inc();
    }

    pub(crate) fn record_dropped_auto_refresh(&self, domain: &DomainName) {
        self.dropped_auto_refreshes
            .get_or_create(&DomainLabels::new(domain))
            .inc();
    }

    pub(crate) fn set_subscriptions(&self, domain: &DomainName, count: i64) {
        self.subscriptions
            .get_or_create(&DomainLabels::new(domain))
            .set(count);
    }
}
