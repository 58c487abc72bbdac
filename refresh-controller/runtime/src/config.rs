use glimpse_refresh_core::plugins::{HelmFactory, ObjectCatalogService, ObjectDetailsProvider};
use glimpse_refresh_k8s_api::Client;
use std::sync::Arc;
use tokio::time::Duration;

/// Everything the refresh subsystem consumes, supplied at construction.
/// The core performs no environment lookups; the CLI (or an embedding
/// process) populates this.
#[derive(Clone)]
pub struct Config {
    /// Watch re-establishment cadence.
    pub resync_interval: Duration,
    /// Usage poller interval; three times this defines demand idle.
    pub metrics_interval: Duration,
    /// Startup permission preflight deadline.
    pub permission_preflight_timeout: Duration,
    /// Permission cache TTL and revalidation sweep period.
    pub permission_cache_ttl: Duration,
    /// Shutdown deadline when a credential is revoked.
    pub permission_check_timeout: Duration,
    /// Stable id embedded in every snapshot.
    pub cluster_id: String,
    /// Display name embedded in every snapshot.
    pub cluster_name: String,
    /// Client for dynamic (custom-resource) access; hard dependency of the
    /// `resources` domain.
    pub dynamic_client: Option<Client>,
    pub helm: Option<Arc<dyn HelmFactory>>,
    pub object_details: Option<Arc<dyn ObjectDetailsProvider>>,
    pub catalog: Option<Arc<dyn ObjectCatalogService>>,
}

impl Config {
    pub fn new(cluster_id: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            metrics_interval: Duration::from_secs(30),
            permission_preflight_timeout: Duration::from_secs(15),
            permission_cache_ttl: Duration::from_secs(300),
            permission_check_timeout: Duration::from_secs(10),
            cluster_id: cluster_id.into(),
            cluster_name: cluster_name.into(),
            dynamic_client: None,
            helm: None,
            object_details: None,
            catalog: None,
        }
    }
}
