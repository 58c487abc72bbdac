//! Cached self-subject access review decisions.

use ahash::AHashMap as HashMap;
use anyhow::{anyhow, Result};
use futures::StreamExt;
use glimpse_refresh_core::{Decision, PermissionKey};
use glimpse_refresh_k8s_api::{
    Api, Client, PostParams, ResourceAttributes, SelfSubjectAccessReview,
    SelfSubjectAccessReviewSpec,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Number of reviews in flight during a preflight batch.
const PRIME_CONCURRENCY: usize = 8;

/// Issues a single authorisation review. Seam for tests; production wraps
/// the Kubernetes API.
#[async_trait::async_trait]
pub trait AccessReviewer: Send + Sync {
    async fn review(&self, key: &PermissionKey) -> Result<Decision>;
}

pub struct ApiAccessReviewer {
    client: Client,
}

impl ApiAccessReviewer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl AccessReviewer for ApiAccessReviewer {
    async fn review(&self, key: &PermissionKey) -> Result<Decision> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(key.group.clone()),
                    resource: Some(key.resource.clone()),
                    verb: Some(key.verb.as_str().to_string()),
                    subresource: key.subresource.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = Api::<SelfSubjectAccessReview>::all(self.client.clone())
            .create(&PostParams::default(), &review)
            .await?;
        let status = created
            .status
            .ok_or_else(|| anyhow!("access review for {key} returned no status"))?;
        Ok(Decision {
            allowed: status.allowed,
            reason: status.reason,
        })
    }
}

#[derive(Clone, Debug)]
struct CachedDecision {
    decision: Decision,
    expires_at: Instant,
}

/// Caches authorisation decisions per `group/resource/verb[/sub]` key.
///
/// Only definitive API answers populate the cache; review errors surface to
/// the caller and leave the key unknown.
pub struct PermissionChecker {
    reviewer: Arc<dyn AccessReviewer>,
    ttl: Duration,
    cache: RwLock<HashMap<PermissionKey, CachedDecision>>,
}

impl PermissionChecker {
    pub fn new(reviewer: Arc<dyn AccessReviewer>, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            reviewer,
            ttl,
            cache: RwLock::new(HashMap::default()),
        })
    }

    pub async fn can(&self, key: &PermissionKey) -> Result<Decision> {
        if let Some(cached) = self.cache.read().get(key) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.decision.clone());
            }
        }

        let decision = self.reviewer.review(key).await?;
        self.cache.write().insert(
            key.clone(),
            CachedDecision {
                decision: decision.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        tracing::debug!(%key, allowed = decision.allowed, "Cached access review");
        Ok(decision)
    }

    /// Re-reviews a key, bypassing the cache. Used by the revalidator so a
    /// revocation is observed even while the cached allow is still fresh.
    pub async fn recheck(&self, key: &PermissionKey) -> Result<Decision> {
        let decision = self.reviewer.review(key).await?;
        self.cache.write().insert(
            key.clone(),
            CachedDecision {
                decision: decision.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(decision)
    }

    /// Keys whose last definitive decision was an allow. TTL expiry forces
    /// `can` to re-review but does not remove a key from this set; the
    /// revalidator must keep watching grants whose cache entries have gone
    /// stale.
    pub fn allowed_snapshot(&self) -> Vec<PermissionKey> {
        let mut keys: Vec<_> = self
            .cache
            .read()
            .iter()
            .filter(|(_, cached)| cached.decision.allowed)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Batch-evaluates the given keys, bounded by `deadline`. Keys that do
    /// not complete in time are left unknown, not denied.
    pub async fn prime(&self, keys: Vec<PermissionKey>, deadline: Duration) {
        let total = keys.len();
        let primed = futures::stream::iter(keys)
            .map(|key| async move {
                if let Err(error) = self.can(&key).await {
                    tracing::debug!(%key, %error, "Preflight review failed");
                }
            })
            .buffer_unordered(PRIME_CONCURRENCY)
            .count();

        match tokio::time::timeout(deadline, primed).await {
            Ok(done) => tracing::debug!(total = done, "Primed permission cache"),
            Err(_) => tracing::warn!(total, "Permission preflight deadline elapsed"),
        }
    }
}
