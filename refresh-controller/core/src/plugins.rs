//! Interfaces for optional external collaborators.
//!
//! The refresh core never constructs these; they arrive through `Config`
//! and gate the registration of the domains that need them.

use crate::ObjectRef;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    pub chart: String,
    pub app_version: String,
    pub status: String,
    pub revision: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Helm SDK binding. Listing is the only operation the refresh core needs.
#[async_trait::async_trait]
pub trait HelmFactory: Send + Sync {
    async fn list_releases(&self, namespace: Option<&str>) -> Result<Vec<HelmRelease>>;
}

/// Supplies extended detail documents for the object panel.
#[async_trait::async_trait]
pub trait ObjectDetailsProvider: Send + Sync {
    async fn details(&self, object: &ObjectRef) -> Result<serde_json::Value>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum CatalogEvent {
    Reset { entries: Vec<CatalogEntry> },
    Upsert { entry: CatalogEntry },
    Remove { entry: CatalogEntry },
}

/// Object catalog service; absent unless the deployment configures one, in
/// which case the `catalog` domain and its stream are skipped entirely.
#[async_trait::async_trait]
pub trait ObjectCatalogService: Send + Sync {
    async fn entries(&self) -> Result<Vec<CatalogEntry>>;

    /// Long-lived stream of catalog changes, beginning with a `Reset`.
    fn watch(&self) -> BoxStream<'static, CatalogEvent>;
}
