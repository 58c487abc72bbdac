//! Glimpse refresh orchestrator
//!
//! The central scheduler: it owns the scoped-domain store and the refresher
//! tasks, coalesces builds through the snapshot service, reacts to view
//! context changes, and manages streaming-task lifecycles.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
mod orchestrator;
mod refresher;
mod service;
mod store;

pub mod metrics;

pub use self::{
    metrics::OrchestratorMetrics,
    orchestrator::{OrchestratorConfig, RefreshOrchestrator},
    service::{FetchError, FetchOutcome, SnapshotService},
    store::{ScopeEntry, ScopedDomainStore},
};
