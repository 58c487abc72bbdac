//! Glimpse refresh cluster index
//!
//! Watch-backed ingestion for the refresh controller: the permission checker
//! and gate, the informer hub and its cluster index, the per-domain snapshot
//! builders, and the metrics-usage poller.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_info;
mod convert;

pub mod cluster;
pub mod domains;
pub mod gate;
pub mod hub;
pub mod permissions;
pub mod usage;

pub use self::{
    cluster::{ClusterIndex, SharedIndex},
    cluster_info::ClusterInfo,
    gate::{GateOutcome, PermissionGate, RegistrationEntry, RegistrationMode},
    hub::InformerHub,
    permissions::{AccessReviewer, ApiAccessReviewer, PermissionChecker},
    usage::{UsageHandle, UsagePoller},
};
