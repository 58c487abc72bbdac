//! Glimpse refresh core
//!
//! Domain-independent building blocks for the refresh controller: snapshots
//! and the builders that produce them, scope identifiers, the ordered domain
//! registry, per-subscription state, the UI view context, permission value
//! types, and the wire types shared by the streaming subsystems.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod permissions;
mod scope;
mod snapshot;
mod state;
mod view;

pub mod payload;
pub mod plugins;
pub mod records;
pub mod registry;
pub mod stream;

pub use self::{
    permissions::{format_resource_list, Decision, GroupResource, PermissionIssue, PermissionKey, Verb},
    registry::{DomainName, DomainRegistry, RegisteredDomain, RegistrationKind, StreamingDomain},
    scope::{ObjectRef, Scope, WorkloadRef},
    snapshot::{BuildOptions, BuildSnapshot, Snapshot},
    state::{DomainStatus, RefreshStats, ScopedDomainState},
    view::{ContextField, ObjectPanel, ViewContext, ViewContextPatch},
};
