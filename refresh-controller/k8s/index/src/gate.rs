//! Walks the ordered registration table and populates the domain registry.
//!
//! Every entry ends up registered exactly once: in its preferred form, as a
//! list-only fallback, or as a denied stub with the same payload schema.
//! Preflight I/O errors downgrade a domain and are recorded as permission
//! issues; only missing hard dependencies abort registration.

use crate::hub::{InformerHub, WatchKind};
use anyhow::{Context, Result};
use glimpse_refresh_core::{
    format_resource_list,
    registry::{ContextBinding, RefreshSettings, ScopeKind},
    BuildSnapshot, Decision, DomainName, DomainRegistry, GroupResource, PermissionIssue,
    PermissionKey, RegisteredDomain, RegistrationKind,
};
use std::sync::Arc;
use tracing::{debug, info};

pub type BuilderCtor = Box<dyn FnOnce() -> Arc<dyn BuildSnapshot> + Send>;

/// Receives the subset of resources the principal may actually list, so
/// partial domains render only what is visible.
pub type PartialBuilderCtor = Box<dyn FnOnce(Vec<GroupResource>) -> Arc<dyn BuildSnapshot> + Send>;

pub enum RegistrationMode {
    /// Register unconditionally; `require` failures are fatal.
    Direct { build: BuilderCtor },

    /// Require list permission on a resource set.
    List {
        resources: Vec<GroupResource>,
        /// Register when any resource is listable instead of all.
        allow_any: bool,
        build: PartialBuilderCtor,
        denied: BuilderCtor,
    },

    /// Require list+watch; optionally fall back to list-only.
    ListWatch {
        resources: Vec<GroupResource>,
        /// Informers to start when the watch-backed form registers.
        watches: Vec<WatchKind>,
        build: BuilderCtor,
        fallback: Option<BuilderCtor>,
        denied: BuilderCtor,
    },
}

pub struct RegistrationEntry {
    pub name: DomainName,
    pub scope_kind: ScopeKind,
    pub streaming: bool,
    pub refresh: RefreshSettings,
    pub context: Option<ContextBinding>,
    pub mode: RegistrationMode,
    /// Hard dependency check; an error here fails subsystem construction.
    pub require: Option<Box<dyn FnOnce() -> Result<()> + Send>>,
    /// Omit the domain entirely (e.g. an unconfigured plug-in).
    pub skip_if: Option<Box<dyn FnOnce() -> bool + Send>>,
    /// Additional keys to warm during the preflight walk.
    pub extra_preflight: Vec<PermissionKey>,
}

/// Capability probes the gate needs. `InformerHub` is the production
/// implementation; tests substitute a programmable one.
#[async_trait::async_trait]
pub trait Capabilities: Send + Sync {
    async fn can_list(&self, resource: &GroupResource) -> Result<Decision>;
    async fn can_watch(&self, resource: &GroupResource) -> Result<Decision>;
    fn start_watches(&self, kinds: &[WatchKind]);
    async fn warm(&self, key: &PermissionKey);
}

#[async_trait::async_trait]
impl Capabilities for InformerHub {
    async fn can_list(&self, resource: &GroupResource) -> Result<Decision> {
        self.can_list_resource(resource).await
    }

    async fn can_watch(&self, resource: &GroupResource) -> Result<Decision> {
        self.can_watch_resource(resource).await
    }

    fn start_watches(&self, kinds: &[WatchKind]) {
        self.start(kinds)
    }

    async fn warm(&self, key: &PermissionKey) {
        if let Err(error) = self.checker().can(key).await {
            debug!(%key, %error, "Preflight check failed");
        }
    }
}

pub struct GateOutcome {
    pub registry: DomainRegistry,
    pub issues: Vec<PermissionIssue>,
}

/// Every key the table will probe, for warming the permission cache in one
/// batch before the gate walks the entries.
pub fn preflight_keys(entries: &[RegistrationEntry]) -> Vec<PermissionKey> {
    let mut keys = Vec::new();
    for entry in entries {
        match &entry.mode {
            RegistrationMode::Direct { .. } => {}
            RegistrationMode::List { resources, .. } => {
                for resource in resources {
                    keys.push(PermissionKey::new(
                        resource.group.clone(),
                        resource.resource.clone(),
                        glimpse_refresh_core::Verb::List,
                    ));
                }
            }
            RegistrationMode::ListWatch { resources, .. } => {
                for resource in resources {
                    keys.push(PermissionKey::new(
                        resource.group.clone(),
                        resource.resource.clone(),
                        glimpse_refresh_core::Verb::List,
                    ));
                    keys.push(PermissionKey::new(
                        resource.group.clone(),
                        resource.resource.clone(),
                        glimpse_refresh_core::Verb::Watch,
                    ));
                }
            }
        }
        keys.extend(entry.extra_preflight.iter().cloned());
    }
    keys.sort();
    keys.dedup();
    keys
}

/// Outcome of probing one entry's resource set.
#[derive(Default)]
struct Probe {
    all_listable: bool,
    all_watchable: bool,
    listable: Vec<GroupResource>,
    /// Human-readable denial/error notes, in probe order.
    notes: Vec<String>,
    /// Whether any probe failed with an I/O error (as opposed to a denial).
    errored: bool,
}

pub struct PermissionGate;

impl PermissionGate {
    /// Executes the table in order. Returns the populated registry plus the
    /// permission issues recorded along the way.
    pub async fn register_all(
        caps: &impl Capabilities,
        entries: Vec<RegistrationEntry>,
    ) -> Result<GateOutcome> {
        let mut registry = DomainRegistry::default();
        let mut issues = Vec::new();

        for entry in entries {
            let name = entry.name.clone();
            if entry.skip_if.map(|skip| skip()).unwrap_or(false) {
                debug!(domain = %name, "Skipping unconfigured domain");
                continue;
            }
            if let Some(require) = entry.require {
                require().with_context(|| format!("domain {name}: missing hard dependency"))?;
            }
            for key in &entry.extra_preflight {
                caps.warm(key).await;
            }

            let registered = match entry.mode {
                RegistrationMode::Direct { build } => RegisteredDomain {
                    name: name.clone(),
                    scope_kind: entry.scope_kind,
                    registration: RegistrationKind::Watch,
                    streaming: entry.streaming,
                    refresh: entry.refresh,
                    context: entry.context,
                    builder: build(),
                },

                RegistrationMode::List {
                    resources,
                    allow_any,
                    build,
                    denied,
                } => {
                    let probe = Self::probe(caps, &resources, false).await;
                    let ok = if allow_any {
                        !probe.listable.is_empty()
                    } else {
                        probe.all_listable
                    };
                    if ok {
                        if !probe.all_listable {
                            issues.push(issue(&name, &resources, &probe));
                        }
                        RegisteredDomain {
                            name: name.clone(),
                            scope_kind: entry.scope_kind,
                            registration: RegistrationKind::ListOnly,
                            streaming: entry.streaming,
                            refresh: entry.refresh,
                            context: entry.context,
                            builder: build(probe.listable),
                        }
                    } else {
                        issues.push(issue(&name, &resources, &probe));
                        info!(domain = %name, "Registering permission-denied domain");
                        RegisteredDomain {
                            name: name.clone(),
                            scope_kind: entry.scope_kind,
                            registration: RegistrationKind::Denied,
                            streaming: entry.streaming,
                            refresh: entry.refresh,
                            context: entry.context,
                            builder: denied(),
                        }
                    }
                }

                RegistrationMode::ListWatch {
                    resources,
                    watches,
                    build,
                    fallback,
                    denied,
                } => {
                    let probe = Self::probe(caps, &resources, true).await;
                    if probe.all_listable && probe.all_watchable {
                        caps.start_watches(&watches);
                        RegisteredDomain {
                            name: name.clone(),
                            scope_kind: entry.scope_kind,
                            registration: RegistrationKind::Watch,
                            streaming: entry.streaming,
                            refresh: entry.refresh,
                            context: entry.context,
                            builder: build(),
                        }
                    } else if probe.all_listable && fallback.is_some() {
                        debug!(domain = %name, "Registering {name} domain using list fallback");
                        if probe.errored {
                            issues.push(issue(&name, &resources, &probe));
                        }
                        RegisteredDomain {
                            name: name.clone(),
                            scope_kind: entry.scope_kind,
                            registration: RegistrationKind::ListOnly,
                            streaming: entry.streaming,
                            refresh: entry.refresh,
                            context: entry.context,
                            builder: fallback.expect("fallback checked above")(),
                        }
                    } else {
                        issues.push(issue(&name, &resources, &probe));
                        info!(domain = %name, "Registering permission-denied domain");
                        RegisteredDomain {
                            name: name.clone(),
                            scope_kind: entry.scope_kind,
                            registration: RegistrationKind::Denied,
                            streaming: entry.streaming,
                            refresh: entry.refresh,
                            context: entry.context,
                            builder: denied(),
                        }
                    }
                }
            };

            registry
                .register(registered)
                .with_context(|| format!("domain {name}: duplicate registration"))?;
        }

        Ok(GateOutcome { registry, issues })
    }

    async fn probe(caps: &impl Capabilities, resources: &[GroupResource], watch: bool) -> Probe {
        let mut probe = Probe {
            all_listable: true,
            all_watchable: true,
            ..Probe::default()
        };
        for resource in resources {
            match caps.can_list(resource).await {
                Ok(Decision { allowed: true, .. }) => probe.listable.push(resource.clone()),
                Ok(Decision { reason, .. }) => {
                    probe.all_listable = false;
                    probe.notes.push(format!(
                        "list {resource} denied{}",
                        reason.map(|r| format!(": {r}")).unwrap_or_default()
                    ));
                }
                Err(error) => {
                    probe.all_listable = false;
                    probe.errored = true;
                    probe.notes.push(format!("list {resource}: {error}"));
                }
            }

            if !watch {
                continue;
            }
            match caps.can_watch(resource).await {
                Ok(Decision { allowed: true, .. }) => {}
                Ok(Decision { reason, .. }) => {
                    probe.all_watchable = false;
                    probe.notes.push(format!(
                        "watch {resource} denied{}",
                        reason.map(|r| format!(": {r}")).unwrap_or_default()
                    ));
                }
                Err(error) => {
                    probe.all_watchable = false;
                    probe.errored = true;
                    probe.notes.push(format!("watch {resource}: {error}"));
                }
            }
        }
        probe
    }
}

fn issue(name: &DomainName, resources: &[GroupResource], probe: &Probe) -> PermissionIssue {
    PermissionIssue {
        domain: name.to_string(),
        resource: format_resource_list(resources),
        error: if probe.notes.is_empty() {
            "permission denied".to_string()
        } else {
            probe.notes.join("; ")
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_refresh_core::{BuildOptions, Scope};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct StaticBuilder(serde_json::Value);

    #[async_trait::async_trait]
    impl BuildSnapshot for StaticBuilder {
        async fn build(&self, _: &Scope, _: BuildOptions) -> Result<serde_json::Value> {
            Ok(self.0.clone())
        }
    }

    fn ctor(value: serde_json::Value) -> BuilderCtor {
        Box::new(move || Arc::new(StaticBuilder(value)) as Arc<dyn BuildSnapshot>)
    }

    /// Programmable capability table: `(resource, verb)` -> decision.
    #[derive(Default)]
    struct FakeCaps {
        decisions: HashMap<(String, &'static str), bool>,
        started: Mutex<Vec<WatchKind>>,
    }

    impl FakeCaps {
        fn allow(mut self, resource: &str, verb: &'static str) -> Self {
            self.decisions.insert((resource.to_string(), verb), true);
            self
        }

        fn deny(mut self, resource: &str, verb: &'static str) -> Self {
            self.decisions.insert((resource.to_string(), verb), false);
            self
        }

        fn decide(&self, resource: &GroupResource, verb: &'static str) -> Result<Decision> {
            match self.decisions.get(&(resource.to_string(), verb)) {
                Some(true) => Ok(Decision::allow()),
                Some(false) => Ok(Decision::deny("rbac")),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    #[async_trait::async_trait]
    impl Capabilities for FakeCaps {
        async fn can_list(&self, resource: &GroupResource) -> Result<Decision> {
            self.decide(resource, "list")
        }

        async fn can_watch(&self, resource: &GroupResource) -> Result<Decision> {
            self.decide(resource, "watch")
        }

        fn start_watches(&self, kinds: &[WatchKind]) {
            self.started.lock().extend_from_slice(kinds);
        }

        async fn warm(&self, _key: &PermissionKey) {}
    }

    fn list_watch_entry(
        name: &str,
        resources: Vec<GroupResource>,
        watches: Vec<WatchKind>,
        fallback: bool,
    ) -> RegistrationEntry {
        RegistrationEntry {
            name: name.into(),
            scope_kind: ScopeKind::Global,
            streaming: false,
            refresh: RefreshSettings::default(),
            context: None,
            mode: RegistrationMode::ListWatch {
                resources,
                watches,
                build: ctor(serde_json::json!({"watch": true})),
                fallback: fallback.then(|| ctor(serde_json::json!({"fallback": true}))),
                denied: ctor(serde_json::json!({"permissionDenied": true})),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        }
    }

    async fn fetch(registry: &DomainRegistry, name: &str) -> serde_json::Value {
        registry
            .get(&name.into())
            .expect("domain must be registered")
            .builder
            .build(&Scope::cluster(), BuildOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn watch_backed_registration_starts_informers() {
        let caps = FakeCaps::default()
            .allow("nodes", "list")
            .allow("nodes", "watch");
        let entries = vec![list_watch_entry(
            "nodes",
            vec![GroupResource::core("nodes")],
            vec![WatchKind::Nodes],
            true,
        )];
        let outcome = PermissionGate::register_all(&caps, entries).await.unwrap();

        assert!(outcome.issues.is_empty());
        let domain = outcome.registry.get(&"nodes".into()).unwrap();
        assert_eq!(domain.registration, RegistrationKind::Watch);
        assert_eq!(*caps.started.lock(), vec![WatchKind::Nodes]);
    }

    #[tokio::test]
    async fn watch_denied_falls_back_to_list() {
        let caps = FakeCaps::default()
            .allow("nodes", "list")
            .deny("nodes", "watch");
        let entries = vec![list_watch_entry(
            "nodes",
            vec![GroupResource::core("nodes")],
            vec![WatchKind::Nodes],
            true,
        )];
        let outcome = PermissionGate::register_all(&caps, entries).await.unwrap();

        let domain = outcome.registry.get(&"nodes".into()).unwrap();
        assert_eq!(domain.registration, RegistrationKind::ListOnly);
        assert!(caps.started.lock().is_empty());
        // A clean denial downgrades without recording an issue.
        assert!(outcome.issues.is_empty());
        assert_eq!(
            fetch(&outcome.registry, "nodes").await,
            serde_json::json!({"fallback": true})
        );
    }

    #[tokio::test]
    async fn denied_list_registers_the_stub_and_records_an_issue() {
        let caps = FakeCaps::default()
            .deny("rbac.authorization.k8s.io/roles", "list")
            .allow("rbac.authorization.k8s.io/rolebindings", "list");
        let entries = vec![RegistrationEntry {
            name: "namespace-rbac".into(),
            scope_kind: ScopeKind::Namespaced,
            streaming: false,
            refresh: RefreshSettings::default(),
            context: None,
            mode: RegistrationMode::List {
                resources: vec![
                    GroupResource::new("rbac.authorization.k8s.io", "roles"),
                    GroupResource::new("rbac.authorization.k8s.io", "rolebindings"),
                ],
                allow_any: false,
                build: Box::new(|_| {
                    Arc::new(StaticBuilder(serde_json::json!({"permissionDenied": false})))
                }),
                denied: ctor(serde_json::json!({"permissionDenied": true})),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        }];
        let outcome = PermissionGate::register_all(&caps, entries).await.unwrap();

        let domain = outcome.registry.get(&"namespace-rbac".into()).unwrap();
        assert_eq!(domain.registration, RegistrationKind::Denied);
        assert_eq!(
            fetch(&outcome.registry, "namespace-rbac").await,
            serde_json::json!({"permissionDenied": true})
        );

        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].domain, "namespace-rbac");
        assert_eq!(
            outcome.issues[0].resource,
            "rbac.authorization.k8s.io/roles,rolebindings"
        );
    }

    #[tokio::test]
    async fn allow_any_registers_a_partial_domain() {
        let caps = FakeCaps::default()
            .allow("configmaps", "list")
            .deny("secrets", "list");
        let entries = vec![RegistrationEntry {
            name: "namespace-config".into(),
            scope_kind: ScopeKind::Namespaced,
            streaming: false,
            refresh: RefreshSettings::default(),
            context: None,
            mode: RegistrationMode::List {
                resources: vec![GroupResource::core("configmaps"), GroupResource::core("secrets")],
                allow_any: true,
                build: Box::new(|listable| {
                    let names: Vec<_> = listable.iter().map(|r| r.to_string()).collect();
                    Arc::new(StaticBuilder(serde_json::json!({"listable": names})))
                }),
                denied: ctor(serde_json::json!({"permissionDenied": true})),
            },
            require: None,
            skip_if: None,
            extra_preflight: Vec::new(),
        }];
        let outcome = PermissionGate::register_all(&caps, entries).await.unwrap();

        assert_eq!(
            fetch(&outcome.registry, "namespace-config").await,
            serde_json::json!({"listable": ["configmaps"]})
        );
        // The invisible subset is surfaced as an issue.
        assert_eq!(outcome.issues.len(), 1);
    }

    #[tokio::test]
    async fn probe_errors_downgrade_without_aborting() {
        // No decision configured: every probe errors.
        let caps = FakeCaps::default();
        let entries = vec![list_watch_entry(
            "cluster-overview",
            vec![GroupResource::core("pods")],
            vec![WatchKind::Pods],
            false,
        )];
        let outcome = PermissionGate::register_all(&caps, entries).await.unwrap();

        let domain = outcome.registry.get(&"cluster-overview".into()).unwrap();
        assert_eq!(domain.registration, RegistrationKind::Denied);
        assert_eq!(outcome.issues.len(), 1);
        assert!(outcome.issues[0].error.contains("connection refused"));
    }

    #[tokio::test]
    async fn skip_if_omits_the_domain() {
        let caps = FakeCaps::default();
        let mut entry = list_watch_entry("catalog", Vec::new(), Vec::new(), false);
        entry.skip_if = Some(Box::new(|| true));
        let outcome = PermissionGate::register_all(&caps, vec![entry]).await.unwrap();
        assert!(outcome.registry.is_empty());
        assert!(outcome.issues.is_empty());
    }

    #[tokio::test]
    async fn missing_hard_dependency_is_fatal() {
        let caps = FakeCaps::default();
        let entries = vec![RegistrationEntry {
            name: "resources".into(),
            scope_kind: ScopeKind::Global,
            streaming: true,
            refresh: RefreshSettings::default(),
            context: None,
            mode: RegistrationMode::Direct {
                build: ctor(serde_json::json!({})),
            },
            require: Some(Box::new(|| anyhow::bail!("dynamic client not configured"))),
            skip_if: None,
            extra_preflight: Vec::new(),
        }];
        let err = PermissionGate::register_all(&caps, entries)
            .await
            .expect_err("construction must fail");
        assert!(err.to_string().contains("resources"));
    }
}
