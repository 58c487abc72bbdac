//! The ordered domain registry.
//!
//! Registration entries are evaluated by the permission gate in table order;
//! the resulting registry maps each domain name to exactly one registered
//! domain, either in its real form or as its denied stub.

use crate::{BuildSnapshot, ContextField, Scope, ViewContext};
use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainName(String);

impl DomainName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DomainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DomainName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a domain's scope strings are shaped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeKind {
    Global,
    Namespaced,
    ObjectKeyed,
    WorkloadKeyed,
}

/// The ingestion strategy the gate selected for a domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RegistrationKind {
    /// Watch-backed: builders read live informer caches.
    Watch,
    /// List-only fallback: builders list on demand.
    ListOnly,
    /// Permission denied; the builder serves the denied stub payload.
    Denied,
}

/// Auto-refresh tuning for one domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshSettings {
    pub interval: Duration,
    /// Minimum spacing between consecutive builds for one scope.
    pub cooldown: Duration,
    /// Per-build deadline.
    pub timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            cooldown: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RefreshSettings {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

/// Static mapping from view-context fields to the domain's refresh scope.
#[derive(Clone)]
pub struct ContextBinding {
    /// Context fields whose change schedules a manual refresh of this domain.
    pub fields: &'static [ContextField],
    /// Computes the scope to refresh from the current context. `None` means
    /// the context does not select this domain right now.
    pub scope: fn(&ViewContext) -> Option<Scope>,
}

impl ContextBinding {
    pub fn depends_on(&self, changed: &[ContextField]) -> bool {
        self.fields.iter().any(|f| changed.contains(f))
    }
}

impl std::fmt::Debug for ContextBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBinding")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// A domain as registered by the gate.
#[derive(Clone)]
pub struct RegisteredDomain {
    pub name: DomainName,
    pub scope_kind: ScopeKind,
    pub registration: RegistrationKind,
    /// Streaming domains additionally run long-lived per-scope tasks.
    pub streaming: bool,
    pub refresh: RefreshSettings,
    pub context: Option<ContextBinding>,
    pub builder: Arc<dyn BuildSnapshot>,
}

impl std::fmt::Debug for RegisteredDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredDomain")
            .field("name", &self.name)
            .field("scope_kind", &self.scope_kind)
            .field("registration", &self.registration)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("domain {0} is already registered")]
    Duplicate(DomainName),
}

/// Ordered table of registered domains.
#[derive(Default)]
pub struct DomainRegistry {
    entries: Vec<RegisteredDomain>,
    by_name: HashMap<DomainName, usize>,
}

impl DomainRegistry {
    pub fn register(&mut self, domain: RegisteredDomain) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&domain.name) {
            return Err(RegistryError::Duplicate(domain.name));
        }
        self.by_name.insert(domain.name.clone(), self.entries.len());
        self.entries.push(domain);
        Ok(())
    }

    pub fn get(&self, name: &DomainName) -> Option<&RegisteredDomain> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Registration order, which is part of the registry contract.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredDomain> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<DomainName> {
        self.entries.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Domains whose context binding depends on any of the changed fields,
    /// paired with the scope the current context selects for them.
    pub fn context_dependents<'r>(
        &'r self,
        changed: &'r [ContextField],
        view: &'r ViewContext,
    ) -> impl Iterator<Item = (&'r DomainName, Scope)> + 'r {
        self.entries.iter().filter_map(move |d| {
            let binding = d.context.as_ref()?;
            if !binding.depends_on(changed) {
                return None;
            }
            let scope = (binding.scope)(view)?;
            Some((&d.name, scope))
        })
    }
}

/// A long-lived per-scope source task for a streaming domain.
///
/// The orchestrator owns these tasks' lifecycles; the HTTP subsystems fan
/// the produced data out to client sessions.
#[async_trait::async_trait]
pub trait StreamingDomain: Send + Sync {
    /// Runs the scope's source task until shutdown is signalled. Returning
    /// `Ok` means the task drained cleanly.
    async fn run(&self, scope: Scope, shutdown: drain::Watch) -> anyhow::Result<()>;

    /// Drops sequence-carrying state so a restart is indistinguishable from
    /// a cold start.
    fn reset(&self, _scope: &Scope) {}

    /// Enqueues a one-shot refresh; the receiver resolves once the refresh
    /// has been processed. Fire-and-forget callers may drop it.
    fn refresh_once(&self, _scope: &Scope) -> tokio::sync::oneshot::Receiver<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = tx.send(());
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildOptions;

    struct NullBuilder;

    #[async_trait::async_trait]
    impl BuildSnapshot for NullBuilder {
        async fn build(
            &self,
            _scope: &Scope,
            _opts: BuildOptions,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn domain(name: &str) -> RegisteredDomain {
        RegisteredDomain {
            name: name.into(),
            scope_kind: ScopeKind::Global,
            registration: RegistrationKind::Watch,
            streaming: false,
            refresh: RefreshSettings::default(),
            context: None,
            builder: Arc::new(NullBuilder),
        }
    }

    #[test]
    fn preserves_registration_order() {
        let mut registry = DomainRegistry::default();
        for name in ["c", "a", "b"] {
            registry.register(domain(name)).unwrap();
        }
        let expected: Vec<DomainName> = vec!["c".into(), "a".into(), "b".into()];
        assert_eq!(registry.names(), expected);
    }

    #[test]
    fn rejects_duplicates() {
        let mut registry = DomainRegistry::default();
        registry.register(domain("pods")).unwrap();
        assert!(matches!(
            registry.register(domain("pods")),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn context_dependents_respect_bindings() {
        let mut registry = DomainRegistry::default();
        let mut details = domain("object-details");
        details.context = Some(ContextBinding {
            fields: &[ContextField::ObjectPanel],
            scope: |view| {
                let panel = &view.object_panel;
                if !panel.is_open {
                    return None;
                }
                Some(Scope::object(
                    panel.namespace.as_deref()?,
                    panel.kind.as_deref()?,
                    panel.name.as_deref()?,
                ))
            },
        });
        registry.register(details).unwrap();
        registry.register(domain("nodes")).unwrap();

        let mut view = ViewContext::default();
        view.object_panel = crate::ObjectPanel {
            is_open: true,
            kind: Some("Pod".into()),
            name: Some("api-1".into()),
            namespace: Some("team-a".into()),
        };

        let hits: Vec<_> = registry
            .context_dependents(&[ContextField::ObjectPanel], &view)
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.as_str(), "object-details");
        assert_eq!(hits[0].1, Scope::object("team-a", "Pod", "api-1"));
    }
}
