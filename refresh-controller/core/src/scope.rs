use serde::{Deserialize, Serialize};

/// Disambiguates snapshots within a domain.
///
/// The orchestrator treats scopes as opaque strings; the conventional shapes
/// (`workload:<ns>:<kind>:<name>`, `<ns>:<kind>:<name>`, `node:<name>`) are
/// only interpreted by the builders that declared them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

/// Scope used by global domains that aggregate across the whole cluster.
pub const CLUSTER_SCOPE: &str = "__cluster__";

/// Scope reported by a subscriber that is currently dormant.
pub const INACTIVE_SCOPE: &str = "__inactive__";

/// A workload-keyed scope target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRef {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

/// An object-keyed scope target. `kind` is lowercased on parse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

// === impl Scope ===

impl Scope {
    pub fn cluster() -> Self {
        Self(CLUSTER_SCOPE.to_string())
    }

    pub fn inactive() -> Self {
        Self(INACTIVE_SCOPE.to_string())
    }

    pub fn namespace(ns: impl Into<String>) -> Self {
        Self(ns.into())
    }

    pub fn node(name: &str) -> Self {
        Self(format!("node:{name}"))
    }

    pub fn workload(namespace: &str, kind: &str, name: &str) -> Self {
        Self(format!("workload:{namespace}:{kind}:{name}"))
    }

    pub fn object(namespace: &str, kind: &str, name: &str) -> Self {
        Self(format!("{namespace}:{}:{name}", kind.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cluster(&self) -> bool {
        self.0 == CLUSTER_SCOPE
    }

    pub fn is_inactive(&self) -> bool {
        self.0 == INACTIVE_SCOPE
    }

    /// Interprets the scope as a bare namespace, with `__cluster__` standing
    /// in for "no namespace".
    pub fn as_namespace(&self) -> Option<&str> {
        if self.is_cluster() || self.is_inactive() || self.0.contains(':') {
            return None;
        }
        Some(&self.0)
    }

    pub fn parse_node(&self) -> Option<&str> {
        self.0.strip_prefix("node:")
    }

    pub fn parse_workload(&self) -> Option<WorkloadRef> {
        let rest = self.0.strip_prefix("workload:")?;
        let mut parts = rest.splitn(3, ':');
        let namespace = parts.next()?;
        let kind = parts.next()?;
        let name = parts.next()?;
        if namespace.is_empty() || kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(WorkloadRef {
            namespace: namespace.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }

    /// Parses `<ns>:<kind>:<name>` object scopes. Reserved prefixes never
    /// parse as objects.
    pub fn parse_object(&self) -> Option<ObjectRef> {
        if self.0.starts_with("workload:") || self.0.starts_with("node:") {
            return None;
        }
        let mut parts = self.0.splitn(3, ':');
        let namespace = parts.next()?;
        let kind = parts.next()?;
        let name = parts.next()?;
        if namespace.is_empty() || kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(ObjectRef {
            namespace: namespace.to_string(),
            kind: kind.to_ascii_lowercase(),
            name: name.to_string(),
        })
    }

    /// Strips a `<clusterId>:` prefix when it matches exactly. Multi-cluster
    /// frontends qualify scopes this way before fanning out to a controller.
    pub fn strip_cluster_prefix(&self, cluster_id: &str) -> Option<Scope> {
        self.0
            .strip_prefix(cluster_id)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(|rest| Scope(rest.to_string()))
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Scope {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Scope {
    fn from(s: String) -> Self {
        Self(s)
    }
}
