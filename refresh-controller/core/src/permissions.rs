use serde::Serialize;

/// Kubernetes verbs the controller cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    Get,
    List,
    Watch,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key for an authorisation decision:
/// `group/resource/verb[/subresource]`, with the group elided for the core
/// API.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionKey {
    pub group: String,
    pub resource: String,
    pub verb: Verb,
    pub subresource: Option<String>,
}

impl PermissionKey {
    pub fn new(group: impl Into<String>, resource: impl Into<String>, verb: Verb) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            verb,
            subresource: None,
        }
    }

    pub fn with_subresource(mut self, sub: impl Into<String>) -> Self {
        self.subresource = Some(sub.into());
        self
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.group.is_empty() {
            write!(f, "{}/", self.group)?;
        }
        write!(f, "{}/{}", self.resource, self.verb)?;
        if let Some(sub) = &self.subresource {
            write!(f, "/{sub}")?;
        }
        Ok(())
    }
}

/// The outcome of an access review. Network failures are errors, not
/// decisions; only definitive API answers are represented here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// A `group`/`resource` pair as used by registration preflight checks.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    pub fn core(resource: impl Into<String>) -> Self {
        Self::new("", resource)
    }
}

impl std::fmt::Display for GroupResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}/{}", self.group, self.resource)
        }
    }
}

/// Renders a resource set for diagnostics. Resources sharing one non-core
/// group collapse to `group/res1,res2`; mixed sets list each entry in full.
pub fn format_resource_list(resources: &[GroupResource]) -> String {
    match resources {
        [] => String::new(),
        [only] => only.to_string(),
        [first, rest @ ..] => {
            if !first.group.is_empty() && rest.iter().all(|r| r.group == first.group) {
                let names = std::iter::once(first.resource.as_str())
                    .chain(rest.iter().map(|r| r.resource.as_str()))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{}/{}", first.group, names)
            } else {
                std::iter::once(first.to_string())
                    .chain(rest.iter().map(|r| r.to_string()))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }
}

/// Recorded when registration preflight downgrades or denies a domain.
/// Surfaced on the diagnostics endpoint; never fatal by itself.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionIssue {
    pub domain: String,
    pub resource: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_elides_core_group() {
        assert_eq!(
            PermissionKey::new("", "pods", Verb::List).to_string(),
            "pods/list"
        );
        assert_eq!(
            PermissionKey::new("apps", "deployments", Verb::Watch).to_string(),
            "apps/deployments/watch"
        );
        assert_eq!(
            PermissionKey::new("", "pods", Verb::Get)
                .with_subresource("log")
                .to_string(),
            "pods/get/log"
        );
    }

    #[test]
    fn resource_lists_collapse_a_shared_group() {
        let rbac = vec![
            GroupResource::new("rbac.authorization.k8s.io", "roles"),
            GroupResource::new("rbac.authorization.k8s.io", "rolebindings"),
        ];
        assert_eq!(
            format_resource_list(&rbac),
            "rbac.authorization.k8s.io/roles,rolebindings"
        );

        let mixed = vec![
            GroupResource::core("pods"),
            GroupResource::new("apps", "deployments"),
        ];
        assert_eq!(format_resource_list(&mixed), "pods,apps/deployments");

        let core = vec![GroupResource::core("configmaps"), GroupResource::core("secrets")];
        assert_eq!(format_resource_list(&core), "configmaps,secrets");
    }
}
