use serde::{Deserialize, Serialize};

/// Process-wide record of what the UI is currently looking at.
///
/// Written by the frontend through the context endpoint, read by the
/// orchestrator to decide which domains a context change must refresh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_view: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_namespace_view: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_cluster_view: Option<String>,
    #[serde(default)]
    pub object_panel: ObjectPanel,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPanel {
    pub is_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Partial view descriptor merged into the context. Absent fields are left
/// unchanged; the object panel is replaced as a unit when present.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewContextPatch {
    #[serde(default)]
    pub current_view: Option<String>,
    #[serde(default)]
    pub active_namespace_view: Option<String>,
    #[serde(default)]
    pub active_cluster_view: Option<String>,
    #[serde(default)]
    pub object_panel: Option<ObjectPanel>,
}

/// Context fields a domain registration may depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextField {
    CurrentView,
    ActiveNamespaceView,
    ActiveClusterView,
    ObjectPanel,
}

// === impl ViewContext ===

impl ViewContext {
    /// Merges a patch, returning the fields whose values actually changed.
    pub fn apply(&mut self, patch: ViewContextPatch) -> Vec<ContextField> {
        let mut changed = Vec::new();

        if let Some(view) = patch.current_view {
            if self.current_view.as_deref() != Some(view.as_str()) {
                self.current_view = Some(view);
                changed.push(ContextField::CurrentView);
            }
        }
        if let Some(ns) = patch.active_namespace_view {
            if self.active_namespace_view.as_deref() != Some(ns.as_str()) {
                self.active_namespace_view = Some(ns);
                changed.push(ContextField::ActiveNamespaceView);
            }
        }
        if let Some(cluster) = patch.active_cluster_view {
            if self.active_cluster_view.as_deref() != Some(cluster.as_str()) {
                self.active_cluster_view = Some(cluster);
                changed.push(ContextField::ActiveClusterView);
            }
        }
        if let Some(panel) = patch.object_panel {
            if self.object_panel != panel {
                self.object_panel = panel;
                changed.push(ContextField::ObjectPanel);
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_reports_only_changed_fields() {
        let mut ctx = ViewContext::default();
        let changed = ctx.apply(ViewContextPatch {
            current_view: Some("overview".into()),
            ..Default::default()
        });
        assert_eq!(changed, vec![ContextField::CurrentView]);

        // Re-applying the same value is not a change.
        let changed = ctx.apply(ViewContextPatch {
            current_view: Some("overview".into()),
            ..Default::default()
        });
        assert!(changed.is_empty());
    }

    #[test]
    fn object_panel_is_replaced_as_a_unit() {
        let mut ctx = ViewContext::default();
        let changed = ctx.apply(ViewContextPatch {
            object_panel: Some(ObjectPanel {
                is_open: true,
                kind: Some("Pod".into()),
                name: Some("api-1".into()),
                namespace: Some("team-a".into()),
            }),
            ..Default::default()
        });
        assert_eq!(changed, vec![ContextField::ObjectPanel]);
        assert!(ctx.object_panel.is_open);
    }

    #[test]
    fn patch_deserializes_partial_documents() {
        let patch: ViewContextPatch =
            serde_json::from_str(r#"{"objectPanel":{"isOpen":true,"kind":"Pod"}}"#).unwrap();
        assert!(patch.current_view.is_none());
        assert!(patch.object_panel.unwrap().is_open);
    }
}
