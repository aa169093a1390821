//! Resources and the synthetic resource builder
//!
//! A [`Resource`] is what the overlay hands to callers: a read-only
//! snapshot of a backing node, either under its real path or projected
//! to a virtual one. Synthetic resources are rebuilt on every call and
//! never cached, so source property changes are visible on the next
//! access without invalidation.

use crate::store::{Node, Properties, PROP_CREATED, PROP_SUPER_TYPE};
use serde::Serialize;
use serde_json::Value;

/// Marks a resource as dynamically produced by the overlay
pub const PROP_DYNAMIC: &str = "overlay:dynamic";

/// Marks a synthetic resource whose virtual parent is the target root
pub const PROP_AT_ROOT: &str = "overlay:atRoot";

/// Structural properties that must not leak into synthetic resources
const IGNORED_PROPERTIES: [&str; 2] = [PROP_CREATED, PROP_SUPER_TYPE];

/// Read-only projection of a backing node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    path: String,
    node_type: String,
    super_type: Option<String>,
    properties: Properties,
}

impl Resource {
    /// Wrap a real backing node unchanged
    pub fn from_node(node: &Node) -> Self {
        Self {
            path: node.path().to_string(),
            node_type: node.node_type().to_string(),
            super_type: node.super_type().map(str::to_string),
            properties: node.properties().clone(),
        }
    }

    /// Build a synthetic resource projecting `source` to `virtual_path`
    ///
    /// Shallow-copies the source properties minus the structural
    /// denylist, re-injects the resolved super type (only when
    /// non-empty) and tags the result as dynamic.
    pub fn synthetic(source: &Node, virtual_path: impl Into<String>, at_root: bool) -> Self {
        let mut properties = Properties::new();
        for (key, value) in source.properties() {
            if IGNORED_PROPERTIES.contains(&key.as_str()) {
                continue;
            }
            properties.insert(key.clone(), value.clone());
        }
        let super_type = source.super_type().map(str::to_string);
        if let Some(st) = &super_type {
            properties.insert(PROP_SUPER_TYPE.to_string(), Value::String(st.clone()));
        }
        properties.insert(PROP_DYNAMIC.to_string(), Value::Bool(true));
        if at_root {
            properties.insert(PROP_AT_ROOT.to_string(), Value::Bool(true));
        }
        Self {
            path: virtual_path.into(),
            node_type: source.node_type().to_string(),
            super_type,
            properties,
        }
    }

    /// Path this resource answers under (virtual for synthetic ones)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        crate::path::name_of(&self.path).unwrap_or("")
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn super_type(&self) -> Option<&str> {
        self.super_type.as_deref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Scalar property as a string (same coercion as [`Node`])
    pub fn property_str(&self, name: &str) -> Option<String> {
        match self.properties.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// True when this resource was produced by the overlay
    pub fn is_dynamic(&self) -> bool {
        matches!(self.properties.get(PROP_DYNAMIC), Some(Value::Bool(true)))
    }
}
