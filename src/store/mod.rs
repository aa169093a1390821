//! Backing store abstraction
//!
//! The overlay never owns content. It reads nodes from a hierarchical
//! backing store through the [`NodeStore`] trait and subscribes to its
//! change notifications. The store is injected; persistence, sessions
//! and transactions are the host's concern.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Property holding the node type
pub const PROP_TYPE: &str = "sys:type";

/// Property holding the declared super type
pub const PROP_SUPER_TYPE: &str = "sys:superType";

/// Property holding the creation timestamp
pub const PROP_CREATED: &str = "sys:created";

/// Node type marking a tombstone (deleted but still addressable)
pub const TYPE_NON_EXISTING: &str = "sys:nonexisting";

/// Name of the access-control child, never projected by the overlay
pub const ACL_CHILD_NAME: &str = "sys:policy";

/// Property map of a node
pub type Properties = BTreeMap<String, Value>;

/// A node read from the backing store
///
/// Type and super type live in the property map under well-known keys,
/// so filters can match on them like on any other property.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    path: String,
    properties: Properties,
}

impl Node {
    /// Create a node at the given absolute path
    pub fn new(path: impl Into<String>, properties: Properties) -> Self {
        Self {
            path: path.into(),
            properties,
        }
    }

    /// Absolute path of this node
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment (empty for the root)
    pub fn name(&self) -> &str {
        crate::path::name_of(&self.path).unwrap_or("")
    }

    /// All properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Node type, empty string when untyped
    pub fn node_type(&self) -> &str {
        match self.properties.get(PROP_TYPE) {
            Some(Value::String(s)) => s,
            _ => "",
        }
    }

    /// Declared super type, None when absent or empty
    pub fn super_type(&self) -> Option<&str> {
        match self.properties.get(PROP_SUPER_TYPE) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Scalar property as a string
    ///
    /// Strings come back as-is, numbers and booleans are rendered;
    /// arrays, objects and null read as absent.
    pub fn property_str(&self, name: &str) -> Option<String> {
        match self.properties.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// True if this node is a deletion tombstone
    pub fn is_tombstone(&self) -> bool {
        self.node_type() == TYPE_NON_EXISTING
    }
}

/// Kind of a store change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Set of change kinds a subscriber is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask {
    pub added: bool,
    pub changed: bool,
    pub removed: bool,
}

impl EventMask {
    /// Mask matching every change kind
    pub fn all() -> Self {
        Self {
            added: true,
            changed: true,
            removed: true,
        }
    }

    /// Does this mask cover the given kind?
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Added => self.added,
            ChangeKind::Changed => self.changed,
            ChangeKind::Removed => self.removed,
        }
    }
}

/// Change notification callback
pub type ChangeCallback = Arc<dyn Fn(&str, ChangeKind) + Send + Sync>;

/// Handle of a change subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Read access to a hierarchical backing store
pub trait NodeStore: Send + Sync {
    /// Fetch a node, Ok(None) when nothing exists at `path`
    fn get(&self, path: &str) -> Result<Option<Node>>;

    /// Children of the node at `path`, empty when none (never an error
    /// for a missing parent)
    fn children(&self, path: &str) -> Result<Vec<Node>>;

    /// Subscribe to change notifications below `root`
    fn subscribe(&self, root: &str, mask: EventMask, callback: ChangeCallback) -> SubscriptionId;

    /// Drop a change subscription
    fn unsubscribe(&self, id: SubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(props: &[(&str, Value)]) -> Node {
        let properties = props
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Node::new("/content/a", properties)
    }

    #[test]
    fn test_type_accessors() {
        let n = node(&[
            (PROP_TYPE, json!("nt:file")),
            (PROP_SUPER_TYPE, json!("nt:base")),
        ]);
        assert_eq!(n.node_type(), "nt:file");
        assert_eq!(n.super_type(), Some("nt:base"));
        assert_eq!(n.name(), "a");
        assert!(!n.is_tombstone());
    }

    #[test]
    fn test_empty_super_type_reads_as_absent() {
        let n = node(&[(PROP_SUPER_TYPE, json!(""))]);
        assert_eq!(n.super_type(), None);
    }

    #[test]
    fn test_property_str_coercion() {
        let n = node(&[
            ("title", json!("Test-1")),
            ("count", json!(3)),
            ("flag", json!(true)),
            ("tags", json!(["a", "b"])),
        ]);
        assert_eq!(n.property_str("title").as_deref(), Some("Test-1"));
        assert_eq!(n.property_str("count").as_deref(), Some("3"));
        assert_eq!(n.property_str("flag").as_deref(), Some("true"));
        assert_eq!(n.property_str("tags"), None);
        assert_eq!(n.property_str("missing"), None);
    }

    #[test]
    fn test_tombstone() {
        let n = node(&[(PROP_TYPE, json!(TYPE_NON_EXISTING))]);
        assert!(n.is_tombstone());
    }
}
