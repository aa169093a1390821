//! Declaration configuration
//!
//! A declaration is a persisted config node describing one overlay
//! mount: where to project (`overlay:target`), what to project
//! (`overlay:source`, defaulting to the declaration node itself),
//! optional allow/deny filters and an ordered list of link property
//! names treated as indirection pointers. Declarations are edited by
//! an administrator and only ever read here.

use crate::error::{Error, Result};
use crate::overlay::FilterMap;
use crate::store::Node;
use serde_json::Value;

/// Property naming the virtual mount point
pub const PROP_TARGET: &str = "overlay:target";

/// Property naming the source subtree, defaults to the declaration path
pub const PROP_SOURCE: &str = "overlay:source";

/// Property holding the allow filter (object: name -> values)
pub const PROP_ALLOWED: &str = "overlay:allowed";

/// Property holding the deny filter (object: name -> values)
pub const PROP_PROHIBITED: &str = "overlay:prohibited";

/// Property holding the ordered link property names (array of strings)
pub const PROP_FOLLOWED_LINKS: &str = "overlay:followedLinks";

/// One parsed overlay mount declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Path of the declaration node itself
    pub path: String,
    /// Virtual mount point
    pub target_root: String,
    /// Real subtree to expose
    pub source_root: String,
    /// Allow filter, empty accepts everything
    pub allowed: FilterMap,
    /// Deny filter
    pub prohibited: FilterMap,
    /// Link property names followed during population, declared order
    pub followed_links: Vec<String>,
}

impl Declaration {
    /// Parse a declaration from its config node
    ///
    /// A missing or relative target path makes the whole declaration
    /// invalid; the caller skips it without affecting others.
    pub fn from_node(node: &Node) -> Result<Self> {
        let path = node.path().to_string();
        let target_root = match node.property_str(PROP_TARGET) {
            Some(t) if t.starts_with('/') => t,
            Some(t) => {
                return Err(Error::declaration(
                    &path,
                    format!("target path '{t}' must be absolute"),
                ))
            }
            None => return Err(Error::declaration(&path, "missing target path")),
        };
        let source_root = match node.property_str(PROP_SOURCE) {
            Some(s) if s.starts_with('/') => s,
            Some(s) => {
                return Err(Error::declaration(
                    &path,
                    format!("source path '{s}' must be absolute"),
                ))
            }
            None => path.clone(),
        };
        Ok(Self {
            target_root,
            source_root,
            allowed: filter_map(node, PROP_ALLOWED),
            prohibited: filter_map(node, PROP_PROHIBITED),
            followed_links: string_list(node.properties().get(PROP_FOLLOWED_LINKS)),
            path,
        })
    }
}

/// Read a filter property as name -> list of string values
///
/// Scalar values count as single-element lists; anything unreadable is
/// ignored rather than failing the declaration.
fn filter_map(node: &Node, property: &str) -> FilterMap {
    let mut map = FilterMap::new();
    let obj = match node.properties().get(property) {
        Some(Value::Object(obj)) => obj,
        _ => return map,
    };
    for (name, value) in obj {
        let values = match value {
            Value::String(s) => vec![s.clone()],
            Value::Array(_) => string_list(Some(value)),
            _ => continue,
        };
        if !values.is_empty() {
            map.insert(name.clone(), values);
        }
    }
    map
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}
