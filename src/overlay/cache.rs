//! Overlay path-mapping caches
//!
//! Two maps form one consistency unit: virtual path -> reference, and
//! virtual parent path -> ordered child references. The owning
//! provider guards the whole struct with a single lock; nothing in
//! here synchronizes on its own.

use super::reference::Reference;
use std::collections::HashMap;

/// Mapping and children caches of one provider instance
#[derive(Debug, Default)]
pub struct OverlayCache {
    /// Virtual path -> backing reference
    mappings: HashMap<String, Reference>,
    /// Virtual parent path -> complete, ordered child references
    children: HashMap<String, Vec<Reference>>,
}

impl OverlayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference cached for a virtual path
    pub fn mapping(&self, path: &str) -> Option<&Reference> {
        self.mappings.get(path)
    }

    /// Record the reference for a virtual path, replacing any previous
    /// entry so a path maps to at most one reference
    pub fn put_mapping(&mut self, path: impl Into<String>, reference: Reference) {
        self.mappings.insert(path.into(), reference);
    }

    /// Cached child list of a virtual parent, None when never populated
    pub fn children(&self, parent: &str) -> Option<&[Reference]> {
        self.children.get(parent).map(|v| v.as_slice())
    }

    /// Store the complete child list of a virtual parent
    ///
    /// An empty list is a valid, intentional entry ("populated, no
    /// children"); partial lists must never be stored.
    pub fn put_children(&mut self, parent: impl Into<String>, list: Vec<Reference>) {
        self.children.insert(parent.into(), list);
    }

    /// True when the parent's child list has been populated
    pub fn has_children(&self, parent: &str) -> bool {
        self.children.contains_key(parent)
    }

    /// Drop everything; lookups repopulate lazily
    pub fn clear(&mut self) {
        self.mappings.clear();
        self.children.clear();
    }
}
