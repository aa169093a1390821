//! Overlay provider
//!
//! Projects a source subtree of the backing store onto a virtual
//! target path. Lookups under the target root are answered from a
//! lazily populated reference cache; everything else is delegated,
//! either straight to the backing store (source side) or to an
//! upstream provider. Resolution is read-only and never mutates the
//! store.

use super::cache::OverlayCache;
use super::filter::FilterEngine;
use super::reference::Reference;
use super::resource::Resource;
use crate::error::Result;
use crate::path;
use crate::store::{Node, NodeStore, ACL_CHILD_NAME};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Provider sitting above this one in the resolution chain
///
/// The overlay never shadows a resource the upstream already serves at
/// a virtual path; upstream answers win unchanged.
pub trait UpstreamProvider: Send + Sync {
    fn resolve(&self, path: &str) -> Result<Option<Resource>>;
    fn list_children(&self, path: &str) -> Result<Option<Vec<Resource>>>;
}

/// Reverse-reference sink for invalidation bookkeeping
///
/// Called during child population whenever an indirection is followed,
/// so the registration manager can invalidate the right provider when
/// the link target changes later.
pub trait ReferenceTracker: Send + Sync {
    fn add_reference(&self, target_root: &str, referenced_path: &str);
}

/// Per-call resolution context
///
/// An optional caller-scoped store is consulted before the provider's
/// own service store; an optional upstream provider is asked first for
/// anything under the target root.
#[derive(Default, Clone, Copy)]
pub struct ResolveContext<'a> {
    store: Option<&'a dyn NodeStore>,
    upstream: Option<&'a dyn UpstreamProvider>,
}

impl<'a> ResolveContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: &'a dyn NodeStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_upstream(mut self, upstream: &'a dyn UpstreamProvider) -> Self {
        self.upstream = Some(upstream);
        self
    }
}

/// One overlay mount: source subtree projected onto a target root
pub struct OverlayProvider {
    /// Virtual mount point
    target_root: String,
    /// Real subtree exposed under the target root
    source_root: String,
    /// Service store, used when the call context brings none
    store: Arc<dyn NodeStore>,
    filter: FilterEngine,
    /// Property names treated as indirection pointers, declared order
    followed_links: Vec<String>,
    tracker: Option<Arc<dyn ReferenceTracker>>,
    /// Mapping and children caches, one consistency unit
    cache: Mutex<OverlayCache>,
    active: AtomicBool,
}

impl OverlayProvider {
    pub fn new(
        target_root: impl Into<String>,
        source_root: impl Into<String>,
        store: Arc<dyn NodeStore>,
        filter: FilterEngine,
        followed_links: Vec<String>,
    ) -> Self {
        Self {
            target_root: target_root.into(),
            source_root: source_root.into(),
            store,
            filter,
            followed_links,
            tracker: None,
            cache: Mutex::new(OverlayCache::new()),
            active: AtomicBool::new(true),
        }
    }

    /// Attach a reverse-reference sink
    pub fn with_tracker(mut self, tracker: Arc<dyn ReferenceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn target_root(&self) -> &str {
        &self.target_root
    }

    pub fn source_root(&self) -> &str {
        &self.source_root
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop answering; an inactive provider resolves nothing
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Drop both caches; subsequent lookups repopulate lazily
    pub fn invalidate(&self) {
        self.cache.lock().clear();
    }

    /// Resolve a path to a resource
    ///
    /// Relative paths are taken as children of `parent`. Ok(None)
    /// means "does not exist" and is not an error.
    pub fn resolve(
        &self,
        ctx: &ResolveContext,
        path: &str,
        parent: Option<&Resource>,
    ) -> Result<Option<Resource>> {
        if !self.is_active() {
            return Ok(None);
        }
        let resource_path = if path.starts_with(path::SLASH) {
            path.to_string()
        } else {
            match parent {
                Some(p) => path::join(p.path(), path),
                None => return Ok(None),
            }
        };
        debug!("resolve(path={}, target_root={})", resource_path, self.target_root);

        if path::is_at_or_under(&resource_path, &self.source_root) {
            // The source tree stays visible under its own name
            return Ok(self
                .store_get(ctx, &resource_path)?
                .map(|n| Resource::from_node(&n)));
        }

        if resource_path == self.target_root {
            if let Some(found) = self.resolve_upstream(ctx, &resource_path)? {
                return Ok(Some(found));
            }
            return match self.store_get(ctx, &self.source_root)? {
                Some(node) if self.filter.accepts(&node) => {
                    Ok(Some(Resource::synthetic(&node, &resource_path, false)))
                }
                _ => Ok(None),
            };
        }

        if path::is_under(&resource_path, &self.target_root) {
            if let Some(found) = self.resolve_upstream(ctx, &resource_path)? {
                return Ok(Some(found));
            }
            let parent_path = match path::parent_of(&resource_path) {
                Some(p) => p.to_string(),
                None => return Ok(None),
            };
            let reference = {
                let mut cache = self.cache.lock();
                match cache.mapping(&resource_path) {
                    Some(r) => Some(r.clone()),
                    None => {
                        self.populate_children(ctx, &parent_path, &mut cache)?;
                        cache.mapping(&resource_path).cloned()
                    }
                }
            };
            let reference = match reference {
                Some(r) => r,
                None => return Ok(None),
            };
            return match self.store_get(ctx, reference.target())? {
                Some(node) if !node.is_tombstone() => {
                    let at_root = parent_path == self.target_root;
                    Ok(Some(Resource::synthetic(&node, &resource_path, at_root)))
                }
                _ => Ok(None),
            };
        }

        match ctx.upstream {
            Some(upstream) => upstream.resolve(&resource_path),
            None => Ok(None),
        }
    }

    /// List the children of a resource
    ///
    /// Under the target root, upstream children are merged with the
    /// overlay's own projections. Ok(None) means "no override", also
    /// when the combined result is empty.
    pub fn list_children(
        &self,
        ctx: &ResolveContext,
        parent: &Resource,
    ) -> Result<Option<Vec<Resource>>> {
        if !self.is_active() {
            return Ok(None);
        }
        let parent_path = parent.path();
        debug!(
            "list_children(parent={}, target_root={})",
            parent_path, self.target_root
        );

        if parent_path == self.source_root {
            // No virtualization at the provider's own source root
            let nodes = match self.source_children(ctx, parent_path)? {
                Some(nodes) => nodes,
                None => return Ok(None),
            };
            let items: Vec<Resource> = nodes.iter().map(Resource::from_node).collect();
            return Ok(if items.is_empty() { None } else { Some(items) });
        }

        if path::is_at_or_under(parent_path, &self.target_root) {
            let mut items = Vec::new();
            if let Some(upstream) = ctx.upstream {
                if let Some(children) = upstream.list_children(parent_path)? {
                    items.extend(children);
                }
            }
            let references: Vec<Reference> = {
                let mut cache = self.cache.lock();
                self.populate_children(ctx, parent_path, &mut cache)?;
                cache
                    .children(parent_path)
                    .map(|s| s.to_vec())
                    .unwrap_or_default()
            };
            let at_root = parent_path == self.target_root;
            for reference in references {
                // A node that vanished since population is simply
                // absent; the stale entry goes away on the next full
                // population
                let node = match self.store_get(ctx, reference.target())? {
                    Some(n) if !n.is_tombstone() => n,
                    _ => continue,
                };
                let name = path::name_of(reference.source()).unwrap_or_default();
                let virtual_path = path::join(parent_path, name);
                items.push(Resource::synthetic(&node, virtual_path, at_root));
            }
            return Ok(if items.is_empty() { None } else { Some(items) });
        }

        match ctx.upstream {
            Some(upstream) => upstream.list_children(parent_path),
            None => Ok(None),
        }
    }

    fn resolve_upstream(&self, ctx: &ResolveContext, path: &str) -> Result<Option<Resource>> {
        match ctx.upstream {
            Some(upstream) => upstream.resolve(path),
            None => Ok(None),
        }
    }

    /// Fetch through the context store first, then the service store
    fn store_get(&self, ctx: &ResolveContext, path: &str) -> Result<Option<Node>> {
        if let Some(store) = ctx.store {
            if let Some(node) = store.get(path)? {
                return Ok(Some(node));
            }
        }
        self.store.get(path)
    }

    /// Children of a source-side node, from whichever store has it
    fn source_children(&self, ctx: &ResolveContext, path: &str) -> Result<Option<Vec<Node>>> {
        if let Some(store) = ctx.store {
            if store.get(path)?.is_some() {
                return Ok(Some(store.children(path)?));
            }
        }
        if self.store.get(path)?.is_some() {
            return Ok(Some(self.store.children(path)?));
        }
        Ok(None)
    }

    /// Populate the children cache entry for a virtual parent
    ///
    /// Runs under the cache lock held by the caller. The computed list
    /// and mappings are written only after the whole scan succeeds, so
    /// a store failure leaves the caches untouched.
    fn populate_children(
        &self,
        ctx: &ResolveContext,
        parent: &str,
        cache: &mut OverlayCache,
    ) -> Result<()> {
        if cache.has_children(parent) {
            return Ok(());
        }
        // Discover the parent's own mapping first, so a chained
        // indirection relocates where children are read from
        if parent != self.target_root && cache.mapping(parent).is_none() {
            if let Some(grand) = path::parent_of(parent) {
                if path::is_at_or_under(grand, &self.target_root) {
                    let grand = grand.to_string();
                    self.populate_children(ctx, &grand, cache)?;
                }
            }
        }

        // The mapping's target is where this parent's children really
        // live; for plain projections it coincides with the postfix
        // path, for followed links it relocates the scan, and children
        // discovered below a link keep composing from there
        let source_parent = match cache.mapping(parent) {
            Some(r) => r.target().to_string(),
            None => {
                let postfix = path::strip_root(parent, &self.target_root).unwrap_or("");
                if postfix.is_empty() {
                    self.source_root.clone()
                } else {
                    format!("{}/{}", self.source_root, postfix)
                }
            }
        };

        let mut visited = self.reference_chain(parent, cache);
        visited.push(source_parent.clone());

        let children = match self.source_children(ctx, &source_parent)? {
            Some(list) => list,
            None => {
                debug!(
                    "source parent missing, caching empty list (parent={}, source={})",
                    parent, source_parent
                );
                cache.put_children(parent, Vec::new());
                return Ok(());
            }
        };

        let mut references = Vec::new();
        let mut mappings = Vec::new();
        'children: for child in &children {
            if child.name() == ACL_CHILD_NAME {
                continue;
            }
            // Filters see the direct source child, before any
            // indirection is followed
            if !self.filter.accepts(child) {
                continue;
            }
            let mut reference = None;
            for link in &self.followed_links {
                let value = match child.property_str(link) {
                    Some(v) if !v.is_empty() => v,
                    _ => continue,
                };
                if value == child.path() || visited.contains(&value) {
                    warn!(
                        "Reference cycle detected, skipping child (child={}, link={}, target={})",
                        child.path(),
                        link,
                        value
                    );
                    continue 'children;
                }
                match self.store_get(ctx, &value)? {
                    Some(node) if !node.is_tombstone() => {
                        if let Some(tracker) = &self.tracker {
                            tracker.add_reference(&self.target_root, &value);
                        }
                        reference = Some(Reference::indirect(child.path(), value));
                        break;
                    }
                    _ => {
                        warn!(
                            "Reference '{}' on '{}' does not resolve to a node",
                            value,
                            child.path()
                        );
                    }
                }
            }
            let reference = reference.unwrap_or_else(|| Reference::direct(child.path()));
            mappings.push((path::join(parent, child.name()), reference.clone()));
            references.push(reference);
        }

        for (virtual_path, reference) in mappings {
            cache.put_mapping(virtual_path, reference);
        }
        cache.put_children(parent, references);
        Ok(())
    }

    /// Reference targets along the ancestor chain of `parent`, used as
    /// the visited set of the cycle guard
    fn reference_chain(&self, parent: &str, cache: &OverlayCache) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = parent.to_string();
        loop {
            if let Some(r) = cache.mapping(&cursor) {
                chain.push(r.source().to_string());
                chain.push(r.target().to_string());
            }
            if cursor == self.target_root {
                break;
            }
            match path::parent_of(&cursor) {
                Some(p) if path::is_at_or_under(p, &self.target_root) => cursor = p.to_string(),
                _ => break,
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::filter::FilterMap;
    use crate::store::{MemoryStore, Properties, PROP_TYPE, TYPE_NON_EXISTING};
    use serde_json::json;
    use std::collections::HashMap;

    fn filter(entries: &[(&str, &[&str])]) -> FilterMap {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn basic_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "sys:type": "nt:folder",
                "test1": {
                    "sys:type": "nt:file",
                    "title": "Test-1"
                },
                "test2": {
                    "sys:type": "nt:folder",
                    "title": "Test-2"
                }
            }),
        );
        store
    }

    fn provider(store: &Arc<MemoryStore>) -> OverlayProvider {
        OverlayProvider::new(
            "/apps/dyn",
            "/conf/dyn",
            store.clone() as Arc<dyn NodeStore>,
            FilterEngine::accept_all(),
            Vec::new(),
        )
    }

    fn parent_resource(path: &str) -> Resource {
        Resource::from_node(&Node::new(path, Properties::new()))
    }

    fn child_names(children: &[Resource]) -> Vec<String> {
        children.iter().map(|r| r.name().to_string()).collect()
    }

    /// Upstream provider answering from fixed maps
    #[derive(Default)]
    struct FixedUpstream {
        resources: HashMap<String, Resource>,
        children: HashMap<String, Vec<Resource>>,
    }

    impl UpstreamProvider for FixedUpstream {
        fn resolve(&self, path: &str) -> Result<Option<Resource>> {
            Ok(self.resources.get(path).cloned())
        }

        fn list_children(&self, path: &str) -> Result<Option<Vec<Resource>>> {
            Ok(self.children.get(path).cloned())
        }
    }

    #[derive(Default)]
    struct RecordingTracker {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ReferenceTracker for RecordingTracker {
        fn add_reference(&self, target_root: &str, referenced_path: &str) {
            self.seen
                .lock()
                .push((target_root.to_string(), referenced_path.to_string()));
        }
    }

    #[test]
    fn test_resolve_virtual_child() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        let resource = provider
            .resolve(&ctx, "/apps/dyn/test1", None)
            .unwrap()
            .expect("test1 should resolve");
        assert_eq!(resource.path(), "/apps/dyn/test1");
        assert_eq!(resource.property_str("title").as_deref(), Some("Test-1"));
        assert!(resource.is_dynamic());

        assert!(provider
            .resolve(&ctx, "/apps/dyn/missing", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        let first = provider.resolve(&ctx, "/apps/dyn/test1", None).unwrap().unwrap();
        let second = provider.resolve(&ctx, "/apps/dyn/test1", None).unwrap().unwrap();
        assert_eq!(first.node_type(), second.node_type());
        assert_eq!(first.super_type(), second.super_type());
        assert_eq!(first.properties(), second.properties());
    }

    #[test]
    fn test_source_tree_visible_under_its_own_name() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        let resource = provider
            .resolve(&ctx, "/conf/dyn/test1", None)
            .unwrap()
            .unwrap();
        assert_eq!(resource.path(), "/conf/dyn/test1");
        assert!(!resource.is_dynamic());
    }

    #[test]
    fn test_relative_path_resolves_against_parent() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();
        let parent = parent_resource("/apps/dyn");

        let resource = provider
            .resolve(&ctx, "test1", Some(&parent))
            .unwrap()
            .unwrap();
        assert_eq!(resource.path(), "/apps/dyn/test1");
        // A relative path without a parent resolves to nothing
        assert!(provider.resolve(&ctx, "test1", None).unwrap().is_none());
    }

    #[test]
    fn test_upstream_is_never_shadowed() {
        let store = basic_store();
        let provider = provider(&store);
        let mut upstream = FixedUpstream::default();
        let mut props = Properties::new();
        props.insert("title".into(), json!("Real resource"));
        upstream.resources.insert(
            "/apps/dyn/test1".into(),
            Resource::from_node(&Node::new("/apps/dyn/test1", props)),
        );
        let ctx = ResolveContext::new().with_upstream(&upstream);

        let resource = provider
            .resolve(&ctx, "/apps/dyn/test1", None)
            .unwrap()
            .unwrap();
        assert!(!resource.is_dynamic());
        assert_eq!(
            resource.property_str("title").as_deref(),
            Some("Real resource")
        );
    }

    #[test]
    fn test_resolve_target_root_projects_source_root() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        let resource = provider.resolve(&ctx, "/apps/dyn", None).unwrap().unwrap();
        assert_eq!(resource.path(), "/apps/dyn");
        assert!(resource.is_dynamic());
        assert_eq!(resource.node_type(), "nt:folder");
    }

    #[test]
    fn test_list_children_merges_upstream_and_overlay() {
        let store = basic_store();
        let provider = provider(&store);
        let mut upstream = FixedUpstream::default();
        upstream.children.insert(
            "/apps/dyn".into(),
            vec![parent_resource("/apps/dyn/real1")],
        );
        let ctx = ResolveContext::new().with_upstream(&upstream);

        let children = provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap()
            .unwrap();
        let names = child_names(&children);
        assert_eq!(names, vec!["real1", "test1", "test2"]);
        assert!(!children[0].is_dynamic());
        assert!(children[1].is_dynamic());
    }

    #[test]
    fn test_list_children_none_when_empty() {
        let store = Arc::new(MemoryStore::new());
        store.put("/conf/dyn", Properties::new());
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        assert!(provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_list_children_at_source_root_is_raw() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        let children = provider
            .list_children(&ctx, &parent_resource("/conf/dyn"))
            .unwrap()
            .unwrap();
        assert_eq!(child_names(&children), vec!["test1", "test2"]);
        assert!(children.iter().all(|c| !c.is_dynamic()));
    }

    #[test]
    fn test_allowed_filter_limits_projection() {
        let store = basic_store();
        let provider = OverlayProvider::new(
            "/apps/dyn",
            "/conf/dyn",
            store.clone() as Arc<dyn NodeStore>,
            FilterEngine::new(filter(&[(PROP_TYPE, &["nt:file"])]), FilterMap::new()),
            Vec::new(),
        );
        let ctx = ResolveContext::new();

        let children = provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap()
            .unwrap();
        assert_eq!(child_names(&children), vec!["test1"]);

        // resolve honors the same filter through the mapping cache
        assert!(provider
            .resolve(&ctx, "/apps/dyn/test2", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_prohibited_filter_wins_over_allowed() {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "open": { "kind": "public" },
                "hidden": { "kind": "secret" }
            }),
        );
        let provider = OverlayProvider::new(
            "/apps/dyn",
            "/conf/dyn",
            store.clone() as Arc<dyn NodeStore>,
            FilterEngine::new(
                filter(&[("kind", &["public", "secret"])]),
                filter(&[("kind", &["secret"])]),
            ),
            Vec::new(),
        );
        let ctx = ResolveContext::new();

        let children = provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap()
            .unwrap();
        assert_eq!(child_names(&children), vec!["open"]);
    }

    #[test]
    fn test_acl_child_is_never_projected() {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "sys:policy": { "grants": "all" },
                "visible": { "title": "ok" }
            }),
        );
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        let children = provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap()
            .unwrap();
        assert_eq!(child_names(&children), vec!["visible"]);
    }

    fn reference_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "noRef": { "title": "plain" },
                "refA": { "ddrRef": "/libs/base/b" }
            }),
        );
        store.load_json(
            "/libs/base/b",
            &json!({
                "title": "B itself",
                "child": {
                    "title": "B child",
                    "grandChild": { "title": "B grandchild" }
                }
            }),
        );
        store
    }

    fn reference_provider(store: &Arc<MemoryStore>) -> OverlayProvider {
        OverlayProvider::new(
            "/apps/dyn",
            "/conf/dyn",
            store.clone() as Arc<dyn NodeStore>,
            FilterEngine::accept_all(),
            vec!["ddrRef".to_string()],
        )
    }

    #[test]
    fn test_indirection_resolves_to_link_target() {
        let store = reference_store();
        let provider = reference_provider(&store);
        let ctx = ResolveContext::new();

        let resource = provider
            .resolve(&ctx, "/apps/dyn/refA", None)
            .unwrap()
            .unwrap();
        assert_eq!(resource.path(), "/apps/dyn/refA");
        assert_eq!(resource.property_str("title").as_deref(), Some("B itself"));
    }

    #[test]
    fn test_indirection_exposes_target_children() {
        let store = reference_store();
        let provider = reference_provider(&store);
        let ctx = ResolveContext::new();

        let children = provider
            .list_children(&ctx, &parent_resource("/apps/dyn/refA"))
            .unwrap()
            .unwrap();
        assert_eq!(child_names(&children), vec!["child"]);
        assert_eq!(
            children[0].property_str("title").as_deref(),
            Some("B child")
        );

        // Chained: the target's grandchildren keep composing
        let grand = provider
            .resolve(&ctx, "/apps/dyn/refA/child/grandChild", None)
            .unwrap()
            .unwrap();
        assert_eq!(
            grand.property_str("title").as_deref(),
            Some("B grandchild")
        );
    }

    #[test]
    fn test_indirection_records_reverse_reference() {
        let store = reference_store();
        let tracker = Arc::new(RecordingTracker::default());
        let provider = reference_provider(&store)
            .with_tracker(tracker.clone() as Arc<dyn ReferenceTracker>);
        let ctx = ResolveContext::new();

        provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap();
        let seen = tracker.seen.lock();
        assert_eq!(
            *seen,
            vec![("/apps/dyn".to_string(), "/libs/base/b".to_string())]
        );
    }

    #[test]
    fn test_unresolved_link_falls_back_to_direct() {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "dangling": { "ddrRef": "/libs/gone", "title": "own content" }
            }),
        );
        let provider = reference_provider(&store);
        let ctx = ResolveContext::new();

        let resource = provider
            .resolve(&ctx, "/apps/dyn/dangling", None)
            .unwrap()
            .unwrap();
        assert_eq!(
            resource.property_str("title").as_deref(),
            Some("own content")
        );
    }

    #[test]
    fn test_tombstone_link_target_is_not_followed() {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "entry": { "ddrRef": "/libs/dead", "title": "own content" }
            }),
        );
        store.load_json("/libs/dead", &json!({ "sys:type": TYPE_NON_EXISTING }));
        let provider = reference_provider(&store);
        let ctx = ResolveContext::new();

        let resource = provider
            .resolve(&ctx, "/apps/dyn/entry", None)
            .unwrap()
            .unwrap();
        assert_eq!(
            resource.property_str("title").as_deref(),
            Some("own content")
        );
    }

    #[test]
    fn test_first_declared_link_name_wins() {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "entry": { "primaryRef": "/libs/first", "secondaryRef": "/libs/second" }
            }),
        );
        store.load_json("/libs/first", &json!({ "title": "first" }));
        store.load_json("/libs/second", &json!({ "title": "second" }));
        let provider = OverlayProvider::new(
            "/apps/dyn",
            "/conf/dyn",
            store.clone() as Arc<dyn NodeStore>,
            FilterEngine::accept_all(),
            vec!["primaryRef".to_string(), "secondaryRef".to_string()],
        );
        let ctx = ResolveContext::new();

        let resource = provider
            .resolve(&ctx, "/apps/dyn/entry", None)
            .unwrap()
            .unwrap();
        assert_eq!(resource.property_str("title").as_deref(), Some("first"));
    }

    // A link pointing back into its own ancestor chain would recurse
    // forever; such a child is skipped for the population pass.
    #[test]
    fn test_reference_cycle_is_detected_and_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "refA": { "ddrRef": "/libs/b" }
            }),
        );
        store.load_json(
            "/libs/b",
            &json!({
                "title": "B",
                "back": { "ddrRef": "/libs/b" }
            }),
        );
        let provider = reference_provider(&store);
        let ctx = ResolveContext::new();

        // refA itself resolves fine
        let resource = provider
            .resolve(&ctx, "/apps/dyn/refA", None)
            .unwrap()
            .unwrap();
        assert_eq!(resource.property_str("title").as_deref(), Some("B"));

        // its child pointing back at /libs/b is dropped instead of
        // looping forever
        assert!(provider
            .list_children(&ctx, &parent_resource("/apps/dyn/refA"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalidate_picks_up_new_source_children() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();
        let parent = parent_resource("/apps/dyn");

        let before = provider.list_children(&ctx, &parent).unwrap().unwrap();
        assert_eq!(before.len(), 2);

        let mut props = Properties::new();
        props.insert("title".into(), json!("Test-3"));
        store.put("/conf/dyn/test3", props);

        // Children cache still answers from the previous population
        let stale = provider.list_children(&ctx, &parent).unwrap().unwrap();
        assert_eq!(stale.len(), 2);

        provider.invalidate();
        let fresh = provider.list_children(&ctx, &parent).unwrap().unwrap();
        assert_eq!(child_names(&fresh), vec!["test1", "test2", "test3"]);
    }

    #[test]
    fn test_property_changes_visible_without_invalidation() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        provider.resolve(&ctx, "/apps/dyn/test1", None).unwrap();
        let mut props = Properties::new();
        props.insert("title".into(), json!("Renamed"));
        store.put("/conf/dyn/test1", props);

        // Only the reference is cached, never the resource itself
        let resource = provider
            .resolve(&ctx, "/apps/dyn/test1", None)
            .unwrap()
            .unwrap();
        assert_eq!(resource.property_str("title").as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_vanished_source_child_drops_out_of_listing() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();
        let parent = parent_resource("/apps/dyn");

        provider.list_children(&ctx, &parent).unwrap();
        store.remove("/conf/dyn/test2");

        // Stale reference is skipped at render time even before any
        // repopulation happens
        let children = provider.list_children(&ctx, &parent).unwrap().unwrap();
        assert_eq!(child_names(&children), vec!["test1"]);
        assert!(provider
            .resolve(&ctx, "/apps/dyn/test2", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_store_failure_propagates_and_leaves_cache_clean() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();
        let parent = parent_resource("/apps/dyn");

        store.fail_path("/conf/dyn");
        assert!(provider.list_children(&ctx, &parent).is_err());
        assert!(provider.resolve(&ctx, "/apps/dyn/test1", None).is_err());

        // No partial population was cached: the same calls succeed
        // once the store recovers
        store.clear_failures();
        let children = provider.list_children(&ctx, &parent).unwrap().unwrap();
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_at_root_marker_only_on_direct_children() {
        let store = Arc::new(MemoryStore::new());
        store.load_json(
            "/conf/dyn",
            &json!({
                "top": {
                    "nested": { "title": "deep" }
                }
            }),
        );
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        let top = provider.resolve(&ctx, "/apps/dyn/top", None).unwrap().unwrap();
        assert!(top.properties().contains_key(crate::overlay::PROP_AT_ROOT));

        let nested = provider
            .resolve(&ctx, "/apps/dyn/top/nested", None)
            .unwrap()
            .unwrap();
        assert!(!nested.properties().contains_key(crate::overlay::PROP_AT_ROOT));
    }

    #[test]
    fn test_context_store_is_consulted_first() {
        let service_store = Arc::new(MemoryStore::new());
        service_store.put("/conf/dyn", Properties::new());
        let context_store = Arc::new(MemoryStore::new());
        context_store.load_json(
            "/conf/dyn",
            &json!({
                "ctxChild": { "title": "from context" }
            }),
        );
        let provider = provider(&service_store);
        let ctx = ResolveContext::new().with_store(context_store.as_ref());

        let children = provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap()
            .unwrap();
        assert_eq!(child_names(&children), vec!["ctxChild"]);
    }

    #[test]
    fn test_failing_context_store_falls_back_to_service_store() {
        let store = basic_store();
        let context_store = Arc::new(MemoryStore::new());
        let provider = provider(&store);
        let ctx = ResolveContext::new().with_store(context_store.as_ref());

        // Context store has none of the content; the provider's own
        // store still answers
        let resource = provider
            .resolve(&ctx, "/apps/dyn/test1", None)
            .unwrap()
            .unwrap();
        assert_eq!(resource.property_str("title").as_deref(), Some("Test-1"));
    }

    #[test]
    fn test_unrelated_paths_delegate_upstream() {
        let store = basic_store();
        let provider = provider(&store);
        let mut upstream = FixedUpstream::default();
        upstream.resources.insert(
            "/content/somewhere".into(),
            parent_resource("/content/somewhere"),
        );
        let ctx = ResolveContext::new().with_upstream(&upstream);

        assert!(provider
            .resolve(&ctx, "/content/somewhere", None)
            .unwrap()
            .is_some());
        let bare = ResolveContext::new();
        assert!(provider
            .resolve(&bare, "/content/somewhere", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_inactive_provider_answers_nothing() {
        let store = basic_store();
        let provider = provider(&store);
        let ctx = ResolveContext::new();

        provider.deactivate();
        assert!(!provider.is_active());
        assert!(provider
            .resolve(&ctx, "/apps/dyn/test1", None)
            .unwrap()
            .is_none());
        assert!(provider
            .list_children(&ctx, &parent_resource("/apps/dyn"))
            .unwrap()
            .is_none());
    }
}
