//! Registration manager
//!
//! Watches a configuration root for overlay declarations, keeps one
//! [`OverlayProvider`] registered per valid declaration and
//! re-dispatches backing store change notifications: declaration edits
//! refresh the affected provider, changes under followed reference
//! targets invalidate the provider that recorded them. A single bad
//! declaration never prevents registration of the others.

use crate::config::Declaration;
use crate::error::{Error, Result};
use crate::overlay::{FilterEngine, FilterMap, OverlayProvider, ReferenceTracker};
use crate::path;
use crate::store::{ChangeKind, EventMask, NodeStore, SubscriptionId, ACL_CHILD_NAME};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Opaque handle of one registered provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderHandle(u64);

/// Reverse-reference table shared between the manager and its providers
///
/// Population records every followed link target here; a later change
/// below such a target invalidates the recording provider's caches.
#[derive(Default)]
struct ReferenceTable {
    /// Referenced path -> target roots of the providers that followed it
    entries: DashMap<String, Vec<String>>,
}

impl ReferenceTable {
    /// Target roots interested in a change at `path`
    fn interested(&self, path: &str) -> Vec<String> {
        let mut roots = Vec::new();
        for entry in self.entries.iter() {
            if path::is_at_or_under(path, entry.key()) {
                for root in entry.value() {
                    if !roots.contains(root) {
                        roots.push(root.clone());
                    }
                }
            }
        }
        roots
    }

    fn forget_target_root(&self, target_root: &str) {
        self.entries.retain(|_, roots| {
            roots.retain(|r| r != target_root);
            !roots.is_empty()
        });
    }
}

impl ReferenceTracker for ReferenceTable {
    fn add_reference(&self, target_root: &str, referenced_path: &str) {
        let mut roots = self.entries.entry(referenced_path.to_string()).or_default();
        if !roots.iter().any(|r| r == target_root) {
            roots.push(target_root.to_string());
        }
    }
}

/// Owns the set of live overlay providers
pub struct RegistrationManager {
    store: Arc<dyn NodeStore>,
    /// Root under which declaration nodes live (direct children)
    config_root: String,
    providers: DashMap<u64, Arc<OverlayProvider>>,
    by_declaration: DashMap<String, u64>,
    by_target_root: DashMap<String, u64>,
    references: Arc<ReferenceTable>,
    next_handle: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl RegistrationManager {
    pub fn new(store: Arc<dyn NodeStore>, config_root: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            store,
            config_root: config_root.into(),
            providers: DashMap::new(),
            by_declaration: DashMap::new(),
            by_target_root: DashMap::new(),
            references: Arc::new(ReferenceTable::default()),
            next_handle: AtomicU64::new(1),
            subscription: Mutex::new(None),
        })
    }

    /// Discover existing declarations and start watching for changes
    pub fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting declaration discovery under '{}'", self.config_root);
        for child in self.store.children(&self.config_root)? {
            if child.name() == ACL_CHILD_NAME {
                continue;
            }
            let decl_path = child.path().to_string();
            if let Err(e) = self.refresh_declaration(&decl_path) {
                warn!("Skipping declaration '{}': {}", decl_path, e);
            }
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = self.store.subscribe(
            "/",
            EventMask::all(),
            Arc::new(move |changed, kind| {
                if let Some(manager) = weak.upgrade() {
                    manager.on_change(changed, kind);
                }
            }),
        );
        *self.subscription.lock() = Some(id);
        Ok(())
    }

    /// Register a provider directly, outside declaration discovery
    pub fn register_provider(
        &self,
        target_root: impl Into<String>,
        source_root: impl Into<String>,
        allowed: FilterMap,
        prohibited: FilterMap,
        followed_links: Vec<String>,
    ) -> ProviderHandle {
        let provider = Arc::new(
            OverlayProvider::new(
                target_root,
                source_root,
                self.store.clone(),
                FilterEngine::new(allowed, prohibited),
                followed_links,
            )
            .with_tracker(self.references.clone() as Arc<dyn ReferenceTracker>),
        );
        self.install(provider, None)
    }

    /// Unregister and deactivate one provider
    pub fn unregister_provider(&self, handle: ProviderHandle) -> Result<()> {
        let (_, provider) = self
            .providers
            .remove(&handle.0)
            .ok_or(Error::UnknownHandle(handle.0))?;
        provider.deactivate();
        self.by_target_root
            .remove_if(provider.target_root(), |_, id| *id == handle.0);
        self.by_declaration.retain(|_, id| *id != handle.0);
        self.references.forget_target_root(provider.target_root());
        info!(
            "Unregistered overlay provider for '{}'",
            provider.target_root()
        );
        Ok(())
    }

    /// Force cache invalidation for one provider
    pub fn update(&self, handle: ProviderHandle) -> Result<()> {
        let provider = self.provider(handle).ok_or(Error::UnknownHandle(handle.0))?;
        debug!("Invalidating caches of '{}'", provider.target_root());
        provider.invalidate();
        Ok(())
    }

    /// Look up a registered provider
    pub fn provider(&self, handle: ProviderHandle) -> Option<Arc<OverlayProvider>> {
        self.providers.get(&handle.0).map(|p| p.clone())
    }

    /// Handle registered for a declaration path, if any
    pub fn handle_for_declaration(&self, declaration_path: &str) -> Option<ProviderHandle> {
        self.by_declaration
            .get(declaration_path)
            .map(|id| ProviderHandle(*id))
    }

    /// Number of live providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Unregister everything and stop watching
    pub fn shutdown(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.store.unsubscribe(id);
        }
        let handles: Vec<u64> = self.providers.iter().map(|e| *e.key()).collect();
        for id in handles {
            if let Err(e) = self.unregister_provider(ProviderHandle(id)) {
                warn!("Shutdown unregister failed: {}", e);
            }
        }
    }

    /// Re-run discovery for a single declaration
    ///
    /// Reads the declaration node and swaps in a freshly built
    /// provider under the existing handle, so edited filters and link
    /// lists take effect while registration state stays put. A vanished
    /// or now-invalid declaration unregisters its provider.
    pub fn refresh_declaration(&self, declaration_path: &str) -> Result<()> {
        let node = match self.store.get(declaration_path)? {
            Some(node) => node,
            None => {
                self.unregister_declaration(declaration_path);
                return Ok(());
            }
        };
        let declaration = match Declaration::from_node(&node) {
            Ok(d) => d,
            Err(e) => {
                self.unregister_declaration(declaration_path);
                return Err(e);
            }
        };
        let provider = Arc::new(
            OverlayProvider::new(
                declaration.target_root.clone(),
                declaration.source_root.clone(),
                self.store.clone(),
                FilterEngine::new(declaration.allowed.clone(), declaration.prohibited.clone()),
                declaration.followed_links.clone(),
            )
            .with_tracker(self.references.clone() as Arc<dyn ReferenceTracker>),
        );
        let handle = self.install(provider, Some(declaration_path));
        info!(
            "Registered overlay '{}' -> '{}' (declaration '{}', handle {:?})",
            declaration.source_root, declaration.target_root, declaration_path, handle
        );
        Ok(())
    }

    fn install(&self, provider: Arc<OverlayProvider>, declaration: Option<&str>) -> ProviderHandle {
        let id = match declaration.and_then(|d| self.by_declaration.get(d).map(|v| *v)) {
            Some(existing) => {
                // Same registration, fresh provider
                if let Some(old) = self.providers.insert(existing, provider.clone()) {
                    old.deactivate();
                    self.references.forget_target_root(old.target_root());
                }
                existing
            }
            None => {
                let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
                self.providers.insert(id, provider.clone());
                id
            }
        };
        if let Some(decl) = declaration {
            self.by_declaration.insert(decl.to_string(), id);
        }
        self.by_target_root
            .insert(provider.target_root().to_string(), id);
        ProviderHandle(id)
    }

    fn unregister_declaration(&self, declaration_path: &str) {
        if let Some((_, id)) = self.by_declaration.remove(declaration_path) {
            if let Err(e) = self.unregister_provider(ProviderHandle(id)) {
                warn!("Unregister for '{}' failed: {}", declaration_path, e);
            }
        }
    }

    /// Nearest declaration ancestor of a changed path
    fn declaration_of<'a>(&self, changed: &'a str) -> Option<&'a str> {
        if !path::is_under(changed, &self.config_root) {
            return None;
        }
        let mut cursor = changed;
        while let Some(parent) = path::parent_of(cursor) {
            if parent == self.config_root {
                return Some(cursor);
            }
            cursor = parent;
        }
        None
    }

    fn on_change(&self, changed: &str, kind: ChangeKind) {
        if let Some(declaration) = self.declaration_of(changed) {
            debug!(
                "Declaration change ({:?} at '{}'), refreshing '{}'",
                kind, changed, declaration
            );
            if kind == ChangeKind::Removed && changed == declaration {
                self.unregister_declaration(declaration);
            } else {
                let declaration = declaration.to_string();
                if let Err(e) = self.refresh_declaration(&declaration) {
                    warn!("Refresh of declaration '{}' failed: {}", declaration, e);
                }
            }
            return;
        }
        for target_root in self.references.interested(changed) {
            if let Some(id) = self.by_target_root.get(&target_root).map(|v| *v) {
                if let Some(provider) = self.providers.get(&id) {
                    debug!(
                        "Change at '{}' under a followed reference, invalidating '{}'",
                        changed, target_root
                    );
                    provider.invalidate();
                }
            }
        }
    }
}

impl Drop for RegistrationManager {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.lock().take() {
            self.store.unsubscribe(id);
        }
    }
}
