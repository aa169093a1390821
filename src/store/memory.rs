//! In-memory backing store
//!
//! A complete [`NodeStore`] backed by a path-keyed map, used in tests
//! and as a reference implementation. Whole subtrees can be loaded
//! from nested JSON, mirroring how overlay content fixtures are
//! usually authored.

use super::{
    ChangeCallback, ChangeKind, EventMask, Node, NodeStore, Properties, SubscriptionId,
};
use crate::error::{Error, Result};
use crate::path;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct Subscriber {
    id: SubscriptionId,
    root: String,
    mask: EventMask,
    callback: ChangeCallback,
}

/// In-memory node store with change notification
pub struct MemoryStore {
    /// Absolute path -> properties; BTreeMap keeps child enumeration
    /// in stable path order
    nodes: RwLock<BTreeMap<String, Properties>>,
    /// Registered change subscribers
    subscribers: Mutex<Vec<Subscriber>>,
    /// Prefixes under which reads fail (test failure injection)
    fail_prefixes: RwLock<Vec<String>>,
    next_subscription: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store with just the root node
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Properties::new());
        Self {
            nodes: RwLock::new(nodes),
            subscribers: Mutex::new(Vec::new()),
            fail_prefixes: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Create or replace the node at `path`
    ///
    /// Missing ancestors are created empty. Emits Added or Changed.
    pub fn put(&self, path: &str, properties: Properties) {
        let kind = {
            let mut nodes = self.nodes.write();
            let existed = nodes.contains_key(path);
            if let Some(parent) = path::parent_of(path) {
                let mut ancestor = parent.to_string();
                while !nodes.contains_key(&ancestor) {
                    nodes.insert(ancestor.clone(), Properties::new());
                    match path::parent_of(&ancestor) {
                        Some(p) => ancestor = p.to_string(),
                        None => break,
                    }
                }
            }
            nodes.insert(path.to_string(), properties);
            if existed {
                ChangeKind::Changed
            } else {
                ChangeKind::Added
            }
        };
        self.notify(path, kind);
    }

    /// Remove the node at `path` and its whole subtree
    pub fn remove(&self, path: &str) {
        let removed: Vec<String> = {
            let mut nodes = self.nodes.write();
            let doomed: Vec<String> = nodes
                .keys()
                .filter(|p| path::is_at_or_under(p, path))
                .cloned()
                .collect();
            for p in &doomed {
                nodes.remove(p);
            }
            doomed
        };
        for p in removed {
            self.notify(&p, ChangeKind::Removed);
        }
    }

    /// Load a subtree from nested JSON under `root`
    ///
    /// Object-valued keys become child nodes, everything else becomes
    /// a property of the current node.
    pub fn load_json(&self, root: &str, tree: &Value) {
        let obj = match tree {
            Value::Object(map) => map,
            _ => return,
        };
        let mut properties = Properties::new();
        let mut children: Vec<(&String, &Value)> = Vec::new();
        for (key, value) in obj {
            if value.is_object() {
                children.push((key, value));
            } else {
                properties.insert(key.clone(), value.clone());
            }
        }
        self.put(root, properties);
        for (name, subtree) in children {
            self.load_json(&path::join(root, name), subtree);
        }
    }

    /// Make reads at or under `prefix` fail with a store error
    pub fn fail_path(&self, prefix: &str) {
        self.fail_prefixes.write().push(prefix.to_string());
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.fail_prefixes.write().clear();
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let prefixes = self.fail_prefixes.read();
        for prefix in prefixes.iter() {
            if path::is_at_or_under(path, prefix) {
                return Err(Error::store(path, "injected failure"));
            }
        }
        Ok(())
    }

    fn notify(&self, path: &str, kind: ChangeKind) {
        let subscribers = self.subscribers.lock();
        for sub in subscribers.iter() {
            if sub.mask.matches(kind) && path::is_at_or_under(path, &sub.root) {
                (sub.callback)(path, kind);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<Node>> {
        self.check_failure(path)?;
        Ok(self
            .nodes
            .read()
            .get(path)
            .map(|props| Node::new(path, props.clone())))
    }

    fn children(&self, path: &str) -> Result<Vec<Node>> {
        self.check_failure(path)?;
        let nodes = self.nodes.read();
        Ok(nodes
            .iter()
            .filter(|(p, _)| path::is_under(p, path) && path::parent_of(p) == Some(path))
            .map(|(p, props)| Node::new(p.clone(), props.clone()))
            .collect())
    }

    fn subscribe(&self, root: &str, mask: EventMask, callback: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscribers.lock().push(Subscriber {
            id,
            root: root.to_string(),
            mask,
            callback,
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}
