//! dynres - Declarative dynamic resource overlays
//!
//! This library projects a source subtree of a hierarchical backing
//! store onto a target path as synthetic, read-only resources, with
//! property filtering, reference following and change-driven cache
//! invalidation.

pub mod config;
pub mod error;
pub mod manager;
pub mod overlay;
pub mod path;
pub mod store;

pub use config::Declaration;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Declaration;
    pub use crate::error::{Error, Result};
    pub use crate::manager::{ProviderHandle, RegistrationManager};
    pub use crate::overlay::{
        FilterEngine, FilterMap, OverlayProvider, ResolveContext, Resource,
    };
    pub use crate::store::{MemoryStore, Node, NodeStore, Properties};
}
