//! Overlay engine
//!
//! The overlay projects a source subtree onto a virtual target path:
//! - reference: where one virtual child really lives
//! - cache: mapping + children caches, one consistency unit
//! - filter: allow/deny projection predicates
//! - resource: read-only projections and the synthetic builder
//! - provider: the lookup/listing state machine tying it together

mod cache;
mod filter;
mod provider;
mod reference;
mod resource;

pub use cache::OverlayCache;
pub use filter::{FilterEngine, FilterMap};
pub use provider::{OverlayProvider, ReferenceTracker, ResolveContext, UpstreamProvider};
pub use reference::Reference;
pub use resource::{Resource, PROP_AT_ROOT, PROP_DYNAMIC};
