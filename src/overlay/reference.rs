//! Virtual child entries
//!
//! A [`Reference`] records where one virtual child really lives:
//! either a direct 1:1 projection of a source child, or an indirection
//! discovered by following a link property. Only references are
//! cached; the resources built from them are ephemeral.

use serde::{Deserialize, Serialize};

/// One virtual child entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Path of the direct source child
    source: String,
    /// Indirection target, None for a direct projection
    reference: Option<String>,
}

impl Reference {
    /// Direct 1:1 projection of a source child
    pub fn direct(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reference: None,
        }
    }

    /// Indirection from a source child to a different backing node
    pub fn indirect(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        if target == source {
            // A self-pointing link is just a direct projection
            Self {
                source,
                reference: None,
            }
        } else {
            Self {
                source,
                reference: Some(target),
            }
        }
    }

    /// Path of the direct source child
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Backing path to read from, following the indirection if set
    pub fn target(&self) -> &str {
        self.reference.as_deref().unwrap_or(&self.source)
    }

    /// True when this entry points somewhere other than its source
    pub fn is_indirect(&self) -> bool {
        self.reference.is_some()
    }
}
