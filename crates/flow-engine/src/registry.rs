//! Node kind registry for dynamic behavior resolution
//!
//! Maps kind strings to [`NodeKind`] records so templates can be authored
//! and instanced without hardcoded dispatch. Kind strings are exact and
//! case-sensitive.
//!
//! # Usage
//!
//! ```ignore
//! use flow_engine::NodeRegistry;
//!
//! // Collect every kind registered via inventory::submit! in linked crates
//! let registry = NodeRegistry::with_builtins();
//! let behavior = registry.instantiate("counter", &config)?;
//! ```

use std::collections::HashMap;

use serde_json::Value;

use crate::descriptor::{KindFn, KindMetadata, NodeCategory, NodeKind};
use crate::error::{FlowError, Result};
use crate::node::NodeBehavior;
use crate::types::Pin;

/// Registry of node kinds available to templates
///
/// # Composability
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::with_builtins();
/// registry.merge(embedder_registry); // Add host-specific kinds
/// ```
pub struct NodeRegistry {
    kinds: HashMap<String, NodeKind>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Create a registry holding every kind submitted via
    /// `inventory::submit!(KindFn(...))` in crates linked into this binary
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for entry in inventory::iter::<KindFn> {
            registry.register((entry.0)());
        }
        registry
    }

    /// Register a node kind, replacing any previous entry with the same
    /// kind string
    pub fn register(&mut self, kind: NodeKind) {
        let key = kind.metadata.kind.clone();
        if self.kinds.insert(key.clone(), kind).is_some() {
            log::warn!("Replacing registered node kind '{key}'");
        }
    }

    pub fn get(&self, kind: &str) -> Option<&NodeKind> {
        self.kinds.get(kind)
    }

    /// Get metadata for a kind string
    pub fn get_metadata(&self, kind: &str) -> Option<&KindMetadata> {
        self.kinds.get(kind).map(|k| &k.metadata)
    }

    /// Get all registered metadata
    pub fn all_metadata(&self) -> Vec<&KindMetadata> {
        self.kinds.values().map(|k| &k.metadata).collect()
    }

    /// Get metadata grouped by category
    pub fn metadata_by_category(&self) -> HashMap<NodeCategory, Vec<&KindMetadata>> {
        let mut grouped: HashMap<NodeCategory, Vec<&KindMetadata>> = HashMap::new();
        for kind in self.kinds.values() {
            grouped
                .entry(kind.metadata.category)
                .or_default()
                .push(&kind.metadata);
        }
        grouped
    }

    /// Check if a kind string is registered
    pub fn has_kind(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// List all registered kind strings
    pub fn kind_names(&self) -> Vec<&str> {
        self.kinds.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share a kind
    /// string.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.kinds.extend(other.kinds);
    }

    /// Build the behavior for one node of `kind` from its authored config
    pub fn instantiate(&self, kind: &str, config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let entry = self
            .kinds
            .get(kind)
            .ok_or_else(|| FlowError::UnknownKind(kind.to_string()))?;
        (entry.factory)(config)
    }

    /// Resolve the pin lists for a node of `kind` authored with `config`
    pub fn resolve_pins(&self, kind: &str, config: &Value) -> Option<(Vec<Pin>, Vec<Pin>)> {
        self.kinds
            .get(kind)
            .map(|k| (k.resolve_pins)(&k.metadata, config))
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
