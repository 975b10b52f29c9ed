//! Templates: authored, immutable graph definitions
//!
//! A template is the long-lived artifact instances are stamped from. It owns
//! node definitions only; execution state lives entirely in instances.
//! Templates are built either programmatically through [`TemplateBuilder`]
//! or by deserializing authored JSON, in which case
//! [`validate_template`](crate::validation::validate_template) should run
//! before the template is registered.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::node::NodeDef;
use crate::registry::NodeRegistry;
use crate::types::{Connection, NodeId, SignalMode};

/// Authored graph definition. Immutable once built; instances copy its
/// nodes wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowTemplate {
    pub name: String,
    /// World-bound templates only restore from saves made in the same world.
    #[serde(default)]
    pub world_bound: bool,
    /// Nodes in authored order. Order matters: it breaks entry-node ties and
    /// fixes numbered-pin fan-out order.
    pub nodes: Vec<NodeDef>,
}

impl FlowTemplate {
    pub fn builder(name: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder::new(name)
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().map(|n| &n.id)
    }
}

struct PendingNode {
    id: String,
    kind: String,
    config: Value,
    signal_mode: SignalMode,
}

/// Fluent authoring API
///
/// Connections are declared as a flat edge list and harvested into per-node
/// connection maps by [`build`](Self::build):
///
/// ```ignore
/// let template = FlowTemplate::builder("gate-quest")
///     .node("start", "start")
///     .node("door", "sub-graph")
///     .with_config(json!({ "graph": "door-dialogue" }))
///     .connect("start", "Out", "door", "Start")
///     .build(&registry)?;
/// ```
pub struct TemplateBuilder {
    name: String,
    world_bound: bool,
    nodes: Vec<PendingNode>,
    edges: Vec<(NodeId, String, NodeId, String)>,
}

impl TemplateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            world_bound: false,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Binds instances of this template to the world they were saved in.
    pub fn world_bound(mut self) -> Self {
        self.world_bound = true;
        self
    }

    /// Add a node with a default (null) config
    pub fn node(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.nodes.push(PendingNode {
            id: id.into(),
            kind: kind.into(),
            config: Value::Null,
            signal_mode: SignalMode::Enabled,
        });
        self
    }

    /// Set the config of the most recently added node
    pub fn with_config(mut self, config: Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.config = config;
        }
        self
    }

    /// Set the signal mode of the most recently added node
    pub fn with_signal_mode(mut self, mode: SignalMode) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.signal_mode = mode;
        }
        self
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(mut self, id: &str) -> Self {
        self.nodes.retain(|n| n.id != id);
        self.edges.retain(|(from, _, to, _)| from != id && to != id);
        self
    }

    /// Add an edge from an output pin to an input pin
    pub fn connect(
        mut self,
        from: impl Into<String>,
        from_pin: impl Into<String>,
        to: impl Into<String>,
        to_pin: impl Into<String>,
    ) -> Self {
        self.edges
            .push((from.into(), from_pin.into(), to.into(), to_pin.into()));
        self
    }

    /// Resolve pins through the registry and harvest the edge list into
    /// per-node connection maps.
    ///
    /// Fails on unknown kinds, duplicate node ids, edges from undeclared
    /// pins, and more than one edge per output pin. Edges to unknown nodes
    /// are kept: the runtime drops signals to missing nodes silently, and
    /// the validation pass reports them.
    pub fn build(self, registry: &NodeRegistry) -> Result<FlowTemplate> {
        let invalid = |message: String| FlowError::InvalidTemplate {
            template: self.name.clone(),
            message,
        };

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for pending in &self.nodes {
            let (inputs, outputs) = registry
                .resolve_pins(&pending.kind, &pending.config)
                .ok_or_else(|| FlowError::UnknownKind(pending.kind.clone()))?;
            nodes.push(NodeDef {
                id: pending.id.clone(),
                kind: pending.kind.clone(),
                config: pending.config.clone(),
                inputs,
                outputs,
                connections: HashMap::new(),
                signal_mode: pending.signal_mode,
            });
        }

        for (from, from_pin, to, to_pin) in &self.edges {
            let source = nodes
                .iter_mut()
                .find(|n| &n.id == from)
                .ok_or_else(|| invalid(format!("edge from unknown node '{from}'")))?;
            if !source.has_output_pin(from_pin) {
                return Err(invalid(format!(
                    "node '{from}' has no output pin '{from_pin}'"
                )));
            }
            let replaced = source
                .connections
                .insert(from_pin.clone(), Connection::new(to.clone(), to_pin.clone()));
            if replaced.is_some() {
                return Err(invalid(format!(
                    "output pin '{from_pin}' of node '{from}' has more than one connection"
                )));
            }
        }

        Ok(FlowTemplate {
            name: self.name,
            world_bound: self.world_bound,
            nodes,
        })
    }
}
