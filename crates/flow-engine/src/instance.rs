//! Live instances of templates
//!
//! An instance owns a full runtime copy of its template's nodes plus the
//! execution state the save protocol captures: which nodes are active, which
//! were ever activated, and per-pin activation records. Instances never run
//! themselves; the runtime drives them through the signal pump.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::node::RuntimeNode;
use crate::registry::NodeRegistry;
use crate::template::FlowTemplate;
use crate::types::{ActivationState, FinishPolicy, InstanceId, NodeId, Owner, PinRecord};

/// A transient, owner-scoped runtime copy of a template.
pub struct FlowInstance {
    name: String,
    template: Arc<FlowTemplate>,
    owner: Owner,
    /// Node arena. Nodes are temporarily checked out while one of their
    /// behavior hooks runs.
    pub(crate) nodes: HashMap<NodeId, RuntimeNode>,
    /// Nodes currently executing, in activation order.
    pub(crate) active: Vec<NodeId>,
    /// Nodes activated at least once since the last reset.
    pub(crate) recorded: Vec<NodeId>,
    /// Entry candidates in authored order.
    start_nodes: Vec<NodeId>,
    /// (event name, node) pairs for custom-event dispatch.
    custom_inputs: Vec<(String, NodeId)>,
    custom_outputs: Vec<(String, NodeId)>,
    /// How still-active nodes are treated when the instance finishes.
    pub(crate) finish_policy: FinishPolicy,
    /// Present when a sub-graph node owns this instance.
    pub(crate) owning_node: Option<(InstanceId, NodeId)>,
    /// Nodes whose content was preloaded and not yet flushed.
    pub(crate) preloaded: Vec<NodeId>,
}

impl FlowInstance {
    /// Builds every node of `template` through the registry.
    pub(crate) fn new(
        name: String,
        template: Arc<FlowTemplate>,
        owner: Owner,
        registry: &NodeRegistry,
    ) -> Result<Self> {
        let mut nodes = HashMap::with_capacity(template.nodes.len());
        let mut start_nodes = Vec::new();
        let mut custom_inputs = Vec::new();
        let mut custom_outputs = Vec::new();

        for def in &template.nodes {
            let metadata = registry
                .get_metadata(&def.kind)
                .ok_or_else(|| FlowError::UnknownKind(def.kind.clone()))?;
            if metadata.start {
                start_nodes.push(def.id.clone());
            }
            let event = def
                .config
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if metadata.custom_input && !event.is_empty() {
                custom_inputs.push((event.to_string(), def.id.clone()));
            }
            if metadata.custom_output && !event.is_empty() {
                custom_outputs.push((event.to_string(), def.id.clone()));
            }

            let behavior = registry
                .instantiate(&def.kind, &def.config)
                .map_err(|e| FlowError::InvalidConfig {
                    node: def.id.clone(),
                    message: e.to_string(),
                })?;
            nodes.insert(def.id.clone(), RuntimeNode::new(def.clone(), behavior));
        }

        Ok(Self {
            name,
            template,
            owner,
            nodes,
            active: Vec::new(),
            recorded: Vec::new(),
            start_nodes,
            custom_inputs,
            custom_outputs,
            finish_policy: FinishPolicy::Keep,
            owning_node: None,
            preloaded: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &FlowTemplate {
        &self.template
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Read-only view of the active set, in activation order.
    pub fn active_nodes(&self) -> &[NodeId] {
        &self.active
    }

    /// Read-only view of every node activated since the last reset.
    pub fn recorded_nodes(&self) -> &[NodeId] {
        &self.recorded
    }

    /// Whether execution has ever reached a node.
    pub fn has_started(&self) -> bool {
        !self.recorded.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&RuntimeNode> {
        self.nodes.get(id)
    }

    pub fn node_state(&self, id: &str) -> Option<ActivationState> {
        self.nodes.get(id).map(|n| n.core.state)
    }

    /// Activation history for one pin of one node, oldest first.
    pub fn pin_records(&self, node: &str, pin: &str) -> &[PinRecord] {
        self.nodes
            .get(node)
            .map(|n| n.core.pin_records(pin))
            .unwrap_or(&[])
    }

    pub fn finish_policy(&self) -> FinishPolicy {
        self.finish_policy
    }

    /// Whether a sub-graph node owns this instance.
    pub fn is_sub_instance(&self) -> bool {
        self.owning_node.is_some()
    }

    /// Entry rule: the first start-kind node with at least one connection,
    /// else the first start-kind node at all.
    pub(crate) fn entry_node(&self) -> Option<NodeId> {
        self.start_nodes
            .iter()
            .find(|id| {
                self.nodes
                    .get(*id)
                    .is_some_and(|n| !n.core.def.connections.is_empty())
            })
            .or_else(|| self.start_nodes.first())
            .cloned()
    }

    /// Custom-input nodes listening for `event`, in authored order.
    pub(crate) fn custom_input_nodes(&self, event: &str) -> Vec<NodeId> {
        self.custom_inputs
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Event names surfaced by this instance's custom-output nodes.
    pub fn custom_output_events(&self) -> Vec<String> {
        self.custom_outputs
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn mark_active(&mut self, id: &str) {
        if !self.active.iter().any(|n| n == id) {
            self.active.push(id.to_string());
        }
        self.record_node(id);
    }

    pub(crate) fn record_node(&mut self, id: &str) {
        if !self.recorded.iter().any(|n| n == id) {
            self.recorded.push(id.to_string());
        }
    }

    pub(crate) fn remove_active(&mut self, id: &str) {
        self.active.retain(|n| n != id);
    }

    /// Returns every recorded node to NeverActivated and clears both sets.
    pub(crate) fn reset_nodes(&mut self) {
        for id in &self.recorded {
            if let Some(node) = self.nodes.get_mut(id) {
                node.core.reset_records();
            }
        }
        self.active.clear();
        self.recorded.clear();
    }

    /// Rebuilds set membership for one node after its activation state was
    /// restored from a save record.
    pub(crate) fn on_activation_state_loaded(&mut self, id: &str) {
        match self.node_state(id) {
            Some(ActivationState::Active) => self.mark_active(id),
            Some(ActivationState::Completed) | Some(ActivationState::Aborted) => {
                self.record_node(id)
            }
            _ => {}
        }
    }
}
