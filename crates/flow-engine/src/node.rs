//! Node definitions, runtime node state, and the behavior interface
//!
//! A node is split in three:
//! - [`NodeDef`]: the authored description copied from the template,
//! - [`NodeCore`]: engine-owned runtime state (activation, pin records),
//! - [`NodeBehavior`]: the kind-specific logic built by the kind's factory.
//!
//! Behavior hooks never touch other nodes directly. They read their own
//! state through [`NodeContext`] and queue consequences (propagation,
//! finishing, sub-graph lifecycle) as effects that the runtime applies
//! after the hook returns, preserving signal ordering.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::MessageLog;
use crate::error::Result;
use crate::instance::FlowInstance;
use crate::runtime::Effect;
use crate::types::{
    ActivationKind, ActivationState, Connection, FinishPolicy, InstanceId, NodeId, Owner, Pin,
    PinName, PinRecord, SignalMode,
};

/// Authored description of one node: identity, kind, config, pins, and the
/// connection map from its output pins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    pub id: NodeId,
    /// Kind string resolved through the registry.
    pub kind: String,
    /// Kind-specific authored settings.
    #[serde(default)]
    pub config: Value,
    pub inputs: Vec<Pin>,
    pub outputs: Vec<Pin>,
    /// Output pin name to downstream target. At most one connection per pin.
    #[serde(default)]
    pub connections: HashMap<PinName, Connection>,
    #[serde(default)]
    pub signal_mode: SignalMode,
}

impl NodeDef {
    pub fn has_input_pin(&self, pin: &str) -> bool {
        self.inputs.iter().any(|p| p.name == pin)
    }

    pub fn has_output_pin(&self, pin: &str) -> bool {
        self.outputs.iter().any(|p| p.name == pin)
    }

    pub fn connection(&self, pin: &str) -> Option<&Connection> {
        self.connections.get(pin)
    }

    pub fn first_output_pin(&self) -> Option<&PinName> {
        self.outputs.first().map(|p| &p.name)
    }

    /// Connected output pins in declared pin order.
    pub fn connected_outputs(&self) -> Vec<(&str, &Connection)> {
        self.outputs
            .iter()
            .filter_map(|p| self.connections.get(&p.name).map(|c| (p.name.as_str(), c)))
            .collect()
    }
}

/// Engine-owned runtime state of one node.
#[derive(Debug)]
pub struct NodeCore {
    pub def: NodeDef,
    pub state: ActivationState,
    records: HashMap<PinName, Vec<PinRecord>>,
    /// Instance name of a child captured by the save protocol, consumed by
    /// the owning behavior on load.
    pub(crate) saved_child: Option<String>,
}

impl NodeCore {
    pub(crate) fn new(def: NodeDef) -> Self {
        Self {
            def,
            state: ActivationState::NeverActivated,
            records: HashMap::new(),
            saved_child: None,
        }
    }

    pub fn record_pin(&mut self, pin: &str, kind: ActivationKind) {
        self.records
            .entry(pin.to_string())
            .or_default()
            .push(PinRecord::new(kind));
    }

    /// Activation history of one pin, oldest first.
    pub fn pin_records(&self, pin: &str) -> &[PinRecord] {
        self.records.get(pin).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Clears activation state and every pin record.
    pub fn reset_records(&mut self) {
        self.state = ActivationState::NeverActivated;
        self.records.clear();
        self.saved_child = None;
    }
}

/// One node of a live instance.
pub struct RuntimeNode {
    pub core: NodeCore,
    pub behavior: Box<dyn NodeBehavior>,
}

impl RuntimeNode {
    pub(crate) fn new(def: NodeDef, behavior: Box<dyn NodeBehavior>) -> Self {
        Self {
            core: NodeCore::new(def),
            behavior,
        }
    }

    pub fn id(&self) -> &str {
        &self.core.def.id
    }

    pub fn state(&self) -> ActivationState {
        self.core.state
    }

    pub fn def(&self) -> &NodeDef {
        &self.core.def
    }
}

impl fmt::Debug for RuntimeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeNode")
            .field("id", &self.core.def.id)
            .field("kind", &self.core.def.kind)
            .field("state", &self.core.state)
            .finish_non_exhaustive()
    }
}

/// Kind-specific logic attached to a node.
///
/// Implementations hold only their own working data; everything else is
/// reached through the [`NodeContext`] passed into each hook. Hooks run
/// synchronously on the runtime's thread.
pub trait NodeBehavior: Send {
    /// Concrete logic for an input-pin activation. `pin` has already been
    /// validated and recorded.
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str);

    /// Runs once per transition into Active, before `execute_input`.
    fn on_activate(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Node-specific teardown, invoked when the node finishes.
    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Out-of-band teardown requested by the embedder. Kinds that relay to
    /// downstream nodes usually fire their first output here instead.
    fn force_finish(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.finish();
    }

    /// Whether this node completing also completes the whole instance.
    fn can_finish_graph(&self) -> bool {
        false
    }

    /// Pre-fetches expensive content before the node is reached.
    fn preload_content(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Releases content fetched by `preload_content`.
    fn flush_content(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Serializes kind-specific working data for the save protocol.
    fn save_state(&self) -> Result<Value> {
        Ok(Value::Null)
    }

    /// Restores data produced by `save_state`. Runs before `on_load`.
    fn load_state(&mut self, _state: Value) -> Result<()> {
        Ok(())
    }

    /// Resumes latent work after this node was restored as active.
    fn on_load(&mut self, _ctx: &mut NodeContext<'_>) {}
}

/// Everything a behavior can see and do while one of its hooks runs.
///
/// The node itself is checked out of the instance arena for the duration of
/// the hook, so lookups for the node's own id will miss; behaviors act on
/// other nodes only by triggering pins.
pub struct NodeContext<'a> {
    pub(crate) instance_id: InstanceId,
    pub(crate) node: &'a mut NodeCore,
    pub(crate) instance: &'a mut FlowInstance,
    pub(crate) log: &'a mut MessageLog,
    pub(crate) effects: &'a mut Vec<Effect>,
}

impl NodeContext<'_> {
    pub fn node_id(&self) -> &str {
        &self.node.def.id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn instance_name(&self) -> &str {
        self.instance.name()
    }

    pub fn template_name(&self) -> &str {
        &self.instance.template().name
    }

    pub fn owner(&self) -> &Owner {
        self.instance.owner()
    }

    /// The node's authored config.
    pub fn config(&self) -> &Value {
        &self.node.def.config
    }

    pub fn input_pins(&self) -> &[Pin] {
        &self.node.def.inputs
    }

    pub fn output_pins(&self) -> &[Pin] {
        &self.node.def.outputs
    }

    pub fn connection(&self, pin: &str) -> Option<&Connection> {
        self.node.def.connection(pin)
    }

    pub fn is_output_connected(&self, pin: &str) -> bool {
        self.node.def.connections.contains_key(pin)
    }

    pub fn finish_policy(&self) -> FinishPolicy {
        self.instance.finish_policy()
    }

    /// Event names surfaced by this instance's custom-output nodes.
    pub fn custom_output_events(&self) -> Vec<String> {
        self.instance.custom_output_events()
    }

    /// Child instance name captured for this node by the save protocol.
    pub fn saved_child(&self) -> Option<&str> {
        self.node.saved_child.as_deref()
    }

    pub fn take_saved_child(&mut self) -> Option<String> {
        self.node.saved_child.take()
    }

    /// Activates one of this node's output pins. With `finish`, the node
    /// finishes before the signal reaches the connected node.
    pub fn trigger_output(&mut self, pin: &str, finish: bool) {
        self.trigger_output_kind(pin, finish, ActivationKind::Default);
    }

    pub(crate) fn trigger_output_kind(&mut self, pin: &str, finish: bool, kind: ActivationKind) {
        let valid = self.node.def.has_output_pin(pin);
        if valid {
            self.node.record_pin(pin, kind);
        } else {
            let message = format!("output pin '{pin}' does not exist");
            self.log_error(message);
        }
        if finish {
            self.finish();
        }
        if !valid {
            return;
        }
        if let Some(conn) = self.node.def.connection(pin) {
            self.effects.push(Effect::DeliverInput {
                instance: self.instance_id,
                node: conn.node.clone(),
                pin: conn.pin.clone(),
                kind,
            });
        } else {
            let message = format!("output pin '{pin}' is not connected");
            self.log_note(message);
        }
    }

    /// Activates the first declared output pin, if any.
    pub fn trigger_first_output(&mut self, finish: bool) {
        if let Some(pin) = self.node.def.first_output_pin().cloned() {
            self.trigger_output(&pin, finish);
        }
    }

    /// Finishes this node: terminal state per the instance finish policy,
    /// cleanup hook, removal from the active set. Repeated calls are no-ops.
    pub fn finish(&mut self) {
        self.effects.push(Effect::FinishNode {
            instance: self.instance_id,
            node: self.node.def.id.clone(),
        });
    }

    /// Relays without running node logic: every connected output fires once
    /// with a pass-through record, then the node finishes.
    pub(crate) fn pass_through(&mut self) {
        let pins: Vec<PinName> = self
            .node
            .def
            .connected_outputs()
            .iter()
            .map(|(pin, _)| pin.to_string())
            .collect();
        for pin in pins {
            self.trigger_output_kind(&pin, false, ActivationKind::PassThrough);
        }
        self.finish();
    }

    /// Asks the runtime to create and start this node's child instance.
    pub fn start_sub_graph(&mut self) {
        self.effects.push(Effect::StartSubGraph {
            instance: self.instance_id,
            node: self.node.def.id.clone(),
        });
    }

    /// Asks the runtime to create this node's child instance and preload its
    /// content without starting it.
    pub fn preload_sub_graph(&mut self) {
        self.effects.push(Effect::PreloadSubGraph {
            instance: self.instance_id,
            node: self.node.def.id.clone(),
        });
    }

    /// Tears down this node's child instance, if one is attached.
    pub fn remove_sub_graph(&mut self, policy: FinishPolicy) {
        self.effects.push(Effect::RemoveSubGraph {
            instance: self.instance_id,
            node: self.node.def.id.clone(),
            policy,
        });
    }

    /// Routes an event into this node's child instance as a custom input.
    pub fn send_child_custom_input(&mut self, event: &str) {
        self.effects.push(Effect::ChildCustomInput {
            instance: self.instance_id,
            node: self.node.def.id.clone(),
            event: event.to_string(),
        });
    }

    /// Surfaces an event out of this instance: to the owning sub-graph node
    /// when nested, or to the event sink when this instance is a root.
    pub fn emit_custom_output(&mut self, event: &str) {
        self.effects.push(Effect::CustomOutputRouted {
            instance: self.instance_id,
            event: event.to_string(),
        });
    }

    /// Re-attaches and restores a child instance saved under `name`.
    pub fn load_sub_graph(&mut self, name: &str) {
        self.effects.push(Effect::LoadSubGraph {
            instance: self.instance_id,
            node: self.node.def.id.clone(),
            name: name.to_string(),
        });
    }

    /// Captures the whole runtime into a save and publishes it as a
    /// checkpoint event.
    pub fn request_checkpoint(&mut self) {
        self.effects.push(Effect::Checkpoint {
            instance: self.instance_id,
        });
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log.error(
            message,
            Some(self.node.def.id.as_str()),
            Some(self.instance.name()),
        );
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log.warning(
            message,
            Some(self.node.def.id.as_str()),
            Some(self.instance.name()),
        );
    }

    pub fn log_note(&mut self, message: impl Into<String>) {
        self.log.note(
            message,
            Some(self.node.def.id.as_str()),
            Some(self.instance.name()),
        );
    }
}
