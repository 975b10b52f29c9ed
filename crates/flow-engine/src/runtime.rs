//! The runtime: single owner of every live instance
//!
//! All execution funnels through the signal pump. Behavior hooks and public
//! operations queue [`Effect`]s; the pump drains them off a stack, reversing
//! each batch of emissions so traversal is depth-first with siblings in
//! declared order. A signal's full onward cascade therefore completes before
//! its sibling runs, and a node that finishes while triggering an output is
//! terminal before the receiving node sees the signal.
//!
//! While a hook runs, its node is checked out of the instance arena and
//! handed to the hook as [`NodeContext`]; because hooks only queue effects,
//! no two nodes are ever checked out at once, and loops back into the
//! emitting node land after it has been put back.
//!
//! Everything here is synchronous and single-threaded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::diagnostics::MessageLog;
use crate::error::{FlowError, Result};
use crate::events::{EventSink, FlowEvent, NullEventSink};
use crate::instance::FlowInstance;
use crate::node::{NodeBehavior, NodeContext, RuntimeNode};
use crate::registry::NodeRegistry;
use crate::save::{
    ComponentEnvelope, ComponentSaveData, GraphEnvelope, GraphSaveData, NodeEnvelope,
    NodeSaveData, SaveGame,
};
use crate::template::FlowTemplate;
use crate::types::{
    ActivationKind, ActivationState, FinishPolicy, InstanceId, NodeId, Owner, SignalMode,
};

/// One queued consequence of a behavior hook or a public operation.
#[derive(Debug, Clone)]
pub(crate) enum Effect {
    /// Deliver a signal to one input pin.
    DeliverInput {
        instance: InstanceId,
        node: NodeId,
        pin: String,
        kind: ActivationKind,
    },
    /// Finish one node. Idempotent.
    FinishNode { instance: InstanceId, node: NodeId },
    /// Run a node's force-finish hook.
    ForceFinishNode { instance: InstanceId, node: NodeId },
    /// Finish a whole instance, deactivating whatever is still active.
    FinishInstance {
        instance: InstanceId,
        policy: FinishPolicy,
        remove: bool,
    },
    /// Drop a finished instance from the runtime.
    Deinitialize { instance: InstanceId },
    /// Reset an instance and fire its entry node.
    StartExecution { instance: InstanceId },
    /// Deliver a named event to an instance's custom-input nodes.
    CustomInput { instance: InstanceId, event: String },
    /// Route a surfaced event to the owning sub-graph node or the event sink.
    CustomOutputRouted { instance: InstanceId, event: String },
    /// Create (or adopt a preloaded) child instance for a sub-graph node and
    /// start it.
    StartSubGraph { instance: InstanceId, node: NodeId },
    /// Create a child instance for a sub-graph node and preload its content.
    PreloadSubGraph { instance: InstanceId, node: NodeId },
    /// Detach a sub-graph node's child instance and finish it.
    RemoveSubGraph {
        instance: InstanceId,
        node: NodeId,
        policy: FinishPolicy,
    },
    /// Forward an event into a sub-graph node's child instance.
    ChildCustomInput {
        instance: InstanceId,
        node: NodeId,
        event: String,
    },
    /// A child instance completed; fire the owning node's first output.
    CompleteSubGraphNode { instance: InstanceId, node: NodeId },
    /// Re-create and restore a child instance from the loaded save.
    LoadSubGraph {
        instance: InstanceId,
        node: NodeId,
        name: String,
    },
    /// Capture the whole runtime into a checkpoint event.
    Checkpoint { instance: InstanceId },
}

/// Owner of templates, instances, and the signal pump.
pub struct FlowRuntime {
    world_name: String,
    registry: NodeRegistry,
    event_sink: Arc<dyn EventSink>,
    templates: HashMap<String, Arc<FlowTemplate>>,
    instances: HashMap<InstanceId, FlowInstance>,
    /// Instances started directly by owners, in start order.
    roots: Vec<InstanceId>,
    /// (parent instance, sub-graph node) to child instance.
    sub_instances: HashMap<(InstanceId, NodeId), InstanceId>,
    /// Live-instance counts per template. A template's message log lives
    /// exactly as long as its count is non-zero.
    instance_counts: HashMap<String, usize>,
    logs: HashMap<String, MessageLog>,
    /// Save adopted from the embedder, consumed lazily by load operations.
    loaded_save: Option<SaveGame>,
    next_instance: u64,
}

impl FlowRuntime {
    pub fn new(world_name: impl Into<String>, registry: NodeRegistry) -> Self {
        Self {
            world_name: world_name.into(),
            registry,
            event_sink: Arc::new(NullEventSink),
            templates: HashMap::new(),
            instances: HashMap::new(),
            roots: Vec::new(),
            sub_instances: HashMap::new(),
            instance_counts: HashMap::new(),
            logs: HashMap::new(),
            loaded_save: None,
            next_instance: 1,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn world_name(&self) -> &str {
        &self.world_name
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Mutable registry access, for kinds registered after construction.
    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    // ---- templates ----

    /// Register a template under its name. Names are unique.
    pub fn register_template(&mut self, template: FlowTemplate) -> Result<()> {
        if self.templates.contains_key(&template.name) {
            return Err(FlowError::DuplicateTemplate(template.name));
        }
        self.templates.insert(template.name.clone(), Arc::new(template));
        Ok(())
    }

    /// Drop a template. Fails while instances of it are live.
    pub fn unregister_template(&mut self, name: &str) -> Result<()> {
        if self.live_instance_count(name) > 0 {
            return Err(FlowError::failed(format!(
                "template '{name}' still has live instances"
            )));
        }
        self.templates.remove(name);
        Ok(())
    }

    pub fn template(&self, name: &str) -> Option<&FlowTemplate> {
        self.templates.get(name).map(Arc::as_ref)
    }

    pub fn template_names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    // ---- instances ----

    pub fn instance(&self, id: InstanceId) -> Option<&FlowInstance> {
        self.instances.get(&id)
    }

    /// Root instances in start order.
    pub fn root_instances(&self) -> &[InstanceId] {
        &self.roots
    }

    /// Child instance attached to a sub-graph node, if any.
    pub fn sub_instance(&self, parent: InstanceId, node: &str) -> Option<InstanceId> {
        self.sub_instances.get(&(parent, node.to_string())).copied()
    }

    pub fn live_instance_count(&self, template: &str) -> usize {
        self.instance_counts.get(template).copied().unwrap_or(0)
    }

    /// Message log for a template. Present while the template has live
    /// instances.
    pub fn message_log(&self, template: &str) -> Option<&MessageLog> {
        self.logs.get(template)
    }

    /// Starts a root instance of `template` on behalf of `owner` and runs it
    /// until the signal cascade settles.
    ///
    /// Returns `Ok(None)` when the start is rejected: the owner already runs
    /// a root instance of this template, or the template is live elsewhere
    /// and `allow_multiple` is false. Rejections are logged as warnings.
    pub fn start_root_instance(
        &mut self,
        owner: &Owner,
        template: &str,
        allow_multiple: bool,
    ) -> Result<Option<InstanceId>> {
        let Some(id) = self.create_root(owner, template, allow_multiple, None)? else {
            return Ok(None);
        };
        self.pump(vec![Effect::StartExecution { instance: id }]);
        Ok(Some(id))
    }

    /// Finishes the root instance of `template` owned by `owner`, if one is
    /// live.
    pub fn finish_root_instance(&mut self, owner: &Owner, template: &str, policy: FinishPolicy) {
        let found = self.roots.iter().copied().find(|id| {
            self.instances
                .get(id)
                .is_some_and(|i| i.owner().id == owner.id && i.template().name == template)
        });
        match found {
            Some(id) => self.pump(vec![Effect::FinishInstance {
                instance: id,
                policy,
                remove: true,
            }]),
            None => log::debug!(
                "No root instance of '{template}' for owner '{}' to finish",
                owner.id
            ),
        }
    }

    /// Finishes every root instance owned by `owner`.
    pub fn finish_all_root_instances(&mut self, owner: &Owner, policy: FinishPolicy) {
        let effects: Vec<Effect> = self
            .roots
            .iter()
            .copied()
            .filter(|id| {
                self.instances
                    .get(id)
                    .is_some_and(|i| i.owner().id == owner.id)
            })
            .map(|id| Effect::FinishInstance {
                instance: id,
                policy,
                remove: true,
            })
            .collect();
        self.pump(effects);
    }

    /// Tears down every live instance, e.g. on world shutdown.
    pub fn abort_all_instances(&mut self) {
        let effects: Vec<Effect> = self
            .roots
            .clone()
            .into_iter()
            .map(|id| Effect::FinishInstance {
                instance: id,
                policy: FinishPolicy::Abort,
                remove: true,
            })
            .collect();
        self.pump(effects);
        // children whose parent is already gone are finished directly
        let leftovers: Vec<InstanceId> = self.instances.keys().copied().collect();
        for id in leftovers {
            self.pump(vec![Effect::FinishInstance {
                instance: id,
                policy: FinishPolicy::Abort,
                remove: true,
            }]);
        }
    }

    /// Delivers a named event to every matching custom-input node of the
    /// instance.
    pub fn trigger_custom_input(&mut self, instance: InstanceId, event: &str) {
        self.pump(vec![Effect::CustomInput {
            instance,
            event: event.to_string(),
        }]);
    }

    /// Delivers an input-pin signal from outside the graph. Latent node
    /// callbacks re-enter execution through this.
    pub fn trigger_node_input(&mut self, instance: InstanceId, node: &str, pin: &str) {
        self.pump(vec![Effect::DeliverInput {
            instance,
            node: node.to_string(),
            pin: pin.to_string(),
            kind: ActivationKind::Default,
        }]);
    }

    /// Same as [`trigger_node_input`](Self::trigger_node_input) but records
    /// the activation as forced, for debugging tools.
    pub fn force_trigger_node_input(&mut self, instance: InstanceId, node: &str, pin: &str) {
        self.pump(vec![Effect::DeliverInput {
            instance,
            node: node.to_string(),
            pin: pin.to_string(),
            kind: ActivationKind::Forced,
        }]);
    }

    /// Asks an active node to wrap up out-of-band.
    pub fn force_finish_node(&mut self, instance: InstanceId, node: &str) {
        self.pump(vec![Effect::ForceFinishNode {
            instance,
            node: node.to_string(),
        }]);
    }

    /// Runs the content-preload hook of every node in the instance.
    pub fn preload_instance(&mut self, instance: InstanceId) {
        let mut out = Vec::new();
        self.preload_nodes(instance, &mut out);
        self.pump(out);
    }

    // ---- save and load ----

    /// Captures every root instance (children included, depth-first) into
    /// `save`, replacing records previously bound to this world.
    pub fn capture_save(&mut self, save: &mut SaveGame) -> Result<()> {
        save.purge_world(&self.world_name);
        let roots: Vec<InstanceId> = self.roots.clone();
        let mut records = Vec::new();
        let mut components = Vec::new();
        for id in roots {
            let name = self.save_instance_into(id, &mut records)?;
            let Some(instance) = self.instances.get(&id) else {
                continue;
            };
            let owner = instance.owner();
            if owner.component {
                let envelope = ComponentEnvelope {
                    saved_instance_name: name,
                    template: instance.template().name.clone(),
                };
                components.push(ComponentSaveData {
                    world_name: self.world_name.clone(),
                    actor_instance_name: owner.name.clone(),
                    component_data: serde_json::to_value(envelope)?,
                });
            }
        }
        save.narrative_instances.append(&mut records);
        save.narrative_components.append(&mut components);
        Ok(())
    }

    /// Adopts a save for lazy restoration. Owners pull their own instances
    /// out of it through [`load_root_instance`](Self::load_root_instance) or
    /// [`restore_component_owner`](Self::restore_component_owner).
    pub fn adopt_save(&mut self, save: SaveGame) {
        self.loaded_save = Some(save);
    }

    pub fn loaded_save(&self) -> Option<&SaveGame> {
        self.loaded_save.as_ref()
    }

    /// Save record for a component-backed owner, if the adopted save has one
    /// for this world.
    pub fn saved_component_record(&self, owner: &Owner) -> Option<&ComponentSaveData> {
        self.loaded_save
            .as_ref()?
            .find_component(&owner.name, &self.world_name)
    }

    /// Restores a saved root instance by name for `owner`.
    ///
    /// Returns `Ok(None)` when the adopted save has no matching record for
    /// this world, or when the start is rejected as a duplicate.
    pub fn load_root_instance(
        &mut self,
        owner: &Owner,
        template: &str,
        saved_name: &str,
    ) -> Result<Option<InstanceId>> {
        let record = self
            .loaded_save
            .as_ref()
            .and_then(|s| s.find_instance(saved_name, &self.world_name))
            .cloned();
        let Some(record) = record else {
            log::warn!("No saved instance '{saved_name}' to restore");
            return Ok(None);
        };
        let Some(id) = self.create_root(owner, template, false, Some(saved_name.to_string()))?
        else {
            return Ok(None);
        };
        let mut out = Vec::new();
        if let Err(err) = self.load_instance_record(id, &record, &mut out) {
            // a malformed record must not leave a half-restored instance
            self.pump(vec![Effect::FinishInstance {
                instance: id,
                policy: FinishPolicy::Abort,
                remove: true,
            }]);
            return Err(err);
        }
        self.pump(out);
        Ok(Some(id))
    }

    /// Lazy restoration for component-backed owners: restores the root
    /// instance their component record remembers, if any.
    pub fn restore_component_owner(
        &mut self,
        owner: &Owner,
        template: &str,
    ) -> Result<Option<InstanceId>> {
        let Some(record) = self.saved_component_record(owner) else {
            return Ok(None);
        };
        let envelope: ComponentEnvelope = serde_json::from_value(record.component_data.clone())
            .map_err(|e| FlowError::SaveData(format!("malformed component record: {e}")))?;
        self.load_root_instance(owner, template, &envelope.saved_instance_name)
    }

    // ---- instance creation ----

    fn create_root(
        &mut self,
        owner: &Owner,
        template: &str,
        allow_multiple: bool,
        name: Option<String>,
    ) -> Result<Option<InstanceId>> {
        let duplicate = self.roots.iter().any(|id| {
            self.instances
                .get(id)
                .is_some_and(|i| i.owner().id == owner.id && i.template().name == template)
        });
        if duplicate {
            log::warn!(
                "Owner '{}' already runs a root instance of '{template}'; start rejected",
                owner.id
            );
            return Ok(None);
        }
        if !allow_multiple && self.live_instance_count(template) > 0 {
            log::warn!(
                "Template '{template}' is already instanced and does not allow multiple instances"
            );
            return Ok(None);
        }
        let id = self.create_instance(owner.clone(), template, name)?;
        self.roots.push(id);
        Ok(Some(id))
    }

    fn create_instance(
        &mut self,
        owner: Owner,
        template_name: &str,
        name: Option<String>,
    ) -> Result<InstanceId> {
        let template = self
            .templates
            .get(template_name)
            .cloned()
            .ok_or_else(|| FlowError::TemplateNotFound(template_name.to_string()))?;
        let name = name.unwrap_or_else(|| format!("{}-{}", template.name, Uuid::new_v4()));
        let instance = FlowInstance::new(name, Arc::clone(&template), owner, &self.registry)?;

        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        *self.instance_counts.entry(template.name.clone()).or_insert(0) += 1;
        self.logs.entry(template.name.clone()).or_default();
        self.instances.insert(id, instance);
        Ok(id)
    }

    /// Creates the child instance of a sub-graph node from the node's
    /// `graph` config entry.
    fn create_sub_instance(
        &mut self,
        parent: InstanceId,
        node_id: &str,
        name: Option<String>,
    ) -> Result<InstanceId> {
        let (template_name, owner) = {
            let instance = self
                .instances
                .get(&parent)
                .ok_or_else(|| FlowError::failed(format!("instance {parent} is gone")))?;
            let node = instance
                .node(node_id)
                .ok_or_else(|| FlowError::failed(format!("node '{node_id}' is gone")))?;
            let template_name = node
                .core
                .def
                .config
                .get("graph")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (template_name, instance.owner().clone())
        };
        if template_name.is_empty() {
            return Err(FlowError::failed(
                "sub-graph node has no template reference",
            ));
        }
        let child = self.create_instance(owner, &template_name, name)?;
        self.sub_instances.insert((parent, node_id.to_string()), child);
        Ok(child)
    }

    fn link_sub_graph(&mut self, parent: InstanceId, node_id: &str, child: InstanceId) {
        if let Some(instance) = self.instances.get_mut(&child) {
            instance.owning_node = Some((parent, node_id.to_string()));
        }
    }

    // ---- the signal pump ----

    /// Drains `initial` and everything it spawns. Effects are handed over in
    /// program order; each handler's emissions are pushed in reverse so the
    /// stack pops them depth-first with siblings in order.
    fn pump(&mut self, initial: Vec<Effect>) {
        let mut stack: Vec<Effect> = initial.into_iter().rev().collect();
        let mut budget = self.signal_budget();
        let mut frame: Vec<Effect> = Vec::new();
        while let Some(effect) = stack.pop() {
            if budget == 0 {
                log::error!(
                    "Signal budget exhausted; dropping {} queued signals",
                    stack.len() + 1
                );
                break;
            }
            budget -= 1;
            frame.clear();
            self.apply(effect, &mut frame);
            stack.extend(frame.drain(..).rev());
        }
    }

    /// Cycles are legal, so propagation is bounded instead of acyclic.
    fn signal_budget(&self) -> usize {
        let nodes: usize = self.instances.values().map(|i| i.nodes.len()).sum();
        (nodes * 64).max(10_000)
    }

    fn apply(&mut self, effect: Effect, out: &mut Vec<Effect>) {
        match effect {
            Effect::DeliverInput {
                instance,
                node,
                pin,
                kind,
            } => self.deliver_input(instance, &node, &pin, kind, out),
            Effect::FinishNode { instance, node } => self.finish_node(instance, &node, out),
            Effect::ForceFinishNode { instance, node } => {
                self.force_finish_node_now(instance, &node, out)
            }
            Effect::FinishInstance {
                instance,
                policy,
                remove,
            } => self.finish_instance(instance, policy, remove, out),
            Effect::Deinitialize { instance } => self.deinitialize_instance(instance),
            Effect::StartExecution { instance } => self.start_execution(instance, out),
            Effect::CustomInput { instance, event } => self.custom_input(instance, &event, out),
            Effect::CustomOutputRouted { instance, event } => {
                self.route_custom_output(instance, &event, out)
            }
            Effect::StartSubGraph { instance, node } => {
                self.start_sub_graph(instance, &node, out)
            }
            Effect::PreloadSubGraph { instance, node } => {
                self.preload_sub_graph(instance, &node, out)
            }
            Effect::RemoveSubGraph {
                instance,
                node,
                policy,
            } => self.remove_sub_graph(instance, &node, policy, out),
            Effect::ChildCustomInput {
                instance,
                node,
                event,
            } => self.child_custom_input(instance, &node, &event, out),
            Effect::CompleteSubGraphNode { instance, node } => {
                self.complete_sub_graph_node(instance, &node, out)
            }
            Effect::LoadSubGraph {
                instance,
                node,
                name,
            } => self.load_sub_graph(instance, &node, &name, out),
            Effect::Checkpoint { instance } => self.capture_checkpoint(instance),
        }
    }

    /// Checks `node_id` out of its arena and runs `f` on it. Emissions land
    /// in `out` in emission order.
    fn with_node_frame(
        &mut self,
        iid: InstanceId,
        node_id: &str,
        out: &mut Vec<Effect>,
        f: impl FnOnce(&mut dyn NodeBehavior, &mut NodeContext<'_>),
    ) -> bool {
        let Some(instance) = self.instances.get_mut(&iid) else {
            return false;
        };
        let Some(node) = instance.nodes.remove(node_id) else {
            return false;
        };
        let template = instance.template().name.clone();
        let RuntimeNode { mut core, mut behavior } = node;
        let log = self.logs.entry(template).or_default();
        let mut ctx = NodeContext {
            instance_id: iid,
            node: &mut core,
            instance,
            log,
            effects: out,
        };
        f(behavior.as_mut(), &mut ctx);
        drop(ctx);
        if let Some(instance) = self.instances.get_mut(&iid) {
            let id = core.def.id.clone();
            instance.nodes.insert(id, RuntimeNode { core, behavior });
        }
        true
    }

    fn template_log(&mut self, template: &str) -> &mut MessageLog {
        self.logs.entry(template.to_string()).or_default()
    }

    /// (template name, instance name) for diagnostics.
    fn instance_context(&self, iid: InstanceId) -> (String, String) {
        self.instances
            .get(&iid)
            .map(|i| (i.template().name.clone(), i.name().to_string()))
            .unwrap_or_default()
    }

    fn emit(&self, event: FlowEvent) {
        if let Err(err) = self.event_sink.send(event) {
            log::warn!("Event sink rejected event: {err}");
        }
    }

    // ---- effect handlers ----

    fn deliver_input(
        &mut self,
        iid: InstanceId,
        node_id: &str,
        pin: &str,
        kind: ActivationKind,
        out: &mut Vec<Effect>,
    ) {
        let Some(instance) = self.instances.get(&iid) else {
            return;
        };
        // stale connection targets drop silently
        let Some(node) = instance.node(node_id) else {
            return;
        };
        let mode = node.core.def.signal_mode;
        let pin_known = node.core.def.has_input_pin(pin);
        let was_active = node.core.state == ActivationState::Active;
        let template = instance.template().name.clone();
        let iname = instance.name().to_string();

        if !pin_known {
            self.template_log(&template).error(
                format!("input pin '{pin}' does not exist"),
                Some(node_id),
                Some(&iname),
            );
            return;
        }

        match mode {
            SignalMode::Disabled => {
                if let Some(instance) = self.instances.get_mut(&iid) {
                    if let Some(node) = instance.nodes.get_mut(node_id) {
                        node.core.record_pin(pin, kind);
                    }
                    instance.record_node(node_id);
                }
                self.template_log(&template).note(
                    "node is disabled; signal dropped",
                    Some(node_id),
                    Some(&iname),
                );
            }
            SignalMode::Enabled => {
                if let Some(instance) = self.instances.get_mut(&iid) {
                    instance.mark_active(node_id);
                }
                let pin = pin.to_string();
                self.with_node_frame(iid, node_id, out, |behavior, ctx| {
                    if !was_active {
                        behavior.on_activate(ctx);
                    }
                    ctx.node.state = ActivationState::Active;
                    ctx.node.record_pin(&pin, kind);
                    behavior.execute_input(ctx, &pin);
                });
            }
            SignalMode::PassThrough => {
                if let Some(instance) = self.instances.get_mut(&iid) {
                    instance.mark_active(node_id);
                }
                self.template_log(&template).note(
                    "pass-through node; relaying signal",
                    Some(node_id),
                    Some(&iname),
                );
                let pin = pin.to_string();
                self.with_node_frame(iid, node_id, out, |_, ctx| {
                    ctx.node.record_pin(&pin, kind);
                    ctx.pass_through();
                });
            }
        }
    }

    fn finish_node(&mut self, iid: InstanceId, node_id: &str, out: &mut Vec<Effect>) {
        let Some(instance) = self.instances.get(&iid) else {
            return;
        };
        let Some(node) = instance.node(node_id) else {
            return;
        };
        if node.core.state.is_terminal() {
            return;
        }
        let terminal = match instance.finish_policy() {
            FinishPolicy::Keep => ActivationState::Completed,
            FinishPolicy::Abort => ActivationState::Aborted,
        };
        self.with_node_frame(iid, node_id, out, |behavior, ctx| {
            ctx.node.state = terminal;
            behavior.cleanup(ctx);
        });

        let Some(instance) = self.instances.get_mut(&iid) else {
            return;
        };
        instance.remove_active(node_id);
        let finishes_graph = instance
            .node(node_id)
            .map(|n| n.behavior.can_finish_graph())
            .unwrap_or(false);
        if finishes_graph {
            match instance.owning_node.clone() {
                Some((parent, parent_node)) => out.push(Effect::CompleteSubGraphNode {
                    instance: parent,
                    node: parent_node,
                }),
                None => out.push(Effect::FinishInstance {
                    instance: iid,
                    policy: FinishPolicy::Keep,
                    remove: true,
                }),
            }
        }
    }

    fn force_finish_node_now(&mut self, iid: InstanceId, node_id: &str, out: &mut Vec<Effect>) {
        let active = self
            .instances
            .get(&iid)
            .and_then(|i| i.node(node_id))
            .map(|n| n.core.state == ActivationState::Active)
            .unwrap_or(false);
        if !active {
            return;
        }
        self.with_node_frame(iid, node_id, out, |behavior, ctx| behavior.force_finish(ctx));
    }

    fn finish_instance(
        &mut self,
        iid: InstanceId,
        policy: FinishPolicy,
        remove: bool,
        out: &mut Vec<Effect>,
    ) {
        let Some(instance) = self.instances.get_mut(&iid) else {
            return;
        };
        instance.finish_policy = policy;
        let active: Vec<NodeId> = instance.active.clone();
        let name = instance.name().to_string();
        let terminal = match policy {
            FinishPolicy::Keep => ActivationState::Completed,
            FinishPolicy::Abort => ActivationState::Aborted,
        };

        // deactivation is idempotent and order-independent
        for node_id in active {
            let running = self
                .instances
                .get(&iid)
                .and_then(|i| i.node(&node_id))
                .map(|n| !n.core.state.is_terminal())
                .unwrap_or(false);
            if !running {
                continue;
            }
            self.with_node_frame(iid, &node_id, out, |behavior, ctx| {
                ctx.node.state = terminal;
                behavior.cleanup(ctx);
            });
        }
        if let Some(instance) = self.instances.get_mut(&iid) {
            instance.active.clear();
        }

        // release content still held by preloaded nodes
        let preloaded: Vec<NodeId> = self
            .instances
            .get_mut(&iid)
            .map(|i| i.preloaded.drain(..).collect())
            .unwrap_or_default();
        for node_id in preloaded {
            self.with_node_frame(iid, &node_id, out, |behavior, ctx| {
                behavior.flush_content(ctx);
            });
        }

        self.emit(FlowEvent::InstanceFinished {
            instance: iid,
            name,
            policy,
        });
        if remove {
            out.push(Effect::Deinitialize { instance: iid });
        }
    }

    fn deinitialize_instance(&mut self, iid: InstanceId) {
        let Some(instance) = self.instances.remove(&iid) else {
            return;
        };
        self.roots.retain(|id| *id != iid);

        // drop links in both directions
        let orphaned: Vec<InstanceId> = self
            .sub_instances
            .iter()
            .filter(|((parent, _), _)| *parent == iid)
            .map(|(_, child)| *child)
            .collect();
        for child in orphaned {
            if let Some(c) = self.instances.get_mut(&child) {
                c.owning_node = None;
            }
        }
        self.sub_instances
            .retain(|(parent, _), child| *parent != iid && *child != iid);

        let template = instance.template().name.to_string();
        if let Some(count) = self.instance_counts.get_mut(&template) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.instance_counts.remove(&template);
                self.logs.remove(&template);
            }
        }
    }

    fn start_execution(&mut self, iid: InstanceId, out: &mut Vec<Effect>) {
        let entry = {
            let Some(instance) = self.instances.get_mut(&iid) else {
                return;
            };
            instance.reset_nodes();
            instance.finish_policy = FinishPolicy::Keep;
            let entry = instance.entry_node();
            if let Some(entry) = &entry {
                instance.record_node(entry);
            }
            entry
        };
        let (template, iname) = self.instance_context(iid);
        let Some(entry) = entry else {
            self.template_log(&template).warning(
                "template has no start node; instance is inert",
                None,
                Some(&iname),
            );
            return;
        };
        let owner = self
            .instances
            .get(&iid)
            .map(|i| i.owner().id.clone())
            .unwrap_or_default();
        self.emit(FlowEvent::InstanceStarted {
            instance: iid,
            name: iname,
            template,
            owner,
        });
        self.with_node_frame(iid, &entry, out, |_, ctx| ctx.trigger_first_output(true));
    }

    fn custom_input(&mut self, iid: InstanceId, event: &str, out: &mut Vec<Effect>) {
        let Some(instance) = self.instances.get(&iid) else {
            return;
        };
        let nodes = instance.custom_input_nodes(event);
        if nodes.is_empty() {
            log::debug!(
                "No custom input named '{event}' in instance '{}'",
                instance.name()
            );
            return;
        }
        let event = event.to_string();
        for node_id in nodes {
            if let Some(instance) = self.instances.get_mut(&iid) {
                instance.record_node(&node_id);
            }
            self.with_node_frame(iid, &node_id, out, |behavior, ctx| {
                behavior.execute_input(ctx, &event);
            });
        }
    }

    fn route_custom_output(&mut self, iid: InstanceId, event: &str, out: &mut Vec<Effect>) {
        let owning = self.instances.get(&iid).map(|i| i.owning_node.clone());
        match owning {
            Some(Some((parent, node))) => {
                let event = event.to_string();
                self.with_node_frame(parent, &node, out, |_, ctx| {
                    ctx.trigger_output(&event, false);
                });
            }
            Some(None) => {
                let name = self
                    .instances
                    .get(&iid)
                    .map(|i| i.name().to_string())
                    .unwrap_or_default();
                self.emit(FlowEvent::CustomOutput {
                    instance: iid,
                    name,
                    event: event.to_string(),
                });
            }
            None => {}
        }
    }

    fn start_sub_graph(&mut self, iid: InstanceId, node_id: &str, out: &mut Vec<Effect>) {
        let key = (iid, node_id.to_string());
        if let Some(&child) = self.sub_instances.get(&key) {
            let started = self
                .instances
                .get(&child)
                .map(|c| c.has_started())
                .unwrap_or(false);
            if started {
                log::debug!("Sub-graph node '{node_id}' already has a running child");
                return;
            }
            // adopt a child that was created by preloading
            self.link_sub_graph(iid, node_id, child);
            out.push(Effect::StartExecution { instance: child });
            return;
        }
        match self.create_sub_instance(iid, node_id, None) {
            Ok(child) => {
                self.link_sub_graph(iid, node_id, child);
                out.push(Effect::StartExecution { instance: child });
            }
            Err(err) => {
                let (template, iname) = self.instance_context(iid);
                self.template_log(&template).error(
                    format!("failed to start sub-graph: {err}"),
                    Some(node_id),
                    Some(&iname),
                );
                out.push(Effect::FinishNode {
                    instance: iid,
                    node: node_id.to_string(),
                });
            }
        }
    }

    fn preload_sub_graph(&mut self, iid: InstanceId, node_id: &str, out: &mut Vec<Effect>) {
        if self.sub_instances.contains_key(&(iid, node_id.to_string())) {
            return;
        }
        match self.create_sub_instance(iid, node_id, None) {
            // created but deliberately not linked; a later start adopts it
            Ok(child) => self.preload_nodes(child, out),
            Err(err) => {
                let (template, iname) = self.instance_context(iid);
                self.template_log(&template).warning(
                    format!("failed to preload sub-graph: {err}"),
                    Some(node_id),
                    Some(&iname),
                );
            }
        }
    }

    fn remove_sub_graph(
        &mut self,
        iid: InstanceId,
        node_id: &str,
        policy: FinishPolicy,
        out: &mut Vec<Effect>,
    ) {
        let Some(child) = self.sub_instances.remove(&(iid, node_id.to_string())) else {
            return;
        };
        if let Some(instance) = self.instances.get_mut(&child) {
            instance.owning_node = None;
        }
        out.push(Effect::FinishInstance {
            instance: child,
            policy,
            remove: true,
        });
    }

    fn child_custom_input(
        &mut self,
        iid: InstanceId,
        node_id: &str,
        event: &str,
        out: &mut Vec<Effect>,
    ) {
        let Some(&child) = self.sub_instances.get(&(iid, node_id.to_string())) else {
            log::debug!("Sub-graph node '{node_id}' has no child to forward '{event}' to");
            return;
        };
        out.push(Effect::CustomInput {
            instance: child,
            event: event.to_string(),
        });
    }

    fn complete_sub_graph_node(&mut self, iid: InstanceId, node_id: &str, out: &mut Vec<Effect>) {
        self.with_node_frame(iid, node_id, out, |_, ctx| ctx.trigger_first_output(true));
    }

    fn load_sub_graph(
        &mut self,
        iid: InstanceId,
        node_id: &str,
        name: &str,
        out: &mut Vec<Effect>,
    ) {
        let record = self
            .loaded_save
            .as_ref()
            .and_then(|s| s.find_instance(name, &self.world_name))
            .cloned();
        let Some(record) = record else {
            let (template, iname) = self.instance_context(iid);
            self.template_log(&template).warning(
                format!("no saved sub-graph instance '{name}'"),
                Some(node_id),
                Some(&iname),
            );
            return;
        };
        match self.create_sub_instance(iid, node_id, Some(name.to_string())) {
            Ok(child) => {
                self.link_sub_graph(iid, node_id, child);
                if let Err(err) = self.load_instance_record(child, &record, out) {
                    let (template, iname) = self.instance_context(iid);
                    self.template_log(&template).error(
                        format!("failed to restore sub-graph instance '{name}': {err}"),
                        Some(node_id),
                        Some(&iname),
                    );
                }
            }
            Err(err) => {
                let (template, iname) = self.instance_context(iid);
                self.template_log(&template).error(
                    format!("failed to re-create sub-graph instance '{name}': {err}"),
                    Some(node_id),
                    Some(&iname),
                );
            }
        }
    }

    fn capture_checkpoint(&mut self, iid: InstanceId) {
        let mut save = SaveGame::new();
        match self.capture_save(&mut save) {
            Ok(()) => self.emit(FlowEvent::CheckpointCaptured {
                save: Box::new(save),
            }),
            Err(err) => {
                let (template, iname) = self.instance_context(iid);
                self.template_log(&template).error(
                    format!("checkpoint capture failed: {err}"),
                    None,
                    Some(&iname),
                );
            }
        }
    }

    // ---- save/load internals ----

    /// Captures one instance, children first so the parent record can
    /// reference them by name. Returns the instance name.
    fn save_instance_into(
        &mut self,
        iid: InstanceId,
        out: &mut Vec<GraphSaveData>,
    ) -> Result<String> {
        let order = self.execution_order(iid);
        let (iname, template_name, world_bound) = {
            let instance = self
                .instances
                .get(&iid)
                .ok_or_else(|| FlowError::SaveData(format!("instance {iid} is gone")))?;
            (
                instance.name().to_string(),
                instance.template().name.clone(),
                instance.template().world_bound,
            )
        };
        self.emit(FlowEvent::InstanceSaved {
            instance: iid,
            name: iname.clone(),
        });

        let mut records = Vec::new();
        for node_id in order {
            let active = self
                .instances
                .get(&iid)
                .and_then(|i| i.node(&node_id))
                .map(|n| n.core.state == ActivationState::Active)
                .unwrap_or(false);
            if !active {
                continue;
            }
            let child = self.sub_instances.get(&(iid, node_id.clone())).copied();
            let saved_child = match child {
                Some(child) => Some(self.save_instance_into(child, out)?),
                None => None,
            };
            let Some(instance) = self.instances.get_mut(&iid) else {
                continue;
            };
            let Some(node) = instance.nodes.get_mut(&node_id) else {
                continue;
            };
            node.core.saved_child = saved_child.clone();
            let payload = node.behavior.save_state()?;
            let envelope = NodeEnvelope {
                state: node.core.state,
                saved_child,
                payload,
            };
            records.push(NodeSaveData {
                node_id: node_id.clone(),
                node_data: serde_json::to_value(envelope)?,
            });
        }

        let graph_data = serde_json::to_value(GraphEnvelope {
            template: template_name,
        })?;
        out.push(GraphSaveData {
            world_name: if world_bound {
                self.world_name.clone()
            } else {
                String::new()
            },
            instance_name: iname.clone(),
            graph_data,
            node_records: records,
        });
        Ok(iname)
    }

    /// Nodes reachable from the entry node and the custom-input nodes,
    /// depth-first with siblings in pin order. This is the save order.
    fn execution_order(&self, iid: InstanceId) -> Vec<NodeId> {
        let Some(instance) = self.instances.get(&iid) else {
            return Vec::new();
        };
        let mut seeds: Vec<NodeId> = Vec::new();
        if let Some(entry) = instance.entry_node() {
            seeds.push(entry);
        }
        for def in &instance.template().nodes {
            if self
                .registry
                .get_metadata(&def.kind)
                .is_some_and(|m| m.custom_input)
            {
                seeds.push(def.id.clone());
            }
        }

        let mut order = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        for seed in seeds {
            let mut stack = vec![seed];
            while let Some(id) = stack.pop() {
                if !visited.insert(id.clone()) {
                    continue;
                }
                let Some(node) = instance.node(&id) else {
                    continue;
                };
                order.push(id);
                for (_, conn) in node.core.def.connected_outputs().iter().rev() {
                    if !visited.contains(&conn.node) {
                        stack.push(conn.node.clone());
                    }
                }
            }
        }
        order
    }

    /// Restores one instance from its save record: every node record is
    /// applied in reverse save order first, then each restored active node
    /// runs its load behavior in that same order.
    fn load_instance_record(
        &mut self,
        iid: InstanceId,
        record: &GraphSaveData,
        out: &mut Vec<Effect>,
    ) -> Result<()> {
        let (template_name, iname) = {
            let instance = self
                .instances
                .get(&iid)
                .ok_or_else(|| FlowError::SaveData(format!("instance {iid} is gone")))?;
            (instance.template().name.clone(), instance.name().to_string())
        };
        let envelope: GraphEnvelope = serde_json::from_value(record.graph_data.clone())
            .map_err(|e| FlowError::SaveData(format!("malformed instance record: {e}")))?;
        if envelope.template != template_name {
            self.template_log(&template_name).warning(
                format!("save record was written by template '{}'", envelope.template),
                None,
                Some(&iname),
            );
        }
        if let Some(instance) = self.instances.get_mut(&iid) {
            instance.reset_nodes();
        }

        let mut restored: Vec<NodeId> = Vec::new();
        for node_record in record.node_records.iter().rev() {
            let known = self
                .instances
                .get(&iid)
                .is_some_and(|i| i.node(&node_record.node_id).is_some());
            if !known {
                // records of nodes removed from the template are skipped
                self.template_log(&template_name).note(
                    format!("save record references unknown node '{}'", node_record.node_id),
                    None,
                    Some(&iname),
                );
                continue;
            }
            let envelope = NodeEnvelope::from_value(&node_record.node_data)?;
            if let Some(instance) = self.instances.get_mut(&iid) {
                if let Some(node) = instance.nodes.get_mut(&node_record.node_id) {
                    node.core.state = envelope.state;
                    node.core.saved_child = envelope.saved_child;
                    node.behavior.load_state(envelope.payload)?;
                }
                instance.on_activation_state_loaded(&node_record.node_id);
            }
            restored.push(node_record.node_id.clone());
        }

        for node_id in restored {
            let state = self
                .instances
                .get(&iid)
                .and_then(|i| i.node(&node_id))
                .map(|n| (n.core.state, n.core.def.signal_mode));
            let Some((state, mode)) = state else {
                continue;
            };
            if state != ActivationState::Active {
                continue;
            }
            match mode {
                SignalMode::Enabled => {
                    self.with_node_frame(iid, &node_id, out, |behavior, ctx| {
                        behavior.on_load(ctx);
                    });
                }
                SignalMode::Disabled => {
                    self.template_log(&template_name).note(
                        "node was disabled since the save; finishing",
                        Some(&node_id),
                        Some(&iname),
                    );
                    out.push(Effect::FinishNode {
                        instance: iid,
                        node: node_id,
                    });
                }
                SignalMode::PassThrough => {
                    self.template_log(&template_name).note(
                        "node became pass-through since the save; relaying",
                        Some(&node_id),
                        Some(&iname),
                    );
                    self.with_node_frame(iid, &node_id, out, |_, ctx| ctx.pass_through());
                }
            }
        }

        self.emit(FlowEvent::InstanceLoaded {
            instance: iid,
            name: iname,
        });
        Ok(())
    }

    /// Runs the preload hook of every node not yet preloaded.
    fn preload_nodes(&mut self, iid: InstanceId, out: &mut Vec<Effect>) {
        let ids: Vec<NodeId> = self
            .instances
            .get(&iid)
            .map(|i| i.template().nodes.iter().map(|n| n.id.clone()).collect())
            .unwrap_or_default();
        for id in ids {
            let done = self
                .instances
                .get(&iid)
                .map(|i| i.preloaded.iter().any(|p| *p == id))
                .unwrap_or(true);
            if done {
                continue;
            }
            self.with_node_frame(iid, &id, out, |behavior, ctx| behavior.preload_content(ctx));
            if let Some(instance) = self.instances.get_mut(&iid) {
                instance.preloaded.push(id);
            }
        }
    }
}
