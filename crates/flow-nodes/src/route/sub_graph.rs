//! Sub-graph node
//!
//! Owns a nested child instance of another template. The Start pin creates
//! and starts the child through the runtime; every other input pin is
//! forwarded into the child as a custom input, and the child's custom
//! outputs come back as this node's extra output pins. When the child
//! reaches a finish node, the runtime fires this node's first output
//! (`Finish`) and the node completes, removing the child with the Keep
//! policy.
//!
//! The child's event pins are part of the authored config because templates
//! are resolved by name only at instancing time.

use flow_engine::{
    parse_config, FinishPolicy, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory,
    NodeContext, NodeKind, Pin, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for the sub-graph node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubGraphConfig {
    /// Template the child instance is created from. Required.
    pub graph: String,
    /// Allow instancing the template this node itself belongs to. Off by
    /// default because it recurses on every Start signal.
    pub allow_identical: bool,
    /// Custom-input events of the child, surfaced as extra input pins.
    pub event_inputs: Vec<String>,
    /// Custom-output events of the child, surfaced as extra output pins.
    pub event_outputs: Vec<String>,
}

/// Owner of a nested child instance.
#[derive(Debug, Default)]
pub struct SubGraphNode {
    config: SubGraphConfig,
}

impl SubGraphNode {
    /// Input pin creating and starting the child.
    pub const PIN_START: &'static str = "Start";
    /// Output pin fired when the child completes.
    pub const PIN_FINISH: &'static str = "Finish";

    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let config: SubGraphConfig = parse_config(config)?;
        Ok(Box::new(SubGraphNode { config }))
    }

    fn resolve_pins(_metadata: &KindMetadata, config: &Value) -> (Vec<Pin>, Vec<Pin>) {
        let config: SubGraphConfig = parse_config(config).unwrap_or_default();
        let mut inputs = vec![Pin::new(Self::PIN_START)];
        inputs.extend(config.event_inputs.iter().map(|e| Pin::new(e.as_str())));
        let mut outputs = vec![Pin::new(Self::PIN_FINISH)];
        outputs.extend(config.event_outputs.iter().map(|e| Pin::new(e.as_str())));
        (inputs, outputs)
    }

    fn validate(config: &Value) -> Vec<String> {
        let referenced = config
            .get("graph")
            .and_then(Value::as_str)
            .is_some_and(|g| !g.is_empty());
        if referenced {
            Vec::new()
        } else {
            vec!["sub-graph node has no template reference".to_string()]
        }
    }
}

impl KindDescriptor for SubGraphNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "sub-graph",
                "Sub Graph",
                NodeCategory::Route,
                "Runs another template as a nested instance",
            )
            .with_inputs(vec![Pin::new(SubGraphNode::PIN_START)])
            .with_outputs(vec![Pin::new(SubGraphNode::PIN_FINISH)]),
            SubGraphNode::build,
        )
        .with_pin_resolver(SubGraphNode::resolve_pins)
        .with_validator(SubGraphNode::validate)
    }
}

inventory::submit!(flow_engine::KindFn(SubGraphNode::descriptor));

impl NodeBehavior for SubGraphNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        if pin != Self::PIN_START {
            ctx.send_child_custom_input(pin);
            return;
        }
        if !self.config.allow_identical && self.config.graph == ctx.template_name() {
            ctx.log_error(format!(
                "sub-graph node refuses to instance its own template '{}'",
                self.config.graph
            ));
            ctx.finish();
            return;
        }
        ctx.start_sub_graph();
    }

    fn cleanup(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.remove_sub_graph(FinishPolicy::Keep);
    }

    /// A forced finish still reports normal completion downstream.
    fn force_finish(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.trigger_first_output(true);
    }

    fn preload_content(&mut self, ctx: &mut NodeContext<'_>) {
        if !self.config.graph.is_empty() {
            ctx.preload_sub_graph();
        }
    }

    fn flush_content(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.remove_sub_graph(FinishPolicy::Abort);
    }

    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        match ctx.take_saved_child() {
            Some(name) => ctx.load_sub_graph(&name),
            None => ctx.log_note("sub-graph node restored without a saved child"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::{
        ActivationState, FlowRuntime, FlowTemplate, NodeRegistry, Owner, Severity,
    };
    use serde_json::json;

    fn runtime() -> FlowRuntime {
        FlowRuntime::new("overworld", NodeRegistry::with_builtins())
    }

    fn child_template(registry: &NodeRegistry) -> FlowTemplate {
        FlowTemplate::builder("child")
            .node("begin", "start")
            .node("done", "finish")
            .connect("begin", "Out", "done", "In")
            .build(registry)
            .unwrap()
    }

    #[test]
    fn test_resolve_pins_surfaces_child_events() {
        let kind = SubGraphNode::descriptor();
        let config = json!({
            "graph": "child",
            "eventInputs": ["Nudge"],
            "eventOutputs": ["DoorOpened", "DoorClosed"],
        });
        let (inputs, outputs) = (kind.resolve_pins)(&kind.metadata, &config);
        let input_names: Vec<&str> = inputs.iter().map(|p| p.name.as_str()).collect();
        let output_names: Vec<&str> = outputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(input_names, vec!["Start", "Nudge"]);
        assert_eq!(output_names, vec!["Finish", "DoorOpened", "DoorClosed"]);
    }

    #[test]
    fn test_validate_requires_graph() {
        assert!(SubGraphNode::validate(&json!({ "graph": "child" })).is_empty());
        assert_eq!(SubGraphNode::validate(&Value::Null).len(), 1);
    }

    #[test]
    fn test_child_completion_fires_finish_pin() {
        let mut runtime = runtime();
        runtime.register_template(child_template(runtime.registry())).unwrap();
        let parent = FlowTemplate::builder("parent")
            .node("begin", "start")
            .node("door", "sub-graph")
            .with_config(json!({ "graph": "child" }))
            .node("after", "reroute")
            .connect("begin", "Out", "door", "Start")
            .connect("door", "Finish", "after", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(parent).unwrap();

        let id = runtime
            .start_root_instance(&Owner::new("npc-1", "Gatekeeper"), "parent", false)
            .unwrap()
            .unwrap();

        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("door"), Some(ActivationState::Completed));
        assert_eq!(instance.node_state("after"), Some(ActivationState::Completed));
        // the child ran to completion and was torn down
        assert_eq!(runtime.live_instance_count("child"), 0);
        assert!(runtime.sub_instance(id, "door").is_none());
    }

    #[test]
    fn test_refuses_own_template() {
        let mut runtime = runtime();
        let recursive = FlowTemplate::builder("loop")
            .node("begin", "start")
            .node("again", "sub-graph")
            .with_config(json!({ "graph": "loop" }))
            .connect("begin", "Out", "again", "Start")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(recursive).unwrap();

        let id = runtime
            .start_root_instance(&Owner::new("npc-1", "Gatekeeper"), "loop", false)
            .unwrap()
            .unwrap();

        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("again"), Some(ActivationState::Completed));
        assert_eq!(runtime.live_instance_count("loop"), 1);
        let log = runtime.message_log("loop").unwrap();
        assert!(log.with_severity(Severity::Error).count() >= 1);
    }

    #[test]
    fn test_second_start_is_a_no_op_while_child_runs() {
        let mut runtime = runtime();
        // a child that never reaches a finish node stays live
        let lingering = FlowTemplate::builder("child")
            .node("begin", "start")
            .node("wait", "logical-and")
            .connect("begin", "Out", "wait", "0")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(lingering).unwrap();
        let parent = FlowTemplate::builder("parent")
            .node("begin", "start")
            .node("door", "sub-graph")
            .with_config(json!({ "graph": "child" }))
            .connect("begin", "Out", "door", "Start")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(parent).unwrap();

        let id = runtime
            .start_root_instance(&Owner::new("npc-1", "Gatekeeper"), "parent", false)
            .unwrap()
            .unwrap();
        assert_eq!(runtime.live_instance_count("child"), 1);
        let child = runtime.sub_instance(id, "door").unwrap();

        runtime.trigger_node_input(id, "door", "Start");
        assert_eq!(runtime.live_instance_count("child"), 1);
        assert_eq!(runtime.sub_instance(id, "door"), Some(child));
    }

    #[test]
    fn test_event_pins_route_through_the_child() {
        let mut runtime = runtime();
        let child = FlowTemplate::builder("child")
            .node("begin", "start")
            .node("knock", "custom-input")
            .with_config(json!({ "event": "Knock" }))
            .node("opened", "custom-output")
            .with_config(json!({ "event": "DoorOpened" }))
            .connect("knock", "Out", "opened", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(child).unwrap();
        let parent = FlowTemplate::builder("parent")
            .node("begin", "start")
            .node("door", "sub-graph")
            .with_config(json!({
                "graph": "child",
                "eventInputs": ["Knock"],
                "eventOutputs": ["DoorOpened"],
            }))
            .node("react", "reroute")
            .connect("begin", "Out", "door", "Start")
            .connect("door", "DoorOpened", "react", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(parent).unwrap();

        let id = runtime
            .start_root_instance(&Owner::new("npc-1", "Gatekeeper"), "parent", false)
            .unwrap()
            .unwrap();
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("react"), Some(ActivationState::NeverActivated));

        // Knock enters the child as a custom input; its DoorOpened custom
        // output comes back out through the parent pin of the same name
        runtime.trigger_node_input(id, "door", "Knock");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("react"), Some(ActivationState::Completed));
    }
}
