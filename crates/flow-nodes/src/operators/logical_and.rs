//! Logical AND node
//!
//! Fires its output once every distinct numbered input has received at least
//! one signal. Repeat signals on a pin that already fired do not advance the
//! gate; the runtime keeps the node in the active set either way, so the
//! node tracks its own pin bookkeeping.

use std::collections::HashSet;

use flow_engine::{
    parse_config, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind,
    Pin, Result, DEFAULT_OUTPUT_PIN,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Configuration for the logical AND node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogicalAndConfig {
    /// Number of numbered input pins that must all fire.
    pub inputs: usize,
}

impl Default for LogicalAndConfig {
    fn default() -> Self {
        Self { inputs: 2 }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LogicalAndState {
    seen: Vec<String>,
}

/// Waits until every input pin has fired.
#[derive(Debug, Default)]
pub struct LogicalAndNode {
    seen: HashSet<String>,
}

impl LogicalAndNode {
    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let _: LogicalAndConfig = parse_config(config)?;
        Ok(Box::new(LogicalAndNode::default()))
    }

    fn resolve_pins(_metadata: &KindMetadata, config: &Value) -> (Vec<Pin>, Vec<Pin>) {
        let config: LogicalAndConfig = parse_config(config).unwrap_or_default();
        (Pin::numbered(config.inputs), vec![Pin::new(DEFAULT_OUTPUT_PIN)])
    }
}

impl KindDescriptor for LogicalAndNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "logical-and",
                "Logical AND",
                NodeCategory::Operators,
                "Fires once every input has fired",
            ),
            LogicalAndNode::build,
        )
        .with_pin_resolver(LogicalAndNode::resolve_pins)
    }
}

inventory::submit!(flow_engine::KindFn(LogicalAndNode::descriptor));

impl NodeBehavior for LogicalAndNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        if !self.seen.insert(pin.to_string()) {
            return;
        }
        if self.seen.len() >= ctx.input_pins().len() {
            ctx.trigger_first_output(true);
        }
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {
        self.seen.clear();
    }

    fn save_state(&self) -> Result<Value> {
        let mut seen: Vec<&String> = self.seen.iter().collect();
        seen.sort();
        Ok(json!({ "seen": seen }))
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        let state: LogicalAndState = parse_config(&state)?;
        self.seen = state.seen.into_iter().collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::{ActivationState, FlowRuntime, FlowTemplate, NodeRegistry, Owner};

    fn gate_runtime() -> (FlowRuntime, flow_engine::InstanceId) {
        let mut runtime = FlowRuntime::new("overworld", NodeRegistry::with_builtins());
        let template = FlowTemplate::builder("gate")
            .node("begin", "start")
            .node("both", "logical-and")
            .node("after", "reroute")
            .connect("both", "Out", "after", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();
        let id = runtime
            .start_root_instance(&Owner::new("o1", "Owner"), "gate", false)
            .unwrap()
            .unwrap();
        (runtime, id)
    }

    #[test]
    fn test_resolve_pins_numbers_inputs() {
        let kind = LogicalAndNode::descriptor();
        let (inputs, outputs) = (kind.resolve_pins)(&kind.metadata, &json!({ "inputs": 3 }));
        let names: Vec<&str> = inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["0", "1", "2"]);
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_waits_for_every_input() {
        let (mut runtime, id) = gate_runtime();
        runtime.trigger_node_input(id, "both", "0");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("both"), Some(ActivationState::Active));
        assert_eq!(instance.node_state("after"), Some(ActivationState::NeverActivated));

        runtime.trigger_node_input(id, "both", "1");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("both"), Some(ActivationState::Completed));
        assert_eq!(instance.node_state("after"), Some(ActivationState::Completed));
    }

    #[test]
    fn test_repeat_signals_do_not_advance_the_gate() {
        let (mut runtime, id) = gate_runtime();
        runtime.trigger_node_input(id, "both", "0");
        runtime.trigger_node_input(id, "both", "0");
        runtime.trigger_node_input(id, "both", "0");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("both"), Some(ActivationState::Active));
        assert!(instance.pin_records("both", "Out").is_empty());
    }

    #[test]
    fn test_state_round_trip() {
        let mut node = LogicalAndNode {
            seen: HashSet::from(["0".to_string()]),
        };
        let saved = node.save_state().unwrap();
        assert_eq!(saved, json!({ "seen": ["0"] }));

        node.seen.clear();
        node.load_state(saved).unwrap();
        assert!(node.seen.contains("0"));
    }
}
