//! Logical OR node
//!
//! Any numbered input relays to the output while the gate is enabled, up to
//! a configurable execution limit. Enable resets the spent count, Disable
//! finishes the gate.

use flow_engine::{
    parse_config, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind,
    Pin, Result, DEFAULT_OUTPUT_PIN,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Configuration for the logical OR node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogicalOrConfig {
    /// Number of numbered input pins.
    pub inputs: usize,
    /// How many signals may relay before the gate finishes. 0 is unlimited.
    pub execution_limit: usize,
}

impl Default for LogicalOrConfig {
    fn default() -> Self {
        Self {
            inputs: 2,
            execution_limit: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LogicalOrState {
    enabled: bool,
    count: usize,
}

impl Default for LogicalOrState {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 0,
        }
    }
}

/// Relays any input to the output while enabled.
#[derive(Debug)]
pub struct LogicalOrNode {
    config: LogicalOrConfig,
    enabled: bool,
    count: usize,
}

impl LogicalOrNode {
    /// Re-arms the gate and resets the spent count.
    pub const PIN_ENABLE: &'static str = "Enable";
    /// Shuts the gate and finishes the node.
    pub const PIN_DISABLE: &'static str = "Disable";

    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let config: LogicalOrConfig = parse_config(config)?;
        Ok(Box::new(LogicalOrNode {
            config,
            enabled: true,
            count: 0,
        }))
    }

    fn resolve_pins(_metadata: &KindMetadata, config: &Value) -> (Vec<Pin>, Vec<Pin>) {
        let config: LogicalOrConfig = parse_config(config).unwrap_or_default();
        let mut inputs = Pin::numbered(config.inputs);
        inputs.push(Pin::new(Self::PIN_ENABLE));
        inputs.push(Pin::new(Self::PIN_DISABLE));
        (inputs, vec![Pin::new(DEFAULT_OUTPUT_PIN)])
    }
}

impl KindDescriptor for LogicalOrNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "logical-or",
                "Logical OR",
                NodeCategory::Operators,
                "Relays any input while enabled",
            ),
            LogicalOrNode::build,
        )
        .with_pin_resolver(LogicalOrNode::resolve_pins)
    }
}

inventory::submit!(flow_engine::KindFn(LogicalOrNode::descriptor));

impl NodeBehavior for LogicalOrNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        match pin {
            Self::PIN_ENABLE => {
                self.enabled = true;
                self.count = 0;
            }
            Self::PIN_DISABLE => {
                self.enabled = false;
                ctx.finish();
            }
            _ => {
                if !self.enabled {
                    return;
                }
                let limit = self.config.execution_limit;
                if limit != 0 && self.count >= limit {
                    return;
                }
                self.count += 1;
                let spent = limit != 0 && self.count >= limit;
                ctx.trigger_first_output(spent);
            }
        }
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {
        self.enabled = true;
        self.count = 0;
    }

    fn save_state(&self) -> Result<Value> {
        Ok(json!({ "enabled": self.enabled, "count": self.count }))
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        let state: LogicalOrState = parse_config(&state)?;
        self.enabled = state.enabled;
        self.count = state.count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::{ActivationState, FlowRuntime, FlowTemplate, NodeRegistry, Owner};

    fn or_runtime(config: Value) -> (FlowRuntime, flow_engine::InstanceId) {
        let mut runtime = FlowRuntime::new("overworld", NodeRegistry::with_builtins());
        let template = FlowTemplate::builder("gate")
            .node("begin", "start")
            .node("any", "logical-or")
            .with_config(config)
            .node("after", "reroute")
            .connect("any", "Out", "after", "In")
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
    fn test_resolve_pins_appends_control_pins() {
        let kind = LogicalOrNode::descriptor();
        let (inputs, _) = (kind.resolve_pins)(&kind.metadata, &json!({ "inputs": 2 }));
        let names: Vec<&str> = inputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["0", "1", "Enable", "Disable"]);
    }

    #[test]
    fn test_single_execution_by_default() {
        let (mut runtime, id) = or_runtime(Value::Null);
        runtime.trigger_node_input(id, "any", "1");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("any"), Some(ActivationState::Completed));
        assert_eq!(instance.pin_records("any", "Out").len(), 1);
    }

    #[test]
    fn test_unlimited_keeps_relaying() {
        let (mut runtime, id) = or_runtime(json!({ "executionLimit": 0 }));
        runtime.trigger_node_input(id, "any", "0");
        runtime.trigger_node_input(id, "any", "1");
        runtime.trigger_node_input(id, "any", "0");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("any"), Some(ActivationState::Active));
        assert_eq!(instance.pin_records("any", "Out").len(), 3);
    }

    #[test]
    fn test_disable_finishes_without_relaying() {
        let (mut runtime, id) = or_runtime(json!({ "executionLimit": 0 }));
        runtime.trigger_node_input(id, "any", "Disable");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("any"), Some(ActivationState::Completed));
        assert!(instance.pin_records("any", "Out").is_empty());
        assert_eq!(instance.node_state("after"), Some(ActivationState::NeverActivated));
    }

    #[test]
    fn test_enable_resets_the_spent_count() {
        let (mut runtime, id) = or_runtime(json!({ "executionLimit": 2 }));
        runtime.trigger_node_input(id, "any", "0");
        runtime.trigger_node_input(id, "any", "0");
        let instance = runtime.instance(id).unwrap();
        // limit reached, second relay finished the gate
        assert_eq!(instance.node_state("any"), Some(ActivationState::Completed));

        // cleanup re-armed it; a fresh activation relays again
        runtime.trigger_node_input(id, "any", "1");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.pin_records("any", "Out").len(), 3);
    }
}
