//! Counter node
//!
//! Counts increment/decrement signals toward a configured goal. Reaching the
//! goal fires Goal and finishes; dropping back to zero fires Zero and
//! finishes; anything in between fires Step and keeps the node active. Skip
//! bypasses the count entirely.

use flow_engine::{
    parse_config, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind,
    Pin, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Configuration for the counter node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CounterConfig {
    /// Count that fires the Goal output.
    pub goal: i64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self { goal: 2 }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CounterState {
    sum: i64,
}

/// Signal counter with goal, zero, and skip exits.
#[derive(Debug, Default)]
pub struct CounterNode {
    config: CounterConfig,
    sum: i64,
}

impl CounterNode {
    pub const PIN_INCREMENT: &'static str = "Increment";
    pub const PIN_DECREMENT: &'static str = "Decrement";
    pub const PIN_SKIP: &'static str = "Skip";
    pub const PIN_ZERO: &'static str = "Zero";
    pub const PIN_STEP: &'static str = "Step";
    pub const PIN_GOAL: &'static str = "Goal";
    pub const PIN_SKIPPED: &'static str = "Skipped";

    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let config: CounterConfig = parse_config(config)?;
        Ok(Box::new(CounterNode { config, sum: 0 }))
    }
}

impl KindDescriptor for CounterNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "counter",
                "Counter",
                NodeCategory::Route,
                "Counts signals toward a goal",
            )
            .with_inputs(vec![
                Pin::new(CounterNode::PIN_INCREMENT),
                Pin::new(CounterNode::PIN_DECREMENT),
                Pin::new(CounterNode::PIN_SKIP),
            ])
            .with_outputs(vec![
                Pin::new(CounterNode::PIN_ZERO),
                Pin::new(CounterNode::PIN_STEP),
                Pin::new(CounterNode::PIN_GOAL),
                Pin::new(CounterNode::PIN_SKIPPED),
            ]),
            CounterNode::build,
        )
    }
}

inventory::submit!(flow_engine::KindFn(CounterNode::descriptor));

impl NodeBehavior for CounterNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        match pin {
            Self::PIN_INCREMENT => {
                self.sum += 1;
                if self.sum >= self.config.goal {
                    ctx.trigger_output(Self::PIN_GOAL, true);
                } else {
                    ctx.trigger_output(Self::PIN_STEP, false);
                }
            }
            Self::PIN_DECREMENT => {
                self.sum -= 1;
                if self.sum <= 0 {
                    self.sum = 0;
                    ctx.trigger_output(Self::PIN_ZERO, true);
                } else {
                    ctx.trigger_output(Self::PIN_STEP, false);
                }
            }
            Self::PIN_SKIP => ctx.trigger_output(Self::PIN_SKIPPED, true),
            _ => {}
        }
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {
        self.sum = 0;
    }

    fn save_state(&self) -> Result<Value> {
        Ok(json!({ "sum": self.sum }))
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        let state: CounterState = parse_config(&state)?;
        self.sum = state.sum;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::{ActivationState, FlowRuntime, FlowTemplate, NodeRegistry, Owner};

    fn counter_runtime(goal: i64) -> (FlowRuntime, flow_engine::InstanceId) {
        let mut runtime = FlowRuntime::new("overworld", NodeRegistry::with_builtins());
        let template = FlowTemplate::builder("count")
            .node("begin", "start")
            .node("tally", "counter")
            .with_config(json!({ "goal": goal }))
            .node("reached", "reroute")
            .node("stepped", "reroute")
            .connect("tally", "Goal", "reached", "In")
            .connect("tally", "Step", "stepped", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();
        let id = runtime
            .start_root_instance(&Owner::new("o1", "Owner"), "count", false)
            .unwrap()
            .unwrap();
        (runtime, id)
    }

    #[test]
    fn test_goal_fires_after_enough_increments() {
        let (mut runtime, id) = counter_runtime(2);
        runtime.trigger_node_input(id, "tally", "Increment");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("tally"), Some(ActivationState::Active));
        assert_eq!(instance.pin_records("tally", "Step").len(), 1);

        runtime.trigger_node_input(id, "tally", "Increment");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("tally"), Some(ActivationState::Completed));
        assert_eq!(instance.node_state("reached"), Some(ActivationState::Completed));
    }

    #[test]
    fn test_decrement_back_to_zero_finishes() {
        let (mut runtime, id) = counter_runtime(3);
        runtime.trigger_node_input(id, "tally", "Increment");
        runtime.trigger_node_input(id, "tally", "Decrement");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("tally"), Some(ActivationState::Completed));
        assert_eq!(instance.pin_records("tally", "Zero").len(), 1);
        assert_eq!(instance.node_state("reached"), Some(ActivationState::NeverActivated));
    }

    #[test]
    fn test_skip_bypasses_the_count() {
        let (mut runtime, id) = counter_runtime(5);
        runtime.trigger_node_input(id, "tally", "Skip");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("tally"), Some(ActivationState::Completed));
        assert_eq!(instance.pin_records("tally", "Skipped").len(), 1);
    }

    #[test]
    fn test_cleanup_resets_the_sum() {
        let (mut runtime, id) = counter_runtime(2);
        runtime.trigger_node_input(id, "tally", "Increment");
        runtime.force_finish_node(id, "tally");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("tally"), Some(ActivationState::Completed));

        // a fresh activation starts counting from zero again
        runtime.trigger_node_input(id, "tally", "Increment");
        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("tally"), Some(ActivationState::Active));
    }

    #[test]
    fn test_state_round_trip() {
        let mut node = CounterNode {
            config: CounterConfig::default(),
            sum: 3,
        };
        let saved = node.save_state().unwrap();
        node.sum = 0;
        node.load_state(saved).unwrap();
        assert_eq!(node.sum, 3);
    }
}
