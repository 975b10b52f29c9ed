//! Sequence node
//!
//! Fans one incoming signal out to numbered outputs in declared order, then
//! finishes. With `saveExecutionState` on (the default) the node remembers
//! which outputs already fired, so re-triggering it, or resuming it from a
//! save, only fires connections that have not run yet.

use std::collections::HashSet;

use flow_engine::{
    parse_config, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind,
    Pin, Result, SignalMode, DEFAULT_INPUT_PIN,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Configuration for the sequence node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SequenceConfig {
    /// Number of numbered output pins.
    pub outputs: usize,
    /// Remember fired outputs across triggers and saves.
    pub save_execution_state: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            outputs: 2,
            save_execution_state: true,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SequenceState {
    fired: Vec<String>,
}

/// Ordered fan-out over numbered outputs.
#[derive(Debug, Default)]
pub struct SequenceNode {
    config: SequenceConfig,
    fired: HashSet<String>,
}

impl SequenceNode {
    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let config: SequenceConfig = parse_config(config)?;
        Ok(Box::new(SequenceNode {
            config,
            fired: HashSet::new(),
        }))
    }

    fn resolve_pins(_metadata: &KindMetadata, config: &Value) -> (Vec<Pin>, Vec<Pin>) {
        let config: SequenceConfig = parse_config(config).unwrap_or_default();
        (vec![Pin::new(DEFAULT_INPUT_PIN)], Pin::numbered(config.outputs))
    }

    /// Fires every connected output not fired before, then finishes.
    fn run(&mut self, ctx: &mut NodeContext<'_>) {
        let pins: Vec<String> = ctx.output_pins().iter().map(|p| p.name.clone()).collect();
        for pin in pins {
            if !ctx.is_output_connected(&pin) {
                continue;
            }
            if self.config.save_execution_state && !self.fired.insert(pin.clone()) {
                continue;
            }
            ctx.trigger_output(&pin, false);
        }
        ctx.finish();
    }
}

impl KindDescriptor for SequenceNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "sequence",
                "Sequence",
                NodeCategory::Route,
                "Fires numbered outputs in order",
            )
            .with_signal_modes(vec![SignalMode::Enabled, SignalMode::Disabled]),
            SequenceNode::build,
        )
        .with_pin_resolver(SequenceNode::resolve_pins)
    }
}

inventory::submit!(flow_engine::KindFn(SequenceNode::descriptor));

impl NodeBehavior for SequenceNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        self.run(ctx);
    }

    fn save_state(&self) -> Result<Value> {
        if !self.config.save_execution_state {
            return Ok(Value::Null);
        }
        let mut fired: Vec<&String> = self.fired.iter().collect();
        fired.sort();
        Ok(json!({ "fired": fired }))
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        let state: SequenceState = parse_config(&state)?;
        self.fired = state.fired.into_iter().collect();
        Ok(())
    }

    /// Resuming drains whatever had not fired when the save was made.
    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        self.run(ctx);
    }
}
