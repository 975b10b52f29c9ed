//! Custom input node
//!
//! External event entry point. The instance indexes these nodes by their
//! configured event name; `trigger_custom_input` fires every match, so one
//! event may enter the graph in several places at once.

use flow_engine::{
    parse_config, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind,
    Pin, Result, SignalMode, DEFAULT_OUTPUT_PIN,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for the custom input node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomInputConfig {
    /// Event name this node listens for. Required.
    pub event: String,
}

/// Named entry point for events raised outside the graph.
#[derive(Debug, Default)]
pub struct CustomInputNode;

impl CustomInputNode {
    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let _: CustomInputConfig = parse_config(config)?;
        Ok(Box::new(CustomInputNode))
    }

    fn validate(config: &Value) -> Vec<String> {
        let named = config
            .get("event")
            .and_then(Value::as_str)
            .is_some_and(|e| !e.is_empty());
        if named {
            Vec::new()
        } else {
            vec!["custom input has no event name".to_string()]
        }
    }
}

impl KindDescriptor for CustomInputNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "custom-input",
                "Custom Input",
                NodeCategory::Route,
                "Entry point for a named external event",
            )
            .with_inputs(vec![])
            .with_outputs(vec![Pin::new(DEFAULT_OUTPUT_PIN)])
            .with_signal_modes(vec![SignalMode::Enabled, SignalMode::Disabled])
            .as_custom_input(),
            CustomInputNode::build,
        )
        .with_validator(CustomInputNode::validate)
    }
}

inventory::submit!(flow_engine::KindFn(CustomInputNode::descriptor));

impl NodeBehavior for CustomInputNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.trigger_first_output(true);
    }
}
