//! Custom output node
//!
//! Surfaces a named event out of the instance: to the owning sub-graph
//! node's matching output pin when nested, or to the embedder's event sink
//! when the instance is a root.

use flow_engine::{
    parse_config, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind,
    Pin, Result, SignalMode, DEFAULT_INPUT_PIN,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for the custom output node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomOutputConfig {
    /// Event name surfaced to the parent or the event sink. Required.
    pub event: String,
}

/// Named exit point raising an event out of the graph.
#[derive(Debug, Default)]
pub struct CustomOutputNode {
    config: CustomOutputConfig,
}

impl CustomOutputNode {
    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let config: CustomOutputConfig = parse_config(config)?;
        Ok(Box::new(CustomOutputNode { config }))
    }

    fn validate(config: &Value) -> Vec<String> {
        let named = config
            .get("event")
            .and_then(Value::as_str)
            .is_some_and(|e| !e.is_empty());
        if named {
            Vec::new()
        } else {
            vec!["custom output has no event name".to_string()]
        }
    }
}

impl KindDescriptor for CustomOutputNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "custom-output",
                "Custom Output",
                NodeCategory::Route,
                "Raises a named event out of the graph",
            )
            .with_inputs(vec![Pin::new(DEFAULT_INPUT_PIN)])
            .with_outputs(vec![])
            .with_signal_modes(vec![SignalMode::Enabled, SignalMode::Disabled])
            .as_custom_output(),
            CustomOutputNode::build,
        )
        .with_validator(CustomOutputNode::validate)
    }
}

inventory::submit!(flow_engine::KindFn(CustomOutputNode::descriptor));

impl NodeBehavior for CustomOutputNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        if self.config.event.is_empty() {
            ctx.log_warning("custom output has no event name; nothing raised");
            ctx.finish();
            return;
        }
        // finish first so the parent's onward cascade never sees this node
        // as active
        let event = self.config.event.clone();
        ctx.finish();
        ctx.emit_custom_output(&event);
    }
}
