//! Start node
//!
//! Entry marker of a template. `start_execution` picks the first start node
//! with an outgoing connection and fires its first output; the node itself
//! only relays.

use flow_engine::{
    KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind, Pin, Result,
    SignalMode, DEFAULT_OUTPUT_PIN,
};
use serde_json::Value;

/// Entry point of a graph.
#[derive(Debug, Default)]
pub struct StartNode;

impl StartNode {
    fn build(_config: &Value) -> Result<Box<dyn NodeBehavior>> {
        Ok(Box::new(StartNode))
    }
}

impl KindDescriptor for StartNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new("start", "Start", NodeCategory::Route, "Entry point of the graph")
                .with_inputs(vec![])
                .with_outputs(vec![Pin::new(DEFAULT_OUTPUT_PIN)])
                .with_signal_modes(vec![SignalMode::Enabled, SignalMode::Disabled])
                .as_start(),
            StartNode::build,
        )
    }
}

inventory::submit!(flow_engine::KindFn(StartNode::descriptor));

impl NodeBehavior for StartNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.trigger_first_output(true);
    }
}
