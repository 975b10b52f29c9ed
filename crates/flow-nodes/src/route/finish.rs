//! Finish node
//!
//! Receiving any signal finishes the node, and because it can finish the
//! graph, the owning instance completes as well: a nested instance fires its
//! owning sub-graph node's first output, a root instance tears down with the
//! Keep policy.

use flow_engine::{
    KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind, Pin, Result,
    SignalMode, DEFAULT_INPUT_PIN,
};
use serde_json::Value;

/// Completion point of a graph.
#[derive(Debug, Default)]
pub struct FinishNode;

impl FinishNode {
    fn build(_config: &Value) -> Result<Box<dyn NodeBehavior>> {
        Ok(Box::new(FinishNode))
    }
}

impl KindDescriptor for FinishNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new("finish", "Finish", NodeCategory::Route, "Completes the graph")
                .with_inputs(vec![Pin::new(DEFAULT_INPUT_PIN)])
                .with_outputs(vec![])
                .with_signal_modes(vec![SignalMode::Enabled, SignalMode::Disabled]),
            FinishNode::build,
        )
    }
}

inventory::submit!(flow_engine::KindFn(FinishNode::descriptor));

impl NodeBehavior for FinishNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.finish();
    }

    fn can_finish_graph(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor() {
        let kind = FinishNode::descriptor();
        assert_eq!(kind.kind(), "finish");
        assert!(kind.metadata.outputs.is_empty());
        assert!(!kind.metadata.allows_signal_mode(SignalMode::PassThrough));
    }

    #[test]
    fn test_finishes_graph() {
        let behavior = FinishNode;
        assert!(behavior.can_finish_graph());
    }
}
