//! Reroute node
//!
//! Forwards the signal to its first output and finishes. Exists purely so
//! authors can tidy long wires without changing behavior.

use flow_engine::{
    KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind, Result,
    SignalMode,
};
use serde_json::Value;

/// Wire-tidiness relay.
#[derive(Debug, Default)]
pub struct RerouteNode;

impl RerouteNode {
    fn build(_config: &Value) -> Result<Box<dyn NodeBehavior>> {
        Ok(Box::new(RerouteNode))
    }
}

impl KindDescriptor for RerouteNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new("reroute", "Reroute", NodeCategory::Route, "Forwards the signal")
                .with_signal_modes(vec![SignalMode::Enabled, SignalMode::Disabled]),
            RerouteNode::build,
        )
    }
}

inventory::submit!(flow_engine::KindFn(RerouteNode::descriptor));

impl NodeBehavior for RerouteNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.trigger_first_output(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor() {
        let kind = RerouteNode::descriptor();
        assert_eq!(kind.kind(), "reroute");
        assert_eq!(kind.metadata.inputs.len(), 1);
        assert_eq!(kind.metadata.outputs.len(), 1);
    }
}
