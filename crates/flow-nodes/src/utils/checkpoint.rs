//! Checkpoint node
//!
//! Captures the whole runtime into a save and publishes it as a
//! `CheckpointCaptured` event, then relays. The capture runs before the node
//! finishes, so the save remembers the checkpoint as active; restoring that
//! save resumes execution by firing the checkpoint's output again.

use flow_engine::{
    KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind, Result,
};
use serde_json::Value;

/// Save-and-resume marker in the signal path.
#[derive(Debug, Default)]
pub struct CheckpointNode;

impl CheckpointNode {
    fn build(_config: &Value) -> Result<Box<dyn NodeBehavior>> {
        Ok(Box::new(CheckpointNode))
    }
}

impl KindDescriptor for CheckpointNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new(
                "checkpoint",
                "Checkpoint",
                NodeCategory::Utils,
                "Captures a save and relays",
            ),
            CheckpointNode::build,
        )
    }
}

inventory::submit!(flow_engine::KindFn(CheckpointNode::descriptor));

impl NodeBehavior for CheckpointNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.request_checkpoint();
        ctx.trigger_first_output(true);
    }

    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.trigger_first_output(true);
    }
}
