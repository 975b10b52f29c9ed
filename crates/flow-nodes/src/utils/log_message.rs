//! Log node
//!
//! Writes a configured message to the template's message log and relays the
//! signal. Purely a debugging aid; it never blocks the traversal.

use flow_engine::{
    parse_config, KindDescriptor, KindMetadata, NodeBehavior, NodeCategory, NodeContext, NodeKind,
    Result, Severity,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for the log node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Text written when the node fires.
    pub message: String,
    pub severity: Severity,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            message: String::new(),
            severity: Severity::Note,
        }
    }
}

/// Message-log tap in the signal path.
#[derive(Debug, Default)]
pub struct LogNode {
    config: LogConfig,
}

impl LogNode {
    fn build(config: &Value) -> Result<Box<dyn NodeBehavior>> {
        let config: LogConfig = parse_config(config)?;
        Ok(Box::new(LogNode { config }))
    }
}

impl KindDescriptor for LogNode {
    fn descriptor() -> NodeKind {
        NodeKind::new(
            KindMetadata::new("log", "Log", NodeCategory::Utils, "Writes a message and relays"),
            LogNode::build,
        )
    }
}

inventory::submit!(flow_engine::KindFn(LogNode::descriptor));

impl NodeBehavior for LogNode {
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        let message = self.config.message.clone();
        match self.config.severity {
            Severity::Error => ctx.log_error(message),
            Severity::Warning => ctx.log_warning(message),
            Severity::Note => ctx.log_note(message),
        }
        ctx.trigger_first_output(true);
    }
}
