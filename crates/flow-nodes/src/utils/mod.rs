//! Utility nodes
//!
//! Debugging and persistence helpers in the signal path.

mod checkpoint;
mod log_message;

pub use checkpoint::CheckpointNode;
pub use log_message::{LogConfig, LogNode};
