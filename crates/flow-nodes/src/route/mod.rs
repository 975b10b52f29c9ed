//! Route nodes
//!
//! Control flow: entry and exit markers, sub-graph owners, custom event
//! endpoints, and fan-out helpers.

mod counter;
mod custom_input;
mod custom_output;
mod finish;
mod reroute;
mod sequence;
mod start;
mod sub_graph;

pub use counter::{CounterConfig, CounterNode};
pub use custom_input::{CustomInputConfig, CustomInputNode};
pub use custom_output::{CustomOutputConfig, CustomOutputNode};
pub use finish::FinishNode;
pub use reroute::RerouteNode;
pub use sequence::{SequenceConfig, SequenceNode};
pub use start::StartNode;
pub use sub_graph::{SubGraphConfig, SubGraphNode};
