//! Operator nodes
//!
//! Signal combinators that gate propagation on several inputs.

mod logical_and;
mod logical_or;

pub use logical_and::{LogicalAndConfig, LogicalAndNode};
pub use logical_or::{LogicalOrConfig, LogicalOrNode};
