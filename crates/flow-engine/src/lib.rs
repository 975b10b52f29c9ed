//! Flow Engine - Graph-based flow execution for Skein
//!
//! This crate interprets authored flow graphs: directed graphs whose nodes
//! are small logic units joined by named pins. Templates are authored once
//! and shared; the runtime stamps a live instance per owner and drives it by
//! propagating discrete signals from node to node. It supports:
//!
//! - Template/instance separation with stable node ids
//! - Depth-first synchronous signal propagation through named pins
//! - Per-node signal modes (enabled, disabled, pass-through)
//! - Nested graphs through sub-graph owner nodes
//! - Save and resume of partially executed instances
//!
//! # Architecture
//!
//! [`FlowTemplate`] holds the authored [`NodeDef`]s behind an `Arc` and never
//! changes after build. [`FlowRuntime`] owns every live [`FlowInstance`] and
//! the signal pump that applies queued effects depth-first, one node frame at
//! a time. Node logic lives behind the [`NodeBehavior`] trait; kinds register
//! themselves through [`inventory`] and are resolved by kind string from a
//! [`NodeRegistry`] when an instance is built.
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{FlowRuntime, FlowTemplate, NodeRegistry, Owner};
//!
//! let registry = NodeRegistry::with_builtins();
//! let template = FlowTemplate::builder("gate-quest")
//!     .node("begin", "start")
//!     .node("done", "finish")
//!     .connect("begin", "Out", "done", "In")
//!     .build(&registry)?;
//!
//! let mut runtime = FlowRuntime::new("overworld", NodeRegistry::with_builtins());
//! runtime.register_template(template)?;
//! runtime.start_root_instance(&Owner::new("npc-1", "Gatekeeper"), "gate-quest", false)?;
//! ```

pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod instance;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod save;
pub mod template;
pub mod types;
pub mod validation;

// Re-export key types
pub use descriptor::{
    parse_config, BehaviorFactory, ConfigValidator, KindDescriptor, KindFn, KindMetadata,
    NodeCategory, NodeKind, PinResolver,
};
pub use diagnostics::{Diagnostic, MessageLog, Severity};
pub use error::{FlowError, Result};
pub use events::{EventSink, FlowEvent, NullEventSink, VecEventSink};
pub use instance::FlowInstance;
pub use node::{NodeBehavior, NodeContext, NodeCore, NodeDef, RuntimeNode};
pub use registry::NodeRegistry;
pub use runtime::FlowRuntime;
pub use save::{ComponentEnvelope, ComponentSaveData, GraphSaveData, NodeSaveData, SaveGame};
pub use template::{FlowTemplate, TemplateBuilder};
pub use types::{
    ActivationKind, ActivationState, Connection, FinishPolicy, InstanceId, NodeId, Owner, Pin,
    PinName, PinRecord, SignalMode, DEFAULT_INPUT_PIN, DEFAULT_OUTPUT_PIN,
};
pub use validation::{validate_template, ValidationError};
