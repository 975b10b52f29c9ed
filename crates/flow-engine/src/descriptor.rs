//! Node-kind descriptors
//!
//! A [`NodeKind`] describes everything the authoring and validation layers
//! need to know about a behavior: its kind string, default pins, allowed
//! signal modes, and a factory that builds the runtime behavior from a
//! node's JSON config.
//!
//! Kinds register themselves at link time:
//!
//! ```ignore
//! inventory::submit!(flow_engine::KindFn(MyNode::descriptor));
//! ```
//!
//! and [`NodeRegistry::with_builtins`](crate::registry::NodeRegistry::with_builtins)
//! collects every submission from all linked crates.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::node::NodeBehavior;
use crate::types::{Pin, SignalMode, DEFAULT_INPUT_PIN, DEFAULT_OUTPUT_PIN};

/// Grouping category for a node kind, mirrored by authoring palettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeCategory {
    /// Control flow: entry, exit, branching, sub-graphs.
    Route,
    /// Signal combinators.
    Operators,
    /// Debugging and persistence helpers.
    Utils,
    /// Anything registered by the embedder.
    Custom,
}

/// Static description of a node kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindMetadata {
    /// Unique kind string, e.g. "sub-graph".
    pub kind: String,
    /// Human-readable name.
    pub label: String,
    pub category: NodeCategory,
    pub description: String,
    /// Default input pins. Kinds with config-dependent pins override these
    /// through [`NodeKind::with_pin_resolver`].
    pub inputs: Vec<Pin>,
    /// Default output pins.
    pub outputs: Vec<Pin>,
    /// Signal modes a node of this kind may be authored with.
    pub allowed_signal_modes: Vec<SignalMode>,
    /// Entry candidate for `start_execution`.
    pub start: bool,
    /// Indexed by instances for custom-event dispatch. The event name is the
    /// node config's `event` string.
    pub custom_input: bool,
    /// Listed by instances as a surfaced output event.
    pub custom_output: bool,
}

impl KindMetadata {
    pub fn new(
        kind: impl Into<String>,
        label: impl Into<String>,
        category: NodeCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            label: label.into(),
            category,
            description: description.into(),
            inputs: vec![Pin::new(DEFAULT_INPUT_PIN)],
            outputs: vec![Pin::new(DEFAULT_OUTPUT_PIN)],
            allowed_signal_modes: vec![
                SignalMode::Enabled,
                SignalMode::Disabled,
                SignalMode::PassThrough,
            ],
            start: false,
            custom_input: false,
            custom_output: false,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<Pin>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<Pin>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_signal_modes(mut self, modes: Vec<SignalMode>) -> Self {
        self.allowed_signal_modes = modes;
        self
    }

    pub fn as_start(mut self) -> Self {
        self.start = true;
        self
    }

    pub fn as_custom_input(mut self) -> Self {
        self.custom_input = true;
        self
    }

    pub fn as_custom_output(mut self) -> Self {
        self.custom_output = true;
        self
    }

    pub fn allows_signal_mode(&self, mode: SignalMode) -> bool {
        self.allowed_signal_modes.contains(&mode)
    }
}

/// Builds the behavior for one node from its authored config.
pub type BehaviorFactory = fn(&Value) -> Result<Box<dyn NodeBehavior>>;

/// Resolves the pin lists of a node authored with `config`.
pub type PinResolver = fn(&KindMetadata, &Value) -> (Vec<Pin>, Vec<Pin>);

/// Kind-specific authoring-time checks. Returns human-readable problems.
pub type ConfigValidator = fn(&Value) -> Vec<String>;

/// Complete registration record for a node kind: metadata plus the hooks the
/// engine needs to instantiate and author nodes of this kind.
pub struct NodeKind {
    pub metadata: KindMetadata,
    pub factory: BehaviorFactory,
    pub resolve_pins: PinResolver,
    pub validate: ConfigValidator,
}

impl NodeKind {
    pub fn new(metadata: KindMetadata, factory: BehaviorFactory) -> Self {
        Self {
            metadata,
            factory,
            resolve_pins: default_pins,
            validate: no_findings,
        }
    }

    /// Overrides pin resolution for kinds whose pins depend on config,
    /// e.g. numbered inputs.
    pub fn with_pin_resolver(mut self, resolver: PinResolver) -> Self {
        self.resolve_pins = resolver;
        self
    }

    pub fn with_validator(mut self, validator: ConfigValidator) -> Self {
        self.validate = validator;
        self
    }

    pub fn kind(&self) -> &str {
        &self.metadata.kind
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKind")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

fn default_pins(metadata: &KindMetadata, _config: &Value) -> (Vec<Pin>, Vec<Pin>) {
    (metadata.inputs.clone(), metadata.outputs.clone())
}

fn no_findings(_config: &Value) -> Vec<String> {
    Vec::new()
}

/// Trait for node behaviors that can describe their own kind
pub trait KindDescriptor {
    /// Returns the registration record for this kind
    fn descriptor() -> NodeKind
    where
        Self: Sized;
}

/// Wrapper for descriptor functions registered via inventory
///
/// Node crates register their kinds at link time:
/// ```ignore
/// inventory::submit!(flow_engine::KindFn(MyNode::descriptor));
/// ```
pub struct KindFn(pub fn() -> NodeKind);

inventory::collect!(KindFn);

/// Deserializes a node config, treating `null` as the config's default.
pub fn parse_config<T>(config: &Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if config.is_null() {
        Ok(T::default())
    } else {
        serde_json::from_value(config.clone()).map_err(FlowError::Serialization)
    }
}
