//! Core value types shared across the engine
//!
//! Identifiers are plain strings and every comparison on them is exact and
//! case-sensitive. Pins compare by name alone so authored metadata such as
//! labels and tooltips never affects connection matching.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a node within a template and all of its instances.
pub type NodeId = String;

/// Name of an input or output pin.
pub type PinName = String;

/// Default input pin name for kinds that do not declare their own.
pub const DEFAULT_INPUT_PIN: &str = "In";

/// Default output pin name for kinds that do not declare their own.
pub const DEFAULT_OUTPUT_PIN: &str = "Out";

/// Handle of a live instance inside the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named port on a node. Equality is by name alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub name: PinName,
    /// Display name shown by authoring tools instead of `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

impl Pin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            tooltip: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    /// Pins named by index, used by kinds with a configurable pin count.
    pub fn numbered(count: usize) -> Vec<Pin> {
        (0..count).map(|i| Pin::new(i.to_string())).collect()
    }
}

impl PartialEq for Pin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Pin {}

/// Target of an output pin: a node and one of its input pins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub node: NodeId,
    pub pin: PinName,
}

impl Connection {
    pub fn new(node: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            pin: pin.into(),
        }
    }
}

/// Per-node override controlling how incoming signals are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalMode {
    /// Node logic runs normally.
    #[default]
    Enabled,
    /// Signals are dropped. Activations are still recorded for inspection.
    Disabled,
    /// Node logic is skipped: every connected output fires once, then the
    /// node finishes.
    PassThrough,
}

/// Lifecycle stage of a node within a running instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationState {
    #[default]
    NeverActivated,
    Active,
    Completed,
    Aborted,
}

impl ActivationState {
    /// Completed or Aborted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// How an instance tears down nodes that are still active when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinishPolicy {
    /// Finished nodes complete normally.
    #[default]
    Keep,
    /// Finished nodes are marked aborted.
    Abort,
}

/// How a pin activation came about, kept in pin records for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivationKind {
    #[default]
    Default,
    /// Triggered out-of-band, e.g. by a debugging tool.
    Forced,
    /// Produced while a pass-through node relayed a signal.
    PassThrough,
}

/// One recorded pin activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    pub time: DateTime<Utc>,
    pub kind: ActivationKind,
}

impl PinRecord {
    pub fn new(kind: ActivationKind) -> Self {
        Self {
            time: Utc::now(),
            kind,
        }
    }
}

/// The external object a root instance runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    /// Unique id, used to reject duplicate root instances.
    pub id: String,
    /// Stable display name, used to match component save records.
    pub name: String,
    /// Whether this owner is allowed to drive execution. Stored for the
    /// embedder; the engine does not interpret it.
    #[serde(default)]
    pub authority: bool,
    /// Component-backed owners get a component record in save data and can
    /// restore lazily from it.
    #[serde(default)]
    pub component: bool,
}

impl Owner {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            authority: true,
            component: false,
        }
    }

    pub fn with_authority(mut self, authority: bool) -> Self {
        self.authority = authority;
        self
    }

    /// Marks this owner as component-backed.
    pub fn as_component(mut self) -> Self {
        self.component = true;
        self
    }
}
