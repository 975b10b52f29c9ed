//! Template validation
//!
//! Validates authored templates before registration: connection integrity,
//! kind resolution, signal-mode restrictions, and per-kind config checks.
//! Cycles are deliberately not flagged; loops are a supported authoring
//! pattern and the runtime guards against runaway propagation itself.

use std::collections::HashSet;

use crate::registry::NodeRegistry;
use crate::template::FlowTemplate;
use crate::types::SignalMode;

/// Validation error with location context
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Two nodes share an id
    DuplicateNodeId { node_id: String },
    /// A node has an unknown kind (not in registry)
    UnknownKind { node_id: String, kind: String },
    /// A connection references a node that does not exist
    MissingConnectionTarget {
        node_id: String,
        pin: String,
        target: String,
    },
    /// A connection references an input pin its target does not declare
    MissingTargetPin {
        node_id: String,
        pin: String,
        target: String,
        target_pin: String,
    },
    /// A connection leaves an output pin the node does not declare
    UndeclaredOutputPin { node_id: String, pin: String },
    /// A node is authored with a signal mode its kind does not allow
    DisallowedSignalMode { node_id: String, mode: SignalMode },
    /// The template has no entry node
    NoStartNode,
    /// A node has no incoming connection and is not an entry kind
    OrphanedNode { node_id: String },
    /// A kind-specific config problem
    Config { node_id: String, message: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => {
                write!(f, "Duplicate node id '{}'", node_id)
            }
            Self::UnknownKind { node_id, kind } => {
                write!(f, "Unknown kind '{}' for node '{}'", kind, node_id)
            }
            Self::MissingConnectionTarget { node_id, pin, target } => {
                write!(
                    f,
                    "Pin '{}' of node '{}' connects to unknown node '{}'",
                    pin, node_id, target
                )
            }
            Self::MissingTargetPin {
                node_id,
                pin,
                target,
                target_pin,
            } => {
                write!(
                    f,
                    "Pin '{}' of node '{}' connects to '{}' which has no input pin '{}'",
                    pin, node_id, target, target_pin
                )
            }
            Self::UndeclaredOutputPin { node_id, pin } => {
                write!(f, "Node '{}' connects from undeclared output pin '{}'", node_id, pin)
            }
            Self::DisallowedSignalMode { node_id, mode } => {
                write!(f, "Node '{}' does not allow signal mode {:?}", node_id, mode)
            }
            Self::NoStartNode => write!(f, "Template has no start node"),
            Self::OrphanedNode { node_id } => {
                write!(f, "Node '{}' has no incoming connection", node_id)
            }
            Self::Config { node_id, message } => {
                write!(f, "Node '{}': {}", node_id, message)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a template
///
/// Returns all validation errors found (not just the first).
/// Pass a registry to enable kind, signal-mode, entry, and config checks.
pub fn validate_template(
    template: &FlowTemplate,
    registry: Option<&NodeRegistry>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_node_ids(template, &mut errors);
    validate_connections(template, &mut errors);

    if let Some(reg) = registry {
        validate_kinds(template, reg, &mut errors);
        validate_signal_modes(template, reg, &mut errors);
        validate_entry_and_orphans(template, reg, &mut errors);
        validate_kind_configs(template, reg, &mut errors);
    }

    errors
}

/// Check that node ids are unique
fn validate_node_ids(template: &FlowTemplate, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for node in &template.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }
}

/// Check that connections leave declared pins and land on declared pins of
/// existing nodes
fn validate_connections(template: &FlowTemplate, errors: &mut Vec<ValidationError>) {
    for node in &template.nodes {
        for (pin, conn) in &node.connections {
            if !node.has_output_pin(pin) {
                errors.push(ValidationError::UndeclaredOutputPin {
                    node_id: node.id.clone(),
                    pin: pin.clone(),
                });
            }
            match template.node(&conn.node) {
                None => errors.push(ValidationError::MissingConnectionTarget {
                    node_id: node.id.clone(),
                    pin: pin.clone(),
                    target: conn.node.clone(),
                }),
                Some(target) if !target.has_input_pin(&conn.pin) => {
                    errors.push(ValidationError::MissingTargetPin {
                        node_id: node.id.clone(),
                        pin: pin.clone(),
                        target: conn.node.clone(),
                        target_pin: conn.pin.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }
}

/// Check that all node kinds resolve through the registry
fn validate_kinds(
    template: &FlowTemplate,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for node in &template.nodes {
        if !registry.has_kind(&node.kind) {
            errors.push(ValidationError::UnknownKind {
                node_id: node.id.clone(),
                kind: node.kind.clone(),
            });
        }
    }
}

/// Check that authored signal modes are allowed by each node's kind
fn validate_signal_modes(
    template: &FlowTemplate,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for node in &template.nodes {
        if let Some(metadata) = registry.get_metadata(&node.kind) {
            if !metadata.allows_signal_mode(node.signal_mode) {
                errors.push(ValidationError::DisallowedSignalMode {
                    node_id: node.id.clone(),
                    mode: node.signal_mode,
                });
            }
        }
    }
}

/// Check entry presence and report nodes nothing connects to
fn validate_entry_and_orphans(
    template: &FlowTemplate,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    let mut targeted: HashSet<&str> = HashSet::new();
    for node in &template.nodes {
        for conn in node.connections.values() {
            targeted.insert(conn.node.as_str());
        }
    }

    let mut has_start = false;
    for node in &template.nodes {
        let Some(metadata) = registry.get_metadata(&node.kind) else {
            continue;
        };
        if metadata.start {
            has_start = true;
        }
        let entry_kind = metadata.start || metadata.custom_input;
        if !entry_kind && !targeted.contains(node.id.as_str()) {
            errors.push(ValidationError::OrphanedNode {
                node_id: node.id.clone(),
            });
        }
    }

    if !has_start {
        errors.push(ValidationError::NoStartNode);
    }
}

/// Run each kind's own config validator
fn validate_kind_configs(
    template: &FlowTemplate,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for node in &template.nodes {
        if let Some(kind) = registry.get(&node.kind) {
            for message in (kind.validate)(&node.config) {
                errors.push(ValidationError::Config {
                    node_id: node.id.clone(),
                    message,
                });
            }
        }
    }
}
