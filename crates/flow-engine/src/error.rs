//! Error types for the flow engine

use thiserror::Error;

/// Result type alias using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur in the flow engine
#[derive(Debug, Error)]
pub enum FlowError {
    /// Referenced template is not registered
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Template registered under an already-used name
    #[error("Template already registered: {0}")]
    DuplicateTemplate(String),

    /// Node kind string has no registry entry
    #[error("Unknown node kind: {0}")]
    UnknownKind(String),

    /// Template authoring error
    #[error("Invalid template '{template}': {message}")]
    InvalidTemplate { template: String, message: String },

    /// Node config could not be interpreted by its kind
    #[error("Invalid config for node '{node}': {message}")]
    InvalidConfig { node: String, message: String },

    /// Save or load protocol failure
    #[error("Save data error: {0}")]
    SaveData(String),

    /// Operation failed
    #[error("Operation failed: {0}")]
    Failed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a generic operation failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
