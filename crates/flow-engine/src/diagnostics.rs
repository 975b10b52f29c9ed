//! Per-template message logs
//!
//! Runtime problems are never fatal: anything that goes wrong during
//! traversal degrades to a log entry and the affected branch stops
//! propagating. Entries are grouped per template so tooling can show every
//! message produced by any instance of that template. The log for a template
//! is allocated when its first instance starts and dropped when its last
//! instance is removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Weight of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// One runtime message, with enough context to find the node that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub time: DateTime<Utc>,
}

/// Message sink for one template and all of its instances.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<Diagnostic>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message and mirrors it to the log facade.
    pub fn push(
        &mut self,
        severity: Severity,
        message: impl Into<String>,
        node: Option<&str>,
        instance: Option<&str>,
    ) {
        let message = message.into();
        let line = match (node, instance) {
            (Some(n), Some(i)) => format!("{message} (node '{n}', instance '{i}')"),
            (Some(n), None) => format!("{message} (node '{n}')"),
            (None, Some(i)) => format!("{message} (instance '{i}')"),
            (None, None) => message.clone(),
        };
        match severity {
            Severity::Error => log::error!("{line}"),
            Severity::Warning => log::warn!("{line}"),
            Severity::Note => log::debug!("{line}"),
        }
        self.entries.push(Diagnostic {
            severity,
            message,
            node: node.map(str::to_string),
            instance: instance.map(str::to_string),
            time: Utc::now(),
        });
    }

    pub fn error(&mut self, message: impl Into<String>, node: Option<&str>, instance: Option<&str>) {
        self.push(Severity::Error, message, node, instance);
    }

    pub fn warning(&mut self, message: impl Into<String>, node: Option<&str>, instance: Option<&str>) {
        self.push(Severity::Warning, message, node, instance);
    }

    pub fn note(&mut self, message: impl Into<String>, node: Option<&str>, instance: Option<&str>) {
        self.push(Severity::Note, message, node, instance);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries at `severity`, newest last.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.severity == severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_context() {
        let mut log = MessageLog::new();
        log.error("input pin 'Go' does not exist", Some("door"), Some("quest-1"));
        log.note("node is disabled; signal dropped", Some("gate"), None);

        assert_eq!(log.len(), 2);
        let first = &log.entries()[0];
        assert_eq!(first.severity, Severity::Error);
        assert_eq!(first.node.as_deref(), Some("door"));
        assert_eq!(first.instance.as_deref(), Some("quest-1"));
    }

    #[test]
    fn test_severity_filter() {
        let mut log = MessageLog::new();
        log.warning("no connection on output pin 'Out'", None, None);
        log.error("boom", None, None);
        log.warning("another", None, None);

        assert_eq!(log.with_severity(Severity::Warning).count(), 2);
        assert_eq!(log.with_severity(Severity::Error).count(), 1);
        assert_eq!(log.with_severity(Severity::Note).count(), 0);
    }
}
