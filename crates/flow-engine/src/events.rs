//! Event types for observing instance lifecycles
//!
//! Events are sent from the runtime to the embedder (or any consumer)
//! to report instance starts, finishes, surfaced custom outputs, and
//! checkpoint captures.

use serde::{Deserialize, Serialize};

use crate::save::SaveGame;
use crate::types::{FinishPolicy, InstanceId};

/// Trait for receiving flow events
///
/// This abstracts over the transport mechanism (channel, UI bridge, etc.)
/// allowing the runtime to be embedded in different hosts. The runtime calls
/// `send` from inside signal propagation, so implementations must be cheap.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: FlowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while instances run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowEvent {
    /// An instance began executing from its entry node
    #[serde(rename_all = "camelCase")]
    InstanceStarted {
        instance: InstanceId,
        name: String,
        template: String,
        owner: String,
    },

    /// An instance finished and tore down its active nodes
    #[serde(rename_all = "camelCase")]
    InstanceFinished {
        instance: InstanceId,
        name: String,
        policy: FinishPolicy,
    },

    /// An instance was captured into a save
    #[serde(rename_all = "camelCase")]
    InstanceSaved { instance: InstanceId, name: String },

    /// An instance was restored from a save record
    #[serde(rename_all = "camelCase")]
    InstanceLoaded { instance: InstanceId, name: String },

    /// A custom output reached the root of the instance tree
    #[serde(rename_all = "camelCase")]
    CustomOutput {
        instance: InstanceId,
        name: String,
        event: String,
    },

    /// A checkpoint node captured the full runtime state
    #[serde(rename_all = "camelCase")]
    CheckpointCaptured { save: Box<SaveGame> },
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: FlowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<FlowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: FlowEvent) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(FlowEvent::CustomOutput {
            instance: InstanceId(4),
            name: "gate-quest-1".to_string(),
            event: "DoorOpened".to_string(),
        })
        .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);

        match &events[0] {
            FlowEvent::CustomOutput { event, .. } => assert_eq!(event, "DoorOpened"),
            _ => panic!("Expected CustomOutput event"),
        }
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        // Should not panic
        sink.send(FlowEvent::InstanceLoaded {
            instance: InstanceId(1),
            name: "quest-1".to_string(),
        })
        .unwrap();
    }

    #[test]
    fn test_event_serde_tags() {
        let event = FlowEvent::InstanceFinished {
            instance: InstanceId(2),
            name: "quest-2".to_string(),
            policy: FinishPolicy::Abort,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "instanceFinished");
        assert_eq!(json["policy"], "abort");
    }
}
