//! Save-game wire format
//!
//! Only execution progress is persisted. Graph structure always comes from
//! the registered template, so a save stays valid across template edits as
//! long as node ids survive; records for removed nodes are skipped on load.
//! Field names are part of the save-file contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::types::{ActivationState, NodeId};

/// Saved progress of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSaveData {
    pub node_id: NodeId,
    /// Opaque per-node envelope, see [`NodeEnvelope`].
    pub node_data: Value,
}

/// Saved progress of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSaveData {
    /// World the instance was saved in. Empty for world-independent
    /// templates, which restore anywhere.
    pub world_name: String,
    /// Unique instance name, referenced by component records and by parent
    /// sub-graph node records.
    pub instance_name: String,
    /// Instance-level payload, see [`GraphEnvelope`].
    pub graph_data: Value,
    /// Active-node records in save order. Loading walks these in reverse.
    pub node_records: Vec<NodeSaveData>,
}

/// Save record for a component-backed owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSaveData {
    pub world_name: String,
    pub actor_instance_name: String,
    pub component_data: Value,
}

/// Top-level save container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveGame {
    pub narrative_components: Vec<ComponentSaveData>,
    pub narrative_instances: Vec<GraphSaveData>,
}

impl SaveGame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an instance record by name. Records are world-bound unless
    /// their world name is empty.
    pub fn find_instance(&self, name: &str, world: &str) -> Option<&GraphSaveData> {
        self.narrative_instances
            .iter()
            .find(|r| r.instance_name == name && (r.world_name.is_empty() || r.world_name == world))
    }

    /// Looks up the record of a component-backed owner by its stable name.
    pub fn find_component(&self, actor: &str, world: &str) -> Option<&ComponentSaveData> {
        self.narrative_components
            .iter()
            .find(|r| r.actor_instance_name == actor && (r.world_name.is_empty() || r.world_name == world))
    }

    /// Drops every record bound to `world` before a fresh capture, so a save
    /// never accumulates stale instances from the same world.
    pub(crate) fn purge_world(&mut self, world: &str) {
        self.narrative_instances
            .retain(|r| !r.world_name.is_empty() && r.world_name != world);
        self.narrative_components
            .retain(|r| !r.world_name.is_empty() && r.world_name != world);
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Writes the save as JSON to `path`.
    pub fn write_to_file(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(Into::into)
    }

    /// Reads a save previously written with [`write_to_file`](Self::write_to_file).
    pub fn read_from_file(path: &std::path::Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Per-node payload stored in [`NodeSaveData::node_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NodeEnvelope {
    pub state: ActivationState,
    /// Instance name of the child this node owned when saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_child: Option<String>,
    /// Kind-specific working data.
    #[serde(default)]
    pub payload: Value,
}

impl NodeEnvelope {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| FlowError::SaveData(format!("malformed node record: {e}")))
    }
}

/// Instance-level payload stored in [`GraphSaveData::graph_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphEnvelope {
    /// Template the instance was created from, checked on load.
    pub template: String,
}

/// Payload stored in [`ComponentSaveData::component_data`] for owners that
/// remember a root instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentEnvelope {
    pub saved_instance_name: String,
    pub template: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_save() -> SaveGame {
        SaveGame {
            narrative_components: vec![ComponentSaveData {
                world_name: "overworld".to_string(),
                actor_instance_name: "gate-keeper".to_string(),
                component_data: json!({
                    "savedInstanceName": "gate-quest-1",
                    "template": "gate-quest",
                }),
            }],
            narrative_instances: vec![
                GraphSaveData {
                    world_name: "overworld".to_string(),
                    instance_name: "gate-quest-1".to_string(),
                    graph_data: json!({ "template": "gate-quest" }),
                    node_records: vec![NodeSaveData {
                        node_id: "wait".to_string(),
                        node_data: json!({ "state": "active", "payload": null }),
                    }],
                },
                GraphSaveData {
                    world_name: String::new(),
                    instance_name: "ambient-1".to_string(),
                    graph_data: json!({ "template": "ambient" }),
                    node_records: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_wire_field_names() {
        let save = sample_save();
        let json = serde_json::to_value(&save).unwrap();
        assert!(json.get("narrativeComponents").is_some());
        assert!(json.get("narrativeInstances").is_some());

        let instance = &json["narrativeInstances"][0];
        assert_eq!(instance["worldName"], "overworld");
        assert_eq!(instance["instanceName"], "gate-quest-1");
        assert!(instance.get("nodeRecords").is_some());

        let component = &json["narrativeComponents"][0];
        assert_eq!(component["actorInstanceName"], "gate-keeper");
    }

    #[test]
    fn test_find_instance_respects_world_binding() {
        let save = sample_save();
        assert!(save.find_instance("gate-quest-1", "overworld").is_some());
        assert!(save.find_instance("gate-quest-1", "dungeon").is_none());
        // world-independent records match any world
        assert!(save.find_instance("ambient-1", "dungeon").is_some());
    }

    #[test]
    fn test_purge_world_keeps_other_worlds() {
        let mut save = sample_save();
        save.narrative_instances.push(GraphSaveData {
            world_name: "dungeon".to_string(),
            instance_name: "boss-fight-1".to_string(),
            graph_data: Value::Null,
            node_records: vec![],
        });

        save.purge_world("overworld");
        let names: Vec<&str> = save
            .narrative_instances
            .iter()
            .map(|r| r.instance_name.as_str())
            .collect();
        // the overworld record and the world-independent record are gone
        assert_eq!(names, vec!["boss-fight-1"]);
        assert!(save.narrative_components.is_empty());
    }

    #[test]
    fn test_file_round_trip() {
        let save = sample_save();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot-0.json");

        save.write_to_file(&path).unwrap();
        let loaded = SaveGame::read_from_file(&path).unwrap();
        assert_eq!(save, loaded);
    }

    #[test]
    fn test_node_envelope_rejects_malformed_record() {
        let err = NodeEnvelope::from_value(&json!({ "state": "sideways" }));
        assert!(err.is_err());
    }
}
