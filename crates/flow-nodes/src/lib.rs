//! Flow Nodes
//!
//! Built-in node kinds for the Skein flow engine. Each kind registers itself
//! with [`inventory`], so linking this crate is enough to make every built-in
//! available through `NodeRegistry::with_builtins()`.
//!
//! # Categories
//!
//! - **Route**: entry/exit markers, sub-graph owners, custom event endpoints,
//!   fan-out helpers
//! - **Operators**: signal combinators (AND, OR)
//! - **Utils**: logging and checkpoint persistence

pub mod operators;
pub mod route;
pub mod utils;

// Re-export all kinds for convenience
pub use operators::*;
pub use route::*;
pub use utils::*;

use flow_engine::NodeRegistry;

/// Registry holding every built-in kind linked into this binary.
pub fn default_registry() -> NodeRegistry {
    NodeRegistry::with_builtins()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flow_engine::{
        ActivationKind, ActivationState, FlowEvent, FlowRuntime, FlowTemplate, Owner, SaveGame,
        Severity, SignalMode, VecEventSink,
    };
    use serde_json::json;

    use super::default_registry;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = default_registry();
        assert_eq!(registry.all_metadata().len(), 12, "Expected 12 built-in kinds");

        assert!(registry.has_kind("start"));
        assert!(registry.has_kind("finish"));
        assert!(registry.has_kind("sub-graph"));
        assert!(registry.has_kind("custom-input"));
        assert!(registry.has_kind("custom-output"));
        assert!(registry.has_kind("sequence"));
        assert!(registry.has_kind("counter"));
        assert!(registry.has_kind("logical-and"));
        assert!(registry.has_kind("logical-or"));
        assert!(registry.has_kind("checkpoint"));
    }

    fn runtime() -> FlowRuntime {
        FlowRuntime::new("overworld", default_registry())
    }

    fn owner() -> Owner {
        Owner::new("npc-1", "Gatekeeper")
    }

    #[test]
    fn test_linear_graph_runs_to_completion() {
        let mut runtime = runtime();
        let template = FlowTemplate::builder("linear")
            .node("begin", "start")
            .node("a", "reroute")
            .node("b", "reroute")
            .connect("begin", "Out", "a", "In")
            .connect("a", "Out", "b", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();

        let id = runtime
            .start_root_instance(&owner(), "linear", false)
            .unwrap()
            .unwrap();

        let instance = runtime.instance(id).unwrap();
        assert!(instance.active_nodes().is_empty());
        let recorded: Vec<&str> = instance.recorded_nodes().iter().map(String::as_str).collect();
        assert_eq!(recorded, vec!["begin", "a", "b"]);
        for node in ["begin", "a", "b"] {
            assert_eq!(instance.node_state(node), Some(ActivationState::Completed));
        }
    }

    #[test]
    fn test_finish_node_completes_the_instance() {
        let sink = Arc::new(VecEventSink::new());
        let mut runtime = FlowRuntime::new("overworld", default_registry())
            .with_event_sink(sink.clone());
        let template = FlowTemplate::builder("short")
            .node("begin", "start")
            .node("done", "finish")
            .connect("begin", "Out", "done", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();

        let id = runtime
            .start_root_instance(&owner(), "short", false)
            .unwrap()
            .unwrap();

        // the finish node completed the whole instance and removed it
        assert!(runtime.instance(id).is_none());
        assert_eq!(runtime.live_instance_count("short"), 0);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            FlowEvent::InstanceFinished { policy, .. }
                if *policy == flow_engine::FinishPolicy::Keep
        )));
    }

    #[test]
    fn test_and_gate_fires_exactly_once_from_independent_events() {
        let sink = Arc::new(VecEventSink::new());
        let mut runtime = FlowRuntime::new("overworld", default_registry())
            .with_event_sink(sink.clone());
        let template = FlowTemplate::builder("meeting")
            .node("begin", "start")
            .node("left", "custom-input")
            .with_config(json!({ "event": "LeftArrived" }))
            .node("right", "custom-input")
            .with_config(json!({ "event": "RightArrived" }))
            .node("both", "logical-and")
            .node("announce", "custom-output")
            .with_config(json!({ "event": "BothArrived" }))
            .connect("left", "Out", "both", "0")
            .connect("right", "Out", "both", "1")
            .connect("both", "Out", "announce", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();

        let id = runtime
            .start_root_instance(&owner(), "meeting", false)
            .unwrap()
            .unwrap();
        let surfaced = |sink: &VecEventSink| {
            sink.events()
                .iter()
                .filter(|e| matches!(e, FlowEvent::CustomOutput { event, .. } if event == "BothArrived"))
                .count()
        };

        runtime.trigger_custom_input(id, "LeftArrived");
        assert_eq!(surfaced(&sink), 0);
        runtime.trigger_custom_input(id, "RightArrived");
        assert_eq!(surfaced(&sink), 1);

        // the gate finished and reset; one more arrival does not re-fire it
        runtime.trigger_custom_input(id, "LeftArrived");
        assert_eq!(surfaced(&sink), 1);
    }

    fn gate_template(runtime: &FlowRuntime, gate_mode: SignalMode) -> FlowTemplate {
        FlowTemplate::builder("quest")
            .node("begin", "start")
            .node("gate", "logical-and")
            .with_signal_mode(gate_mode)
            .node("opened", "custom-output")
            .with_config(json!({ "event": "Opened" }))
            .connect("begin", "Out", "gate", "0")
            .connect("gate", "Out", "opened", "In")
            .build(runtime.registry())
            .unwrap()
    }

    #[test]
    fn test_save_and_load_resume_a_half_armed_gate() {
        let mut runtime = runtime();
        runtime.register_template(gate_template(&runtime, SignalMode::Enabled)).unwrap();
        runtime
            .start_root_instance(&owner(), "quest", false)
            .unwrap()
            .unwrap();

        let mut save = SaveGame::new();
        runtime.capture_save(&mut save).unwrap();
        assert_eq!(save.narrative_instances.len(), 1);
        let saved_name = save.narrative_instances[0].instance_name.clone();

        let sink = Arc::new(VecEventSink::new());
        let mut resumed = FlowRuntime::new("overworld", default_registry())
            .with_event_sink(sink.clone());
        resumed.register_template(gate_template(&resumed, SignalMode::Enabled)).unwrap();
        resumed.adopt_save(save);

        let id = resumed
            .load_root_instance(&owner(), "quest", &saved_name)
            .unwrap()
            .unwrap();

        let instance = resumed.instance(id).unwrap();
        assert_eq!(instance.node_state("gate"), Some(ActivationState::Active));
        assert_eq!(instance.active_nodes(), &["gate".to_string()]);
        // nothing downstream fired during the load
        assert_eq!(instance.node_state("opened"), Some(ActivationState::NeverActivated));

        // pin 0 was restored as already fired; pin 1 alone opens the gate
        resumed.trigger_node_input(id, "gate", "1");
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, FlowEvent::CustomOutput { event, .. } if event == "Opened")));
    }

    #[test]
    fn test_save_captures_progress_on_a_custom_input_branch() {
        let build = |runtime: &FlowRuntime| {
            FlowTemplate::builder("hidden")
                .node("begin", "start")
                .node("side", "custom-input")
                .with_config(json!({ "event": "Side" }))
                .node("tally", "counter")
                .with_config(json!({ "goal": 2 }))
                .connect("side", "Out", "tally", "Increment")
                .build(runtime.registry())
                .unwrap()
        };
        let mut runtime = runtime();
        runtime.register_template(build(&runtime)).unwrap();
        let id = runtime
            .start_root_instance(&owner(), "hidden", false)
            .unwrap()
            .unwrap();
        runtime.trigger_custom_input(id, "Side");

        let mut save = SaveGame::new();
        runtime.capture_save(&mut save).unwrap();
        let record = &save.narrative_instances[0];
        // the counter hangs off the custom input, not the entry node, and is
        // still captured
        assert!(record.node_records.iter().any(|n| n.node_id == "tally"));
        let saved_name = record.instance_name.clone();

        let mut resumed = FlowRuntime::new("overworld", default_registry());
        resumed.register_template(build(&resumed)).unwrap();
        resumed.adopt_save(save);
        let id = resumed
            .load_root_instance(&owner(), "hidden", &saved_name)
            .unwrap()
            .unwrap();

        // one more increment reaches the restored counter's goal
        resumed.trigger_custom_input(id, "Side");
        let instance = resumed.instance(id).unwrap();
        assert_eq!(instance.node_state("tally"), Some(ActivationState::Completed));
        assert_eq!(instance.pin_records("tally", "Goal").len(), 1);
    }

    #[test]
    fn test_node_disabled_since_the_save_is_finished_on_load() {
        let mut runtime = runtime();
        runtime.register_template(gate_template(&runtime, SignalMode::Enabled)).unwrap();
        runtime
            .start_root_instance(&owner(), "quest", false)
            .unwrap()
            .unwrap();
        let mut save = SaveGame::new();
        runtime.capture_save(&mut save).unwrap();
        let saved_name = save.narrative_instances[0].instance_name.clone();

        // the designer disabled the gate after the save was made
        let mut resumed = FlowRuntime::new("overworld", default_registry());
        resumed.register_template(gate_template(&resumed, SignalMode::Disabled)).unwrap();
        resumed.adopt_save(save);

        let id = resumed
            .load_root_instance(&owner(), "quest", &saved_name)
            .unwrap()
            .unwrap();

        let instance = resumed.instance(id).unwrap();
        assert_eq!(instance.node_state("gate"), Some(ActivationState::Completed));
        assert!(instance.active_nodes().is_empty());
    }

    #[test]
    fn test_duplicate_root_start_is_rejected() {
        let mut runtime = runtime();
        let template = FlowTemplate::builder("solo")
            .node("begin", "start")
            .node("wait", "logical-and")
            .connect("begin", "Out", "wait", "0")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();

        let first = runtime.start_root_instance(&owner(), "solo", false).unwrap();
        assert!(first.is_some());
        let second = runtime.start_root_instance(&owner(), "solo", false).unwrap();
        assert!(second.is_none());
        assert_eq!(runtime.live_instance_count("solo"), 1);

        // a different owner is also rejected while the template disallows
        // multiple instances
        let other = runtime
            .start_root_instance(&Owner::new("npc-2", "Guard"), "solo", false)
            .unwrap();
        assert!(other.is_none());
        assert_eq!(runtime.live_instance_count("solo"), 1);
    }

    #[test]
    fn test_unknown_input_pin_is_a_logged_no_op() {
        let mut runtime = runtime();
        let template = FlowTemplate::builder("demo")
            .node("begin", "start")
            .node("a", "reroute")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();
        let id = runtime
            .start_root_instance(&owner(), "demo", false)
            .unwrap()
            .unwrap();

        runtime.trigger_node_input(id, "a", "Sideways");

        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("a"), Some(ActivationState::NeverActivated));
        assert!(instance.active_nodes().is_empty());
        let log = runtime.message_log("demo").unwrap();
        assert!(log
            .with_severity(Severity::Error)
            .any(|d| d.node.as_deref() == Some("a")));
    }

    #[test]
    fn test_unconnected_output_still_records_the_attempt() {
        let mut runtime = runtime();
        let template = FlowTemplate::builder("demo")
            .node("begin", "start")
            .node("a", "reroute")
            .connect("begin", "Out", "a", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();
        let id = runtime
            .start_root_instance(&owner(), "demo", false)
            .unwrap()
            .unwrap();

        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("a"), Some(ActivationState::Completed));
        assert_eq!(instance.pin_records("a", "Out").len(), 1);
    }

    #[test]
    fn test_template_without_start_node_stays_inert() {
        let mut runtime = runtime();
        let template = FlowTemplate::builder("inert")
            .node("a", "reroute")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();

        let id = runtime
            .start_root_instance(&owner(), "inert", false)
            .unwrap()
            .unwrap();

        let instance = runtime.instance(id).unwrap();
        assert!(!instance.has_started());
        assert!(instance.recorded_nodes().is_empty());
        let log = runtime.message_log("inert").unwrap();
        assert!(log.with_severity(Severity::Warning).count() >= 1);
    }

    #[test]
    fn test_pass_through_relays_without_running_node_logic() {
        let mut runtime = runtime();
        let template = FlowTemplate::builder("muted")
            .node("begin", "start")
            .node("tap", "log")
            .with_config(json!({ "message": "should not appear", "severity": "error" }))
            .with_signal_mode(SignalMode::PassThrough)
            .node("after", "reroute")
            .connect("begin", "Out", "tap", "In")
            .connect("tap", "Out", "after", "In")
            .build(runtime.registry())
            .unwrap();
        runtime.register_template(template).unwrap();

        let id = runtime
            .start_root_instance(&owner(), "muted", false)
            .unwrap()
            .unwrap();

        let instance = runtime.instance(id).unwrap();
        assert_eq!(instance.node_state("tap"), Some(ActivationState::Completed));
        assert_eq!(instance.node_state("after"), Some(ActivationState::Completed));
        assert_eq!(
            instance.pin_records("tap", "Out")[0].kind,
            ActivationKind::PassThrough
        );
        // the log behavior never ran
        let log = runtime.message_log("muted").unwrap();
        assert_eq!(log.with_severity(Severity::Error).count(), 0);
    }
}
