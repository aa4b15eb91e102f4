//! Conductor tests, driven the way an executor layer would drive it:
//! take dispatches, report task states back, repeat.

mod items;
mod lifecycle;

use serde_json::{Map, Value as JsonValue};

use super::{TaskDispatch, WorkflowConductor};
use crate::spec::WorkflowSpec;
use crate::types::State;

fn spec(value: JsonValue) -> WorkflowSpec {
    WorkflowSpec::from_value(value).expect("spec fixture should deserialize")
}

fn inputs(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("inputs fixture must be an object, got {other}"),
    }
}

fn conductor(spec_value: JsonValue, input_value: JsonValue) -> WorkflowConductor {
    WorkflowConductor::new(spec(spec_value), inputs(input_value)).expect("conductor should load")
}

/// A conductor already requested to run
fn started(spec_value: JsonValue, input_value: JsonValue) -> WorkflowConductor {
    let mut conductor = conductor(spec_value, input_value);
    conductor
        .request_workflow_state(State::Running)
        .expect("workflow should start");
    conductor
}

/// `(task_id, route)` of every queued dispatch, draining the outbox
fn dispatched(conductor: &mut WorkflowConductor) -> Vec<(String, usize)> {
    conductor
        .take_dispatches()
        .into_iter()
        .map(|d| (d.task_id, d.route))
        .collect()
}

fn take_one(conductor: &mut WorkflowConductor) -> TaskDispatch {
    let mut dispatches = conductor.take_dispatches();
    assert_eq!(dispatches.len(), 1, "expected exactly one dispatch: {dispatches:?}");
    dispatches.remove(0)
}

fn pairs(expected: &[(&str, usize)]) -> Vec<(String, usize)> {
    expected.iter().map(|(t, r)| (t.to_string(), *r)).collect()
}

fn succeed(conductor: &mut WorkflowConductor, task_id: &str, route: usize, result: Option<JsonValue>) {
    conductor
        .update_task_state(task_id, route, State::Succeeded, result)
        .unwrap_or_else(|e| panic!("{task_id} on route {route} should succeed: {e}"));
}

fn fail(conductor: &mut WorkflowConductor, task_id: &str, route: usize) {
    conductor
        .update_task_state(task_id, route, State::Failed, None)
        .unwrap_or_else(|e| panic!("{task_id} on route {route} should fail: {e}"));
}
