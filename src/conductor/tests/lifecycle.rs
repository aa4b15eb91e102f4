use serde_json::json;

use super::*;
use crate::conductor::ConductorError;

fn sequential() -> JsonValue {
    json!({
        "input": ["name", {"greeting": "hello"}, {"message": "<% ctx(greeting) %> <% ctx(name) %>"}],
        "output": [
            {"last": "<% ctx(echoed) %>"},
            {"summary": "<% ctx(last) %>!"}
        ],
        "tasks": [
            {
                "name": "t1",
                "action": "core.echo",
                "input": {"message": "<% ctx(message) %>"},
                "next": [{"publish": [{"echoed": "<% result() %>"}], "do": "t2"}]
            },
            {
                "name": "t2",
                "action": "core.echo",
                "input": {"message": "<% ctx(echoed) %>", "count": 2}
            }
        ]
    })
}

#[test]
fn test_inputs_seed_route_zero_with_defaults() {
    let conductor = conductor(sequential(), json!({"name": "world"}));

    let variables = conductor.route_context(0).unwrap();
    assert_eq!(variables.get("name"), Some(&json!("world")));
    assert_eq!(variables.get("greeting"), Some(&json!("hello")));
    assert_eq!(variables.get("message"), Some(&json!("hello world")));
    assert_eq!(conductor.state(), State::Unset);
    assert!(conductor.outbox().is_empty());
}

#[test]
fn test_missing_input_without_default_is_null() {
    let conductor = conductor(sequential(), json!({}));
    assert_eq!(conductor.route_context(0).unwrap().get("name"), Some(&JsonValue::Null));
}

#[test]
fn test_undeclared_inputs_are_rejected() {
    let err = WorkflowConductor::new(spec(sequential()), inputs(json!({"zed": 1, "alpha": 2, "name": "x"})))
        .unwrap_err();
    assert_eq!(
        err,
        ConductorError::UnexpectedInputs(vec!["alpha".to_string(), "zed".to_string()])
    );
    assert_eq!(err.to_string(), "Unexpected inputs: alpha, zed");
}

#[test]
fn test_spec_failing_inspection_is_rejected() {
    let err = WorkflowConductor::new(
        spec(json!({"tasks": {"t1": {"input": {"x": "<% ctx(nope) %>"}}}})),
        Map::new(),
    )
    .unwrap_err();

    match err {
        ConductorError::InvalidSpec(report) => assert_eq!(report.len(), 1),
        other => panic!("expected InvalidSpec, got {other:?}"),
    }
}

#[test]
fn test_sequential_workflow_runs_to_success() {
    let mut conductor = started(sequential(), json!({"name": "world"}));
    assert_eq!(conductor.state(), State::Running);

    let first = take_one(&mut conductor);
    assert_eq!(first.task_id, "t1");
    assert_eq!(first.route, 0);
    assert_eq!(first.action.as_deref(), Some("core.echo"));
    assert_eq!(first.input, json!({"message": "hello world"}));
    assert_eq!(first.attempt, 0);
    assert_eq!(
        conductor.flow().get_task_state("t1", 0).unwrap(),
        State::Running
    );

    succeed(&mut conductor, "t1", 0, Some(json!("hello world")));

    let second = take_one(&mut conductor);
    assert_eq!(second.task_id, "t2");
    assert_eq!(second.input, json!({"message": "hello world", "count": 2}));
    assert_eq!(
        conductor.route_context(0).unwrap().get("echoed"),
        Some(&json!("hello world"))
    );
    assert_eq!(conductor.state(), State::Running);

    succeed(&mut conductor, "t2", 0, None);

    assert_eq!(conductor.state(), State::Succeeded);
    assert!(conductor.errors().is_empty());

    let output = conductor.output().unwrap();
    assert_eq!(output.get("last"), Some(&json!("hello world")));
    assert_eq!(output.get("summary"), Some(&json!("hello world!")));
}

#[test]
fn test_snapshot_sees_workflow_variables_without_current_task() {
    let mut conductor = started(sequential(), json!({"name": "world"}));
    succeed(&mut conductor, "t1", 0, Some(json!("hi")));

    let snapshot = conductor.snapshot();
    assert!(snapshot.current_task.is_none());
    assert_eq!(snapshot.ctx.get("echoed"), Some(&json!("hi")));
    assert_eq!(
        snapshot.flow.unwrap().get_task_state("t1", 0).unwrap(),
        State::Succeeded
    );
}

#[test]
fn test_requesting_current_state_is_a_noop() {
    let mut conductor = started(sequential(), json!({}));
    conductor.request_workflow_state(State::Running).unwrap();

    assert_eq!(dispatched(&mut conductor), pairs(&[("t1", 0)]));
}

#[test]
fn test_invalid_workflow_transitions() {
    let mut conductor = conductor(sequential(), json!({}));

    assert_eq!(
        conductor.request_workflow_state(State::Paused),
        Err(ConductorError::InvalidWorkflowTransition {
            from: State::Unset,
            to: State::Paused
        })
    );

    conductor.request_workflow_state(State::Running).unwrap();
    assert_eq!(
        conductor.request_workflow_state(State::Succeeded),
        Err(ConductorError::InvalidWorkflowTransition {
            from: State::Running,
            to: State::Succeeded
        })
    );
}

#[test]
fn test_task_updates_are_validated() {
    let mut conductor = conductor(sequential(), json!({}));
    assert_eq!(
        conductor.update_task_state("t1", 0, State::Succeeded, None),
        Err(ConductorError::NotStarted)
    );

    conductor.request_workflow_state(State::Running).unwrap();

    assert_eq!(
        conductor.update_task_state("t2", 0, State::Succeeded, None),
        Err(ConductorError::UnknownTask {
            task_id: "t2".to_string(),
            route: 0
        })
    );
    assert_eq!(
        conductor.update_task_state("t1", 3, State::Succeeded, None),
        Err(ConductorError::UnknownTask {
            task_id: "t1".to_string(),
            route: 3
        })
    );

    succeed(&mut conductor, "t1", 0, None);
    assert_eq!(
        conductor.update_task_state("t1", 0, State::Running, None),
        Err(ConductorError::InvalidTaskTransition {
            task_id: "t1".to_string(),
            route: 0,
            from: State::Succeeded,
            to: State::Running
        })
    );
}

#[test]
fn test_delayed_task() {
    let mut conductor = started(
        json!({"tasks": {"t1": {"action": "core.noop", "delay": 5}}}),
        json!({}),
    );

    let dispatch = take_one(&mut conductor);
    assert_eq!(dispatch.delay, Some(5));
    assert_eq!(conductor.flow().get_task_state("t1", 0).unwrap(), State::Delayed);

    conductor
        .update_task_state("t1", 0, State::Running, None)
        .unwrap();
    succeed(&mut conductor, "t1", 0, None);
    assert_eq!(conductor.state(), State::Succeeded);
}

#[test]
fn test_pause_holds_dispatches_until_resumed() {
    let mut conductor = started(sequential(), json!({}));
    dispatched(&mut conductor);

    conductor.request_workflow_state(State::Paused).unwrap();
    succeed(&mut conductor, "t1", 0, Some(json!("x")));

    assert!(dispatched(&mut conductor).is_empty());
    assert_eq!(conductor.state(), State::Paused);
    assert!(conductor.flow().has_active_tasks());

    conductor.request_workflow_state(State::Running).unwrap();
    assert_eq!(dispatched(&mut conductor), pairs(&[("t2", 0)]));

    succeed(&mut conductor, "t2", 0, None);
    assert_eq!(conductor.state(), State::Succeeded);
}

#[test]
fn test_cancel_and_resume() {
    let mut conductor = started(sequential(), json!({}));
    dispatched(&mut conductor);

    conductor.request_workflow_state(State::Canceled).unwrap();
    assert_eq!(conductor.state(), State::Canceled);
    assert_eq!(conductor.flow().get_task_state("t1", 0).unwrap(), State::Canceled);

    // A late callback from the executor is ignored
    succeed(&mut conductor, "t1", 0, None);
    assert_eq!(conductor.flow().get_task_state("t1", 0).unwrap(), State::Canceled);
    assert!(dispatched(&mut conductor).is_empty());

    conductor.request_workflow_state(State::Running).unwrap();
    assert_eq!(dispatched(&mut conductor), pairs(&[("t1", 0)]));
    assert_eq!(conductor.flow().sequence().len(), 2);

    succeed(&mut conductor, "t1", 0, None);
    succeed(&mut conductor, "t2", 0, None);
    assert_eq!(conductor.state(), State::Succeeded);
}

#[test]
fn test_cancel_while_paused_cancels_held_slots() {
    let mut conductor = started(sequential(), json!({}));
    conductor.request_workflow_state(State::Paused).unwrap();
    succeed(&mut conductor, "t1", 0, None);

    conductor.request_workflow_state(State::Canceled).unwrap();
    assert_eq!(conductor.flow().get_task_state("t2", 0).unwrap(), State::Canceled);
    assert!(!conductor.flow().has_active_tasks());
}
