use serde_json::json;

use super::*;
use crate::types::ErrorPolicy;

#[test]
fn test_items_bound_to_loop_variables() {
    let mut conductor = started(
        json!({
            "input": ["pairs", {"width": 2}],
            "tasks": {
                "t1": {
                    "action": "core.echo",
                    "with": {"items": "x, y in <% ctx(pairs) %>", "concurrency": "<% ctx(width) %>"},
                    "input": {"message": "<% ctx(width) %>"}
                }
            }
        }),
        json!({"pairs": [[1, "a"], [2, "b"]]}),
    );

    let dispatch = take_one(&mut conductor);
    assert_eq!(
        dispatch.items,
        Some(vec![json!({"x": 1, "y": "a"}), json!({"x": 2, "y": "b"})])
    );
    assert_eq!(dispatch.concurrency, Some(2));
    assert_eq!(dispatch.input, json!({"message": 2}));
}

#[test]
fn test_single_loop_variable_and_fixed_concurrency() {
    let mut conductor = started(
        json!({
            "input": ["xs"],
            "tasks": {"t1": {"with": {"items": "x in <% ctx(xs) %>", "concurrency": 1}}}
        }),
        json!({"xs": ["a", "b", "c"]}),
    );

    let dispatch = take_one(&mut conductor);
    assert_eq!(
        dispatch.items,
        Some(vec![json!({"x": "a"}), json!({"x": "b"}), json!({"x": "c"})])
    );
    assert_eq!(dispatch.concurrency, Some(1));
}

#[test]
fn test_inline_items_without_variables_pass_through() {
    let mut conductor = started(
        json!({"input": ["xs"], "tasks": {"t1": {"with": "<% ctx(xs) %>"}}}),
        json!({"xs": [1, 2, 3]}),
    );

    let dispatch = take_one(&mut conductor);
    assert_eq!(dispatch.items, Some(vec![json!(1), json!(2), json!(3)]));
    assert_eq!(dispatch.concurrency, None);
}

#[test]
fn test_task_without_items_has_none() {
    let mut conductor = started(json!({"tasks": {"t1": {}}}), json!({}));
    let dispatch = take_one(&mut conductor);
    assert_eq!(dispatch.items, None);
    assert_eq!(dispatch.input, json!({}));
}

#[test]
fn test_items_must_evaluate_to_a_list() {
    let mut conductor = conductor(
        json!({"input": ["xs"], "tasks": {"t1": {"with": "x in <% ctx(xs) %>"}}}),
        json!({"xs": "not a list"}),
    )
    .with_error_policy(ErrorPolicy::Continue);
    conductor.request_workflow_state(State::Running).unwrap();

    assert!(dispatched(&mut conductor).is_empty());
    assert_eq!(conductor.flow().get_task_state("t1", 0).unwrap(), State::Failed);
    assert_eq!(
        conductor.errors()[0].message,
        "The items expression '<% ctx(xs) %>' did not evaluate to a list."
    );
    assert_eq!(conductor.state(), State::CompletedWithErrors);
}

#[test]
fn test_item_arity_must_match_loop_variables() {
    let mut conductor = started(
        json!({"input": ["pairs"], "tasks": {"t1": {"with": "x, y in <% ctx(pairs) %>"}}}),
        json!({"pairs": [[1, 2, 3]]}),
    );

    assert!(dispatched(&mut conductor).is_empty());
    assert_eq!(conductor.state(), State::Failed);
    assert_eq!(
        conductor.errors()[0].message,
        "Item [1,2,3] cannot be bound to 2 loop variables."
    );
}
