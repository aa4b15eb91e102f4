//! Rule: Undefined Variable
//!
//! Reports a workflow variable referenced by an expression before it is
//! guaranteed to be bound.
//!
//! A variable is bound at a task when it is a declared input, or when every
//! path reaching the task publishes it (for `join: all`, when any of the
//! joined paths publishes it). Loop variables of an item clause are bound
//! only within that task's `with` fields.
//!
//! ```json
//! {
//!   "input": ["xs"],
//!   "tasks": {
//!     "task1": {"with": "x in <% ctx(xs) %>", "next": [{"publish": [{"n": 1}], "do": "task2"}]},
//!     "task2": {"input": {"count": "<% ctx(n) %>", "size": "<% ctx(size) %>"}}
//!   }
//! }
//! ```
//!
//! Here `xs` and `n` are bound; `size` is not.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value as JsonValue;

use crate::expressions::{extract_variables, find_expressions};
use crate::spec::{Concurrency, ItemsClause, JoinSpec, TaskSpec, WorkflowSpec};

use super::super::{InspectionCategory, InspectionError, InspectionRule, TASK_SCHEMA_PATH};

pub struct UndefinedVariableRule;

impl InspectionRule for UndefinedVariableRule {
    fn id(&self) -> &'static str {
        "undefined-variable"
    }

    fn description(&self) -> &'static str {
        "Variables must be bound on every path before they are referenced"
    }

    fn category(&self) -> InspectionCategory {
        InspectionCategory::Context
    }

    fn inspect(&self, spec: &WorkflowSpec) -> Vec<InspectionError> {
        let mut errors = Vec::new();

        for (task, scope) in spec.tasks.iter().zip(bound_at_entry(spec)) {
            check_task(task, &scope, &mut errors);
        }

        errors
    }
}

// ============================================================================
// Scope Tracking
// ============================================================================

/// Variables bound at some point of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    defined: BTreeSet<String>,
}

impl Scope {
    fn new() -> Self {
        Self {
            defined: BTreeSet::new(),
        }
    }

    fn define(&mut self, name: &str) {
        self.defined.insert(name.to_string());
    }

    fn is_defined(&self, name: &str) -> bool {
        self.defined.contains(name)
    }

    fn child(&self) -> Self {
        self.clone()
    }

    fn intersect(&self, other: &Scope) -> Self {
        Self {
            defined: self.defined.intersection(&other.defined).cloned().collect(),
        }
    }

    fn union(&self, other: &Scope) -> Self {
        Self {
            defined: self.defined.union(&other.defined).cloned().collect(),
        }
    }
}

// ============================================================================
// Dataflow
// ============================================================================

/// The scope at entry of every task, in declaration order.
///
/// Start tasks see the declared inputs. Every other task sees the
/// intersection (or for `join: all`, the union) of what its inbound
/// transitions carry. `None` stands for "not reached yet" while iterating;
/// tasks never reached fall back to the inputs.
fn bound_at_entry(spec: &WorkflowSpec) -> Vec<Scope> {
    let mut inputs = Scope::new();
    for name in spec.input_names() {
        inputs.define(name);
    }

    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (position, task) in spec.tasks.iter().enumerate() {
        positions.entry(task.name.as_str()).or_insert(position);
    }

    let inbound = spec.inbound();
    let mut scopes: Vec<Option<Scope>> = spec
        .tasks
        .iter()
        .map(|task| {
            if inbound.contains_key(task.name.as_str()) {
                None
            } else {
                Some(inputs.clone())
            }
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;

        for (position, task) in spec.tasks.iter().enumerate() {
            let Some(arrivals) = inbound.get(task.name.as_str()) else {
                continue;
            };

            let mut carried: Vec<Option<Scope>> = Vec::with_capacity(arrivals.len());
            for arrival in arrivals {
                let Some(&source) = positions.get(arrival.source) else {
                    continue;
                };
                carried.push(scopes[source].as_ref().map(|scope| {
                    let mut out = scope.child();
                    for binding in &spec.tasks[source].next[arrival.transition].publish {
                        out.define(&binding.name);
                    }
                    out
                }));
            }

            let joined = match task.join {
                // Every path arrives, so anything one of them carries is bound.
                // An unreached path keeps the whole join unreached.
                Some(JoinSpec::All) => carried
                    .iter()
                    .try_fold(Scope::new(), |acc, scope| scope.as_ref().map(|s| acc.union(s))),
                _ => carried.iter().flatten().fold(None, |acc: Option<Scope>, scope| {
                    Some(match acc {
                        None => scope.clone(),
                        Some(acc) => acc.intersect(scope),
                    })
                }),
            };

            if joined.is_some() && joined != scopes[position] {
                scopes[position] = joined;
                changed = true;
            }
        }
    }

    scopes
        .into_iter()
        .map(|scope| scope.unwrap_or_else(|| inputs.clone()))
        .collect()
}

// ============================================================================
// Field Checks
// ============================================================================

fn check_task(task: &TaskSpec, scope: &Scope, errors: &mut Vec<InspectionError>) {
    if let Some(with) = &task.with {
        let mut items_scope = scope.child();
        if let Some(clause) = ItemsClause::parse(&with.items) {
            for var in &clause.vars {
                items_scope.define(var);
            }
        }

        if let Some(Concurrency::Expression(concurrency)) = &with.concurrency {
            check_text(
                concurrency,
                &items_scope,
                "properties.with.properties.concurrency",
                &format!("tasks.{}.with.concurrency", task.name),
                errors,
            );
        }

        check_text(
            &with.items,
            &items_scope,
            "properties.with.properties.items",
            &format!("tasks.{}.with.items", task.name),
            errors,
        );
    }

    for value in task.input.values() {
        check_value(
            value,
            scope,
            "properties.input",
            &format!("tasks.{}.input", task.name),
            errors,
        );
    }

    for (index, transition) in task.next.iter().enumerate() {
        if let Some(when) = &transition.when {
            check_text(
                when,
                scope,
                "properties.next.items.properties.when",
                &format!("tasks.{}.next[{index}].when", task.name),
                errors,
            );
        }

        // Publishes are applied in order, so later ones may read earlier ones.
        let mut publish_scope = scope.child();
        for binding in &transition.publish {
            check_value(
                &binding.value,
                &publish_scope,
                "properties.next.items.properties.publish",
                &format!("tasks.{}.next[{index}].publish", task.name),
                errors,
            );
            publish_scope.define(&binding.name);
        }
    }
}

fn check_value(
    value: &JsonValue,
    scope: &Scope,
    schema_field: &str,
    spec_path: &str,
    errors: &mut Vec<InspectionError>,
) {
    match value {
        JsonValue::String(text) => check_text(text, scope, schema_field, spec_path, errors),
        JsonValue::Array(items) => {
            for item in items {
                check_value(item, scope, schema_field, spec_path, errors);
            }
        }
        JsonValue::Object(map) => {
            for item in map.values() {
                check_value(item, scope, schema_field, spec_path, errors);
            }
        }
        _ => {}
    }
}

fn check_text(
    text: &str,
    scope: &Scope,
    schema_field: &str,
    spec_path: &str,
    errors: &mut Vec<InspectionError>,
) {
    let mut reported: Vec<String> = Vec::new();

    for expression in find_expressions(text) {
        for name in extract_variables(&expression.body) {
            if scope.is_defined(&name) || reported.contains(&name) {
                continue;
            }
            errors.push(
                InspectionError::new(
                    format!("Variable \"{name}\" is referenced before assignment."),
                    format!("{TASK_SCHEMA_PATH}.{schema_field}"),
                    spec_path,
                )
                .with_expression(expression.language, text),
            );
            reported.push(name);
        }
    }
}
