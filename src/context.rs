//! Evaluation contexts handed to expression evaluators
//!
//! A context is a point-in-time snapshot: the conductor's flow state is
//! cloned into it, so evaluators can read it freely (and concurrently) while
//! the conductor goes on mutating its own copy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::flow::TaskFlow;
use crate::utils::serde::null_as_default;

/// The task whose expressions are being evaluated right now.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentTask {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub route: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
}

impl CurrentTask {
    pub fn new(id: impl Into<String>, route: usize) -> Self {
        Self {
            id: id.into(),
            route: Some(route),
            result: None,
        }
    }

    pub fn with_result(mut self, result: JsonValue) -> Self {
        self.result = Some(result);
        self
    }

    /// A current task without an id identifies nothing
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// Everything an expression can observe.
///
/// Absence is a value here: no current task, no flow, or a flow with an
/// empty pointer index all resolve task states to `Unset` rather than
/// failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub current_task: Option<CurrentTask>,
    #[serde(default)]
    pub flow: Option<TaskFlow>,
    /// Workflow variables: declared inputs plus published values
    #[serde(default, deserialize_with = "null_as_default")]
    pub ctx: Map<String, JsonValue>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_task(mut self, current_task: CurrentTask) -> Self {
        self.current_task = Some(current_task);
        self
    }

    pub fn with_flow(mut self, flow: TaskFlow) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_variables(mut self, ctx: Map<String, JsonValue>) -> Self {
        self.ctx = ctx;
        self
    }
}

/// Assembles evaluation contexts from the conductor's state without mutating it.
pub struct ContextBuilder<'a> {
    flow: &'a TaskFlow,
    variables: &'a Map<String, JsonValue>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(flow: &'a TaskFlow, variables: &'a Map<String, JsonValue>) -> Self {
        Self { flow, variables }
    }

    /// Context for one task's expressions.
    ///
    /// `result` is embedded into the current task so `result()` never has
    /// to go back to the flow log.
    pub fn for_task(&self, task_id: &str, route: usize, result: Option<JsonValue>) -> EvaluationContext {
        let mut current_task = CurrentTask::new(task_id, route);
        current_task.result = result;

        self.for_workflow().with_current_task(current_task)
    }

    /// Context for workflow-level expressions (outputs), with no current task
    pub fn for_workflow(&self) -> EvaluationContext {
        EvaluationContext::new()
            .with_flow(self.flow.clone())
            .with_variables(self.variables.clone())
    }
}
