//! Workflow functions callable from embedded expressions
//!
//! These are pure reads over an [`EvaluationContext`]. Both expression
//! languages reach them by name through [`call_function`], and every
//! function returns plain values so either language consumes them the same
//! way.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::ExpressionError;
use crate::context::{CurrentTask, EvaluationContext};
use crate::flow::resolve_task_state;
use crate::types::State;

/* ===================== Function Identifiers ===================== */

/// Workflow function identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowFunction {
    TaskState,
    Succeeded,
    Failed,
    Completed,
    Result,
}

impl WorkflowFunction {
    pub const ALL: [WorkflowFunction; 5] = [
        Self::TaskState,
        Self::Succeeded,
        Self::Failed,
        Self::Completed,
        Self::Result,
    ];

    /// The name expressions call this function by
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskState => "task_state",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Result => "result",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

/* ===================== Dispatcher ===================== */

/// Call a workflow function with positional arguments.
///
/// `task_state` takes `(task_id, route?)`; the others take no arguments.
pub fn call_function(
    func: WorkflowFunction,
    context: &EvaluationContext,
    args: &[JsonValue],
) -> Result<JsonValue, ExpressionError> {
    match func {
        WorkflowFunction::TaskState => {
            let (task_id, route) = task_state_args(args)?;
            let state = task_state(context, task_id, route)?;
            Ok(JsonValue::String(state.to_string()))
        }
        WorkflowFunction::Succeeded => {
            expect_no_args(func, args)?;
            succeeded(context).map(JsonValue::Bool)
        }
        WorkflowFunction::Failed => {
            expect_no_args(func, args)?;
            failed(context).map(JsonValue::Bool)
        }
        WorkflowFunction::Completed => {
            expect_no_args(func, args)?;
            completed(context).map(JsonValue::Bool)
        }
        WorkflowFunction::Result => {
            expect_no_args(func, args)?;
            result(context)
        }
    }
}

fn expect_no_args(func: WorkflowFunction, args: &[JsonValue]) -> Result<(), ExpressionError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ExpressionError::InvalidArguments {
            function: func.name().to_string(),
            message: format!("Expected 0 arguments, got {}", args.len()),
        })
    }
}

fn task_state_args(args: &[JsonValue]) -> Result<(&str, Option<usize>), ExpressionError> {
    let invalid = |message: String| ExpressionError::InvalidArguments {
        function: WorkflowFunction::TaskState.name().to_string(),
        message,
    };

    if args.is_empty() || args.len() > 2 {
        return Err(invalid(format!("Expected 1 or 2 arguments, got {}", args.len())));
    }

    let task_id = args[0]
        .as_str()
        .ok_or_else(|| invalid("First argument (task_id) must be a string".to_string()))?;

    let route = match args.get(1) {
        None | Some(JsonValue::Null) => None,
        Some(value) => {
            let route = value
                .as_u64()
                .ok_or_else(|| invalid("Second argument (route) must be a non-negative integer".to_string()))?;
            Some(route as usize)
        }
    };

    Ok((task_id, route))
}

/* ===================== Functions ===================== */

/// The current task, which must be set and carry an id.
pub fn get_current_task(context: &EvaluationContext) -> Result<&CurrentTask, ExpressionError> {
    match &context.current_task {
        Some(task) if !task.is_empty() => Ok(task),
        _ => Err(ExpressionError::Evaluation(
            "The current task is not set in the context.".to_string(),
        )),
    }
}

/// State of `task_id` as seen from `route`.
///
/// Without a route, the current task's route is used; with neither, this is
/// an evaluation error. A missing flow (or pointer index) yields `Unset`.
pub fn task_state(
    context: &EvaluationContext,
    task_id: &str,
    route: Option<usize>,
) -> Result<State, ExpressionError> {
    let route = match route {
        Some(route) => route,
        None => match &context.current_task {
            Some(CurrentTask {
                id,
                route: Some(route),
                ..
            }) if !id.is_empty() => *route,
            _ => {
                return Err(ExpressionError::Evaluation(
                    "The route must be specified when no current task is set in the context."
                        .to_string(),
                ))
            }
        },
    };

    match &context.flow {
        Some(flow) => Ok(resolve_task_state(flow, task_id, route)?),
        None => Ok(State::Unset),
    }
}

fn current_task_state(context: &EvaluationContext) -> Result<State, ExpressionError> {
    let current = get_current_task(context)?;
    task_state(context, &current.id, current.route)
}

pub fn succeeded(context: &EvaluationContext) -> Result<bool, ExpressionError> {
    Ok(current_task_state(context)?.is_succeeded())
}

pub fn failed(context: &EvaluationContext) -> Result<bool, ExpressionError> {
    Ok(current_task_state(context)?.is_failed())
}

pub fn completed(context: &EvaluationContext) -> Result<bool, ExpressionError> {
    Ok(current_task_state(context)?.is_completed())
}

/// The current task's result exactly as the context builder embedded it.
pub fn result(context: &EvaluationContext) -> Result<JsonValue, ExpressionError> {
    let current = get_current_task(context)?;
    Ok(current.result.clone().unwrap_or(JsonValue::Null))
}
