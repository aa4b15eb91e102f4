//! Built-in evaluator for single function calls

use serde_json::Value as JsonValue;

use super::functions::{call_function, WorkflowFunction};
use super::parser::{parse_call_expression, Argument, Call, Term};
use super::{is_truthy, ExpressionError, ExpressionEvaluator, ExpressionLanguage};
use crate::context::EvaluationContext;

/// Evaluates one optionally negated call or literal, e.g.
/// `not task_state(t1)`, `ctx(xs)`, `result().status`.
///
/// This covers what transition conditions, publishes and item clauses need
/// from either language. Full template engines register their own
/// [`ExpressionEvaluator`] instead.
#[derive(Debug, Clone, Copy)]
pub struct CallEvaluator {
    language: ExpressionLanguage,
}

impl CallEvaluator {
    pub fn new(language: ExpressionLanguage) -> Self {
        Self { language }
    }
}

impl ExpressionEvaluator for CallEvaluator {
    fn language(&self) -> ExpressionLanguage {
        self.language
    }

    fn evaluate(&self, body: &str, context: &EvaluationContext) -> Result<JsonValue, ExpressionError> {
        let parsed = parse_call_expression(body)?;

        let value = match &parsed.term {
            Term::Literal(value) => value.clone(),
            Term::Call(call) => evaluate_call(call, context)?,
        };

        if parsed.negated {
            Ok(JsonValue::Bool(!is_truthy(&value)))
        } else {
            Ok(value)
        }
    }
}

fn evaluate_call(call: &Call, context: &EvaluationContext) -> Result<JsonValue, ExpressionError> {
    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(match arg {
            Argument::Literal(value) => value.clone(),
            Argument::Name(name) => JsonValue::String(name.clone()),
            Argument::Call(inner) => evaluate_call(inner, context)?,
        });
    }

    let mut value = if call.name == "ctx" {
        lookup_variable(context, &args)?
    } else {
        let func = WorkflowFunction::from_name(&call.name)
            .ok_or_else(|| ExpressionError::UnknownFunction(call.name.clone()))?;
        call_function(func, context, &args)?
    };

    for field in &call.accessors {
        value = match value {
            JsonValue::Object(mut map) => map.remove(field).unwrap_or(JsonValue::Null),
            _ => JsonValue::Null,
        };
    }

    Ok(value)
}

/// `ctx()` is the whole variable context, `ctx(name)` one variable.
fn lookup_variable(context: &EvaluationContext, args: &[JsonValue]) -> Result<JsonValue, ExpressionError> {
    match args {
        [] => Ok(JsonValue::Object(context.ctx.clone())),
        [JsonValue::String(name)] => context
            .ctx
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::Evaluation(format!("Variable \"{name}\" is not defined."))),
        _ => Err(ExpressionError::InvalidArguments {
            function: "ctx".to_string(),
            message: "Expected no arguments or one variable name".to_string(),
        }),
    }
}
