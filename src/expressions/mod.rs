//! Embedded expressions
//!
//! Workflow specs embed expressions in two delimiter styles, `<% .. %>`
//! (yaql) and `{{ .. }}` / `{% .. %}` (jinja). The languages themselves are
//! pluggable: anything implementing [`ExpressionEvaluator`] can be
//! registered in [`Expressions`]. Both languages reach the workflow functions
//! through the same [`call_function`] dispatcher.

mod evaluator;
pub mod functions;
pub mod parser;


use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::context::EvaluationContext;
use crate::flow::FlowError;

pub use evaluator::CallEvaluator;
pub use functions::{call_function, WorkflowFunction};
pub use parser::{extract_variables, find_expressions, parse_expression, ExpressionSpan};

/// Embedded expression languages, told apart by their delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionLanguage {
    Yaql,
    Jinja,
}

impl ExpressionLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yaql => "yaql",
            Self::Jinja => "jinja",
        }
    }
}

impl fmt::Display for ExpressionLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// Recoverable: the context cannot answer the question asked of it
    #[error("{0}")]
    Evaluation(String),

    /// The pointer index references a slot past the end of the flow log
    #[error(
        "Task flow pointer '{pointer}' references entry {index} but the flow sequence has {len} entries"
    )]
    IndexOutOfBounds {
        pointer: String,
        index: usize,
        len: usize,
    },

    #[error("Inconsistent task flow: {0}")]
    Inconsistent(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid arguments for {function}(): {message}")]
    InvalidArguments { function: String, message: String },

    #[error("Unable to parse expression '{expression}': {message}")]
    Syntax { expression: String, message: String },

    #[error("No evaluator registered for {0} expressions")]
    NoEvaluator(ExpressionLanguage),
}

impl ExpressionError {
    /// Whether this error signals corrupted flow state rather than a bad expression
    pub fn is_consistency_fault(&self) -> bool {
        matches!(self, Self::IndexOutOfBounds { .. } | Self::Inconsistent(_))
    }
}

impl From<FlowError> for ExpressionError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::IndexOutOfBounds {
                pointer,
                index,
                len,
            } => Self::IndexOutOfBounds {
                pointer,
                index,
                len,
            },
            other => Self::Inconsistent(other.to_string()),
        }
    }
}

/// The uniform call contract between the conductor and a language.
///
/// `body` is the expression text without its delimiters. Implementations
/// must only read the context.
pub trait ExpressionEvaluator: Send + Sync {
    fn language(&self) -> ExpressionLanguage;

    fn evaluate(&self, body: &str, context: &EvaluationContext) -> Result<JsonValue, ExpressionError>;
}

/// One evaluator per language.
#[derive(Clone)]
pub struct Expressions {
    evaluators: HashMap<ExpressionLanguage, Arc<dyn ExpressionEvaluator>>,
}

impl Default for Expressions {
    fn default() -> Self {
        let mut expressions = Self::empty();
        expressions.register(Arc::new(CallEvaluator::new(ExpressionLanguage::Yaql)));
        expressions.register(Arc::new(CallEvaluator::new(ExpressionLanguage::Jinja)));
        expressions
    }
}

impl fmt::Debug for Expressions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut languages: Vec<_> = self.evaluators.keys().map(|l| l.as_str()).collect();
        languages.sort_unstable();
        f.debug_struct("Expressions").field("languages", &languages).finish()
    }
}

impl Expressions {
    /// A registry with the built-in evaluator for both languages
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            evaluators: HashMap::new(),
        }
    }

    /// Register an evaluator, replacing any previous one for its language
    pub fn register(&mut self, evaluator: Arc<dyn ExpressionEvaluator>) {
        self.evaluators.insert(evaluator.language(), evaluator);
    }

    pub fn evaluate(
        &self,
        expression: &ExpressionSpan,
        context: &EvaluationContext,
    ) -> Result<JsonValue, ExpressionError> {
        let evaluator = self
            .evaluators
            .get(&expression.language)
            .ok_or(ExpressionError::NoEvaluator(expression.language))?;
        evaluator.evaluate(&expression.body, context)
    }

    /// Evaluate every expression embedded in `value`.
    ///
    /// A string that is exactly one expression becomes that expression's
    /// value (of any JSON type). Expressions inside other text are
    /// interpolated into it. Arrays and objects are rendered element-wise.
    pub fn render(&self, value: &JsonValue, context: &EvaluationContext) -> Result<JsonValue, ExpressionError> {
        match value {
            JsonValue::String(text) => self.render_str(text, context),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.render(item, context))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            JsonValue::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render(item, context)?);
                }
                Ok(JsonValue::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_str(&self, text: &str, context: &EvaluationContext) -> Result<JsonValue, ExpressionError> {
        if let Some(expression) = parse_expression(text) {
            return self.evaluate(&expression, context);
        }

        let expressions = find_expressions(text);
        if expressions.is_empty() {
            return Ok(JsonValue::String(text.to_string()));
        }

        let mut rendered = String::with_capacity(text.len());
        let mut cursor = 0;
        for expression in &expressions {
            rendered.push_str(&text[cursor..expression.start]);
            match self.evaluate(expression, context)? {
                JsonValue::String(s) => rendered.push_str(&s),
                JsonValue::Null => {}
                other => rendered.push_str(&other.to_string()),
            }
            cursor = expression.end;
        }
        rendered.push_str(&text[cursor..]);

        Ok(JsonValue::String(rendered))
    }
}

/// Truthiness of an evaluated value, as transition conditions see it
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}
