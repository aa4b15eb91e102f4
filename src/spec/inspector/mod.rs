//! Static inspection of workflow specs
//!
//! Inspection runs once, when a spec is loaded, and never fails: every
//! problem found becomes an [`InspectionError`] in the report so they can
//! all be shown at once.
//!
//! # Architecture
//!
//! 1. **InspectionRule trait** - Each rule implements this trait
//! 2. **Inspector** - Collects and runs all rules
//! 3. **InspectionReport** - Errors grouped by category
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `inspector/rules/`
//! 2. Implement `InspectionRule` for your struct
//! 3. Add it to the `Inspector::new()` constructor

pub mod rules;


use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::WorkflowSpec;
use crate::expressions::ExpressionLanguage;

/// Schema path prefix shared by every per-task field
pub const TASK_SCHEMA_PATH: &str = r"properties.tasks.patternProperties.^\w+$";

// ============================================================================
// Report Types
// ============================================================================

/// Report categories, in the order they are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionCategory {
    /// Malformed field text
    Syntax,
    /// Task graph problems
    Semantics,
    /// Variables referenced before assignment
    Context,
}

impl fmt::Display for InspectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::Semantics => write!(f, "semantics"),
            Self::Context => write!(f, "context"),
        }
    }
}

/// One problem found in a spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionError {
    /// Language of the offending expression, for context errors
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub language: Option<ExpressionLanguage>,
    /// The offending field text, for context errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub message: String,
    pub schema_path: String,
    pub spec_path: String,
}

impl InspectionError {
    pub fn new(
        message: impl Into<String>,
        schema_path: impl Into<String>,
        spec_path: impl Into<String>,
    ) -> Self {
        Self {
            language: None,
            expression: None,
            message: message.into(),
            schema_path: schema_path.into(),
            spec_path: spec_path.into(),
        }
    }

    pub fn with_expression(mut self, language: ExpressionLanguage, expression: impl Into<String>) -> Self {
        self.language = Some(language);
        self.expression = Some(expression.into());
        self
    }
}

impl fmt::Display for InspectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.spec_path, self.message)
    }
}

/// Inspection errors grouped by category.
///
/// Serializes as `{"<category>": [errors]}`; categories without errors are
/// left out, so a clean spec serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InspectionReport {
    errors: BTreeMap<InspectionCategory, Vec<InspectionError>>,
}

impl InspectionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: InspectionCategory, error: InspectionError) {
        self.errors.entry(category).or_default().push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn get(&self, category: InspectionCategory) -> &[InspectionError] {
        self.errors.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (InspectionCategory, &InspectionError)> {
        self.errors
            .iter()
            .flat_map(|(category, errors)| errors.iter().map(move |e| (*category, e)))
    }
}

impl fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (category, error) in self.iter() {
            writeln!(f, "[{category}] {error}")?;
        }
        Ok(())
    }
}

// ============================================================================
// InspectionRule Trait
// ============================================================================

/// Trait that all inspection rules must implement.
///
/// Each rule checks one aspect of a spec and reports into one category.
pub trait InspectionRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "undefined-variable")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    fn category(&self) -> InspectionCategory;

    /// Errors found, in task declaration order
    fn inspect(&self, spec: &WorkflowSpec) -> Vec<InspectionError>;
}

// ============================================================================
// Inspector - Runs All Rules
// ============================================================================

pub struct Inspector {
    rules: Vec<Box<dyn InspectionRule>>,
}

impl Inspector {
    /// Create an inspector with all built-in rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(rules::ItemsSyntaxRule),
                Box::new(rules::TaskReferencesRule),
                Box::new(rules::UndefinedVariableRule),
            ],
        }
    }

    pub fn inspect(&self, spec: &WorkflowSpec) -> InspectionReport {
        let mut report = InspectionReport::new();
        for rule in &self.rules {
            for error in rule.inspect(spec) {
                report.push(rule.category(), error);
            }
        }
        report
    }

    /// Registered rules as `(id, description)` pairs
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}
