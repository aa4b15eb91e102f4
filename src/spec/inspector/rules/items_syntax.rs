//! Rule: Item Clause Syntax
//!
//! Reports an item clause that is neither a bare expression nor
//! `<name>[, <name>]* in <expression>`.
//!
//! ```json
//! {"with": "foo; bar in <% zip(ctx(xs), ctx(ys)) %>"}
//! ```

use crate::spec::{ItemsClause, WorkflowSpec, ITEMS_PATTERN};

use super::super::{InspectionCategory, InspectionError, InspectionRule, TASK_SCHEMA_PATH};

pub struct ItemsSyntaxRule;

impl InspectionRule for ItemsSyntaxRule {
    fn id(&self) -> &'static str {
        "items-syntax"
    }

    fn description(&self) -> &'static str {
        "Item clauses must match the item clause pattern"
    }

    fn category(&self) -> InspectionCategory {
        InspectionCategory::Syntax
    }

    fn inspect(&self, spec: &WorkflowSpec) -> Vec<InspectionError> {
        spec.tasks
            .iter()
            .filter_map(|task| {
                let raw = task.items()?;
                if ItemsClause::parse(raw).is_some() {
                    return None;
                }
                Some(InspectionError::new(
                    format!("'{raw}' does not match '{ITEMS_PATTERN}'"),
                    format!("{TASK_SCHEMA_PATH}.properties.with.properties.items.pattern"),
                    format!("tasks.{}.with.items", task.name),
                ))
            })
            .collect()
    }
}
