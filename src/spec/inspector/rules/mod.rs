//! Inspection Rules
//!
//! Each file in this module contains one inspection rule:
//!
//! - `items_syntax.rs` - Item clauses that do not match the clause pattern
//! - `task_references.rs` - Task graph problems
//! - `undefined_variable.rs` - Variables referenced before assignment

mod items_syntax;
mod task_references;
mod undefined_variable;

pub use items_syntax::ItemsSyntaxRule;
pub use task_references::TaskReferencesRule;
pub use undefined_variable::UndefinedVariableRule;
