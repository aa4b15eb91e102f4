//! Rule: Task References
//!
//! Reports task graph problems that make a spec impossible to run:
//!
//! - a task name declared twice
//! - a transition into a task that does not exist
//! - a join count larger than the number of tasks transitioning into it
//! - no start task (every task has an inbound transition)

use std::collections::HashSet;

use crate::spec::{JoinSpec, WorkflowSpec};

use super::super::{InspectionCategory, InspectionError, InspectionRule, TASK_SCHEMA_PATH};

pub struct TaskReferencesRule;

impl InspectionRule for TaskReferencesRule {
    fn id(&self) -> &'static str {
        "task-references"
    }

    fn description(&self) -> &'static str {
        "Transitions must lead to declared tasks and joins must be satisfiable"
    }

    fn category(&self) -> InspectionCategory {
        InspectionCategory::Semantics
    }

    fn inspect(&self, spec: &WorkflowSpec) -> Vec<InspectionError> {
        let mut errors = Vec::new();
        let mut declared: HashSet<&str> = HashSet::new();

        for task in &spec.tasks {
            if !declared.insert(task.name.as_str()) {
                errors.push(InspectionError::new(
                    format!("Task \"{}\" is declared more than once.", task.name),
                    "properties.tasks",
                    format!("tasks.{}", task.name),
                ));
            }
        }

        for task in &spec.tasks {
            for (index, transition) in task.next.iter().enumerate() {
                for target in &transition.targets {
                    if !spec.has_task(target) {
                        errors.push(InspectionError::new(
                            format!("The task \"{target}\" is not defined."),
                            format!("{TASK_SCHEMA_PATH}.properties.next.items.properties.do"),
                            format!("tasks.{}.next[{index}].do", task.name),
                        ));
                    }
                }
            }

            if let Some(JoinSpec::Count(count)) = task.join {
                let arriving = spec.inbound_sources(&task.name).len();
                if count > arriving {
                    errors.push(InspectionError::new(
                        format!(
                            "The join count {count} of task \"{}\" exceeds the {arriving} task(s) transitioning into it.",
                            task.name
                        ),
                        format!("{TASK_SCHEMA_PATH}.properties.join"),
                        format!("tasks.{}.join", task.name),
                    ));
                }
            }
        }

        if !spec.tasks.is_empty() && spec.start_tasks().is_empty() {
            errors.push(InspectionError::new(
                "There are no start tasks: every task has an inbound transition.",
                "properties.tasks",
                "tasks",
            ));
        }

        errors
    }
}
