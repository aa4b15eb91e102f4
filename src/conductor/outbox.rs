//! Task dispatches waiting to be picked up by the executor layer

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A request to run one task on one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub task_id: String,
    pub route: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// The task's input with every expression rendered
    pub input: JsonValue,
    /// Evaluated items, one object per item when loop variables are named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u64>,
    /// Seconds the executor should wait before running the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Number of retries that preceded this dispatch
    #[serde(default)]
    pub attempt: u32,
}

/// Dispatches produced by conductor mutations, in the order they were made.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    dispatches: Vec<TaskDispatch>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dispatch: TaskDispatch) {
        self.dispatches.push(dispatch);
    }

    pub fn len(&self) -> usize {
        self.dispatches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDispatch> {
        self.dispatches.iter()
    }

    /// Hand over everything queued so far, leaving the outbox empty
    pub fn take(&mut self) -> Vec<TaskDispatch> {
        std::mem::take(&mut self.dispatches)
    }
}
