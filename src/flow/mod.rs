//! Flow tracking for a single workflow execution
//!
//! Three structures make up the flow state:
//!
//! 1. **Route table** - `routes[i]` is the ancestry of route `i`, a list of
//!    [`SplitMarker`]s leading back to route 0 (which has an empty ancestry).
//! 2. **Flow log** - `sequence`, an append-only arena of task executions. A
//!    slot may be reserved (`None`) before the task has been recorded.
//! 3. **Pointer index** - `tasks`, mapping `"<task>__r<route>"` keys to the
//!    slot currently holding that task's execution on that route.
//!
//! Nothing is ever removed: routes are not merged away at joins and log
//! slots are never compacted, so indices handed out stay valid for the
//! lifetime of the execution.

mod resolve;


use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::types::State;
use crate::utils::serde::null_as_default;

pub use resolve::resolve_task_state;

/// Errors raised when the flow structures disagree with each other.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("Task flow pointer '{0}' is not in the pointer index")]
    UnknownPointer(String),

    #[error(
        "Task flow pointer '{pointer}' references entry {index} but the flow sequence has {len} entries"
    )]
    IndexOutOfBounds {
        pointer: String,
        index: usize,
        len: usize,
    },

    #[error("Route {0} does not exist")]
    UnknownRoute(usize),
}

/// Identifies where a route diverged: the task whose transition led into a
/// split, and the route that task ran on.
///
/// Serialized in its display form, `"<task>@r<route>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SplitMarker {
    pub task_id: String,
    pub route: usize,
}

impl SplitMarker {
    pub fn new(task_id: impl Into<String>, route: usize) -> Self {
        Self {
            task_id: task_id.into(),
            route,
        }
    }
}

impl fmt::Display for SplitMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@r{}", self.task_id, self.route)
    }
}

impl std::str::FromStr for SplitMarker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (task_id, route) = s
            .rsplit_once("@r")
            .ok_or_else(|| format!("Invalid split marker: {s}"))?;
        let route = route
            .parse::<usize>()
            .map_err(|_| format!("Invalid route in split marker: {s}"))?;
        if task_id.is_empty() {
            return Err(format!("Invalid split marker: {s}"));
        }
        Ok(Self::new(task_id, route))
    }
}

impl TryFrom<String> for SplitMarker {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SplitMarker> for String {
    fn from(marker: SplitMarker) -> Self {
        marker.to_string()
    }
}

/// Address of a (task, route) pair in the pointer index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskPointer {
    pub task_id: String,
    pub route: usize,
}

impl TaskPointer {
    pub fn new(task_id: impl Into<String>, route: usize) -> Self {
        Self {
            task_id: task_id.into(),
            route,
        }
    }

    /// The string key used in the pointer index
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TaskPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__r{}", self.task_id, self.route)
    }
}

/// One execution of a task on one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFlowEntry {
    pub id: String,
    pub route: usize,
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Route table, flow log and pointer index of one workflow execution.
///
/// The conductor is the only writer. Everything else sees a cloned snapshot
/// (see [`crate::context::ContextBuilder`]), which is why the type is also
/// deserializable from partial or empty documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFlow {
    #[serde(default, deserialize_with = "null_as_default")]
    tasks: HashMap<String, Option<usize>>,
    #[serde(default, deserialize_with = "null_as_default")]
    sequence: Vec<Option<TaskFlowEntry>>,
    #[serde(default, deserialize_with = "null_as_default")]
    routes: Vec<Vec<SplitMarker>>,
}

impl TaskFlow {
    /// Create an empty flow holding only route 0
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            sequence: Vec::new(),
            routes: vec![Vec::new()],
        }
    }

    pub fn tasks(&self) -> &HashMap<String, Option<usize>> {
        &self.tasks
    }

    pub fn sequence(&self) -> &[Option<TaskFlowEntry>] {
        &self.sequence
    }

    pub fn routes(&self) -> &[Vec<SplitMarker>] {
        &self.routes
    }

    pub fn ancestry(&self, route: usize) -> Option<&[SplitMarker]> {
        self.routes.get(route).map(Vec::as_slice)
    }

    /// Allocate a log slot for `task_id` on `route`, or return the existing one.
    ///
    /// An existing slot is reused while it is unpopulated or still active.
    /// Once the execution it holds is terminal, a fresh slot is appended and
    /// the pointer moved to it; the old entry stays in the log.
    pub fn reserve_slot(&mut self, task_id: &str, route: usize) -> Result<TaskPointer, FlowError> {
        if route >= self.routes.len() {
            return Err(FlowError::UnknownRoute(route));
        }

        let pointer = TaskPointer::new(task_id, route);
        let key = pointer.key();

        if let Some(Some(index)) = self.tasks.get(&key) {
            match self.sequence.get(*index) {
                None => {
                    return Err(FlowError::IndexOutOfBounds {
                        pointer: key,
                        index: *index,
                        len: self.sequence.len(),
                    })
                }
                Some(None) => return Ok(pointer),
                Some(Some(entry)) if !entry.state.is_terminal() => return Ok(pointer),
                Some(Some(_)) => {}
            }
        }

        self.sequence.push(None);
        self.tasks.insert(key, Some(self.sequence.len() - 1));

        Ok(pointer)
    }

    /// Record a state (and optionally a result) for the slot `pointer` addresses.
    ///
    /// An unpopulated slot is populated; a populated one is mutated in place.
    /// A `None` result keeps whatever result was recorded before.
    pub fn update(
        &mut self,
        pointer: &TaskPointer,
        state: State,
        result: Option<JsonValue>,
    ) -> Result<&TaskFlowEntry, FlowError> {
        let index = self.slot_index(pointer)?;
        let entry = self.sequence[index].get_or_insert_with(|| TaskFlowEntry {
            id: pointer.task_id.clone(),
            route: pointer.route,
            state: State::Unset,
            result: None,
            retries: 0,
            updated_at: None,
        });

        entry.state = state;
        if result.is_some() {
            entry.result = result;
        }
        entry.updated_at = Some(Utc::now());

        Ok(entry)
    }

    /// Bump the retry counter of a populated entry, returning the new count.
    pub(crate) fn record_retry(&mut self, pointer: &TaskPointer) -> Result<u32, FlowError> {
        let index = self.slot_index(pointer)?;
        match self.sequence[index].as_mut() {
            Some(entry) => {
                entry.retries += 1;
                Ok(entry.retries)
            }
            None => Err(FlowError::UnknownPointer(pointer.key())),
        }
    }

    /// The entry a pointer currently addresses; `Ok(None)` for an unpopulated slot.
    pub fn entry(&self, pointer: &TaskPointer) -> Result<Option<&TaskFlowEntry>, FlowError> {
        let index = self.slot_index(pointer)?;
        Ok(self.sequence[index].as_ref())
    }

    /// Append a route diverging from `parent` at `marker`.
    pub fn new_route(&mut self, parent: usize, marker: SplitMarker) -> Result<usize, FlowError> {
        let mut ancestry = self
            .routes
            .get(parent)
            .cloned()
            .ok_or(FlowError::UnknownRoute(parent))?;
        ancestry.push(marker);
        self.routes.push(ancestry);

        Ok(self.routes.len() - 1)
    }

    /// Append a route converging from several parents (a join across routes).
    ///
    /// The ancestry is every parent's ancestry, de-duplicated in order,
    /// followed by the parents' own markers.
    pub fn merge_routes(&mut self, parents: &[SplitMarker]) -> Result<usize, FlowError> {
        let mut ancestry: Vec<SplitMarker> = Vec::new();

        for parent in parents {
            let parent_ancestry = self
                .routes
                .get(parent.route)
                .ok_or(FlowError::UnknownRoute(parent.route))?;
            for marker in parent_ancestry {
                if !ancestry.contains(marker) {
                    ancestry.push(marker.clone());
                }
            }
        }

        for parent in parents {
            if !ancestry.contains(parent) {
                ancestry.push(parent.clone());
            }
        }

        self.routes.push(ancestry);
        Ok(self.routes.len() - 1)
    }

    /// State of `task_id` as seen from `route`, following route ancestry.
    pub fn get_task_state(&self, task_id: &str, route: usize) -> Result<State, FlowError> {
        resolve_task_state(self, task_id, route)
    }

    /// The populated entries the pointer index currently addresses, in log order.
    pub fn current_entries(&self) -> impl Iterator<Item = &TaskFlowEntry> {
        let mut indices: Vec<usize> = self.tasks.values().filter_map(|index| *index).collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(move |i| self.sequence.get(i).and_then(Option::as_ref))
    }

    /// Whether any addressed entry is still active, or any slot is reserved but unpopulated.
    pub fn has_active_tasks(&self) -> bool {
        self.tasks.values().any(|index| match index.and_then(|i| self.sequence.get(i)) {
            Some(Some(entry)) => entry.state.is_active(),
            Some(None) => true,
            None => false,
        })
    }

    fn slot_index(&self, pointer: &TaskPointer) -> Result<usize, FlowError> {
        let key = pointer.key();
        let index = self
            .tasks
            .get(&key)
            .copied()
            .flatten()
            .ok_or_else(|| FlowError::UnknownPointer(key.clone()))?;

        if index >= self.sequence.len() {
            return Err(FlowError::IndexOutOfBounds {
                pointer: key,
                index,
                len: self.sequence.len(),
            });
        }

        Ok(index)
    }
}
