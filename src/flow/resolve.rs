//! Task state resolution across routes
//!
//! Resolution is two-level:
//!
//! 1. **Direct** - look the task up under the requested route's pointer key.
//! 2. **Ancestry** - if the task was never recorded on that route, try each
//!    ancestor route, nearest first, ending at route 0.
//!
//! A branch that has not (yet) run a task itself therefore sees the outcome
//! recorded upstream of the split it came from, without the conductor having
//! to copy entries into every descendant route.

use super::{FlowError, TaskFlow, TaskFlowEntry, TaskPointer};
use crate::types::State;

/// Outcome of a direct lookup on a single route.
enum Lookup<'a> {
    /// A populated entry recorded on exactly this route
    Recorded(&'a TaskFlowEntry),
    /// A slot is reserved on this route but nothing is recorded yet
    Reserved,
    /// Nothing on this route
    Missing,
}

fn lookup<'a>(flow: &'a TaskFlow, task_id: &str, route: usize) -> Result<Lookup<'a>, FlowError> {
    let key = TaskPointer::new(task_id, route).key();

    let Some(Some(index)) = flow.tasks.get(&key).copied() else {
        return Ok(Lookup::Missing);
    };

    match flow.sequence.get(index) {
        None => Err(FlowError::IndexOutOfBounds {
            pointer: key,
            index,
            len: flow.sequence.len(),
        }),
        Some(None) => Ok(Lookup::Reserved),
        Some(Some(entry)) if entry.route == route => Ok(Lookup::Recorded(entry)),
        Some(Some(_)) => Ok(Lookup::Missing),
    }
}

/// Routes to consult after the requested one, nearest ancestor first.
///
/// Unknown routes have no ancestry at all. Route 0 closes every walk.
fn ancestor_routes(flow: &TaskFlow, route: usize) -> Vec<usize> {
    let Some(ancestry) = flow.routes.get(route) else {
        return Vec::new();
    };

    let mut ancestors: Vec<usize> = Vec::with_capacity(ancestry.len() + 1);
    for marker in ancestry.iter().rev() {
        if marker.route != route && !ancestors.contains(&marker.route) {
            ancestors.push(marker.route);
        }
    }

    if route != 0 && !ancestors.contains(&0) {
        ancestors.push(0);
    }

    ancestors
}

/// Resolve the state of `task_id` as observed from `route`.
///
/// Returns `Unset` when the task has not been recorded on the route or any
/// of its ancestors. A pointer referencing a slot past the end of the log is
/// an inconsistency and is returned as an error, never downgraded to `Unset`.
pub fn resolve_task_state(flow: &TaskFlow, task_id: &str, route: usize) -> Result<State, FlowError> {
    match lookup(flow, task_id, route)? {
        Lookup::Recorded(entry) => return Ok(entry.state),
        Lookup::Reserved => return Ok(State::Unset),
        Lookup::Missing => {}
    }

    for ancestor in ancestor_routes(flow, route) {
        if let Lookup::Recorded(entry) = lookup(flow, task_id, ancestor)? {
            return Ok(entry.state);
        }
    }

    Ok(State::Unset)
}
