//! Workflow conductor
//!
//! The conductor is the single writer of one workflow execution's flow
//! state. It consumes state requests and executor callbacks one at a time
//! and turns them into:
//!
//! - flow log updates (slots reserved on dispatch, mutated on callbacks)
//! - new routes at split tasks, merged routes at joins across routes
//! - [`TaskDispatch`]es queued in an [`Outbox`] for the executor layer
//!
//! Expressions only ever see snapshots built by
//! [`ContextBuilder`](crate::context::ContextBuilder). For concurrent use,
//! wrap the conductor in a [`ConductorHandle`].

mod handle;
mod join;
mod outbox;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConductorSettings;
use crate::context::{ContextBuilder, EvaluationContext};
use crate::expressions::{is_truthy, ExpressionError, Expressions};
use crate::flow::{FlowError, SplitMarker, TaskFlow, TaskPointer};
use crate::spec::{Concurrency, InspectionReport, ItemsClause, JoinSpec, TaskSpec, WorkflowSpec, ITEMS_PATTERN};
use crate::types::{ErrorPolicy, State};

pub use handle::ConductorHandle;
pub use outbox::{Outbox, TaskDispatch};

use join::{JoinBarriers, JoinOutcome};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConductorError {
    #[error("Workflow spec failed inspection:\n{0}")]
    InvalidSpec(InspectionReport),

    #[error("Unexpected inputs: {}", .0.join(", "))]
    UnexpectedInputs(Vec<String>),

    #[error("Task \"{task_id}\" has no execution on route {route}")]
    UnknownTask { task_id: String, route: usize },

    #[error("Task \"{task_id}\" on route {route} cannot move from {from} to {to}")]
    InvalidTaskTransition {
        task_id: String,
        route: usize,
        from: State,
        to: State,
    },

    #[error("Workflow cannot move from {from} to {to}")]
    InvalidWorkflowTransition { from: State, to: State },

    #[error("Workflow has not been started")]
    NotStarted,

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("Conductor handle is closed")]
    HandleClosed,
}

/// A failure the conductor recorded instead of raising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<usize>,
    pub message: String,
}

impl WorkflowError {
    fn task(pointer: &TaskPointer, message: impl Into<String>) -> Self {
        Self {
            task_id: Some(pointer.task_id.clone()),
            route: Some(pointer.route),
            message: message.into(),
        }
    }

    fn workflow(message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            route: None,
            message: message.into(),
        }
    }
}

/// Drives one workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowConductor {
    id: Uuid,
    spec: WorkflowSpec,
    expressions: Expressions,
    policy: ErrorPolicy,
    state: State,
    flow: TaskFlow,
    /// Variable context of each route, indexed like the route table
    contexts: Vec<Map<String, JsonValue>>,
    joins: JoinBarriers,
    /// Slots reserved while paused, dispatched on resume
    held: Vec<TaskPointer>,
    outbox: Outbox,
    errors: Vec<WorkflowError>,
    output: Option<Map<String, JsonValue>>,
}

impl WorkflowConductor {
    /// Load `spec` and seed route 0 with `inputs` and declared defaults.
    ///
    /// Fails if inspection reports anything or if `inputs` holds a name
    /// the workflow does not declare.
    pub fn new(spec: WorkflowSpec, inputs: Map<String, JsonValue>) -> Result<Self, ConductorError> {
        let report = spec.inspect();
        if !report.is_empty() {
            return Err(ConductorError::InvalidSpec(report));
        }

        let declared: BTreeSet<&str> = spec.input_names().collect();
        let unexpected: Vec<String> = inputs
            .keys()
            .filter(|name| !declared.contains(name.as_str()))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(ConductorError::UnexpectedInputs(unexpected));
        }

        let expressions = Expressions::new();
        let mut variables = Map::new();
        for decl in &spec.input {
            let value = match (inputs.get(&decl.name), &decl.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => {
                    let context = EvaluationContext::new().with_variables(variables.clone());
                    expressions.render(default, &context)?
                }
                (None, None) => JsonValue::Null,
            };
            variables.insert(decl.name.clone(), value);
        }

        let id = Uuid::new_v4();
        debug!(workflow_id = %id, inputs = variables.len(), "Workflow conductor created");

        Ok(Self {
            id,
            spec,
            expressions,
            policy: ErrorPolicy::default(),
            state: State::Unset,
            flow: TaskFlow::new(),
            contexts: vec![variables],
            joins: JoinBarriers::new(),
            held: Vec::new(),
            outbox: Outbox::new(),
            errors: Vec::new(),
            output: None,
        })
    }

    /// Replace the expression evaluators
    pub fn with_expressions(mut self, expressions: Expressions) -> Self {
        self.expressions = expressions;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply the `[conductor]` section of the configuration
    pub fn with_settings(self, settings: &ConductorSettings) -> Self {
        self.with_error_policy(settings.error_policy)
    }

    /// Move the conductor into a background task sized by `settings`
    pub fn spawn(self, settings: &ConductorSettings) -> ConductorHandle {
        let conductor = self.with_settings(settings);
        ConductorHandle::spawn(conductor, settings.command_buffer)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> &WorkflowSpec {
        &self.spec
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn flow(&self) -> &TaskFlow {
        &self.flow
    }

    pub fn errors(&self) -> &[WorkflowError] {
        &self.errors
    }

    /// Rendered workflow output, once the workflow has succeeded
    pub fn output(&self) -> Option<&Map<String, JsonValue>> {
        self.output.as_ref()
    }

    pub fn route_context(&self, route: usize) -> Option<&Map<String, JsonValue>> {
        self.contexts.get(route)
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Hand queued dispatches over to the executor layer
    pub fn take_dispatches(&mut self) -> Vec<TaskDispatch> {
        self.outbox.take()
    }

    /// Join barriers of `task_id` still waiting for arrivals
    pub fn pending_joins(&self, task_id: &str) -> usize {
        self.joins.pending(task_id)
    }

    /// Snapshot for evaluating `task_id`'s expressions on `route`
    pub fn task_context(&self, task_id: &str, route: usize, result: Option<JsonValue>) -> EvaluationContext {
        let empty = Map::new();
        let variables = self.contexts.get(route).unwrap_or(&empty);
        ContextBuilder::new(&self.flow, variables).for_task(task_id, route, result)
    }

    /// Workflow-level snapshot: no current task, variables of every route merged
    pub fn snapshot(&self) -> EvaluationContext {
        let variables = self.workflow_variables();
        ContextBuilder::new(&self.flow, &variables).for_workflow()
    }

    /* ===================== Workflow State ===================== */

    /// Start, pause, resume or cancel the workflow.
    ///
    /// Requesting the current state again is a no-op.
    pub fn request_workflow_state(&mut self, requested: State) -> Result<(), ConductorError> {
        if requested == self.state {
            return Ok(());
        }

        match (self.state, requested) {
            (State::Unset, State::Running) => self.start(),
            (State::Paused, State::Running) => self.resume(),
            (State::Canceled, State::Running) => self.resume_canceled(),
            (State::Running, State::Paused) => {
                self.set_state(State::Paused);
                Ok(())
            }
            (State::Running | State::Paused, State::Canceled) => self.cancel(),
            (from, to) => Err(ConductorError::InvalidWorkflowTransition { from, to }),
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            info!(workflow_id = %self.id, from = %self.state, to = %state, "Workflow state changed");
            self.state = state;
        }
    }

    fn start(&mut self) -> Result<(), ConductorError> {
        self.set_state(State::Running);

        let starts: Vec<String> = self.spec.start_tasks().iter().map(|t| t.name.clone()).collect();
        for task_id in starts {
            self.dispatch(&task_id, 0)?;
        }

        self.refresh_workflow_state()
    }

    fn resume(&mut self) -> Result<(), ConductorError> {
        self.set_state(State::Running);

        for pointer in std::mem::take(&mut self.held) {
            self.emit(pointer)?;
        }

        self.refresh_workflow_state()
    }

    fn resume_canceled(&mut self) -> Result<(), ConductorError> {
        let canceled: Vec<(String, usize)> = self
            .flow
            .current_entries()
            .filter(|entry| entry.state == State::Canceled)
            .map(|entry| (entry.id.clone(), entry.route))
            .collect();

        self.set_state(State::Running);

        for (task_id, route) in canceled {
            self.dispatch(&task_id, route)?;
        }

        self.refresh_workflow_state()
    }

    fn cancel(&mut self) -> Result<(), ConductorError> {
        self.set_state(State::Canceled);
        self.cancel_outstanding()
    }

    /// Move every active execution, and every held slot, to `Canceled`.
    fn cancel_outstanding(&mut self) -> Result<(), ConductorError> {
        let active: Vec<TaskPointer> = self
            .flow
            .current_entries()
            .filter(|entry| entry.state.is_active())
            .map(|entry| TaskPointer::new(&entry.id, entry.route))
            .collect();

        let held = std::mem::take(&mut self.held);
        for pointer in active.iter().chain(held.iter()) {
            self.flow.update(pointer, State::Canceled, None)?;
            debug!(task_id = %pointer.task_id, route = pointer.route, "Task canceled");
        }

        Ok(())
    }

    fn fail_workflow(&mut self) -> Result<(), ConductorError> {
        self.set_state(State::Failed);

        for pointer in std::mem::take(&mut self.held) {
            self.flow.update(&pointer, State::Canceled, None)?;
        }

        Ok(())
    }

    /// Settle the workflow once nothing is left to run.
    fn refresh_workflow_state(&mut self) -> Result<(), ConductorError> {
        if self.state != State::Running || self.flow.has_active_tasks() {
            return Ok(());
        }

        for stranded in self.joins.stranded() {
            self.unhandled(WorkflowError::workflow(format!(
                "Join task \"{}\" can never run: {} of {} required task(s) arrived ({}).",
                stranded.task_id,
                stranded.arrived.len(),
                stranded.required,
                stranded.arrived.join(", ")
            )))?;
            if self.state.is_terminal() {
                return Ok(());
            }
        }

        if !self.errors.is_empty() {
            self.set_state(State::CompletedWithErrors);
            return Ok(());
        }

        match self.render_output() {
            Ok(output) => {
                self.output = Some(output);
                self.set_state(State::Succeeded);
                Ok(())
            }
            Err(err) => {
                warn!(workflow_id = %self.id, error = %err, "Workflow output could not be rendered");
                self.errors.push(WorkflowError::workflow(err.to_string()));
                match self.policy {
                    ErrorPolicy::Abort => self.set_state(State::Failed),
                    ErrorPolicy::Continue => self.set_state(State::CompletedWithErrors),
                }
                Ok(())
            }
        }
    }

    fn workflow_variables(&self) -> Map<String, JsonValue> {
        let mut variables = Map::new();
        for context in &self.contexts {
            variables.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        variables
    }

    /// Render the declared outputs in order; later outputs may read earlier ones.
    fn render_output(&self) -> Result<Map<String, JsonValue>, ExpressionError> {
        let mut variables = self.workflow_variables();
        let mut output = Map::new();

        for binding in &self.spec.output {
            let context = ContextBuilder::new(&self.flow, &variables).for_workflow();
            let value = self.expressions.render(&binding.value, &context)?;
            variables.insert(binding.name.clone(), value.clone());
            output.insert(binding.name.clone(), value);
        }

        Ok(output)
    }

    /* ===================== Task State ===================== */

    /// Apply an executor callback for the execution of `task_id` on `route`.
    pub fn update_task_state(
        &mut self,
        task_id: &str,
        route: usize,
        state: State,
        result: Option<JsonValue>,
    ) -> Result<(), ConductorError> {
        if self.state == State::Unset {
            return Err(ConductorError::NotStarted);
        }

        let pointer = TaskPointer::new(task_id, route);
        let current = match self.flow.entry(&pointer) {
            Ok(Some(entry)) => entry.state,
            Ok(None) | Err(FlowError::UnknownPointer(_)) => {
                return Err(ConductorError::UnknownTask {
                    task_id: task_id.to_string(),
                    route,
                })
            }
            Err(err) => return Err(err.into()),
        };

        if !current.can_transition_to(state) {
            if current == State::Canceled && self.state == State::Canceled {
                warn!(task_id, route, state = %state, "Ignoring update for canceled task");
                return Ok(());
            }
            return Err(ConductorError::InvalidTaskTransition {
                task_id: task_id.to_string(),
                route,
                from: current,
                to: state,
            });
        }

        self.flow.update(&pointer, state, result.clone())?;
        info!(task_id, route, state = %state, "Task state updated");

        if state.is_terminal() && !self.state.is_terminal() {
            self.complete_task(pointer, state, result)?;
        }

        self.refresh_workflow_state()
    }

    /// Retry, or evaluate the transitions of a task that reached a terminal state.
    fn complete_task(
        &mut self,
        pointer: TaskPointer,
        state: State,
        result: Option<JsonValue>,
    ) -> Result<(), ConductorError> {
        let task = self.task_spec(&pointer)?;

        if state == State::Failed {
            if let Some(retry) = &task.retry {
                let retries = self.flow.entry(&pointer)?.map_or(0, |entry| entry.retries);
                if retries < retry.count {
                    let attempt = self.flow.record_retry(&pointer)?;
                    info!(task_id = %pointer.task_id, route = pointer.route, attempt, "Retrying task");
                    return self.emit_with_delay(pointer, retry.delay);
                }
            }
        }

        if state == State::Canceled {
            return Ok(());
        }

        let mut handled = false;
        // Publishes go into both the route's variables and this snapshot
        let mut context = self.task_context(&pointer.task_id, pointer.route, result);

        for (index, transition) in task.next.iter().enumerate() {
            let fires = match &transition.when {
                None => state == State::Succeeded,
                Some(when) => {
                    match self.expressions.render(&JsonValue::String(when.clone()), &context) {
                        Ok(value) => is_truthy(&value),
                        Err(err) => return self.evaluation_failed(&pointer, err),
                    }
                }
            };

            if !fires {
                continue;
            }
            handled = true;
            debug!(task_id = %pointer.task_id, route = pointer.route, transition = index, "Transition fired");

            for binding in &transition.publish {
                match self.expressions.render(&binding.value, &context) {
                    Ok(value) => {
                        if let Some(variables) = self.contexts.get_mut(pointer.route) {
                            variables.insert(binding.name.clone(), value.clone());
                        }
                        context.ctx.insert(binding.name.clone(), value);
                    }
                    Err(err) => return self.evaluation_failed(&pointer, err),
                }
            }

            for target in &transition.targets {
                self.arrive(target, &pointer)?;
                if self.state.is_terminal() {
                    return Ok(());
                }
            }
        }

        if state == State::Failed && !handled {
            self.unhandled(WorkflowError::task(
                &pointer,
                format!("Task \"{}\" failed and no transition handled the failure.", pointer.task_id),
            ))?;
        }

        Ok(())
    }

    fn task_spec(&self, pointer: &TaskPointer) -> Result<TaskSpec, ConductorError> {
        self.spec
            .task(&pointer.task_id)
            .cloned()
            .ok_or_else(|| ConductorError::UnknownTask {
                task_id: pointer.task_id.clone(),
                route: pointer.route,
            })
    }

    /// Record a failure nothing handled, then apply the error policy.
    fn unhandled(&mut self, error: WorkflowError) -> Result<(), ConductorError> {
        warn!(
            workflow_id = %self.id,
            task_id = error.task_id.as_deref().unwrap_or(""),
            policy = ?self.policy,
            "{}",
            error.message
        );
        self.errors.push(error);

        match self.policy {
            ErrorPolicy::Abort => self.fail_workflow(),
            ErrorPolicy::Continue => Ok(()),
        }
    }

    /// An expression of `pointer`'s task failed to evaluate.
    ///
    /// Flow inconsistencies fail the workflow and propagate regardless of
    /// policy; anything else is an ordinary unhandled failure.
    fn evaluation_failed(&mut self, pointer: &TaskPointer, err: ExpressionError) -> Result<(), ConductorError> {
        if err.is_consistency_fault() {
            self.errors.push(WorkflowError::task(pointer, err.to_string()));
            self.fail_workflow()?;
            return Err(err.into());
        }
        self.unhandled(WorkflowError::task(pointer, err.to_string()))
    }

    /* ===================== Routing ===================== */

    /// `from` transitioned into `target`.
    fn arrive(&mut self, target: &str, from: &TaskPointer) -> Result<(), ConductorError> {
        let join = match self.spec.task(target) {
            Some(task) => task.join,
            None => {
                return Err(ConductorError::UnknownTask {
                    task_id: target.to_string(),
                    route: from.route,
                })
            }
        };
        let marker = SplitMarker::new(&from.task_id, from.route);

        if let Some(join) = join {
            let sources = self.spec.inbound_sources(target).len();
            let required = match join {
                JoinSpec::All => sources,
                JoinSpec::Count(count) => count,
            };

            match self.joins.arrive(target, marker, required, sources) {
                JoinOutcome::Waiting { arrived, required } => {
                    debug!(task_id = target, arrived, required, "Join waiting");
                    Ok(())
                }
                JoinOutcome::Absorbed => {
                    debug!(task_id = target, source = %from.task_id, "Arrival at satisfied join");
                    Ok(())
                }
                JoinOutcome::Satisfied(arrivals) => {
                    let route = self.join_route(&arrivals)?;
                    info!(
                        task_id = target,
                        route,
                        arrivals = arrivals.len(),
                        open_barriers = self.joins.len(),
                        "Join satisfied"
                    );
                    self.dispatch(target, route)
                }
            }
        } else if self.spec.is_split(target) {
            let route = self.flow.new_route(from.route, marker)?;
            let variables = self.contexts.get(from.route).cloned().unwrap_or_default();
            self.contexts.push(variables);
            info!(task_id = target, route, parent = from.route, "Route created");
            self.dispatch(target, route)
        } else {
            self.dispatch(target, from.route)
        }
    }

    /// The route a satisfied join runs on.
    ///
    /// Arrivals all on one route keep it; otherwise a merged route is created
    /// whose variables are the contributors' merged in arrival order.
    fn join_route(&mut self, arrivals: &[SplitMarker]) -> Result<usize, ConductorError> {
        let Some(first) = arrivals.first() else {
            return Ok(0);
        };
        if arrivals.iter().all(|marker| marker.route == first.route) {
            return Ok(first.route);
        }

        let route = self.flow.merge_routes(arrivals)?;
        let mut variables = Map::new();
        for marker in arrivals {
            if let Some(contributed) = self.contexts.get(marker.route) {
                variables.extend(contributed.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        self.contexts.push(variables);

        info!(route, parents = arrivals.len(), "Routes merged");
        Ok(route)
    }

    /* ===================== Dispatch ===================== */

    /// Reserve a slot for `task_id` on `route` and dispatch it, or hold it while paused.
    fn dispatch(&mut self, task_id: &str, route: usize) -> Result<(), ConductorError> {
        if self.state.is_terminal() {
            debug!(task_id, route, state = %self.state, "Workflow finished, not dispatching");
            return Ok(());
        }

        let pointer = self.flow.reserve_slot(task_id, route)?;

        if self.state == State::Paused {
            debug!(task_id, route, "Workflow paused, holding dispatch");
            self.held.push(pointer);
            return Ok(());
        }

        self.emit(pointer)
    }

    fn emit(&mut self, pointer: TaskPointer) -> Result<(), ConductorError> {
        let delay = self.task_spec(&pointer)?.delay;
        self.emit_with_delay(pointer, delay)
    }

    /// Render the task's input and items and queue the dispatch.
    fn emit_with_delay(&mut self, pointer: TaskPointer, delay: Option<u64>) -> Result<(), ConductorError> {
        let task = self.task_spec(&pointer)?;
        let context = self.task_context(&pointer.task_id, pointer.route, None);

        match self.prepare(&task, &context) {
            Ok(mut dispatch) => {
                let state = if delay.is_some() {
                    State::Delayed
                } else {
                    State::Running
                };
                let entry = self.flow.update(&pointer, state, None)?;

                dispatch.route = pointer.route;
                dispatch.delay = delay;
                dispatch.attempt = entry.retries;

                info!(
                    task_id = %pointer.task_id,
                    route = pointer.route,
                    state = %state,
                    attempt = dispatch.attempt,
                    "Task dispatched"
                );
                self.outbox.push(dispatch);
                Ok(())
            }
            Err(err) => {
                self.flow.update(
                    &pointer,
                    State::Failed,
                    Some(json!({"error": err.to_string()})),
                )?;
                self.evaluation_failed(&pointer, err)
            }
        }
    }

    fn prepare(&self, task: &TaskSpec, context: &EvaluationContext) -> Result<TaskDispatch, ExpressionError> {
        let input = self
            .expressions
            .render(&JsonValue::Object(task.input.clone()), context)?;

        let (items, concurrency) = match &task.with {
            None => (None, None),
            Some(with) => {
                let clause = ItemsClause::parse(&with.items).ok_or_else(|| ExpressionError::Syntax {
                    expression: with.items.clone(),
                    message: format!("does not match '{ITEMS_PATTERN}'"),
                })?;
                let value = self.expressions.evaluate(&clause.expression, context)?;
                let items = bind_items(&clause, value)?;

                let concurrency = match &with.concurrency {
                    None => None,
                    Some(Concurrency::Fixed(count)) => Some(*count),
                    Some(Concurrency::Expression(expression)) => {
                        let value = self
                            .expressions
                            .render(&JsonValue::String(expression.clone()), context)?;
                        Some(value.as_u64().ok_or_else(|| {
                            ExpressionError::Evaluation(format!(
                                "The concurrency expression '{expression}' did not evaluate to a non-negative integer."
                            ))
                        })?)
                    }
                };

                (Some(items), concurrency)
            }
        };

        Ok(TaskDispatch {
            task_id: task.name.clone(),
            route: 0,
            action: task.action.clone(),
            input,
            items,
            concurrency,
            delay: None,
            attempt: 0,
        })
    }
}

/// Bind evaluated items to the clause's loop variables.
///
/// Without variables the items pass through. With one variable each item
/// becomes `{var: item}`; with several, each item must be a list of as many
/// values, zipped onto the names.
fn bind_items(clause: &ItemsClause, value: JsonValue) -> Result<Vec<JsonValue>, ExpressionError> {
    let JsonValue::Array(items) = value else {
        return Err(ExpressionError::Evaluation(format!(
            "The items expression '{}' did not evaluate to a list.",
            clause.expression.text
        )));
    };

    match clause.vars.as_slice() {
        [] => Ok(items),
        [var] => Ok(items
            .into_iter()
            .map(|item| {
                let mut bound = Map::new();
                bound.insert(var.clone(), item);
                JsonValue::Object(bound)
            })
            .collect()),
        vars => items
            .into_iter()
            .map(|item| match item {
                JsonValue::Array(values) if values.len() == vars.len() => {
                    Ok(JsonValue::Object(vars.iter().cloned().zip(values).collect()))
                }
                other => Err(ExpressionError::Evaluation(format!(
                    "Item {other} cannot be bound to {} loop variables.",
                    vars.len()
                ))),
            })
            .collect(),
    }
}
