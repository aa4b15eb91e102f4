//! Shared access to a conductor
//!
//! The conductor stays single-writer: it is moved into a task that applies
//! commands one at a time, in the order they were sent. Handles are cheap to
//! clone and can be used from any number of tasks.

use serde_json::{Map, Value as JsonValue};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::context::EvaluationContext;
use crate::types::State;

use super::{ConductorError, TaskDispatch, WorkflowConductor, WorkflowError};

type CommandResponder<T> = oneshot::Sender<Result<T, ConductorError>>;

#[derive(Debug)]
enum ConductorCommand {
    RequestWorkflowState {
        state: State,
        resp: CommandResponder<()>,
    },
    UpdateTaskState {
        task_id: String,
        route: usize,
        state: State,
        result: Option<JsonValue>,
        resp: CommandResponder<()>,
    },
    TakeDispatches {
        resp: CommandResponder<Vec<TaskDispatch>>,
    },
    Snapshot {
        resp: CommandResponder<EvaluationContext>,
    },
    GetState {
        resp: CommandResponder<State>,
    },
    GetOutput {
        resp: CommandResponder<Option<Map<String, JsonValue>>>,
    },
    GetErrors {
        resp: CommandResponder<Vec<WorkflowError>>,
    },
}

#[derive(Debug, Clone)]
pub struct ConductorHandle {
    sender: mpsc::Sender<ConductorCommand>,
}

impl ConductorHandle {
    /// Move `conductor` into a background task and return a handle to it.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(conductor: WorkflowConductor, buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        tokio::spawn(run(conductor, receiver));
        Self { sender }
    }

    pub async fn request_workflow_state(&self, state: State) -> Result<(), ConductorError> {
        self.call(|resp| ConductorCommand::RequestWorkflowState { state, resp })
            .await
    }

    pub async fn update_task_state(
        &self,
        task_id: impl Into<String>,
        route: usize,
        state: State,
        result: Option<JsonValue>,
    ) -> Result<(), ConductorError> {
        let task_id = task_id.into();
        self.call(|resp| ConductorCommand::UpdateTaskState {
            task_id,
            route,
            state,
            result,
            resp,
        })
        .await
    }

    pub async fn take_dispatches(&self) -> Result<Vec<TaskDispatch>, ConductorError> {
        self.call(|resp| ConductorCommand::TakeDispatches { resp }).await
    }

    pub async fn snapshot(&self) -> Result<EvaluationContext, ConductorError> {
        self.call(|resp| ConductorCommand::Snapshot { resp }).await
    }

    pub async fn state(&self) -> Result<State, ConductorError> {
        self.call(|resp| ConductorCommand::GetState { resp }).await
    }

    pub async fn output(&self) -> Result<Option<Map<String, JsonValue>>, ConductorError> {
        self.call(|resp| ConductorCommand::GetOutput { resp }).await
    }

    pub async fn errors(&self) -> Result<Vec<WorkflowError>, ConductorError> {
        self.call(|resp| ConductorCommand::GetErrors { resp }).await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(CommandResponder<T>) -> ConductorCommand,
    ) -> Result<T, ConductorError> {
        let (resp, receiver) = oneshot::channel();
        self.sender
            .send(command(resp))
            .await
            .map_err(|_| ConductorError::HandleClosed)?;
        receiver.await.map_err(|_| ConductorError::HandleClosed)?
    }
}

async fn run(mut conductor: WorkflowConductor, mut receiver: mpsc::Receiver<ConductorCommand>) {
    debug!(workflow_id = %conductor.id(), "Conductor task started");

    while let Some(command) = receiver.recv().await {
        match command {
            ConductorCommand::RequestWorkflowState { state, resp } => {
                let _ = resp.send(conductor.request_workflow_state(state));
            }
            ConductorCommand::UpdateTaskState {
                task_id,
                route,
                state,
                result,
                resp,
            } => {
                let _ = resp.send(conductor.update_task_state(&task_id, route, state, result));
            }
            ConductorCommand::TakeDispatches { resp } => {
                let _ = resp.send(Ok(conductor.take_dispatches()));
            }
            ConductorCommand::Snapshot { resp } => {
                let _ = resp.send(Ok(conductor.snapshot()));
            }
            ConductorCommand::GetState { resp } => {
                let _ = resp.send(Ok(conductor.state()));
            }
            ConductorCommand::GetOutput { resp } => {
                let _ = resp.send(Ok(conductor.output().cloned()));
            }
            ConductorCommand::GetErrors { resp } => {
                let _ = resp.send(Ok(conductor.errors().to_vec()));
            }
        }
    }

    debug!(workflow_id = %conductor.id(), "Conductor task stopped");
}
