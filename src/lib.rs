pub mod cli;
pub mod conductor;
pub mod config;
pub mod context;
pub mod expressions;
pub mod flow;
pub mod logging;
pub mod spec;
pub mod types;
pub mod utils;

// Re-export main types
pub use types::*;

pub use conductor::{ConductorError, ConductorHandle, TaskDispatch, WorkflowConductor, WorkflowError};
pub use spec::{InspectionReport, WorkflowSpec};
