use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state shared by tasks and workflows.
///
/// Workflows only ever reach `CompletedWithErrors`; tasks never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Not started, or reserved but not yet populated
    #[default]
    Unset,
    Requested,
    Scheduled,
    /// Dispatched but gated behind a delay
    Delayed,
    Running,
    Paused,
    Succeeded,
    Failed,
    Canceled,
    /// All work drained but some failures were left unhandled
    CompletedWithErrors,
}

impl State {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::CompletedWithErrors
        )
    }

    /// Check if work is outstanding in this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Requested | Self::Scheduled | Self::Delayed | Self::Running | Self::Paused
        )
    }

    pub fn is_completed(&self) -> bool {
        self.is_terminal()
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether an executor callback may move a task from `self` to `next`.
    pub fn can_transition_to(&self, next: State) -> bool {
        if next == Self::Unset || next == Self::CompletedWithErrors {
            return false;
        }
        match self {
            Self::Unset => true,
            s if s.is_active() => true,
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Requested => write!(f, "requested"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Delayed => write!(f, "delayed"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
            Self::CompletedWithErrors => write!(f, "completed_with_errors"),
        }
    }
}

impl std::str::FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(Self::Unset),
            "requested" => Ok(Self::Requested),
            "scheduled" => Ok(Self::Scheduled),
            "delayed" => Ok(Self::Delayed),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            _ => Err(format!("Invalid state: {s}")),
        }
    }
}

/// How the conductor reacts to unhandled task failures and evaluation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Fail the workflow as soon as a failure goes unhandled
    #[default]
    Abort,
    /// Keep driving the remaining routes; finish as completed-with-errors
    Continue,
}
