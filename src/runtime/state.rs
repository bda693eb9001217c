use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle states of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Waiting,
    Queued,
    Preparing,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Expired,
    SubmitFailed,
    SubmitRetrying,
    Retrying,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Queued => "queued",
            TaskState::Preparing => "preparing",
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Expired => "expired",
            TaskState::SubmitFailed => "submit-failed",
            TaskState::SubmitRetrying => "submit-retrying",
            TaskState::Retrying => "retrying",
        }
    }

    /// States holding a queue slot and unsafe to re-trigger.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskState::Preparing | TaskState::Submitted | TaskState::Running
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Expired
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Waiting, Queued)
                | (Waiting, Expired)
                | (Queued, Preparing)
                | (Queued, Expired)
                | (Preparing, Submitted)
                | (Preparing, SubmitFailed)
                | (Submitted, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (SubmitFailed, SubmitRetrying)
                | (SubmitRetrying, Queued)
                | (SubmitRetrying, Preparing)
                | (Failed, Retrying)
                | (Retrying, Queued)
                | (Retrying, Preparing)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskState::Waiting),
            "queued" => Ok(TaskState::Queued),
            "preparing" => Ok(TaskState::Preparing),
            "submitted" => Ok(TaskState::Submitted),
            "running" => Ok(TaskState::Running),
            "succeeded" => Ok(TaskState::Succeeded),
            "failed" => Ok(TaskState::Failed),
            "expired" => Ok(TaskState::Expired),
            "submit-failed" => Ok(TaskState::SubmitFailed),
            "submit-retrying" => Ok(TaskState::SubmitRetrying),
            "retrying" => Ok(TaskState::Retrying),
            other => Err(format!("unknown task state: {}", other)),
        }
    }
}
