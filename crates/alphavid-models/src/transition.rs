//! Task state machine.
//!
//! Pure transition logic over [`TaskRecord`]. The record store applies
//! transitions inside its atomic update so guards are always evaluated
//! against the latest persisted state.
//!
//! ```text
//! PENDING ──run──▶ RUNNING ──succeed──▶ SUCCESS
//!                   │  ▲ run
//!                   │  └─┘
//!                   └──fail──▶ FAILED
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error_code::ErrorCode;
use crate::task::{TaskRecord, TaskStatus};

/// Highest progress a RUNNING task may report. 100 is reserved for SUCCESS.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

/// Requested change to a task record.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTransition {
    /// Enter or stay in RUNNING. Progress never decreases.
    Run { progress: u8 },
    /// RUNNING to SUCCESS with the stored artifact's location.
    Succeed { result_url: String, result_key: String },
    /// RUNNING to FAILED.
    Fail { code: ErrorCode, message: String },
}

impl TaskTransition {
    pub fn target(&self) -> TaskStatus {
        match self {
            TaskTransition::Run { .. } => TaskStatus::Running,
            TaskTransition::Succeed { .. } => TaskStatus::Success,
            TaskTransition::Fail { .. } => TaskStatus::Failed,
        }
    }
}

/// Guard violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task is terminal ({from}); cannot move to {to}")]
    FromTerminal { from: TaskStatus, to: TaskStatus },

    #[error("transition {from} -> {to} is not allowed")]
    NotAllowed { from: TaskStatus, to: TaskStatus },

    #[error("transition requires a non-empty {0}")]
    MissingField(&'static str),
}

impl TaskRecord {
    /// Apply `transition`, returning the new record. `self` is never modified.
    pub fn apply_transition(
        &self,
        transition: &TaskTransition,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, TransitionError> {
        let from = self.status;
        let to = transition.target();

        if from.is_terminal() {
            return Err(TransitionError::FromTerminal { from, to });
        }

        let mut next = self.clone();

        match transition {
            TaskTransition::Run { progress } => {
                let requested = (*progress).min(MAX_RUNNING_PROGRESS);
                match from {
                    TaskStatus::Pending => {
                        next.status = TaskStatus::Running;
                        next.started_at = Some(now);
                        next.progress = requested.max(self.progress);
                    }
                    TaskStatus::Running => {
                        next.progress = requested.max(self.progress);
                    }
                    _ => return Err(TransitionError::NotAllowed { from, to }),
                }
            }
            TaskTransition::Succeed { result_url, result_key } => {
                if from != TaskStatus::Running {
                    return Err(TransitionError::NotAllowed { from, to });
                }
                if result_url.trim().is_empty() {
                    return Err(TransitionError::MissingField("resultUrl"));
                }
                if result_key.trim().is_empty() {
                    return Err(TransitionError::MissingField("resultKey"));
                }
                next.status = TaskStatus::Success;
                next.progress = 100;
                next.result_url = Some(result_url.clone());
                next.result_key = Some(result_key.clone());
                next.completed_at = Some(now);
            }
            TaskTransition::Fail { code, message } => {
                if from != TaskStatus::Running {
                    return Err(TransitionError::NotAllowed { from, to });
                }
                if message.trim().is_empty() {
                    return Err(TransitionError::MissingField("errorMessage"));
                }
                next.status = TaskStatus::Failed;
                next.error_code = Some(*code);
                next.error_message = Some(message.clone());
                next.completed_at = Some(now);
            }
        }

        Ok(next)
    }
}
