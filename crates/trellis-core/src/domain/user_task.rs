use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::execution::ExecutionId;
use crate::error::EngineError;

/// Value object: User task ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserTaskId(pub String);

impl UserTaskId {
    /// Generate a fresh task id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for UserTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTaskStatus {
    /// Waiting for a completion signal
    Pending,
    /// Completed with a result payload
    Completed,
    /// Cancelled, usually because the owning execution was cancelled
    Cancelled,
    /// Deadline elapsed before completion
    TimedOut,
}

/// An externally visible task awaiting human input
///
/// Created when a user-task step runs, mutated by a completion signal or a
/// timeout, immutable once it leaves `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTask {
    /// Unique identifier
    pub id: UserTaskId,

    /// Owning execution
    pub execution_id: ExecutionId,

    /// Step that created this task
    pub step_id: String,

    /// Owning tenant
    pub tenant_id: String,

    /// Direct assignee
    pub assignee: Option<String>,

    /// Candidate users or groups
    pub candidates: Vec<String>,

    /// Form definition shown to the assignee
    pub form: Value,

    /// Point-in-time copy of the workflow state at creation
    pub context_data: Value,

    /// Lifecycle status
    pub status: UserTaskStatus,

    /// Result payload, once completed
    pub result: Option<Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Deadline after which the task escalates
    pub timeout_at: DateTime<Utc>,
}

impl UserTask {
    fn guard_pending(&self) -> Result<(), EngineError> {
        if self.status != UserTaskStatus::Pending {
            return Err(EngineError::ExecutionError(format!(
                "user task {} already finished",
                self.id
            )));
        }
        Ok(())
    }

    /// Complete the task with a result payload
    pub fn complete(&mut self, result: Value) -> Result<(), EngineError> {
        self.guard_pending()?;
        self.status = UserTaskStatus::Completed;
        self.result = Some(result);
        Ok(())
    }

    /// Escalate the task after its deadline elapsed
    pub fn time_out(&mut self) -> Result<(), EngineError> {
        self.guard_pending()?;
        self.status = UserTaskStatus::TimedOut;
        Ok(())
    }

    /// Cancel the task
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        self.guard_pending()?;
        self.status = UserTaskStatus::Cancelled;
        Ok(())
    }
}
