use serde::{Deserialize, Serialize};
use std::fmt;
use surrealdb::{RecordId, sql::Datetime};

/// Lifecycle of a submitted expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting for a solver.
    #[serde(rename = "Queued")]
    Queued,
    /// Handed to a solver, result pending.
    #[serde(rename = "Assigned")]
    Assigned,
    /// Evaluated successfully; `result` holds the value.
    #[serde(rename = "Done")]
    Done,
    /// The solver reported a failure or an empty result.
    #[serde(rename = "Error")]
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Assigned => "Assigned",
            Self::Done => "Done",
            Self::Error => "Error",
        }
    }

    /// Done and Error are terminal; nothing moves a task out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Persisted representation of a task in SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Store identity (table: `task`).
    pub id: RecordId,
    /// Expression text; the lookup key for every transition.
    pub expression: String,
    /// Short random tag shown next to the task in listings.
    pub hash_id: String,
    pub status: TaskStatus,
    /// Empty until the task is Done.
    #[serde(default)]
    pub result: String,
    /// When the task was submitted.
    pub begin_time: Option<Datetime>,
    /// When the task reached Done or Error.
    pub end_time: Option<Datetime>,
}

/// Payload used when inserting a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreate {
    pub expression: String,
    pub hash_id: String,
}

/// One persisted row of the operation timing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationTimeRecord {
    pub operation: String,
    pub seconds: i64,
}
