//! Task data model - the unit of delegated work

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retries granted to a failed task before its manager escalates
pub const MAX_RETRIES: u32 = 1;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created and ready for dispatch
    Pending,
    /// An agent is actively working on it
    InProgress,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    /// Parked on an external resolution (escalation or conversation)
    Blocked,
    /// Waiting for sibling dependencies to complete
    WaitingForDependency,
    /// Parked on an operator answer
    AwaitingInput,
}

impl TaskStatus {
    /// Completed and Failed admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::WaitingForDependency => "waiting_for_dependency",
            TaskStatus::AwaitingInput => "awaiting_input",
        };
        write!(f, "{label}")
    }
}

/// One append-only entry in a task's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A unit of work flowing through the organization.
///
/// The canonical copy lives in the orchestrator's registry; agents hold
/// working copies and reconcile them back through updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Current goal text; rewritten by escalation, dependency injection
    /// and operator guidance
    pub goal: String,
    /// The goal as issued, preserved across rewrites
    pub original_goal: String,
    pub status: TaskStatus,
    /// Name of the agent responsible for the task
    pub assignee: String,
    /// Name of whoever issued it; terminal updates are reported here
    pub issuer: String,
    pub history: Vec<HistoryEntry>,
    /// Final value on completion, error payload on failure
    pub result: Option<serde_json::Value>,
    /// Children created by plan expansion, in plan order
    pub sub_task_ids: Vec<TaskId>,
    /// Sibling tasks that must complete before this one is dispatched
    pub dependencies: HashSet<TaskId>,
    /// Attempts consumed beyond the first
    pub retries: u32,
}

impl Task {
    pub fn new(
        goal: impl Into<String>,
        assignee: impl Into<String>,
        issuer: impl Into<String>,
        status: TaskStatus,
    ) -> Self {
        let goal = goal.into();
        let mut task = Self {
            id: TaskId::new(),
            original_goal: goal.clone(),
            goal,
            status,
            assignee: assignee.into(),
            issuer: issuer.into(),
            history: Vec::new(),
            result: None,
            sub_task_ids: Vec::new(),
            dependencies: HashSet::new(),
            retries: 0,
        };
        task.history.push(HistoryEntry {
            status,
            at: Utc::now(),
            message: "Created".to_string(),
        });
        task
    }

    /// Set the status and append the transition to the history.
    pub fn record(&mut self, status: TaskStatus, message: impl Into<String>) {
        self.status = status;
        self.history.push(HistoryEntry {
            status,
            at: Utc::now(),
            message: message.into(),
        });
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Most recent history message, if any.
    pub fn last_message(&self) -> Option<&str> {
        self.history.last().map(|entry| entry.message.as_str())
    }

    /// Timestamp of the creation entry.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.history
            .first()
            .map(|entry| entry.at)
            .unwrap_or_else(Utc::now)
    }
}

/// One item of a plan before it is realized as a task.
///
/// `id` and `dependencies` are template-local identifiers; plan execution
/// remaps them to real [`TaskId`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: String,
    pub goal: String,
    pub assignee: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}
