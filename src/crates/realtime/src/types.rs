//! Wire and state types shared by both update paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one step of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not started yet
    #[serde(alias = "PENDING")]
    Pending,
    /// Currently executing
    #[serde(alias = "RUNNING", alias = "processing")]
    Running,
    /// Finished successfully
    #[serde(alias = "COMPLETED")]
    Completed,
    /// Finished with an error
    #[serde(alias = "FAILED")]
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a whole task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued on the server
    #[serde(alias = "PENDING")]
    Pending,
    /// Steps are executing
    #[serde(alias = "RUNNING", alias = "processing")]
    Running,
    /// All steps finished
    #[serde(alias = "COMPLETED")]
    Completed,
    /// Task aborted with an error
    #[serde(alias = "FAILED")]
    Failed,
}

impl TaskStatus {
    /// Whether no further updates are expected for the task.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of backend-reported work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Human label
    pub name: String,
    /// Display/execution order, not necessarily contiguous
    #[serde(default)]
    pub order: i64,
    /// Step status
    pub status: StepStatus,
    /// Progress 0..=100, meaningful while running or completed
    #[serde(default)]
    pub progress: u32,
    /// When the step started
    #[serde(default, alias = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step finished
    #[serde(default, alias = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure description
    #[serde(default, alias = "errorMessage")]
    pub error_message: Option<String>,
    /// Step-specific payload, passed through untouched
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl StepRecord {
    /// Create a step with no timestamps or details.
    pub fn new(name: impl Into<String>, order: i64, status: StepStatus, progress: u32) -> Self {
        Self {
            name: name.into(),
            order,
            status,
            progress,
            started_at: None,
            completed_at: None,
            error_message: None,
            details: serde_json::Map::new(),
        }
    }

    /// Attach an error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Denormalised task view delivered by either update path.
///
/// Snapshots are replaced wholesale on every update; nothing merges two
/// snapshots field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier
    #[serde(alias = "taskId")]
    pub task_id: String,
    /// Task status
    pub status: TaskStatus,
    /// Server-supplied overall progress, used when no steps are reported
    #[serde(default, alias = "overallProgress", alias = "progress")]
    pub overall_progress: Option<u32>,
    /// Steps in `order`
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl TaskSnapshot {
    /// Create a snapshot without steps.
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            overall_progress: None,
            steps: Vec::new(),
        }
    }

    /// Replace the steps.
    pub fn with_steps(mut self, steps: Vec<StepRecord>) -> Self {
        self.steps = steps;
        self
    }

    /// Set the server-supplied overall progress.
    pub fn with_overall_progress(mut self, progress: u32) -> Self {
        self.overall_progress = Some(progress);
        self
    }

    /// Sort steps by `order`, keeping arrival order for equal keys.
    pub fn normalize(&mut self) {
        self.steps.sort_by_key(|step| step.order);
    }
}

/// Lifecycle state of one push-channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel and no retry pending
    Disconnected,
    /// Channel is being opened
    Connecting,
    /// Channel open and subscribed
    Connected,
    /// Waiting for the backoff timer before the next attempt
    Reconnecting,
    /// Retry budget exhausted; only a manual reconnect leaves this state
    Failed,
}

impl ConnectionState {
    /// Whether the push channel is currently delivering updates.
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_deserialize_snake_case() {
        let snapshot: TaskSnapshot = serde_json::from_value(json!({
            "task_id": "task-1",
            "status": "running",
            "overall_progress": 40,
            "steps": [
                {"name": "upload", "order": 1, "status": "completed", "progress": 100,
                 "started_at": "2024-05-01T10:00:00Z", "completed_at": "2024-05-01T10:00:05Z"},
                {"name": "parse", "order": 2, "status": "running", "progress": 40,
                 "details": {"pages": 12}}
            ]
        }))
        .unwrap();

        assert_eq!(snapshot.task_id, "task-1");
        assert_eq!(snapshot.status, TaskStatus::Running);
        assert_eq!(snapshot.overall_progress, Some(40));
        assert_eq!(snapshot.steps.len(), 2);
        assert!(snapshot.steps[0].completed_at.is_some());
        assert_eq!(snapshot.steps[1].details["pages"], json!(12));
    }

    #[test]
    fn test_snapshot_accepts_upper_case_and_camel_case() {
        let snapshot: TaskSnapshot = serde_json::from_value(json!({
            "taskId": "task-2",
            "status": "COMPLETED",
            "steps": [
                {"name": "embed", "order": 1, "status": "FAILED", "errorMessage": "quota"}
            ]
        }))
        .unwrap();

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.steps[0].status, StepStatus::Failed);
        assert_eq!(snapshot.steps[0].error_message.as_deref(), Some("quota"));
        assert_eq!(snapshot.steps[0].progress, 0);
    }

    #[test]
    fn test_normalize_sorts_by_order_stably() {
        let mut snapshot = TaskSnapshot::new("t", TaskStatus::Running).with_steps(vec![
            StepRecord::new("c", 30, StepStatus::Pending, 0),
            StepRecord::new("a", 10, StepStatus::Completed, 100),
            StepRecord::new("b1", 20, StepStatus::Running, 10),
            StepRecord::new("b2", 20, StepStatus::Running, 20),
        ]);

        snapshot.normalize();

        let names: Vec<_> = snapshot.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Failed.is_connected());
    }
}
