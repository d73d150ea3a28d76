//! Progress-tracking domain model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a subtask in the progress tracker.
///
/// `pending -> running -> {completed | failed | skipped}`; terminal states
/// are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl Default for SubtaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Skipped),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Skipped),
            _ => false,
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-subtask progress record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtaskProgress {
    pub status: SubtaskStatus,
    pub description: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-task aggregate over its subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: Uuid,
    pub subtasks: HashMap<Uuid, SubtaskProgress>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskProgress {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            subtasks: HashMap::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.subtasks.len()
    }

    fn count(&self, status: SubtaskStatus) -> usize {
        self.subtasks.values().filter(|s| s.status == status).count()
    }

    pub fn completed(&self) -> usize {
        self.count(SubtaskStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(SubtaskStatus::Failed)
    }

    pub fn running(&self) -> usize {
        self.count(SubtaskStatus::Running)
    }

    pub fn skipped(&self) -> usize {
        self.count(SubtaskStatus::Skipped)
    }

    /// `completed / total`; failed and skipped subtasks do not count toward
    /// the ratio. 0.0 when the task has no subtasks.
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.subtasks.is_empty() {
            return 0.0;
        }
        self.completed() as f64 / self.total() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(SubtaskStatus::Pending.can_transition_to(SubtaskStatus::Running));
        assert!(SubtaskStatus::Pending.can_transition_to(SubtaskStatus::Skipped));
        assert!(!SubtaskStatus::Pending.can_transition_to(SubtaskStatus::Completed));
        assert!(SubtaskStatus::Running.can_transition_to(SubtaskStatus::Failed));
        // Terminal states accept nothing
        assert!(!SubtaskStatus::Completed.can_transition_to(SubtaskStatus::Running));
        assert!(!SubtaskStatus::Failed.can_transition_to(SubtaskStatus::Running));
        assert!(!SubtaskStatus::Skipped.can_transition_to(SubtaskStatus::Running));
    }

    #[test]
    fn test_progress_ratio_excludes_failures() {
        let mut progress = TaskProgress::new(Uuid::new_v4());
        for status in [
            SubtaskStatus::Completed,
            SubtaskStatus::Completed,
            SubtaskStatus::Failed,
        ] {
            progress.subtasks.insert(
                Uuid::new_v4(),
                SubtaskProgress {
                    status,
                    ..SubtaskProgress::default()
                },
            );
        }

        assert!((progress.progress() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(progress.failed(), 1);
        assert_eq!(progress.running(), 0);
    }

    #[test]
    fn test_empty_task_progress_is_zero() {
        let progress = TaskProgress::new(Uuid::new_v4());
        assert_eq!(progress.progress(), 0.0);
    }
}
