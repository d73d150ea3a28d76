//! In-memory progress tracking for one task's subtasks.
//!
//! Keeps a per-subtask state machine, notifies per-task subscribers, and
//! retains a bounded history of finished tasks. All state lives behind a
//! single `RwLock` per map; nothing here survives a process restart.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{Subtask, SubtaskProgress, SubtaskStatus, TaskProgress};

/// Progress notification delivered to task subscribers.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    TaskStarted {
        task_id: Uuid,
        total: usize,
    },
    SubtaskStarted {
        task_id: Uuid,
        subtask_id: Uuid,
    },
    SubtaskCompleted {
        task_id: Uuid,
        subtask_id: Uuid,
        success: bool,
    },
    SubtaskSkipped {
        task_id: Uuid,
        subtask_id: Uuid,
    },
    TaskEnded {
        task_id: Uuid,
    },
}

type SubscriberMap = HashMap<Uuid, Vec<mpsc::UnboundedSender<ProgressEvent>>>;

/// Tracks subtask state machines for in-flight tasks.
pub struct ProgressTracker {
    tasks: RwLock<HashMap<Uuid, TaskProgress>>,
    subscribers: RwLock<SubscriberMap>,
    history: RwLock<VecDeque<TaskProgress>>,
    history_limit: usize,
}

impl ProgressTracker {
    pub fn new(history_limit: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            history_limit,
        }
    }

    /// Register a task and initialize every subtask as pending.
    pub async fn start_task(&self, task_id: Uuid, subtasks: &[Subtask]) {
        let mut progress = TaskProgress::new(task_id);
        for subtask in subtasks {
            progress.subtasks.insert(
                subtask.id,
                SubtaskProgress {
                    description: subtask.description.clone(),
                    ..SubtaskProgress::default()
                },
            );
        }
        let total = progress.total();
        self.tasks.write().await.insert(task_id, progress);
        self.notify(task_id, ProgressEvent::TaskStarted { task_id, total })
            .await;
    }

    /// Subscribe to a task's progress events.
    ///
    /// Dropped receivers are detached on the next notification; a
    /// subscriber can never stall or break the tracker.
    pub async fn subscribe(&self, task_id: Uuid) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(task_id)
            .or_default()
            .push(tx);
        rx
    }

    pub async fn start_subtask(&self, task_id: Uuid, subtask_id: Uuid) {
        if self
            .transition(task_id, subtask_id, SubtaskStatus::Running, None, None)
            .await
        {
            self.notify(
                task_id,
                ProgressEvent::SubtaskStarted {
                    task_id,
                    subtask_id,
                },
            )
            .await;
        }
    }

    pub async fn complete_subtask(
        &self,
        task_id: Uuid,
        subtask_id: Uuid,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let status = if success {
            SubtaskStatus::Completed
        } else {
            SubtaskStatus::Failed
        };
        if self
            .transition(task_id, subtask_id, status, result, error)
            .await
        {
            self.notify(
                task_id,
                ProgressEvent::SubtaskCompleted {
                    task_id,
                    subtask_id,
                    success,
                },
            )
            .await;
        }
    }

    pub async fn skip_subtask(&self, task_id: Uuid, subtask_id: Uuid) {
        if self
            .transition(task_id, subtask_id, SubtaskStatus::Skipped, None, None)
            .await
        {
            self.notify(
                task_id,
                ProgressEvent::SubtaskSkipped {
                    task_id,
                    subtask_id,
                },
            )
            .await;
        }
    }

    /// Move a task into the bounded history and drop its live subscribers.
    pub async fn end_task(&self, task_id: Uuid) {
        let removed = self.tasks.write().await.remove(&task_id);
        if let Some(mut progress) = removed {
            progress.ended_at = Some(Utc::now());
            let mut history = self.history.write().await;
            history.push_back(progress);
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }

        self.notify(task_id, ProgressEvent::TaskEnded { task_id }).await;
        self.subscribers.write().await.remove(&task_id);
    }

    /// Completed/total for a live task; 0.0 for unknown tasks or tasks
    /// without subtasks. Failed and running counts are not part of this
    /// ratio.
    pub async fn get_progress(&self, task_id: Uuid) -> f64 {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .map_or(0.0, TaskProgress::progress)
    }

    /// Snapshot of a live task's progress.
    pub async fn get_task(&self, task_id: Uuid) -> Option<TaskProgress> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// Snapshot of the finished-task history, oldest first.
    pub async fn recent_history(&self) -> Vec<TaskProgress> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Apply one state transition. Terminal states are final: violations
    /// are logged and ignored, never propagated.
    async fn transition(
        &self,
        task_id: Uuid,
        subtask_id: Uuid,
        next: SubtaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            warn!(%task_id, "Progress update for unknown task");
            return false;
        };
        let Some(subtask) = task.subtasks.get_mut(&subtask_id) else {
            warn!(%task_id, %subtask_id, "Progress update for unknown subtask");
            return false;
        };

        if !subtask.status.can_transition_to(next) {
            warn!(
                %subtask_id,
                from = %subtask.status,
                to = %next,
                "Rejected subtask state transition"
            );
            return false;
        }

        let now = Utc::now();
        match next {
            SubtaskStatus::Running => subtask.started_at = Some(now),
            SubtaskStatus::Completed | SubtaskStatus::Failed | SubtaskStatus::Skipped => {
                subtask.completed_at = Some(now);
            }
            SubtaskStatus::Pending => {}
        }
        subtask.status = next;
        if result.is_some() {
            subtask.result = result;
        }
        if error.is_some() {
            subtask.error = error;
        }
        true
    }

    async fn notify(&self, task_id: Uuid, event: ProgressEvent) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(senders) = subscribers.get_mut(&task_id) {
            senders.retain(|tx| {
                let delivered = tx.send(event.clone()).is_ok();
                if !delivered {
                    debug!(%task_id, "Dropping closed progress subscriber");
                }
                delivered
            });
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Approach;

    fn three_subtasks() -> Vec<Subtask> {
        (0..3)
            .map(|i| Subtask::new(format!("step {i}"), Approach::Keyboard, i))
            .collect()
    }

    #[tokio::test]
    async fn test_progress_counts() {
        let tracker = ProgressTracker::default();
        let task_id = Uuid::new_v4();
        let subtasks = three_subtasks();
        tracker.start_task(task_id, &subtasks).await;

        for subtask in &subtasks {
            tracker.start_subtask(task_id, subtask.id).await;
        }
        tracker
            .complete_subtask(task_id, subtasks[0].id, true, None, None)
            .await;
        tracker
            .complete_subtask(task_id, subtasks[1].id, true, None, None)
            .await;
        tracker
            .complete_subtask(
                task_id,
                subtasks[2].id,
                false,
                None,
                Some("window never appeared".to_string()),
            )
            .await;

        assert!((tracker.get_progress(task_id).await - 2.0 / 3.0).abs() < 1e-9);
        let snapshot = tracker.get_task(task_id).await.unwrap();
        assert_eq!(snapshot.failed(), 1);
        assert_eq!(snapshot.running(), 0);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let tracker = ProgressTracker::default();
        let task_id = Uuid::new_v4();
        let subtasks = three_subtasks();
        tracker.start_task(task_id, &subtasks).await;

        tracker.start_subtask(task_id, subtasks[0].id).await;
        tracker
            .complete_subtask(task_id, subtasks[0].id, true, None, None)
            .await;

        // Attempts past a terminal state are ignored
        tracker.start_subtask(task_id, subtasks[0].id).await;
        tracker
            .complete_subtask(task_id, subtasks[0].id, false, None, None)
            .await;

        let snapshot = tracker.get_task(task_id).await.unwrap();
        assert_eq!(
            snapshot.subtasks[&subtasks[0].id].status,
            SubtaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_skip_from_pending() {
        let tracker = ProgressTracker::default();
        let task_id = Uuid::new_v4();
        let subtasks = three_subtasks();
        tracker.start_task(task_id, &subtasks).await;

        tracker.skip_subtask(task_id, subtasks[2].id).await;

        let snapshot = tracker.get_task(task_id).await.unwrap();
        assert_eq!(snapshot.skipped(), 1);
        // Skipped subtasks do not count as completed
        assert_eq!(tracker.get_progress(task_id).await, 0.0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let tracker = ProgressTracker::default();
        let task_id = Uuid::new_v4();
        let subtasks = three_subtasks();

        // Subscribe before the task starts so we see every event
        let mut rx = tracker.subscribe(task_id).await;
        tracker.start_task(task_id, &subtasks).await;
        tracker.start_subtask(task_id, subtasks[0].id).await;
        tracker
            .complete_subtask(task_id, subtasks[0].id, true, None, None)
            .await;

        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::TaskStarted { total: 3, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::SubtaskStarted { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::SubtaskCompleted { success: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_end_task_moves_to_history_and_caps_it() {
        let tracker = ProgressTracker::new(2);

        for _ in 0..3 {
            let task_id = Uuid::new_v4();
            tracker.start_task(task_id, &three_subtasks()).await;
            tracker.end_task(task_id).await;
        }

        let history = tracker.recent_history().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|t| t.ended_at.is_some()));
    }

    #[tokio::test]
    async fn test_unknown_task_progress_is_zero() {
        let tracker = ProgressTracker::default();
        assert_eq!(tracker.get_progress(Uuid::new_v4()).await, 0.0);
    }
}
