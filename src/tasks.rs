//! User-visible task progress, keyed by session id.
//!
//! Independent of the rest of the engine: the orchestrator pushes updates,
//! clients poll `tasks()` / `summary()`.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Task, TaskStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("no task list for session {0}")]
    UnknownSession(String),
    #[error("task {0} not found")]
    UnknownTask(String),
    #[error("task {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// Counts per status for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Default)]
pub struct TaskProgressTracker {
    lists: Mutex<HashMap<String, Vec<Task>>>,
}

impl TaskProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session's list with fresh pending tasks. Returns their ids.
    pub fn create_tasks(&self, session_id: &str, items: &[(String, String)]) -> Vec<String> {
        let tasks: Vec<Task> = items
            .iter()
            .map(|(title, description)| new_task(title, description))
            .collect();
        let ids = tasks.iter().map(|t| t.id.clone()).collect();
        debug!("Created {} tasks for session {}", tasks.len(), session_id);
        self.lock().insert(session_id.to_string(), tasks);
        ids
    }

    /// Add one pending task to an existing list, e.g. a retry of a failed
    /// step. Earlier tasks are kept as history.
    pub fn append_task(
        &self,
        session_id: &str,
        title: &str,
        description: &str,
    ) -> Result<String, TaskError> {
        let mut lists = self.lock();
        let tasks = lists
            .get_mut(session_id)
            .ok_or_else(|| TaskError::UnknownSession(session_id.to_string()))?;
        let task = new_task(title, description);
        let id = task.id.clone();
        tasks.push(task);
        debug!("Appended task {} ({}) to session {}", id, title, session_id);
        Ok(id)
    }

    pub fn start(&self, session_id: &str, task_id: &str) -> Result<(), TaskError> {
        self.transition(session_id, task_id, TaskStatus::InProgress, None)
    }

    pub fn complete(&self, session_id: &str, task_id: &str) -> Result<(), TaskError> {
        self.transition(session_id, task_id, TaskStatus::Completed, None)
    }

    pub fn fail(&self, session_id: &str, task_id: &str, error: &str) -> Result<(), TaskError> {
        self.transition(
            session_id,
            task_id,
            TaskStatus::Failed,
            Some(error.to_string()),
        )
    }

    pub fn cancel(&self, session_id: &str, task_id: &str) -> Result<(), TaskError> {
        self.transition(session_id, task_id, TaskStatus::Cancelled, None)
    }

    /// Set progress of an in-progress task. Progress never goes backwards.
    pub fn update_progress(
        &self,
        session_id: &str,
        task_id: &str,
        progress: u8,
    ) -> Result<(), TaskError> {
        let mut lists = self.lock();
        let task = find_task(&mut lists, session_id, task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(TaskError::InvalidTransition {
                id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::InProgress,
            });
        }
        task.progress = task.progress.max(progress.min(100));
        Ok(())
    }

    /// Complete every non-terminal task. Pending tasks pass through in_progress.
    pub fn complete_all(&self, session_id: &str) {
        let now = Utc::now();
        if let Some(tasks) = self.lock().get_mut(session_id) {
            for task in tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
                task.started_at.get_or_insert(now);
                task.status = TaskStatus::Completed;
                task.progress = 100;
                task.finished_at = Some(now);
            }
        }
    }

    /// Cancel every pending or in-progress task.
    pub fn cancel_all(&self, session_id: &str) {
        let now = Utc::now();
        if let Some(tasks) = self.lock().get_mut(session_id) {
            for task in tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(now);
            }
        }
    }

    /// Fail the in-progress task (or the first pending one) with `error`.
    pub fn fail_current(&self, session_id: &str, error: &str) {
        let now = Utc::now();
        if let Some(tasks) = self.lock().get_mut(session_id) {
            let current = tasks
                .iter()
                .position(|t| t.status == TaskStatus::InProgress)
                .or_else(|| tasks.iter().position(|t| t.status == TaskStatus::Pending));
            if let Some(idx) = current {
                let task = &mut tasks[idx];
                task.started_at.get_or_insert(now);
                task.status = TaskStatus::Failed;
                task.error = Some(error.to_string());
                task.finished_at = Some(now);
            }
        }
    }

    pub fn tasks(&self, session_id: &str) -> Vec<Task> {
        self.lock().get(session_id).cloned().unwrap_or_default()
    }

    pub fn summary(&self, session_id: &str) -> TaskSummary {
        let lists = self.lock();
        let mut summary = TaskSummary::default();
        for task in lists.get(session_id).into_iter().flatten() {
            summary.total += 1;
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn clear(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    fn transition(
        &self,
        session_id: &str,
        task_id: &str,
        to: TaskStatus,
        error: Option<String>,
    ) -> Result<(), TaskError> {
        let mut lists = self.lock();
        let task = find_task(&mut lists, session_id, task_id)?;
        if !task.status.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                id: task_id.to_string(),
                from: task.status,
                to,
            });
        }

        let now = Utc::now();
        task.status = to;
        match to {
            TaskStatus::InProgress => task.started_at = Some(now),
            TaskStatus::Completed => {
                task.progress = 100;
                task.finished_at = Some(now);
            }
            _ => task.finished_at = Some(now),
        }
        if error.is_some() {
            task.error = error;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Task>>> {
        // A poisoned lock still holds consistent task data.
        self.lists.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn new_task(title: &str, description: &str) -> Task {
    Task {
        id: Uuid::new_v4().simple().to_string()[..8].to_string(),
        title: title.to_string(),
        description: description.to_string(),
        status: TaskStatus::Pending,
        progress: 0,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
        error: None,
    }
}

fn find_task<'a>(
    lists: &'a mut HashMap<String, Vec<Task>>,
    session_id: &str,
    task_id: &str,
) -> Result<&'a mut Task, TaskError> {
    lists
        .get_mut(session_id)
        .ok_or_else(|| TaskError::UnknownSession(session_id.to_string()))?
        .iter_mut()
        .find(|t| t.id == task_id)
        .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<(String, String)> {
        (0..n)
            .map(|i| (format!("task {}", i), String::new()))
            .collect()
    }

    #[test]
    fn test_monotonic_transitions() {
        let tracker = TaskProgressTracker::new();
        let ids = tracker.create_tasks("s1", &items(1));
        let id = &ids[0];

        assert!(tracker.complete("s1", id).is_err());
        tracker.start("s1", id).unwrap();
        tracker.update_progress("s1", id, 40).unwrap();
        tracker.update_progress("s1", id, 10).unwrap();
        assert_eq!(tracker.tasks("s1")[0].progress, 40);

        tracker.complete("s1", id).unwrap();
        let err = tracker.start("s1", id).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert!(tracker.cancel("s1", id).is_err());
    }

    #[test]
    fn test_cancel_only_from_open_states() {
        let tracker = TaskProgressTracker::new();
        let ids = tracker.create_tasks("s1", &items(2));
        tracker.cancel("s1", &ids[0]).unwrap();
        tracker.start("s1", &ids[1]).unwrap();
        tracker.fail("s1", &ids[1], "boom").unwrap();
        assert!(tracker.cancel("s1", &ids[1]).is_err());

        let tasks = tracker.tasks("s1");
        assert_eq!(tasks[0].status, TaskStatus::Cancelled);
        assert_eq!(tasks[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_failed_task_is_terminal() {
        let tracker = TaskProgressTracker::new();
        let ids = tracker.create_tasks("s1", &items(1));
        tracker.start("s1", &ids[0]).unwrap();
        tracker.fail("s1", &ids[0], "boom").unwrap();

        let err = tracker.start("s1", &ids[0]).unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::InProgress,
                ..
            }
        ));
        assert_eq!(tracker.tasks("s1")[0].status, TaskStatus::Failed);
    }

    #[test]
    fn test_append_task_keeps_history() {
        let tracker = TaskProgressTracker::new();
        let ids = tracker.create_tasks("s1", &items(1));
        tracker.start("s1", &ids[0]).unwrap();
        tracker.fail("s1", &ids[0], "timeout").unwrap();

        let retry = tracker.append_task("s1", "task 0 (retry)", "").unwrap();
        assert_ne!(retry, ids[0]);
        tracker.start("s1", &retry).unwrap();
        tracker.complete("s1", &retry).unwrap();

        let tasks = tracker.tasks("s1");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].error.as_deref(), Some("timeout"));
        assert_eq!(tasks[1].status, TaskStatus::Completed);
        assert_eq!(
            tracker.append_task("missing", "x", ""),
            Err(TaskError::UnknownSession("missing".to_string()))
        );
    }

    #[test]
    fn test_complete_all_and_summary() {
        let tracker = TaskProgressTracker::new();
        let ids = tracker.create_tasks("s1", &items(3));
        tracker.start("s1", &ids[0]).unwrap();
        tracker.start("s1", &ids[1]).unwrap();
        tracker.fail("s1", &ids[1], "nope").unwrap();
        tracker.complete_all("s1");

        let summary = tracker.summary("s1");
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_unknown_session() {
        let tracker = TaskProgressTracker::new();
        assert_eq!(
            tracker.start("missing", "x"),
            Err(TaskError::UnknownSession("missing".to_string()))
        );
        assert!(tracker.tasks("missing").is_empty());
    }
}
