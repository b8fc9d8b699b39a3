/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The Task Tracker: the process-wide registry of tasks currently running or
//! tentatively assigned (spec.md §4.3).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::task::TaskId;

#[derive(Debug, Clone)]
struct TrackedTask {
    hostname: String,
    #[allow(dead_code)]
    assigned_at: Instant,
}

/// Process-wide map from `taskId` to `{hostname, assignedAt}`, plus the
/// reverse index from hostname to its set of tasks (spec.md §4.3).
///
/// This is the one structure mutated from outside a scheduling round
/// (spec.md §5) — `assign`/`unassign` are the only writes, and both are
/// fine-grained and idempotent.
#[derive(Debug, Default)]
pub struct TaskTracker {
    by_task: HashMap<TaskId, TrackedTask>,
    by_host: HashMap<String, HashSet<TaskId>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task_id` is now running on `hostname`.
    ///
    /// Idempotent: re-assigning the same task to the same host is a no-op
    /// beyond refreshing `assigned_at`; re-assigning to a *different* host
    /// moves the reverse-index entry.
    pub fn assign(&mut self, task_id: TaskId, hostname: String) {
        if let Some(prev) = self.by_task.get(&task_id) {
            if prev.hostname != hostname {
                if let Some(set) = self.by_host.get_mut(&prev.hostname) {
                    set.remove(&task_id);
                }
            }
        }
        self.by_host
            .entry(hostname.clone())
            .or_default()
            .insert(task_id.clone());
        self.by_task.insert(
            task_id,
            TrackedTask {
                hostname,
                assigned_at: Instant::now(),
            },
        );
    }

    /// Remove `task_id` from both indices. A no-op if the task (or the
    /// `(task, host)` pairing) is not present — this call is not serialized
    /// against scheduling rounds (spec.md §4.8), so it must tolerate being
    /// raced by a round that already cleared the same entry.
    pub fn unassign(&mut self, task_id: &str, hostname: &str) {
        if let Some(tracked) = self.by_task.get(task_id) {
            if tracked.hostname == hostname {
                self.by_task.remove(task_id);
            }
        }
        if let Some(set) = self.by_host.get_mut(hostname) {
            set.remove(task_id);
        }
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.by_task.contains_key(task_id)
    }

    pub fn hostname_of(&self, task_id: &str) -> Option<&str> {
        self.by_task.get(task_id).map(|t| t.hostname.as_str())
    }

    pub fn tasks_on_host(&self, hostname: &str) -> Vec<TaskId> {
        self.by_host
            .get(hostname)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A cheap, `Arc`-shared read-only view handed to constraint and
    /// fitness plugins (spec.md §4.3, §9 "expose only a read-only snapshot
    /// interface to plugins").
    ///
    /// Taken once per task evaluation, not once per host — the content does
    /// not change mid-task since no task is bound until the orchestrator
    /// commits the round's winner after the evaluator returns
    /// (spec.md §4.3 "[ADDED]").
    pub fn snapshot(&self) -> TaskTrackerSnapshot {
        let by_host = self
            .by_host
            .iter()
            .map(|(host, tasks)| {
                let mut v: Vec<TaskId> = tasks.iter().cloned().collect();
                v.sort();
                (host.clone(), Arc::new(v))
            })
            .collect();
        let task_to_host = self
            .by_task
            .iter()
            .map(|(task, t)| (task.clone(), t.hostname.clone()))
            .collect();
        TaskTrackerSnapshot {
            by_host: Arc::new(by_host),
            task_to_host: Arc::new(task_to_host),
        }
    }
}

/// Read-only, cheaply-cloneable view of the [`TaskTracker`] at the moment a
/// task begins evaluation, passed to constraint and fitness plugins.
#[derive(Debug, Clone)]
pub struct TaskTrackerSnapshot {
    by_host: Arc<HashMap<String, Arc<Vec<TaskId>>>>,
    task_to_host: Arc<HashMap<TaskId, String>>,
}

impl TaskTrackerSnapshot {
    pub fn empty() -> Self {
        Self {
            by_host: Arc::new(HashMap::new()),
            task_to_host: Arc::new(HashMap::new()),
        }
    }

    pub fn tasks_on_host(&self, hostname: &str) -> Arc<Vec<TaskId>> {
        self.by_host
            .get(hostname)
            .cloned()
            .unwrap_or_else(|| Arc::new(Vec::new()))
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.task_to_host.contains_key(task_id)
    }

    pub fn hostname_of(&self, task_id: &str) -> Option<&str> {
        self.task_to_host.get(task_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_then_unassign_restores_prior_state() {
        let mut tracker = TaskTracker::new();
        tracker.assign("t1".into(), "h1".into());
        assert!(tracker.is_running("t1"));
        tracker.unassign("t1", "h1");
        assert!(!tracker.is_running("t1"));
        assert!(tracker.tasks_on_host("h1").is_empty());
    }

    #[test]
    fn reassigning_to_a_different_host_moves_reverse_index() {
        let mut tracker = TaskTracker::new();
        tracker.assign("t1".into(), "h1".into());
        tracker.assign("t1".into(), "h2".into());
        assert_eq!(tracker.hostname_of("t1"), Some("h2"));
        assert!(tracker.tasks_on_host("h1").is_empty());
        assert_eq!(tracker.tasks_on_host("h2"), vec!["t1".to_string()]);
    }

    #[test]
    fn unassign_is_a_noop_for_unknown_task() {
        let mut tracker = TaskTracker::new();
        tracker.unassign("ghost", "h1");
        assert!(!tracker.is_running("ghost"));
    }

    #[test]
    fn snapshot_reflects_tasks_per_host() {
        let mut tracker = TaskTracker::new();
        tracker.assign("t1".into(), "h1".into());
        tracker.assign("t2".into(), "h1".into());
        let snap = tracker.snapshot();
        assert_eq!(snap.tasks_on_host("h1").len(), 2);
        assert!(snap.is_running("t1"));
        assert_eq!(snap.hostname_of("t2"), Some("h1"));
    }
}
