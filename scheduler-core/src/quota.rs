/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-group resource allocation ceilings (spec.md §4.4, "ResAllocs").

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::resources::{ResourceKind, ResourceVector};
use crate::task::{AssignmentFailureReason, TaskId, TaskRequest};

/// Per-group ceilings on total CPU, memory, network, disk, and task count.
///
/// Every dimension is optional — an unset ceiling is "no limit" on that
/// dimension, mirroring the teacher's `max_memory_mb: u64::MAX` "no
/// constraint" convention, expressed here as `None` (SPEC_FULL §4.4).
/// Deriving `Serialize`/`Deserialize` lets an embedder load `initialResAllocs`
/// from YAML the way the teacher's `NodeConfigEntry` loads node specs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResAllocs {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<f64>,
    #[serde(default)]
    pub network_mbps: Option<f64>,
    #[serde(default)]
    pub disk_mb: Option<f64>,
    #[serde(default)]
    pub max_tasks: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupUsage {
    resources: ResourceVector,
    task_count: u32,
}

/// Applies per-group resource allocation ceilings before a task is
/// considered for placement (spec.md §4.4).
#[derive(Debug, Default)]
pub struct QuotaEvaluator {
    ceilings: HashMap<String, ResAllocs>,
    /// Durable baseline: resources consumed by tasks the framework has
    /// actually launched (confirmed via the Mutation API's `assignTask`),
    /// not merely tentatively bound within a round.
    usage: HashMap<String, GroupUsage>,
    round_start_usage: HashMap<String, GroupUsage>,
    tentative_this_round: HashMap<String, GroupUsage>,
    failed_groups_this_round: HashSet<String>,
    /// Caches each bound task's `(group, resources)` so the Mutation API's
    /// `assignTask(taskId, hostname)` — which carries no resource payload —
    /// can resolve usage when the framework later confirms the launch.
    task_footprint: HashMap<TaskId, (String, ResourceVector)>,
}

impl QuotaEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_or_replace(&mut self, group: impl Into<String>, allocs: ResAllocs) {
        self.ceilings.insert(group.into(), allocs);
    }

    pub fn remove(&mut self, group: &str) {
        self.ceilings.remove(group);
    }

    pub fn get(&self, group: &str) -> Option<&ResAllocs> {
        self.ceilings.get(group)
    }

    pub fn all(&self) -> &HashMap<String, ResAllocs> {
        &self.ceilings
    }

    /// Snapshot current usage at round start (spec.md §4.4 `prepare()`).
    pub fn prepare(&mut self) {
        self.round_start_usage = self.usage.clone();
        self.tentative_this_round.clear();
        self.failed_groups_this_round.clear();
    }

    fn committed(&self, group: &str) -> GroupUsage {
        let base = self.round_start_usage.get(group).copied().unwrap_or_default();
        let tentative = self.tentative_this_round.get(group).copied().unwrap_or_default();
        GroupUsage {
            resources: base.resources + tentative.resources,
            task_count: base.task_count + tentative.task_count,
        }
    }

    /// Returns `None` if `task` fits within its group's remaining quota,
    /// else the first dimension exceeded (spec.md §4.4 `hasResAllocs`).
    ///
    /// A group with no configured ceiling always fits.
    pub fn has_res_allocs(&self, task: &TaskRequest) -> Option<AssignmentFailureReason> {
        let ceiling = self.ceilings.get(&task.group_name)?;
        let committed = self.committed(&task.group_name);

        if let Some(max_tasks) = ceiling.max_tasks {
            if (committed.task_count + 1) as f64 > max_tasks as f64 {
                return Some(AssignmentFailureReason::QuotaExceeded {
                    group: task.group_name.clone(),
                    dimension: ResourceKind::Cpu,
                    required: 1.0,
                    remaining: (max_tasks.saturating_sub(committed.task_count)) as f64,
                });
            }
        }

        for (dimension, ceiling_value) in [
            (ResourceKind::Cpu, ceiling.cpu),
            (ResourceKind::MemoryMb, ceiling.memory_mb),
            (ResourceKind::NetworkMbps, ceiling.network_mbps),
            (ResourceKind::DiskMb, ceiling.disk_mb),
        ] {
            let Some(max_value) = ceiling_value else { continue };
            let required = task.resources.get(dimension);
            let used = committed.resources.get(dimension);
            if used + required > max_value {
                return Some(AssignmentFailureReason::QuotaExceeded {
                    group: task.group_name.clone(),
                    dimension,
                    required,
                    remaining: (max_value - used).max(0.0),
                });
            }
        }

        None
    }

    /// Once a group exhausts quota within a round, further tasks of the
    /// same group skip both evaluation and autoscaling accounting
    /// (spec.md §4.4).
    pub fn task_group_failed(&self, group: &str) -> bool {
        self.failed_groups_this_round.contains(group)
    }

    pub fn mark_group_failed(&mut self, group: &str) {
        self.failed_groups_this_round.insert(group.to_string());
    }

    /// Record a task tentatively bound in the current round so later tasks
    /// of the same group see reduced remaining quota.
    pub fn record_tentative(&mut self, task: &TaskRequest) {
        let entry = self
            .tentative_this_round
            .entry(task.group_name.clone())
            .or_default();
        entry.resources = entry.resources + task.resources;
        entry.task_count += 1;
        self.task_footprint
            .insert(task.id.clone(), (task.group_name.clone(), task.resources));
    }

    /// Confirm a previously-bound task is now actually running, folding its
    /// footprint into the durable usage baseline (called from the Mutation
    /// API's `assignTask`). A no-op if the task's footprint was never
    /// cached — e.g. when the framework reconstructs state for a task this
    /// engine never evaluated; quota accounting for that task is then
    /// simply unavailable, the documented degrade for an `assignTask`
    /// signature that carries no resource payload (DESIGN.md).
    pub fn confirm_running(&mut self, task_id: &str) {
        if let Some((group, resources)) = self.task_footprint.get(task_id).cloned() {
            let entry = self.usage.entry(group).or_default();
            entry.resources = entry.resources + resources;
            entry.task_count += 1;
        }
    }

    /// Release a terminated task's usage (Mutation API's `unassignTask`).
    pub fn release(&mut self, task_id: &str) {
        if let Some((group, resources)) = self.task_footprint.remove(task_id) {
            if let Some(entry) = self.usage.get_mut(&group) {
                entry.resources = entry.resources.saturating_sub(&resources);
                entry.task_count = entry.task_count.saturating_sub(1);
            }
        }
    }
}
