/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task requests and the per-`(task, host)` evaluation result.

use std::collections::HashMap;

use crate::constraint::{HardConstraint, SoftConstraint};
use crate::resources::{ResourceKind, ResourceVector};

pub type TaskId = String;

/// A unit of work awaiting placement (spec.md §3, "Task Request").
///
/// Read-only for the duration of a round — the orchestrator never mutates a
/// `TaskRequest` in place; a successful placement is recorded as a tentative
/// assignment on the winning [`Host`](crate::host::Host) instead.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub id: TaskId,
    pub group_name: String,
    pub resources: ResourceVector,
    pub hard_constraints: Vec<HardConstraint>,
    pub soft_constraints: Vec<SoftConstraint>,
    pub custom_named_resources: HashMap<String, String>,
}

impl TaskRequest {
    pub fn new(id: impl Into<String>, group_name: impl Into<String>, resources: ResourceVector) -> Self {
        Self {
            id: id.into(),
            group_name: group_name.into(),
            resources,
            hard_constraints: Vec::new(),
            soft_constraints: Vec::new(),
            custom_named_resources: HashMap::new(),
        }
    }

    pub fn with_hard_constraints(mut self, constraints: Vec<HardConstraint>) -> Self {
        self.hard_constraints = constraints;
        self
    }

    pub fn with_soft_constraints(mut self, constraints: Vec<SoftConstraint>) -> Self {
        self.soft_constraints = constraints;
        self
    }
}

/// Why one `(task, host)` evaluation did not result in a binding.
///
/// Every variant carries the structured data the caller needs to explain
/// the failure to the user or the autoscaler, per spec.md §7's requirement
/// that assignment failures "carry structured reasons ... never thrown".
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentFailureReason {
    /// The task's demand on `dimension` exceeds what the host has free.
    ResourceShortage {
        dimension: ResourceKind,
        required: f64,
        available: f64,
    },

    /// A named hard constraint rejected the pairing.
    HardConstraint { name: String, reason: String },

    /// The task's group has exhausted its quota on `dimension`.
    QuotaExceeded {
        group: String,
        dimension: ResourceKind,
        required: f64,
        remaining: f64,
    },

    /// No host in the cluster could ever satisfy this task's resource
    /// demand, dimension-wise — a fatal failure distinct from "no host had
    /// room *this round*" (spec.md §4.6 step 5c).
    Infeasible { dimension: ResourceKind },

    /// The constraint or fitness plugin panicked while evaluating this pair
    /// (spec.md §7c, "plugin exceptions").
    PluginPanicked { detail: String },
}

impl std::fmt::Display for AssignmentFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentFailureReason::ResourceShortage {
                dimension,
                required,
                available,
            } => write!(
                f,
                "requires {:.2} {} but only {:.2} available",
                required, dimension, available
            ),
            AssignmentFailureReason::HardConstraint { name, reason } => {
                write!(f, "hard constraint '{}' failed: {}", name, reason)
            }
            AssignmentFailureReason::QuotaExceeded {
                group,
                dimension,
                required,
                remaining,
            } => write!(
                f,
                "group '{}' quota on {} exceeded: needs {:.2}, {:.2} remaining",
                group, dimension, required, remaining
            ),
            AssignmentFailureReason::Infeasible { dimension } => {
                write!(f, "no host in the cluster can ever satisfy {} demand", dimension)
            }
            AssignmentFailureReason::PluginPanicked { detail } => {
                write!(f, "constraint/fitness plugin panicked: {}", detail)
            }
        }
    }
}

/// Result of evaluating one `(task, host)` pair (spec.md §3).
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub task_id: TaskId,
    pub hostname: String,
    pub successful: bool,
    pub failures: Vec<AssignmentFailureReason>,
    pub constraint_failure: Option<AssignmentFailureReason>,
    pub fitness: f64,
}

impl AssignmentResult {
    pub fn success(task_id: TaskId, hostname: String, fitness: f64) -> Self {
        Self {
            task_id,
            hostname,
            successful: true,
            failures: Vec::new(),
            constraint_failure: None,
            fitness,
        }
    }

    pub fn failure(task_id: TaskId, hostname: String, failures: Vec<AssignmentFailureReason>) -> Self {
        let constraint_failure = failures
            .iter()
            .find(|f| matches!(f, AssignmentFailureReason::HardConstraint { .. }))
            .cloned();
        Self {
            task_id,
            hostname,
            successful: false,
            failures,
            constraint_failure,
            fitness: 0.0,
        }
    }
}
