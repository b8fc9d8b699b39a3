/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The constraint and fitness plugin seam.
//!
//! spec.md treats concrete constraint and fitness implementations as opaque
//! callables owned by the embedding framework — this module only defines the
//! shapes those callables take. A constraint or fitness function that panics
//! is caught per worker by the [`AssignmentEvaluator`](crate::scheduler::evaluator::AssignmentEvaluator);
//! see `scheduler/evaluator.rs`.

use std::sync::Arc;

use crate::host::HostSnapshot;
use crate::task::TaskRequest;
use crate::tracker::TaskTrackerSnapshot;

/// Outcome of a single hard-constraint check against one `(task, host)` pair.
///
/// `Err` carries the human-readable reason a failing constraint reports back
/// through [`AssignmentFailureReason::HardConstraint`](crate::task::AssignmentFailureReason::HardConstraint).
pub type ConstraintResult = Result<(), String>;

type HardConstraintEval =
    dyn Fn(&TaskRequest, &HostSnapshot, &TaskTrackerSnapshot) -> ConstraintResult + Send + Sync;

type SoftConstraintEval =
    dyn Fn(&TaskRequest, &HostSnapshot, &TaskTrackerSnapshot) -> f64 + Send + Sync;

type FitnessEval =
    dyn Fn(&TaskRequest, &HostSnapshot, &TaskTrackerSnapshot) -> f64 + Send + Sync;

/// A named pass/fail predicate on a `(task, host, cluster-state)` triple.
///
/// Failure disqualifies the host outright (spec.md glossary).
#[derive(Clone)]
pub struct HardConstraint {
    pub name: String,
    eval: Arc<HardConstraintEval>,
}

impl HardConstraint {
    pub fn new<F>(name: impl Into<String>, eval: F) -> Self
    where
        F: Fn(&TaskRequest, &HostSnapshot, &TaskTrackerSnapshot) -> ConstraintResult
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            eval: Arc::new(eval),
        }
    }

    pub fn evaluate(
        &self,
        task: &TaskRequest,
        host: &HostSnapshot,
        tracker: &TaskTrackerSnapshot,
    ) -> ConstraintResult {
        (self.eval)(task, host, tracker)
    }
}

impl std::fmt::Debug for HardConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardConstraint").field("name", &self.name).finish()
    }
}

/// A weighted score contributing to fitness; never disqualifies a host
/// (spec.md glossary).
#[derive(Clone)]
pub struct SoftConstraint {
    pub name: String,
    pub weight: f64,
    eval: Arc<SoftConstraintEval>,
}

impl SoftConstraint {
    pub fn new<F>(name: impl Into<String>, weight: f64, eval: F) -> Self
    where
        F: Fn(&TaskRequest, &HostSnapshot, &TaskTrackerSnapshot) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            weight,
            eval: Arc::new(eval),
        }
    }

    pub fn evaluate(
        &self,
        task: &TaskRequest,
        host: &HostSnapshot,
        tracker: &TaskTrackerSnapshot,
    ) -> f64 {
        (self.eval)(task, host, tracker)
    }
}

impl std::fmt::Debug for SoftConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftConstraint")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish()
    }
}

/// `(task, host, trackerSnapshot) -> [0,1]` fitness calculator (spec.md §6).
///
/// Combined with the weighted soft-constraint scores at `Host::try_task`
/// time: the final fitness is the plugin's score averaged with the
/// normalized soft-constraint score when soft constraints are present,
/// or the plugin's score alone otherwise.
#[derive(Clone)]
pub struct FitnessCalculator {
    eval: Arc<FitnessEval>,
}

impl FitnessCalculator {
    pub fn new<F>(eval: F) -> Self
    where
        F: Fn(&TaskRequest, &HostSnapshot, &TaskTrackerSnapshot) -> f64 + Send + Sync + 'static,
    {
        Self { eval: Arc::new(eval) }
    }

    /// Default fitness calculator: a constant, per spec.md §6
    /// ("Default returns a constant").
    pub fn constant(value: f64) -> Self {
        Self::new(move |_, _, _| value)
    }

    pub fn evaluate(
        &self,
        task: &TaskRequest,
        host: &HostSnapshot,
        tracker: &TaskTrackerSnapshot,
    ) -> f64 {
        (self.eval)(task, host, tracker).clamp(0.0, 1.0)
    }
}

impl Default for FitnessCalculator {
    fn default() -> Self {
        Self::constant(1.0)
    }
}

impl std::fmt::Debug for FitnessCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FitnessCalculator(..)")
    }
}

/// `double -> bool` predicate deciding whether a fitness score is "good
/// enough" to short-circuit the [`AssignmentEvaluator`](crate::scheduler::evaluator::AssignmentEvaluator)'s
/// search over remaining candidate hosts.
///
/// The default is `fitness > 1.0`, i.e. never — exhaustive search — since
/// fitness is clamped to `[0,1]` (spec.md §6).
#[derive(Clone)]
pub struct GoodEnoughPredicate {
    eval: Arc<dyn Fn(f64) -> bool + Send + Sync>,
}

impl GoodEnoughPredicate {
    pub fn new<F>(eval: F) -> Self
    where
        F: Fn(f64) -> bool + Send + Sync + 'static,
    {
        Self { eval: Arc::new(eval) }
    }

    pub fn exhaustive() -> Self {
        Self::new(|fitness| fitness > 1.0)
    }

    pub fn is_good_enough(&self, fitness: f64) -> bool {
        (self.eval)(fitness)
    }
}

impl Default for GoodEnoughPredicate {
    fn default() -> Self {
        Self::exhaustive()
    }
}

impl std::fmt::Debug for GoodEnoughPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GoodEnoughPredicate(..)")
    }
}
