/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Usage errors: mis-use of the public API, surfaced to the caller rather
//! than swallowed (spec.md §7a).

use thiserror::Error;

/// Top-level usage error returned by the scheduler's public operations.
///
/// Distinct from [`AssignmentFailureReason`](crate::task::AssignmentFailureReason),
/// which is never thrown — it is carried inside the [`SchedulingResult`](super::SchedulingResult)
/// (spec.md §7).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `scheduleOnce` or a state-guarded mutation was invoked while another
    /// such call was already in progress (spec.md §4.7, fail-fast, not
    /// blocking).
    #[error("concurrent entry into a state-guarded operation")]
    ConcurrentEntry,

    /// A batch passed to `scheduleOnce` contained an offer id that already
    /// exists in the store (spec.md §3, §4.1).
    #[error("duplicate offer id '{0}'")]
    DuplicateOfferId(String),

    /// An autoscale rule failed validation, or was added/callback-set before
    /// `autoScaleByAttributeName` was configured (spec.md §7).
    #[error("invalid autoscale configuration: {0}")]
    InvalidAutoscaleConfig(String),
}
