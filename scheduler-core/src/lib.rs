/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task-to-host assignment engine for a two-level cluster scheduler.
//!
//! An in-process library, not a service: the embedding framework owns the
//! cluster-manager connection, task submission queue, and autoscaler policy
//! engine, and drives this crate by calling [`scheduler::Scheduler::schedule_once`]
//! once per scheduling round.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── resources   – shared resource-vector arithmetic
//! ├── task        – task requests and per-(task, host) results
//! ├── constraint  – the hard/soft constraint and fitness plugin seam
//! ├── offer       – the Offer Store
//! ├── host        – the Host View and its tryTask primitive
//! ├── tracker     – the Task Tracker
//! ├── quota       – the Quota Evaluator
//! ├── autoscale   – the autoscaling signal evaluator
//! ├── config      – validated SchedulerConfig / SchedulerConfigBuilder
//! └── scheduler   – the orchestrator, State Guard, and Mutation API
//! ```

pub mod autoscale;
pub mod config;
pub mod constraint;
pub mod host;
pub mod offer;
pub mod quota;
pub mod resources;
pub mod scheduler;
pub mod task;
pub mod tracker;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use scheduler::{HostState, Scheduler, SchedulerError, SchedulingResult, TaskAssigner, TaskUnassigner, VmAssignmentResult};
