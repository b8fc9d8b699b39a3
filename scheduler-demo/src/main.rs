/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Command-line driver that runs `scheduler-core` through one scheduling
//! round against a small, hard-coded sample cluster — enough to exercise the
//! public API end to end without a real cluster-manager connection.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use scheduler_core::offer::{Offer, RejectReason};
use scheduler_core::resources::ResourceVector;
use scheduler_core::task::TaskRequest;
use scheduler_core::{Scheduler, SchedulerConfigBuilder};

#[derive(Parser, Debug)]
#[command(name = "scheduler-demo", about = "Run scheduler-core against a sample cluster")]
struct Cli {
    /// Path to a cluster policy YAML file (res_allocs / autoscale_rules).
    #[arg(long)]
    policy: Option<PathBuf>,
}

fn sample_offers() -> Vec<Offer> {
    vec![
        Offer::new("offer-1", "host-a", "vm-a", ResourceVector::new(8.0, 16384.0, 1000.0, 102400.0, 100.0)),
        Offer::new("offer-2", "host-b", "vm-b", ResourceVector::new(4.0, 8192.0, 500.0, 51200.0, 100.0)),
    ]
}

fn sample_tasks() -> Vec<TaskRequest> {
    vec![
        TaskRequest::new("task-1", "critical", ResourceVector::new(2.0, 4096.0, 0.0, 0.0, 0.0)),
        TaskRequest::new("task-2", "critical", ResourceVector::new(2.0, 4096.0, 0.0, 0.0, 0.0)),
        TaskRequest::new("task-3", "best-effort", ResourceVector::new(6.0, 8192.0, 0.0, 0.0, 0.0)),
    ]
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut builder = SchedulerConfigBuilder::new().lease_reject_callback(Arc::new(|offer: &Offer, reason: RejectReason| {
        warn!(offer_id = %offer.id, host = %offer.hostname, %reason, "offer rejected");
    }));

    if let Some(path) = &cli.policy {
        let policy = config::load_from_file(path)?;
        if let Some(attr) = policy.autoscale_by_attribute_name {
            builder = builder.autoscale_by_attribute_name(attr);
        }
        builder = builder.initial_res_allocs(policy.res_allocs);
        for rule in policy.autoscale_rules {
            builder = builder.with_autoscale_rule(rule);
        }
    }

    let scheduler = Scheduler::new(builder.build()?);

    let result = scheduler
        .schedule_once(sample_tasks(), sample_offers())?
        .expect("sample round should not panic");

    info!(
        assigned = result.per_host_assignments.values().map(|v| v.task_ids.len()).sum::<usize>(),
        failed = result.per_task_failures.len(),
        total_vms = result.total_vms,
        idle_vms = result.idle_vms,
        runtime_micros = result.runtime.as_micros(),
        "scheduling round complete"
    );
    for (hostname, assignment) in &result.per_host_assignments {
        info!(host = %hostname, tasks = ?assignment.task_ids, "bound");
    }
    for (task_id, failures) in &result.per_task_failures {
        for failure in failures {
            warn!(task = %task_id, %failure, "not placed");
        }
    }

    Ok(())
}
