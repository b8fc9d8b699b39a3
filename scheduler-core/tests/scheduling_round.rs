/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! End-to-end exercises of the public API: a caller driving `Scheduler`
//! exactly as an embedding framework would, across multiple rounds and
//! interleaved mutation calls.

use std::sync::Arc;
use std::time::Duration;

use scheduler_core::autoscale::AutoScaleRule;
use scheduler_core::constraint::{FitnessCalculator, GoodEnoughPredicate, HardConstraint};
use scheduler_core::offer::Offer;
use scheduler_core::quota::ResAllocs;
use scheduler_core::resources::ResourceVector;
use scheduler_core::task::TaskRequest;
use scheduler_core::{Scheduler, SchedulerConfigBuilder};

fn offer(id: &str, hostname: &str, cpu: f64, mem: f64) -> Offer {
    Offer::new(id, hostname, format!("vm-{hostname}"), ResourceVector::new(cpu, mem, 0.0, 0.0, 0.0))
}

fn basic_scheduler() -> Scheduler {
    Scheduler::new(
        SchedulerConfigBuilder::new()
            .lease_reject_callback(Arc::new(|_, _| {}))
            .build()
            .unwrap(),
    )
}

#[test]
fn a_confirmed_launch_persists_quota_usage_into_the_next_round() {
    let scheduler = Arc::new(basic_scheduler());
    scheduler.add_or_replace_res_allocs("critical", ResAllocs { cpu: Some(4.0), ..Default::default() });

    let task = TaskRequest::new("t1", "critical", ResourceVector::new(3.0, 0.0, 0.0, 0.0, 0.0));
    let result = scheduler
        .schedule_once(vec![task], vec![offer("o1", "h1", 8.0, 0.0)])
        .unwrap()
        .unwrap();
    assert_eq!(result.per_host_assignments["h1"].task_ids, vec!["t1".to_string()]);

    // The framework confirms the launch through the Mutation API.
    scheduler.task_assigner().assign("t1".to_string(), "h1".to_string()).unwrap();

    // A later round: the confirmed task's resources now count against the
    // durable quota baseline even though this round's tentative state reset.
    let t2 = TaskRequest::new("t2", "critical", ResourceVector::new(2.0, 0.0, 0.0, 0.0, 0.0));
    let result2 = scheduler.schedule_once(vec![t2], vec![offer("o2", "h1", 8.0, 0.0)]).unwrap().unwrap();
    assert!(result2.per_task_failures.contains_key("t2"));

    // Unassigning releases the quota usage, so a same-sized task fits again.
    scheduler.task_unassigner().unassign("t1", "h1");
    let t3 = TaskRequest::new("t3", "critical", ResourceVector::new(2.0, 0.0, 0.0, 0.0, 0.0));
    let result3 = scheduler.schedule_once(vec![t3], vec![offer("o3", "h1", 8.0, 0.0)]).unwrap().unwrap();
    assert_eq!(result3.per_host_assignments["h1"].task_ids, vec!["t3".to_string()]);
}

#[test]
fn disabling_and_re_enabling_a_host_changes_candidate_eligibility() {
    let scheduler = basic_scheduler();
    scheduler.disable_host("h1", Duration::from_secs(3600));

    let t1 = TaskRequest::new("t1", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0));
    let r1 = scheduler.schedule_once(vec![t1], vec![offer("o1", "h1", 4.0, 0.0)]).unwrap().unwrap();
    assert!(r1.per_host_assignments.is_empty());

    scheduler.enable_host("h1");
    let t2 = TaskRequest::new("t2", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0));
    let r2 = scheduler.schedule_once(vec![t2], vec![offer("o2", "h1", 4.0, 0.0)]).unwrap().unwrap();
    assert_eq!(r2.per_host_assignments["h1"].task_ids, vec!["t2".to_string()]);
}

#[test]
fn explicit_lease_expiry_removes_an_offer_before_the_next_round() {
    let scheduler = basic_scheduler();
    scheduler.schedule_once(vec![], vec![offer("o1", "h1", 4.0, 0.0)]).unwrap();
    scheduler.expire_lease("o1");

    let task = TaskRequest::new("t1", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0));
    let result = scheduler.schedule_once(vec![task], vec![]).unwrap().unwrap();
    assert!(result.per_task_failures.contains_key("t1"));
}

#[test]
fn a_named_hard_constraint_can_veto_an_otherwise_fitting_host() {
    let scheduler = basic_scheduler();
    let task = TaskRequest::new("t1", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0))
        .with_hard_constraints(vec![HardConstraint::new("deny-h1", |_, host, _| {
            if host.hostname == "h1" {
                Err("h1 is cordoned".to_string())
            } else {
                Ok(())
            }
        })]);

    let offers = vec![offer("o1", "h1", 4.0, 0.0), offer("o2", "h2", 4.0, 0.0)];
    let result = scheduler.schedule_once(vec![task], offers).unwrap().unwrap();
    assert_eq!(result.per_host_assignments["h2"].task_ids, vec!["t1".to_string()]);
    assert!(!result.per_host_assignments.contains_key("h1"));
}

#[test]
fn autoscale_rule_requires_attribute_name_set_first() {
    let rule = AutoScaleRule::new("g", 1, 2, Duration::from_secs(60), ResourceVector::zero()).unwrap();
    let err = SchedulerConfigBuilder::new()
        .lease_reject_callback(Arc::new(|_, _| {}))
        .with_autoscale_rule(rule)
        .build();
    assert!(err.is_err());
}

#[test]
fn fitness_calculator_and_good_enough_predicate_compose_through_the_builder() {
    let scheduler = Scheduler::new(
        SchedulerConfigBuilder::new()
            .lease_reject_callback(Arc::new(|_, _| {}))
            .fitness_calculator(FitnessCalculator::new(|_, host, _| if host.hostname == "h2" { 1.0 } else { 0.0 }))
            .is_fitness_good_enough(GoodEnoughPredicate::new(|f| f >= 1.0))
            .build()
            .unwrap(),
    );
    let task = TaskRequest::new("t1", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0));
    let offers = vec![offer("o1", "h1", 4.0, 0.0), offer("o2", "h2", 4.0, 0.0)];
    let result = scheduler.schedule_once(vec![task], offers).unwrap().unwrap();
    assert_eq!(result.per_host_assignments["h2"].task_ids, vec!["t1".to_string()]);
}
