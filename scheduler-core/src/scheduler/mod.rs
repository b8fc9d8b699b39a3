/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The Scheduling Round Orchestrator and Mutation API (spec.md §4.6, §4.8).
//!
//! [`Scheduler`] is the single entry point: it owns every collaborator
//! (offer store, host registry, task tracker, quota evaluator, autoscale
//! evaluator, and the parallel assignment evaluator's worker pool) and
//! exposes `schedule_once` plus the mutation primitives the embedding
//! framework calls between rounds.

pub mod error;
pub mod evaluator;

pub use error::SchedulerError;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::autoscale::{AutoscaleEvaluator, AutoscaleInput, IdleHost};
use crate::config::{SchedulerConfig, INACTIVE_HOST_SWEEP_INTERVAL};
use crate::host::{Host, HostRegistry};
use crate::offer::{Offer, OfferStore, RejectReason};
use crate::quota::{QuotaEvaluator, ResAllocs};
use crate::resources::{ResourceKind, ResourceVector};
use crate::task::{AssignmentFailureReason, TaskId, TaskRequest};
use crate::tracker::TaskTracker;

use evaluator::{AssignmentEvaluator, Candidate};

/// This round's bound tasks on one host (spec.md §3, "VMAssignmentResult").
#[derive(Debug, Clone, Default)]
pub struct VmAssignmentResult {
    pub hostname: String,
    pub task_ids: Vec<TaskId>,
}

/// Result of one `scheduleOnce` invocation (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct SchedulingResult {
    pub per_host_assignments: BTreeMap<String, VmAssignmentResult>,
    pub per_task_failures: HashMap<TaskId, Vec<AssignmentFailureReason>>,
    pub leases_added: usize,
    pub leases_rejected: usize,
    pub num_allocation_trials: usize,
    pub total_vms: usize,
    pub idle_vms: usize,
    pub runtime: Duration,
}

/// Snapshot of one host's state for `getHostCurrentStates` (spec.md §6).
#[derive(Debug, Clone)]
pub struct HostState {
    pub hostname: String,
    pub disabled: bool,
    pub group: Option<String>,
    pub total_resources: ResourceVector,
    pub free_resources: ResourceVector,
    pub previously_assigned_count: usize,
}

/// Fail-fast mutual exclusion guaranteeing `scheduleOnce`, `getTaskAssigner`,
/// and state-inspection operations never run concurrently (spec.md §4.7).
///
/// A scoped acquisition over `parking_lot::Mutex::try_lock` — the `Drop` of
/// the returned guard releases it on every exit path, including panics
/// (spec.md §9, "scoped acquisition ... with guaranteed release on all
/// exits").
struct StateGuard {
    lock: Mutex<()>,
}

impl StateGuard {
    fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    fn try_enter(&self) -> Result<parking_lot::MutexGuard<'_, ()>, SchedulerError> {
        self.lock.try_lock().ok_or(SchedulerError::ConcurrentEntry)
    }
}

/// Owns every scheduling collaborator; the single entry point for both the
/// scheduling round and the mutation API (spec.md §2, §4.6, §4.8).
pub struct Scheduler {
    config: SchedulerConfig,
    state_guard: StateGuard,
    offers: Mutex<OfferStore>,
    hosts: Mutex<HostRegistry>,
    tracker: Mutex<TaskTracker>,
    quota: Mutex<QuotaEvaluator>,
    autoscaler: Mutex<AutoscaleEvaluator>,
    evaluator: AssignmentEvaluator,
    active_group_attribute_name: Mutex<Option<String>>,
    active_groups: Mutex<Option<HashSet<String>>>,
    last_sweep: Mutex<Instant>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let mut quota = QuotaEvaluator::new();
        for (group, allocs) in &config.initial_res_allocs {
            quota.add_or_replace(group.clone(), *allocs);
        }

        let mut autoscaler = AutoscaleEvaluator::new(config.disable_shortfall_evaluation);
        autoscaler.set_active_attribute_name(config.autoscale_by_attribute_name.clone());
        for rule in &config.autoscale_rules {
            autoscaler
                .add_or_replace_rule(rule.clone())
                .expect("autoscale rules in a validated SchedulerConfig are always acceptable");
        }
        if let Some(cb) = &config.autoscaler_callback {
            autoscaler
                .set_callback(Some(Arc::clone(cb)))
                .expect("validated SchedulerConfig guarantees the attribute name is set");
        }

        let worker_pool_size = num_cpus::get();

        Self {
            config,
            state_guard: StateGuard::new(),
            offers: Mutex::new(OfferStore::new()),
            hosts: Mutex::new(HostRegistry::new()),
            tracker: Mutex::new(TaskTracker::new()),
            quota: Mutex::new(quota),
            autoscaler: Mutex::new(autoscaler),
            evaluator: AssignmentEvaluator::new(worker_pool_size),
            active_group_attribute_name: Mutex::new(None),
            active_groups: Mutex::new(None),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    // ── Scheduling Round Orchestrator (spec.md §4.6) ─────────────────────────

    /// Top-level entry point. Must not be invoked concurrently — concurrent
    /// entry fails with [`SchedulerError::ConcurrentEntry`]. Unexpected
    /// internal errors are logged and swallowed, returning `Ok(None)`
    /// (spec.md §7d); a duplicate offer id propagates as `Err` (spec.md §4.1).
    pub fn schedule_once(
        &self,
        requests: Vec<TaskRequest>,
        new_offers: Vec<Offer>,
    ) -> Result<Option<SchedulingResult>, SchedulerError> {
        let _guard = self.state_guard.try_enter()?;
        let start = Instant::now();

        let leases_added = {
            let mut store = self.offers.lock();
            let outcome = store
                .add_offers(new_offers, self.config.single_offer_per_host)
                .map_err(|e| SchedulerError::DuplicateOfferId(e.0))?;
            outcome.accepted.len()
        };

        match panic::catch_unwind(AssertUnwindSafe(|| self.run_round(requests, start, leases_added))) {
            Ok(result) => Ok(Some(result)),
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(detail = %detail, "scheduling round failed unexpectedly; returning null result");
                Ok(None)
            }
        }
    }

    fn run_round(&self, requests: Vec<TaskRequest>, start: Instant, leases_added: usize) -> SchedulingResult {
        let now = Instant::now();
        let mut leases_rejected = 0usize;

        // Step: expire stale offers, before any task is considered.
        let expired = {
            let mut store = self.offers.lock();
            store.sweep_expired(self.config.lease_offer_expiry, now)
        };
        leases_rejected += expired.len();
        self.reject_offers(expired);

        // Step: sync host group tags/attributes and gather candidates.
        let group_attribute_name = self.active_group_attribute_name.lock().clone();
        {
            let store = self.offers.lock();
            let mut hosts = self.hosts.lock();
            let hostnames: Vec<String> = store.hostnames().cloned().collect();
            for hostname in hostnames {
                let offers = store.offers_for_host(&hostname);
                hosts
                    .get_or_create(&hostname)
                    .sync_from_offers(offers, group_attribute_name.as_deref());
            }
        }

        let active_groups = self.active_groups.lock().clone();
        let candidate_hostnames: Vec<String> = {
            let store = self.offers.lock();
            let hosts = self.hosts.lock();
            hosts
                .candidates(now, active_groups.as_ref())
                .into_iter()
                .filter(|h| !store.offers_for_host(h).is_empty())
                .collect()
        };

        // Cluster-wide per-dimension capacity ceiling, used for the
        // dimension-wise infeasibility fast path (spec.md §4.6 step 5c).
        let cluster_capacity = {
            let store = self.offers.lock();
            candidate_hostnames.iter().fold(ResourceVector::zero(), |acc, hostname| {
                let total = Host::total_resources(store.offers_for_host(hostname));
                ResourceVector::new(
                    acc.cpu.max(total.cpu),
                    acc.memory_mb.max(total.memory_mb),
                    acc.network_mbps.max(total.network_mbps),
                    acc.disk_mb.max(total.disk_mb),
                    acc.ports.max(total.ports),
                )
            })
        };

        self.quota.lock().prepare();

        let mut per_task_failures: HashMap<TaskId, Vec<AssignmentFailureReason>> = HashMap::new();
        let mut shortfall_by_group: HashMap<String, ResourceVector> = HashMap::new();
        let mut num_allocation_trials = 0usize;

        for task in requests {
            if self.quota.lock().task_group_failed(&task.group_name) {
                debug!(task = %task.id, group = %task.group_name, "group quota already exhausted this round, skipping");
                per_task_failures.insert(
                    task.id.clone(),
                    vec![AssignmentFailureReason::QuotaExceeded {
                        group: task.group_name.clone(),
                        dimension: ResourceKind::Cpu,
                        required: 0.0,
                        remaining: 0.0,
                    }],
                );
                continue;
            }

            if let Some(reason) = self.quota.lock().has_res_allocs(&task) {
                self.quota.lock().mark_group_failed(&task.group_name);
                per_task_failures.insert(task.id.clone(), vec![reason]);
                continue;
            }

            if let Err(dimension) = task.resources.fits_within(&cluster_capacity) {
                warn!(task = %task.id, %dimension, "no host in the cluster could ever satisfy this task");
                per_task_failures.insert(
                    task.id.clone(),
                    vec![AssignmentFailureReason::Infeasible { dimension }],
                );
                continue;
            }

            let candidates = {
                let store = self.offers.lock();
                let hosts = self.hosts.lock();
                candidate_hostnames
                    .iter()
                    .filter_map(|hostname| {
                        let host = hosts.get(hostname)?.clone();
                        let offers = store.offers_for_host(hostname).to_vec();
                        Some(Candidate { hostname: hostname.clone(), host, offers })
                    })
                    .collect::<Vec<_>>()
            };

            let outcome = self.evaluator.evaluate(
                Arc::new(task.clone()),
                candidates,
                self.tracker.lock().snapshot(),
                self.config.fitness_calculator.clone(),
                self.config.is_fitness_good_enough.clone(),
            );
            num_allocation_trials += outcome.trials;

            match outcome.best {
                Some((result, _)) => {
                    let mut hosts = self.hosts.lock();
                    if let Some(host) = hosts.get_mut(&result.hostname) {
                        host.assign(&task);
                    }
                    self.quota.lock().record_tentative(&task);
                    info!(task = %task.id, host = %result.hostname, fitness = result.fitness, "assigned");
                }
                None => {
                    let entry = shortfall_by_group.entry(task.group_name.clone()).or_insert_with(ResourceVector::zero);
                    *entry = *entry + task.resources;
                    per_task_failures.insert(task.id.clone(), outcome.failures);
                }
            }
        }

        // Step: collect per-host results, evict idle hosts.
        let mut per_host_assignments = BTreeMap::new();
        let mut idle_hosts_by_group: HashMap<String, Vec<IdleHost>> = HashMap::new();
        let mut idle_vms = 0usize;
        let balance_attribute = self.config.autoscale_down_balanced_by_attribute_name.clone();
        let map_hostname_attribute = self.config.autoscaler_map_hostname_attribute_name.clone();

        {
            let mut hosts = self.hosts.lock();
            let mut store = self.offers.lock();
            for (hostname, host) in hosts.iter_mut() {
                match host.reset_and_get_successfully_assigned_requests() {
                    Some(task_ids) => {
                        per_host_assignments.insert(
                            hostname.clone(),
                            VmAssignmentResult { hostname: hostname.clone(), task_ids },
                        );
                    }
                    None => {
                        if !host.has_previously_assigned_tasks() && !store.offers_for_host(hostname).is_empty() {
                            idle_vms += 1;
                            if let Some(group) = host.group() {
                                let balance_value = balance_attribute
                                    .as_deref()
                                    .and_then(|name| host.attribute(name))
                                    .map(str::to_string);
                                let scaling_identifier = map_hostname_attribute
                                    .as_deref()
                                    .and_then(|name| host.attribute(name))
                                    .map(str::to_string)
                                    .unwrap_or_else(|| hostname.clone());
                                idle_hosts_by_group.entry(group.to_string()).or_default().push(IdleHost {
                                    hostname: scaling_identifier,
                                    balance_value,
                                });
                            }
                            let evicted = store.evict_idle_host(hostname);
                            leases_rejected += evicted.len();
                            self.reject_offers(evicted);
                        }
                    }
                }
            }
        }

        // Step: periodic inactive-host sweep.
        {
            let mut last_sweep = self.last_sweep.lock();
            if now.saturating_duration_since(*last_sweep) > INACTIVE_HOST_SWEEP_INTERVAL {
                let store = self.offers.lock();
                let mut hosts = self.hosts.lock();
                let reclaimed = hosts.sweep_inactive(now, |hostname| !store.is_empty_for_host(hostname));
                if !reclaimed.is_empty() {
                    info!(count = reclaimed.len(), "reclaimed inactive host records");
                }
                *last_sweep = now;
            }
        }

        // Step: feed the autoscaler (non-blocking).
        let autoscale_input = AutoscaleInput {
            idle_hosts_by_group,
            shortfall_by_group,
        };
        self.autoscaler.lock().evaluate(&autoscale_input, now);

        let total_vms = self.hosts.lock().hostnames().count();

        info!(
            tasks = per_task_failures.len() + per_host_assignments.values().map(|v| v.task_ids.len()).sum::<usize>(),
            assigned = per_host_assignments.values().map(|v| v.task_ids.len()).sum::<usize>(),
            failed = per_task_failures.len(),
            total_vms,
            idle_vms,
            "round complete"
        );

        SchedulingResult {
            per_host_assignments,
            per_task_failures,
            leases_added,
            leases_rejected,
            num_allocation_trials,
            total_vms,
            idle_vms,
            runtime: start.elapsed(),
        }
    }

    fn reject_offers(&self, rejected: Vec<(Offer, RejectReason)>) {
        for (offer, reason) in rejected {
            (self.config.lease_reject_callback)(&offer, reason);
        }
    }

    // ── Mutation API (spec.md §4.8) ──────────────────────────────────────────

    /// External notification that `task_id` is now running on `hostname`
    /// (spec.md §4.8). Must run inside the state guard — a concurrent call
    /// during a scheduling round fails with [`SchedulerError::ConcurrentEntry`].
    pub fn assign_task(&self, task_id: TaskId, hostname: String) -> Result<(), SchedulerError> {
        let _guard = self.state_guard.try_enter()?;
        self.tracker.lock().assign(task_id.clone(), hostname.clone());
        self.hosts.lock().get_or_create(&hostname).mark_previously_assigned(task_id.clone());
        self.quota.lock().confirm_running(&task_id);
        Ok(())
    }

    /// `task_id` has terminated; remove it from both indices. Does not
    /// require the state guard — internally safe for concurrent, commonly
    /// cluster-manager-event-thread-driven, calls (spec.md §4.8, §5).
    pub fn unassign_task(&self, task_id: &str, hostname: &str) {
        self.tracker.lock().unassign(task_id, hostname);
        if let Some(host) = self.hosts.lock().get_mut(hostname) {
            host.clear_previously_assigned(task_id);
        }
        self.quota.lock().release(task_id);
    }

    pub fn disable_host(&self, hostname: &str, duration: Duration) {
        self.hosts.lock().get_or_create(hostname).disable_until(Instant::now() + duration);
    }

    pub fn enable_host(&self, hostname: &str) {
        self.hosts.lock().get_or_create(hostname).enable();
    }

    pub fn disable_host_by_vm_id(&self, vm_id: &str, duration: Duration) {
        let hostname = self.offers.lock().get_hostname_for_vm_id(vm_id).map(str::to_string);
        if let Some(hostname) = hostname {
            self.disable_host(&hostname, duration);
        } else {
            warn!(vm_id = %vm_id, "disableHostByVmId: no host known for this vmId");
        }
    }

    pub fn expire_lease(&self, id: &str) {
        if let Some((offer, reason)) = self.offers.lock().expire_by_id(id) {
            (self.config.lease_reject_callback)(&offer, reason);
        }
    }

    pub fn expire_all_leases_for_host(&self, hostname: &str) {
        let rejected = self.offers.lock().expire_all_for_host(hostname);
        self.reject_offers(rejected);
    }

    pub fn expire_all_leases_for_vm_id(&self, vm_id: &str) {
        let rejected = self.offers.lock().expire_all_for_vm_id(vm_id);
        self.reject_offers(rejected);
    }

    pub fn expire_all_leases(&self) {
        let rejected = self.offers.lock().expire_all();
        self.reject_offers(rejected);
    }

    pub fn set_active_group_attribute_name(&self, name: Option<String>) {
        *self.active_group_attribute_name.lock() = name;
    }

    /// `None` means "all groups active" (spec.md §4.8).
    pub fn set_active_groups(&self, groups: Option<Vec<String>>) {
        *self.active_groups.lock() = groups.map(|g| g.into_iter().collect());
    }

    pub fn add_or_replace_res_allocs(&self, group: impl Into<String>, allocs: ResAllocs) {
        self.quota.lock().add_or_replace(group, allocs);
    }

    pub fn remove_res_allocs(&self, group: &str) {
        self.quota.lock().remove(group);
    }

    pub fn get_res_allocs(&self, group: &str) -> Option<ResAllocs> {
        self.quota.lock().get(group).copied()
    }

    pub fn add_or_replace_autoscale_rule(
        &self,
        rule: crate::autoscale::AutoScaleRule,
    ) -> Result<(), SchedulerError> {
        self.autoscaler
            .lock()
            .add_or_replace_rule(rule)
            .map_err(SchedulerError::InvalidAutoscaleConfig)
    }

    pub fn remove_autoscale_rule(&self, group: &str) {
        self.autoscaler.lock().remove_rule(group);
    }

    pub fn get_autoscale_rules(&self) -> HashMap<String, crate::autoscale::AutoScaleRule> {
        self.autoscaler.lock().rules().clone()
    }

    // ── State inspection (guarded, spec.md §4.7) ─────────────────────────────

    /// `map<hostname, map<resourceKind, [used, available]>>` where
    /// `available` excludes `used` (spec.md §6).
    ///
    /// Outside of an in-flight round, tentative assignments are always
    /// empty (they are drained at round end), so `used` reflects only
    /// resources spoken for since the last round's reset — see DESIGN.md
    /// for why this engine cannot additionally reconstruct "resources
    /// consumed by already-running tasks" from offers alone.
    pub fn get_resource_status(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<ResourceKind, (f64, f64)>>, SchedulerError> {
        let _guard = self.state_guard.try_enter()?;
        let store = self.offers.lock();
        let hosts = self.hosts.lock();
        let mut report = BTreeMap::new();
        for (hostname, host) in hosts.iter() {
            let offers = store.offers_for_host(hostname);
            let total = Host::total_resources(offers);
            let free = host.free_resources(offers);
            let used = total.saturating_sub(&free);
            let mut per_kind = BTreeMap::new();
            for kind in ResourceVector::all_kinds() {
                per_kind.insert(kind, (used.get(kind), free.get(kind)));
            }
            report.insert(hostname.clone(), per_kind);
        }
        Ok(report)
    }

    pub fn get_host_current_states(&self) -> Result<BTreeMap<String, HostState>, SchedulerError> {
        let _guard = self.state_guard.try_enter()?;
        let now = Instant::now();
        let store = self.offers.lock();
        let hosts = self.hosts.lock();
        let mut report = BTreeMap::new();
        for (hostname, host) in hosts.iter() {
            let offers = store.offers_for_host(hostname);
            report.insert(
                hostname.clone(),
                HostState {
                    hostname: hostname.clone(),
                    disabled: host.is_disabled(now),
                    group: host.group().map(str::to_string),
                    total_resources: Host::total_resources(offers),
                    free_resources: host.free_resources(offers),
                    previously_assigned_count: host.previously_assigned().len(),
                },
            );
        }
        Ok(report)
    }
}

/// Returned by [`Scheduler::task_assigner`]: a first-class handle the
/// framework calls when it actually launches a previously-selected task
/// (spec.md §6, "getTaskAssigner").
pub struct TaskAssigner {
    scheduler: Arc<Scheduler>,
}

impl TaskAssigner {
    pub fn assign(&self, task_id: TaskId, hostname: String) -> Result<(), SchedulerError> {
        self.scheduler.assign_task(task_id, hostname)
    }
}

/// Returned by [`Scheduler::task_unassigner`] (spec.md §6, "getTaskUnassigner").
pub struct TaskUnassigner {
    scheduler: Arc<Scheduler>,
}

impl TaskUnassigner {
    pub fn unassign(&self, task_id: &str, hostname: &str) {
        self.scheduler.unassign_task(task_id, hostname);
    }
}

impl Scheduler {
    pub fn task_assigner(self: &Arc<Self>) -> TaskAssigner {
        TaskAssigner { scheduler: Arc::clone(self) }
    }

    pub fn task_unassigner(self: &Arc<Self>) -> TaskUnassigner {
        TaskUnassigner { scheduler: Arc::clone(self) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoscale::AutoscaleAction;
    use crate::config::SchedulerConfigBuilder;
    use crate::offer::Offer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_scheduler() -> Scheduler {
        Scheduler::new(
            SchedulerConfigBuilder::new()
                .lease_reject_callback(Arc::new(|_, _| {}))
                .build()
                .unwrap(),
        )
    }

    fn offer(id: &str, hostname: &str, cpu: f64, mem: f64) -> Offer {
        Offer::new(id, hostname, format!("vm-{hostname}"), ResourceVector::new(cpu, mem, 0.0, 0.0, 0.0))
    }

    // Scenario 1 from spec.md §8.
    #[test]
    fn single_offer_single_task_binds_and_reduces_capacity() {
        let scheduler = test_scheduler();
        let task = TaskRequest::new("t1", "default", ResourceVector::new(2.0, 4096.0, 0.0, 0.0, 0.0));
        let result = scheduler
            .schedule_once(vec![task], vec![offer("o1", "h1", 4.0, 8192.0)])
            .unwrap()
            .unwrap();

        assert_eq!(result.leases_added, 1);
        assert_eq!(result.leases_rejected, 0);
        let assignment = result.per_host_assignments.get("h1").expect("h1 should have an assignment");
        assert_eq!(assignment.task_ids, vec!["t1".to_string()]);

        let status = scheduler.get_resource_status().unwrap();
        let cpu_status = status["h1"][&ResourceKind::Cpu];
        assert_eq!(cpu_status, (2.0, 2.0));
    }

    // Scenario 2 from spec.md §8.
    #[test]
    fn third_competing_task_fails_on_both_hosts() {
        let scheduler = test_scheduler();
        let tasks = vec![
            TaskRequest::new("t1", "default", ResourceVector::new(1.5, 0.0, 0.0, 0.0, 0.0)),
            TaskRequest::new("t2", "default", ResourceVector::new(1.5, 0.0, 0.0, 0.0, 0.0)),
            TaskRequest::new("t3", "default", ResourceVector::new(1.5, 0.0, 0.0, 0.0, 0.0)),
        ];
        let offers = vec![offer("o1", "h1", 2.0, 0.0), offer("o2", "h2", 2.0, 0.0)];
        let result = scheduler.schedule_once(tasks, offers).unwrap().unwrap();

        assert_eq!(result.per_host_assignments["h1"].task_ids, vec!["t1".to_string()]);
        assert_eq!(result.per_host_assignments["h2"].task_ids, vec!["t2".to_string()]);
        assert!(result.per_task_failures.contains_key("t3"));
    }

    // Scenario 3 from spec.md §8.
    #[test]
    fn duplicate_offer_id_in_one_batch_is_a_usage_error() {
        let scheduler = test_scheduler();
        let err = scheduler.schedule_once(vec![], vec![offer("dup", "h1", 1.0, 0.0), offer("dup", "h2", 1.0, 0.0)]);
        assert!(matches!(err, Err(SchedulerError::DuplicateOfferId(ref id)) if id == "dup"));
    }

    // Scenario 4 from spec.md §8.
    #[test]
    fn concurrent_schedule_once_fails_fast() {
        let scheduler = test_scheduler();
        let _guard = scheduler.state_guard.try_enter().unwrap();
        let err = scheduler.schedule_once(vec![], vec![]);
        assert!(matches!(err, Err(SchedulerError::ConcurrentEntry)));
    }

    // Scenario 5 from spec.md §8.
    #[test]
    fn quota_exhaustion_is_not_autoscale_eligible_but_other_groups_proceed() {
        let scheduler = test_scheduler();
        scheduler.add_or_replace_res_allocs("groupA", ResAllocs { cpu: Some(4.0), ..Default::default() });

        let tasks = vec![
            TaskRequest::new("a1", "groupA", ResourceVector::new(3.0, 0.0, 0.0, 0.0, 0.0)),
            TaskRequest::new("a2", "groupA", ResourceVector::new(2.0, 0.0, 0.0, 0.0, 0.0)),
            TaskRequest::new("b1", "groupB", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0)),
        ];
        let result = scheduler.schedule_once(tasks, vec![offer("o1", "h1", 8.0, 0.0)]).unwrap().unwrap();

        assert_eq!(result.per_host_assignments["h1"].task_ids, vec!["a1".to_string(), "b1".to_string()]);
        assert!(result.per_task_failures.contains_key("a2"));
    }

    // Scenario 6 from spec.md §8.
    #[test]
    fn good_enough_fitness_short_circuits_search() {
        let scheduler = Scheduler::new(
            SchedulerConfigBuilder::new()
                .lease_reject_callback(Arc::new(|_, _| {}))
                .fitness_calculator(crate::constraint::FitnessCalculator::new(|_, host, _| {
                    if host.hostname == "h1" { 0.9 } else { 0.5 }
                }))
                .is_fitness_good_enough(crate::constraint::GoodEnoughPredicate::new(|f| f > 0.8))
                .build()
                .unwrap(),
        );
        let task = TaskRequest::new("t1", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0));
        let offers = vec![offer("o1", "h1", 2.0, 0.0), offer("o2", "h2", 2.0, 0.0)];
        let result = scheduler.schedule_once(vec![task], offers).unwrap().unwrap();
        assert_eq!(result.per_host_assignments["h1"].task_ids, vec!["t1".to_string()]);
    }

    #[test]
    fn empty_round_is_idempotent_besides_expiry_sweep() {
        let scheduler = test_scheduler();
        let before = scheduler.schedule_once(vec![], vec![]).unwrap().unwrap();
        let after = scheduler.schedule_once(vec![], vec![]).unwrap().unwrap();
        assert_eq!(before.total_vms, after.total_vms);
        assert_eq!(before.per_host_assignments, after.per_host_assignments);
    }

    #[test]
    fn assign_then_unassign_round_trips_tracker_state() {
        let scheduler = Arc::new(test_scheduler());
        let assigner = scheduler.task_assigner();
        let unassigner = scheduler.task_unassigner();
        assigner.assign("t1".into(), "h1".into()).unwrap();
        assert!(scheduler.tracker.lock().is_running("t1"));
        unassigner.unassign("t1", "h1");
        assert!(!scheduler.tracker.lock().is_running("t1"));
    }

    #[test]
    fn disabled_host_is_excluded_from_candidates() {
        let scheduler = test_scheduler();
        scheduler.disable_host("h1", Duration::from_secs(60));
        let task = TaskRequest::new("t1", "default", ResourceVector::new(1.0, 0.0, 0.0, 0.0, 0.0));
        let result = scheduler.schedule_once(vec![task], vec![offer("o1", "h1", 4.0, 0.0)]).unwrap().unwrap();
        assert!(result.per_host_assignments.is_empty());
        assert!(result.per_task_failures.contains_key("t1"));
    }

    #[test]
    fn infeasible_task_is_reported_without_scanning_hosts() {
        let scheduler = test_scheduler();
        let task = TaskRequest::new("huge", "default", ResourceVector::new(1000.0, 0.0, 0.0, 0.0, 0.0));
        let result = scheduler.schedule_once(vec![task], vec![offer("o1", "h1", 4.0, 0.0)]).unwrap().unwrap();
        let failures = &result.per_task_failures["huge"];
        assert!(matches!(failures[0], AssignmentFailureReason::Infeasible { .. }));
    }

    #[test]
    fn reject_callback_fires_for_expired_offers() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let scheduler = Scheduler::new(
            SchedulerConfigBuilder::new()
                .lease_offer_expiry(Duration::from_millis(1))
                .lease_reject_callback(Arc::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .build()
                .unwrap(),
        );
        scheduler.schedule_once(vec![], vec![offer("o1", "h1", 1.0, 0.0)]).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        scheduler.schedule_once(vec![], vec![]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_offer_per_host_replaces_instead_of_double_counting_through_full_round() {
        let scheduler = Scheduler::new(
            SchedulerConfigBuilder::new()
                .lease_reject_callback(Arc::new(|_, _| {}))
                .single_offer_per_host(true)
                .build()
                .unwrap(),
        );
        scheduler.schedule_once(vec![], vec![offer("o1", "h1", 4.0, 0.0)]).unwrap();

        let task = TaskRequest::new("t1", "default", ResourceVector::new(6.0, 0.0, 0.0, 0.0, 0.0));
        let result = scheduler
            .schedule_once(vec![task], vec![offer("o2", "h1", 8.0, 0.0)])
            .unwrap()
            .unwrap();

        // o2 must have replaced o1's 4.0 cpu view of h1, not summed to 12.0,
        // so a 6.0-cpu task fits against the replacement's 8.0 cpu.
        assert_eq!(result.per_host_assignments["h1"].task_ids, vec!["t1".to_string()]);
    }

    #[test]
    fn idle_host_scale_down_uses_mapped_identifier_and_balances_by_attribute() {
        let recorded: Arc<Mutex<Vec<AutoscaleAction>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded_cb = Arc::clone(&recorded);

        let rule = crate::autoscale::AutoScaleRule::new("zone-1", 1, 1, Duration::from_secs(0), ResourceVector::zero()).unwrap();
        let scheduler = Scheduler::new(
            SchedulerConfigBuilder::new()
                .lease_reject_callback(Arc::new(|_, _| {}))
                .autoscale_by_attribute_name("zone")
                .autoscale_down_balanced_by_attribute_name("rack")
                .autoscaler_map_hostname_attribute_name("node-id")
                .autoscaler_callback(Arc::new(move |action| recorded_cb.lock().push(action)))
                .with_autoscale_rule(rule)
                .build()
                .unwrap(),
        );
        scheduler.set_active_group_attribute_name(Some("zone".to_string()));

        let attrs1: HashMap<String, String> = [
            ("zone".to_string(), "zone-1".to_string()),
            ("rack".to_string(), "r1".to_string()),
            ("node-id".to_string(), "node-1".to_string()),
        ]
        .into_iter()
        .collect();
        let attrs2: HashMap<String, String> = [
            ("zone".to_string(), "zone-1".to_string()),
            ("rack".to_string(), "r2".to_string()),
            ("node-id".to_string(), "node-2".to_string()),
        ]
        .into_iter()
        .collect();
        let o1 = offer("o1", "h1", 4.0, 0.0).with_attributes(attrs1);
        let o2 = offer("o2", "h2", 4.0, 0.0).with_attributes(attrs2);

        scheduler.schedule_once(vec![], vec![o1, o2]).unwrap();

        let actions = recorded.lock().clone();
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            AutoscaleAction::ScaleDown { group, hostnames } => {
                assert_eq!(group, "zone-1");
                // two idle hosts, max_idle_hosts_to_keep=1: exactly one is
                // removed, identified by its mapped node-id, never "h1"/"h2".
                assert_eq!(hostnames, &vec!["node-1".to_string()]);
            }
            other => panic!("expected ScaleDown, got {other:?}"),
        }
    }
}
