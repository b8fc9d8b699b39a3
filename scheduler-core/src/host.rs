/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The Host View: per-host aggregate resource state and the `tryTask`
//! primitive (spec.md §4.2).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::constraint::{FitnessCalculator, HardConstraint, SoftConstraint};
use crate::offer::Offer;
use crate::resources::ResourceVector;
use crate::task::{AssignmentFailureReason, AssignmentResult, TaskId, TaskRequest};
use crate::tracker::TaskTrackerSnapshot;

/// A tentative binding recorded during the current round, reset once the
/// orchestrator has collected it via
/// [`Host::reset_and_get_successfully_assigned_requests`].
#[derive(Debug, Clone)]
struct TentativeAssignment {
    task_id: TaskId,
    resources: ResourceVector,
}

/// Read-only view of one host handed to constraint and fitness plugins —
/// plugins never see the mutable [`Host`] itself (spec.md §4.2, §9).
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub hostname: String,
    pub free_resources: ResourceVector,
    pub total_resources: ResourceVector,
    pub attributes: HashMap<String, String>,
    pub group: Option<String>,
    pub running_task_ids: Arc<Vec<TaskId>>,
}

/// Per-hostname state: held offers are *not* owned here (the
/// [`OfferStore`](crate::offer::OfferStore) owns them) — a `Host` owns the
/// round-scoped and longer-lived state that is specific to placement
/// decisions: tentative assignments, previously-assigned (running) tasks,
/// the disable flag, and the cached group tag (spec.md §3, "Host").
#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: String,
    disabled_until: Option<Instant>,
    group: Option<String>,
    last_vm_id: Option<String>,
    attributes: HashMap<String, String>,
    previously_assigned: HashSet<TaskId>,
    tentative: Vec<TentativeAssignment>,
}

impl Host {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            disabled_until: None,
            group: None,
            last_vm_id: None,
            attributes: HashMap::new(),
            previously_assigned: HashSet::new(),
            tentative: Vec::new(),
        }
    }

    pub fn is_disabled(&self, now: Instant) -> bool {
        self.disabled_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn disable_until(&mut self, until: Instant) {
        self.disabled_until = Some(until);
    }

    pub fn enable(&mut self) {
        self.disabled_until = None;
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn last_vm_id(&self) -> Option<&str> {
        self.last_vm_id.as_deref()
    }

    /// Value of an arbitrary named attribute, as last synced from the host's
    /// offers (spec.md §6) — used to resolve e.g. `autoScaleDownBalancedByAttributeName`
    /// or `autoScalerMapHostnameAttributeName` without adding a dedicated
    /// field for every attribute a caller might configure.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Re-derive the cached group tag and last-seen vmId/attributes from the
    /// host's currently held offers (spec.md §4.8
    /// `setActiveGroupAttributeName`: "re-derived whenever that
    /// configuration changes").
    ///
    /// The most recently received offer wins when attributes conflict.
    pub fn sync_from_offers(&mut self, offers: &[Offer], group_attribute_name: Option<&str>) {
        let latest = offers.iter().max_by_key(|o| o.received_at);
        if let Some(offer) = latest {
            self.last_vm_id = Some(offer.vm_id.clone());
            self.attributes = offer.attributes.clone();
        }
        self.group = group_attribute_name.and_then(|name| self.attributes.get(name).cloned());
    }

    pub fn has_previously_assigned_tasks(&self) -> bool {
        !self.previously_assigned.is_empty()
    }

    pub fn previously_assigned(&self) -> &HashSet<TaskId> {
        &self.previously_assigned
    }

    pub fn mark_previously_assigned(&mut self, task_id: TaskId) {
        self.previously_assigned.insert(task_id);
    }

    pub fn clear_previously_assigned(&mut self, task_id: &str) {
        self.previously_assigned.remove(task_id);
    }

    /// Aggregate free resources: sum of held `offers` minus this round's
    /// tentative assignments. Previously-assigned (running) tasks are NOT
    /// subtracted — offers already exclude them upstream (spec.md §3
    /// invariant).
    pub fn free_resources(&self, offers: &[Offer]) -> ResourceVector {
        let total = Self::total_resources(offers);
        let consumed = self
            .tentative
            .iter()
            .fold(ResourceVector::zero(), |acc, t| acc + t.resources);
        total.saturating_sub(&consumed)
    }

    pub fn total_resources(offers: &[Offer]) -> ResourceVector {
        offers
            .iter()
            .fold(ResourceVector::zero(), |acc, o| acc + o.resources)
    }

    fn snapshot(&self, offers: &[Offer], running_task_ids: Arc<Vec<TaskId>>) -> HostSnapshot {
        HostSnapshot {
            hostname: self.hostname.clone(),
            free_resources: self.free_resources(offers),
            total_resources: Self::total_resources(offers),
            attributes: self.attributes.clone(),
            group: self.group.clone(),
            running_task_ids,
        }
    }

    /// The primitive query: evaluate one task against this host
    /// (spec.md §4.2).
    ///
    /// 1. aggregate free resources, 2. resource fit, 3. hard constraints,
    /// 4. soft constraints + fitness plugin, 5. build the result. Does
    /// **not** mutate `self` — the caller invokes
    /// [`Host::assign`] on the winning result afterwards.
    pub fn try_task(
        &self,
        task: &TaskRequest,
        offers: &[Offer],
        tracker: &TaskTrackerSnapshot,
        fitness_calculator: &FitnessCalculator,
    ) -> AssignmentResult {
        let running = tracker.tasks_on_host(&self.hostname);
        let snapshot = self.snapshot(offers, running);

        if let Err(dimension) = task.resources.fits_within(&snapshot.free_resources) {
            let required = task.resources.get(dimension);
            let available = snapshot.free_resources.get(dimension);
            return AssignmentResult::failure(
                task.id.clone(),
                self.hostname.clone(),
                vec![AssignmentFailureReason::ResourceShortage {
                    dimension,
                    required,
                    available,
                }],
            );
        }

        let mut failures = Vec::new();
        for constraint in &task.hard_constraints {
            if let Err(reason) = constraint.evaluate(task, &snapshot, tracker) {
                failures.push(AssignmentFailureReason::HardConstraint {
                    name: constraint.name.clone(),
                    reason,
                });
            }
        }
        if !failures.is_empty() {
            return AssignmentResult::failure(task.id.clone(), self.hostname.clone(), failures);
        }

        let fitness = self.combined_fitness(task, &snapshot, tracker, fitness_calculator);
        AssignmentResult::success(task.id.clone(), self.hostname.clone(), fitness)
    }

    fn combined_fitness(
        &self,
        task: &TaskRequest,
        snapshot: &HostSnapshot,
        tracker: &TaskTrackerSnapshot,
        fitness_calculator: &FitnessCalculator,
    ) -> f64 {
        let plugin_score = fitness_calculator.evaluate(task, snapshot, tracker);
        if task.soft_constraints.is_empty() {
            return plugin_score;
        }
        let (weighted_sum, total_weight) = task.soft_constraints.iter().fold(
            (0.0_f64, 0.0_f64),
            |(sum, weight), c: &SoftConstraint| {
                (sum + c.evaluate(task, snapshot, tracker).clamp(0.0, 1.0) * c.weight, weight + c.weight)
            },
        );
        if total_weight <= 0.0 {
            return plugin_score;
        }
        let soft_score = weighted_sum / total_weight;
        ((plugin_score + soft_score) / 2.0).clamp(0.0, 1.0)
    }

    /// Record the winning result's task as tentatively bound to this host
    /// for the remainder of the round (spec.md §4.2).
    pub fn assign(&mut self, task: &TaskRequest) {
        self.tentative.push(TentativeAssignment {
            task_id: task.id.clone(),
            resources: task.resources,
        });
    }

    /// Atomically return the round's accumulated tentative assignments (or
    /// `None` if there were none) and clear the tentative list
    /// (spec.md §4.2).
    pub fn reset_and_get_successfully_assigned_requests(&mut self) -> Option<Vec<TaskId>> {
        if self.tentative.is_empty() {
            return None;
        }
        let ids = self.tentative.drain(..).map(|t| t.task_id).collect();
        Some(ids)
    }

    pub fn tentative_count(&self) -> usize {
        self.tentative.len()
    }
}

/// Registry of all known hosts, keyed by hostname.
///
/// `BTreeMap` rather than `HashMap`: candidate gathering walks hosts in a
/// stable, deterministic order (mirrors the teacher's documented rationale
/// for `BTreeMap` — sorted iteration for reproducible scheduling decisions).
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: BTreeMap<String, Host>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, hostname: &str) -> &mut Host {
        self.hosts
            .entry(hostname.to_string())
            .or_insert_with(|| Host::new(hostname))
    }

    pub fn get(&self, hostname: &str) -> Option<&Host> {
        self.hosts.get(hostname)
    }

    pub fn get_mut(&mut self, hostname: &str) -> Option<&mut Host> {
        self.hosts.get_mut(hostname)
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &String> {
        self.hosts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Host)> {
        self.hosts.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Host)> {
        self.hosts.iter_mut()
    }

    pub fn remove(&mut self, hostname: &str) -> Option<Host> {
        self.hosts.remove(hostname)
    }

    /// Candidate hosts for this round: known, not disabled, and — when an
    /// active-group filter is set — in one of the active groups
    /// (spec.md §4.2).
    pub fn candidates(&self, now: Instant, active_groups: Option<&HashSet<String>>) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|(_, host)| !host.is_disabled(now))
            .filter(|(_, host)| match active_groups {
                None => true,
                Some(groups) => host.group().map(|g| groups.contains(g)).unwrap_or(false),
            })
            .map(|(hostname, _)| hostname.clone())
            .collect()
    }

    /// Hosts with neither offers nor running tasks nor a disable hold —
    /// reclaimed by the periodic inactive-host sweep (spec.md §3, §9,
    /// 60-second cadence maintained by the orchestrator).
    pub fn sweep_inactive<F>(&mut self, now: Instant, has_offers: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let doomed: Vec<String> = self
            .hosts
            .iter()
            .filter(|(hostname, host)| {
                !has_offers(hostname)
                    && !host.has_previously_assigned_tasks()
                    && host.tentative_count() == 0
                    && !host.is_disabled(now)
            })
            .map(|(hostname, _)| hostname.clone())
            .collect();
        for hostname in &doomed {
            self.hosts.remove(hostname);
        }
        doomed
    }
}
