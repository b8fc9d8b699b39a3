/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The autoscaling signal evaluator (spec.md §2 component (e), §4/§6).
//!
//! The autoscaler's *policy engine* — what actually launches or terminates
//! cloud instances — lives outside this crate (spec.md §1, out of scope).
//! What lives here is the part spec.md calls "the core": turning idle-host
//! counts and currently-failing, non-quota-rejected tasks into concrete
//! scale-up/scale-down signals per [`AutoScaleRule`], then forwarding them
//! through the configured callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::resources::ResourceVector;

/// Per-host-group scaling policy (spec.md §3, "Autoscale Rule").
#[derive(Debug, Clone)]
pub struct AutoScaleRule {
    pub group: String,
    pub min_idle_hosts_to_keep: u32,
    pub max_idle_hosts_to_keep: u32,
    pub cool_down: Duration,
    pub shortfall_trigger_capacity: ResourceVector,
}

impl AutoScaleRule {
    /// Construct a validated rule. `min_idle_hosts_to_keep` must be `>= 1`
    /// and `max_idle_hosts_to_keep` must be `>= min_idle_hosts_to_keep`
    /// (spec.md §7, §8 "`minIdleHostsToKeep=0` is rejected at rule-add
    /// time").
    pub fn new(
        group: impl Into<String>,
        min_idle_hosts_to_keep: u32,
        max_idle_hosts_to_keep: u32,
        cool_down: Duration,
        shortfall_trigger_capacity: ResourceVector,
    ) -> Result<Self, String> {
        if min_idle_hosts_to_keep < 1 {
            return Err("minIdleHostsToKeep must be >= 1".to_string());
        }
        if max_idle_hosts_to_keep < min_idle_hosts_to_keep {
            return Err("maxIdleHostsToKeep must be >= minIdleHostsToKeep".to_string());
        }
        Ok(Self {
            group: group.into(),
            min_idle_hosts_to_keep,
            max_idle_hosts_to_keep,
            cool_down,
            shortfall_trigger_capacity,
        })
    }
}

/// A signal the core forwards to the autoscaler's policy engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoscaleAction {
    ScaleUp { group: String, hosts_to_add: u32 },
    ScaleDown { group: String, hostnames: Vec<String> },
}

pub type AutoscalerCallback = Arc<dyn Fn(AutoscaleAction) + Send + Sync>;

/// One currently-idle host, as seen at round end.
#[derive(Debug, Clone)]
pub struct IdleHost {
    /// The identifier the autoscaler should act on — `autoScalerMapHostnameAttributeName`'s
    /// value when the host carries that attribute, otherwise the raw hostname
    /// (spec.md §6).
    pub hostname: String,
    /// Value of `autoScaleDownBalancedByAttributeName` on this host, if
    /// configured — used to keep scale-down balanced across its values
    /// (spec.md §6).
    pub balance_value: Option<String>,
}

/// Aggregated input to one [`AutoscaleEvaluator::evaluate`] call
/// (spec.md §4.6 step 8, "`{idleResources, failedTasksNotDueToQuota}`").
#[derive(Debug, Default)]
pub struct AutoscaleInput {
    pub idle_hosts_by_group: HashMap<String, Vec<IdleHost>>,
    /// Sum of resource demand for tasks that failed this round for a reason
    /// other than quota exhaustion, per group (quota-failed tasks are not
    /// autoscale-eligible — spec.md §4.4).
    pub shortfall_by_group: HashMap<String, ResourceVector>,
}

/// Turns idle-host counts and resource shortfalls into scale signals.
#[derive(Default)]
pub struct AutoscaleEvaluator {
    rules: HashMap<String, AutoScaleRule>,
    last_action_at: HashMap<String, Instant>,
    /// Required before any rule may be added (spec.md §7 usage error:
    /// "autoscale rule added before scale-attribute configured").
    active_attribute_name: Option<String>,
    disable_shortfall_evaluation: bool,
    callback: Option<AutoscalerCallback>,
}

impl AutoscaleEvaluator {
    pub fn new(disable_shortfall_evaluation: bool) -> Self {
        Self {
            disable_shortfall_evaluation,
            ..Default::default()
        }
    }

    pub fn set_active_attribute_name(&mut self, name: Option<String>) {
        self.active_attribute_name = name;
    }

    pub fn set_callback(&mut self, callback: Option<AutoscalerCallback>) -> Result<(), String> {
        if callback.is_some() && self.active_attribute_name.is_none() {
            return Err("autoscaler callback set without autoScaleByAttributeName configured".to_string());
        }
        self.callback = callback;
        Ok(())
    }

    pub fn add_or_replace_rule(&mut self, rule: AutoScaleRule) -> Result<(), String> {
        if self.active_attribute_name.is_none() {
            return Err(
                "autoScaleByAttributeName must be configured before adding an autoscale rule"
                    .to_string(),
            );
        }
        self.rules.insert(rule.group.clone(), rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, group: &str) {
        self.rules.remove(group);
        self.last_action_at.remove(group);
    }

    pub fn rules(&self) -> &HashMap<String, AutoScaleRule> {
        &self.rules
    }

    /// Evaluate every configured rule against `input` and forward any
    /// resulting actions through the configured callback (spec.md §4.6
    /// step 8, "non-blocking").
    pub fn evaluate(&mut self, input: &AutoscaleInput, now: Instant) -> Vec<AutoscaleAction> {
        let mut actions = Vec::new();

        for (group, rule) in &self.rules {
            if let Some(last) = self.last_action_at.get(group) {
                if now.saturating_duration_since(*last) < rule.cool_down {
                    debug!(group = %group, "autoscale rule in cooldown, skipping");
                    continue;
                }
            }

            let idle = input.idle_hosts_by_group.get(group).cloned().unwrap_or_default();
            let idle_count = idle.len() as u32;

            let mut hosts_to_add = 0u32;
            if idle_count < rule.min_idle_hosts_to_keep {
                hosts_to_add += rule.min_idle_hosts_to_keep - idle_count;
            }

            if !self.disable_shortfall_evaluation {
                if let Some(shortfall) = input.shortfall_by_group.get(group) {
                    hosts_to_add += Self::shortfall_host_count(shortfall, &rule.shortfall_trigger_capacity);
                }
            }

            if hosts_to_add > 0 {
                info!(group = %group, hosts_to_add, "autoscale: scale up");
                let action = AutoscaleAction::ScaleUp {
                    group: group.clone(),
                    hosts_to_add,
                };
                self.dispatch(action.clone(), now, group);
                actions.push(action);
            } else if idle_count > rule.max_idle_hosts_to_keep {
                let excess = idle_count - rule.max_idle_hosts_to_keep;
                let hostnames = Self::pick_balanced_scale_down(&idle, excess as usize);
                info!(group = %group, removed = hostnames.len(), "autoscale: scale down");
                let action = AutoscaleAction::ScaleDown {
                    group: group.clone(),
                    hostnames,
                };
                self.dispatch(action.clone(), now, group);
                actions.push(action);
            }
        }

        actions
    }

    fn dispatch(&mut self, action: AutoscaleAction, now: Instant, group: &str) {
        self.last_action_at.insert(group.to_string(), now);
        if let Some(cb) = &self.callback {
            cb(action);
        }
    }

    /// Extra hosts needed to absorb `shortfall`, computed by dividing the
    /// largest shortfall dimension by the matching dimension of a single
    /// host's `shortfall_trigger_capacity` and rounding up. Returns `0` when
    /// the trigger capacity has no comparable dimension set, or the
    /// shortfall does not exceed one unit of capacity.
    fn shortfall_host_count(shortfall: &ResourceVector, capacity: &ResourceVector) -> u32 {
        let mut max_ratio = 0.0_f64;
        for kind in ResourceVector::all_kinds() {
            let cap = capacity.get(kind);
            if cap > 0.0 {
                max_ratio = max_ratio.max(shortfall.get(kind) / cap);
            }
        }
        max_ratio.ceil().max(0.0) as u32
    }

    /// Choose which idle hosts to scale down, spreading removals evenly
    /// across `balance_value`s when present (round-robin over the distinct
    /// values) rather than draining one value's hosts first.
    fn pick_balanced_scale_down(idle: &[IdleHost], count: usize) -> Vec<String> {
        let mut buckets: HashMap<Option<String>, Vec<&IdleHost>> = HashMap::new();
        for host in idle {
            buckets.entry(host.balance_value.clone()).or_default().push(host);
        }
        let mut keys: Vec<Option<String>> = buckets.keys().cloned().collect();
        keys.sort();

        let mut chosen = Vec::new();
        let mut cursor = 0usize;
        while chosen.len() < count && buckets.values().any(|v| !v.is_empty()) {
            let key = &keys[cursor % keys.len()];
            if let Some(bucket) = buckets.get_mut(key) {
                if let Some(host) = bucket.pop() {
                    chosen.push(host.hostname.clone());
                }
            }
            cursor += 1;
        }
        chosen.sort();
        chosen
    }
}
