/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduler configuration: a validated record built once.
//!
//! spec.md §9 calls out the source's "fluent builder with mutually-dependent
//! fields" pattern (`autoScaleByAttributeName` must precede
//! `withAutoScaleRule`) and asks for it to become "a validated configuration
//! record constructed once, validating cross-field constraints at
//! construction". [`SchedulerConfigBuilder::build`] is that validation
//! point — the in-memory result is a plain, immutable [`SchedulerConfig`];
//! no file I/O happens in this crate (spec.md §1 excludes "configuration
//! loading" as an external collaborator concern — the `scheduler-demo`
//! binary does the YAML loading, mirroring the teacher's `NodeConfigManager`
//! pattern for static pieces).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::autoscale::{AutoScaleRule, AutoscalerCallback};
use crate::constraint::{FitnessCalculator, GoodEnoughPredicate};
use crate::offer::{Offer, RejectReason};
use crate::quota::ResAllocs;
use crate::scheduler::error::SchedulerError;

/// Invoked whenever the engine rejects an offer, with the reason
/// (spec.md §6, "required").
pub type LeaseRejectCallback = Arc<dyn Fn(&Offer, RejectReason) + Send + Sync>;

/// Default `leaseOfferExpirySecs` (spec.md §4.1).
pub const DEFAULT_LEASE_OFFER_EXPIRY: Duration = Duration::from_secs(120);

/// Cadence of the inactive-host sweep (spec.md §3, §9).
pub const INACTIVE_HOST_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Validated, immutable configuration for a [`Scheduler`](crate::scheduler::Scheduler).
///
/// Constructed only via [`SchedulerConfigBuilder::build`], which is the one
/// place cross-field constraints are checked (spec.md §9).
pub struct SchedulerConfig {
    pub lease_offer_expiry: Duration,
    pub fitness_calculator: FitnessCalculator,
    pub is_fitness_good_enough: GoodEnoughPredicate,
    pub autoscale_by_attribute_name: Option<String>,
    pub autoscaler_map_hostname_attribute_name: Option<String>,
    pub autoscale_down_balanced_by_attribute_name: Option<String>,
    pub autoscaler_callback: Option<AutoscalerCallback>,
    pub disable_shortfall_evaluation: bool,
    pub single_offer_per_host: bool,
    pub initial_res_allocs: HashMap<String, ResAllocs>,
    pub lease_reject_callback: LeaseRejectCallback,
    pub autoscale_rules: Vec<AutoScaleRule>,
}

impl std::fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("lease_offer_expiry", &self.lease_offer_expiry)
            .field("autoscale_by_attribute_name", &self.autoscale_by_attribute_name)
            .field("disable_shortfall_evaluation", &self.disable_shortfall_evaluation)
            .field("single_offer_per_host", &self.single_offer_per_host)
            .field("initial_res_allocs", &self.initial_res_allocs)
            .field("autoscale_rules", &self.autoscale_rules.len())
            .finish_non_exhaustive()
    }
}

/// Builds a [`SchedulerConfig`], validating mutually-dependent fields at
/// [`build`](Self::build) rather than at each fluent call — the Rust
/// replacement for the source's "fluent builder with mutually-dependent
/// fields" (spec.md §9).
#[derive(Default)]
pub struct SchedulerConfigBuilder {
    lease_offer_expiry: Option<Duration>,
    fitness_calculator: Option<FitnessCalculator>,
    is_fitness_good_enough: Option<GoodEnoughPredicate>,
    autoscale_by_attribute_name: Option<String>,
    autoscaler_map_hostname_attribute_name: Option<String>,
    autoscale_down_balanced_by_attribute_name: Option<String>,
    autoscaler_callback: Option<AutoscalerCallback>,
    disable_shortfall_evaluation: bool,
    single_offer_per_host: bool,
    initial_res_allocs: HashMap<String, ResAllocs>,
    lease_reject_callback: Option<LeaseRejectCallback>,
    autoscale_rules: Vec<AutoScaleRule>,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease_offer_expiry(mut self, d: Duration) -> Self {
        self.lease_offer_expiry = Some(d);
        self
    }

    pub fn fitness_calculator(mut self, f: FitnessCalculator) -> Self {
        self.fitness_calculator = Some(f);
        self
    }

    pub fn is_fitness_good_enough(mut self, p: GoodEnoughPredicate) -> Self {
        self.is_fitness_good_enough = Some(p);
        self
    }

    pub fn autoscale_by_attribute_name(mut self, name: impl Into<String>) -> Self {
        self.autoscale_by_attribute_name = Some(name.into());
        self
    }

    pub fn autoscaler_map_hostname_attribute_name(mut self, name: impl Into<String>) -> Self {
        self.autoscaler_map_hostname_attribute_name = Some(name.into());
        self
    }

    pub fn autoscale_down_balanced_by_attribute_name(mut self, name: impl Into<String>) -> Self {
        self.autoscale_down_balanced_by_attribute_name = Some(name.into());
        self
    }

    pub fn autoscaler_callback(mut self, cb: AutoscalerCallback) -> Self {
        self.autoscaler_callback = Some(cb);
        self
    }

    pub fn disable_shortfall_evaluation(mut self, v: bool) -> Self {
        self.disable_shortfall_evaluation = v;
        self
    }

    pub fn single_offer_per_host(mut self, v: bool) -> Self {
        self.single_offer_per_host = v;
        self
    }

    pub fn initial_res_allocs(mut self, allocs: HashMap<String, ResAllocs>) -> Self {
        self.initial_res_allocs = allocs;
        self
    }

    pub fn lease_reject_callback(mut self, cb: LeaseRejectCallback) -> Self {
        self.lease_reject_callback = Some(cb);
        self
    }

    pub fn with_autoscale_rule(mut self, rule: AutoScaleRule) -> Self {
        self.autoscale_rules.push(rule);
        self
    }

    /// Validate cross-field constraints and produce the immutable config.
    ///
    /// Errors (spec.md §7a, usage errors):
    /// * `leaseRejectCallback` is required.
    /// * An `autoscaler_callback` or any `autoscale_rules` entry requires
    ///   `autoScaleByAttributeName` to already be set.
    pub fn build(self) -> Result<SchedulerConfig, SchedulerError> {
        let lease_reject_callback = self.lease_reject_callback.ok_or_else(|| {
            SchedulerError::InvalidAutoscaleConfig("leaseRejectCallback is required".to_string())
        })?;

        if self.autoscale_by_attribute_name.is_none() {
            if self.autoscaler_callback.is_some() {
                return Err(SchedulerError::InvalidAutoscaleConfig(
                    "autoscaler callback set without autoScaleByAttributeName configured".to_string(),
                ));
            }
            if !self.autoscale_rules.is_empty() {
                return Err(SchedulerError::InvalidAutoscaleConfig(
                    "autoscale rule added before autoScaleByAttributeName configured".to_string(),
                ));
            }
        }

        Ok(SchedulerConfig {
            lease_offer_expiry: self.lease_offer_expiry.unwrap_or(DEFAULT_LEASE_OFFER_EXPIRY),
            fitness_calculator: self.fitness_calculator.unwrap_or_default(),
            is_fitness_good_enough: self.is_fitness_good_enough.unwrap_or_default(),
            autoscale_by_attribute_name: self.autoscale_by_attribute_name,
            autoscaler_map_hostname_attribute_name: self.autoscaler_map_hostname_attribute_name,
            autoscale_down_balanced_by_attribute_name: self.autoscale_down_balanced_by_attribute_name,
            autoscaler_callback: self.autoscaler_callback,
            disable_shortfall_evaluation: self.disable_shortfall_evaluation,
            single_offer_per_host: self.single_offer_per_host,
            initial_res_allocs: self.initial_res_allocs,
            lease_reject_callback,
            autoscale_rules: self.autoscale_rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_reject_callback() -> LeaseRejectCallback {
        Arc::new(|_, _| {})
    }

    #[test]
    fn build_requires_lease_reject_callback() {
        let err = SchedulerConfigBuilder::new().build();
        assert!(err.is_err());
    }

    #[test]
    fn build_succeeds_with_minimal_config() {
        let cfg = SchedulerConfigBuilder::new()
            .lease_reject_callback(noop_reject_callback())
            .build()
            .unwrap();
        assert_eq!(cfg.lease_offer_expiry, DEFAULT_LEASE_OFFER_EXPIRY);
        assert!(!cfg.disable_shortfall_evaluation);
    }

    #[test]
    fn autoscaler_callback_without_attribute_name_is_rejected() {
        let err = SchedulerConfigBuilder::new()
            .lease_reject_callback(noop_reject_callback())
            .autoscaler_callback(Arc::new(|_| {}))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn autoscale_rule_without_attribute_name_is_rejected() {
        let rule = AutoScaleRule::new(
            "groupA",
            1,
            2,
            Duration::from_secs(60),
            crate::resources::ResourceVector::zero(),
        )
        .unwrap();
        let err = SchedulerConfigBuilder::new()
            .lease_reject_callback(noop_reject_callback())
            .with_autoscale_rule(rule)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn autoscale_rule_with_attribute_name_set_first_succeeds() {
        let rule = AutoScaleRule::new(
            "groupA",
            1,
            2,
            Duration::from_secs(60),
            crate::resources::ResourceVector::zero(),
        )
        .unwrap();
        let cfg = SchedulerConfigBuilder::new()
            .lease_reject_callback(noop_reject_callback())
            .autoscale_by_attribute_name("zone")
            .with_autoscale_rule(rule)
            .build()
            .unwrap();
        assert_eq!(cfg.autoscale_rules.len(), 1);
    }
}
