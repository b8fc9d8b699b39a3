/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cluster policy loading and management.
//!
//! Mirrors scheduler-core's sibling `NodeConfigManager` pattern from the
//! parent workspace: a thin YAML loader that turns a static file into the
//! `scheduler-core` types the engine itself never reads from disk.
//!
//! The expected YAML structure is:
//! ```yaml
//! res_allocs:
//!   critical:
//!     cpu: 16.0
//!     memory_mb: 65536.0
//!     max_tasks: 50
//! autoscale_by_attribute_name: "zone"
//! autoscale_rules:
//!   - group: critical
//!     min_idle_hosts_to_keep: 2
//!     max_idle_hosts_to_keep: 5
//!     cool_down_secs: 300
//!     shortfall_trigger_capacity:
//!       cpu: 8.0
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use scheduler_core::autoscale::AutoScaleRule;
use scheduler_core::quota::ResAllocs;
use scheduler_core::resources::ResourceVector;

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClusterPolicyFile {
    #[serde(default)]
    res_allocs: HashMap<String, ResAllocs>,
    #[serde(default)]
    autoscale_by_attribute_name: Option<String>,
    #[serde(default)]
    autoscale_rules: Vec<AutoScaleRuleEntry>,
}

#[derive(Debug, Deserialize)]
struct AutoScaleRuleEntry {
    group: String,
    min_idle_hosts_to_keep: u32,
    max_idle_hosts_to_keep: u32,
    #[serde(default)]
    cool_down_secs: u64,
    #[serde(default)]
    shortfall_trigger_capacity: ResourceVectorEntry,
}

#[derive(Debug, Deserialize, Default)]
struct ResourceVectorEntry {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory_mb: f64,
    #[serde(default)]
    network_mbps: f64,
    #[serde(default)]
    disk_mb: f64,
    #[serde(default)]
    ports: f64,
}

impl From<ResourceVectorEntry> for ResourceVector {
    fn from(e: ResourceVectorEntry) -> Self {
        ResourceVector::new(e.cpu, e.memory_mb, e.network_mbps, e.disk_mb, e.ports)
    }
}

// ── Public data structures ────────────────────────────────────────────────────

/// Parsed cluster policy, ready to feed a `SchedulerConfigBuilder`.
#[derive(Debug, Default)]
pub struct ClusterPolicy {
    pub res_allocs: HashMap<String, ResAllocs>,
    pub autoscale_by_attribute_name: Option<String>,
    pub autoscale_rules: Vec<AutoScaleRule>,
}

/// Loads a [`ClusterPolicy`] from a YAML file.
pub fn load_from_file(path: &Path) -> Result<ClusterPolicy> {
    info!("loading cluster policy from: {}", path.display());

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot open cluster policy file: {}", path.display()))?;

    let file: ClusterPolicyFile = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse cluster policy YAML: {}", path.display()))?;

    if file.res_allocs.is_empty() {
        warn!("no res_allocs found in cluster policy, running without quota ceilings");
    }
    for (group, allocs) in &file.res_allocs {
        debug!(group = %group, ?allocs, "loaded res_allocs entry");
    }

    let mut autoscale_rules = Vec::with_capacity(file.autoscale_rules.len());
    for entry in file.autoscale_rules {
        let rule = AutoScaleRule::new(
            entry.group.clone(),
            entry.min_idle_hosts_to_keep,
            entry.max_idle_hosts_to_keep,
            std::time::Duration::from_secs(entry.cool_down_secs),
            entry.shortfall_trigger_capacity.into(),
        )
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("invalid autoscale rule for group '{}'", entry.group))?;
        autoscale_rules.push(rule);
    }

    info!(
        groups = file.res_allocs.len(),
        rules = autoscale_rules.len(),
        "cluster policy loaded"
    );

    Ok(ClusterPolicy {
        res_allocs: file.res_allocs,
        autoscale_by_attribute_name: file.autoscale_by_attribute_name,
        autoscale_rules,
    })
}
