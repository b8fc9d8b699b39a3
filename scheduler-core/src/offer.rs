/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The Offer Store: the set of unused offers per host (spec.md §4.1).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::resources::ResourceVector;

pub type OfferId = String;

/// An immutable cluster-manager-issued advertisement of available resources
/// on a host (spec.md §3, "Offer (Lease)").
#[derive(Debug, Clone)]
pub struct Offer {
    pub id: OfferId,
    pub hostname: String,
    pub vm_id: String,
    pub offered_at: Instant,
    pub resources: ResourceVector,
    pub attributes: HashMap<String, String>,
    /// Stamped by [`OfferStore::add_offers`] — when *this engine* accepted
    /// the offer, distinct from `offered_at` (when the cluster manager
    /// generated it). Expiry is measured from this timestamp.
    pub received_at: Option<Instant>,
}

impl Offer {
    pub fn new(
        id: impl Into<String>,
        hostname: impl Into<String>,
        vm_id: impl Into<String>,
        resources: ResourceVector,
    ) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            vm_id: vm_id.into(),
            offered_at: Instant::now(),
            resources,
            attributes: HashMap::new(),
            received_at: None,
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Why an offer never became a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Older than `leaseOfferExpirySecs` at round start.
    Expired,
    /// The offer's host produced no successful assignment and holds no
    /// running tasks (spec.md §4.6 step 6).
    IdleHost,
    /// Rejected via an explicit `expireLease*` mutation API call.
    ExplicitExpire,
    /// Duplicate id within a batch — only offers *after* the first with a
    /// given id are rejected this way (the first is accepted).
    Duplicate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::Expired => "expired",
            RejectReason::IdleHost => "idle-host",
            RejectReason::ExplicitExpire => "explicit-expire",
            RejectReason::Duplicate => "duplicate",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of ingesting one batch of offers (spec.md §4.1 "[ADDED]").
///
/// A within-batch or store-wide id collision is a hard [`DuplicateOfferId`]
/// error, not a soft rejection — there is currently no other way for
/// `add_offers` to refuse an offer, so this only ever reports accepted ids.
#[derive(Debug, Default)]
pub struct AddOffersOutcome {
    pub accepted: Vec<OfferId>,
}

/// Error raised when a batch contains an id that collides with an offer
/// already present in the store (spec.md §3 "attempting to ingest two
/// offers with the same id fails with a state error").
#[derive(Debug, Clone)]
pub struct DuplicateOfferId(pub OfferId);

/// Maintains the set of unused offers per host (spec.md §4.1).
///
/// `single_offer_per_host` mode (spec.md §4.1): the host's resource vector is
/// established by the first offer received; a later offer for the same
/// `(hostname, vmId)` pair is a full-view replacement, not an incremental
/// delta, so [`add_offers`](Self::add_offers) drops the stale offer instead
/// of summing it in — see that method for how the replacement is performed.
#[derive(Debug, Default)]
pub struct OfferStore {
    offers_by_host: HashMap<String, Vec<Offer>>,
    ids: HashSet<OfferId>,
    vm_to_host: HashMap<String, String>,
}

impl OfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a batch of new offers.
    ///
    /// Accepted offers in the batch before a duplicate id is committed; the
    /// duplicate id itself raises [`DuplicateOfferId`] after that partial
    /// acceptance (spec.md §4.1's documented "observable caveat").
    ///
    /// When `single_offer_per_host` is set (spec.md §6), an incoming offer
    /// that shares its `(hostname, vmId)` pair with an offer already held
    /// replaces that offer rather than being added alongside it — the driver
    /// is sending a complete view of the host, not a delta.
    pub fn add_offers(
        &mut self,
        batch: Vec<Offer>,
        single_offer_per_host: bool,
    ) -> Result<AddOffersOutcome, DuplicateOfferId> {
        let mut outcome = AddOffersOutcome::default();
        let now = Instant::now();

        for mut offer in batch {
            if self.ids.contains(&offer.id) {
                return Err(DuplicateOfferId(offer.id));
            }
            offer.received_at = Some(now);

            if single_offer_per_host {
                if let Some(existing) = self.offers_by_host.get_mut(&offer.hostname) {
                    if let Some(pos) = existing.iter().position(|o| o.vm_id == offer.vm_id) {
                        let replaced = existing.remove(pos);
                        debug!(offer_id = %replaced.id, host = %replaced.hostname, "replaced by single-offer-per-host full-view update");
                        self.ids.remove(&replaced.id);
                    }
                }
            }

            self.ids.insert(offer.id.clone());
            self.vm_to_host.insert(offer.vm_id.clone(), offer.hostname.clone());
            outcome.accepted.push(offer.id.clone());
            self.offers_by_host
                .entry(offer.hostname.clone())
                .or_default()
                .push(offer);
        }

        Ok(outcome)
    }

    pub fn offers_for_host(&self, hostname: &str) -> &[Offer] {
        self.offers_by_host
            .get(hostname)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &String> {
        self.offers_by_host.keys()
    }

    pub fn get_hostname_for_vm_id(&self, vm_id: &str) -> Option<&str> {
        self.vm_to_host.get(vm_id).map(String::as_str)
    }

    pub fn expire_by_id(&mut self, id: &str) -> Option<(Offer, RejectReason)> {
        for offers in self.offers_by_host.values_mut() {
            if let Some(pos) = offers.iter().position(|o| o.id == id) {
                let offer = offers.remove(pos);
                self.ids.remove(&offer.id);
                return Some((offer, RejectReason::ExplicitExpire));
            }
        }
        None
    }

    pub fn expire_all_for_host(&mut self, hostname: &str) -> Vec<(Offer, RejectReason)> {
        let offers = self.offers_by_host.remove(hostname).unwrap_or_default();
        for offer in &offers {
            self.ids.remove(&offer.id);
        }
        offers
            .into_iter()
            .map(|o| (o, RejectReason::ExplicitExpire))
            .collect()
    }

    pub fn expire_all_for_vm_id(&mut self, vm_id: &str) -> Vec<(Offer, RejectReason)> {
        match self.get_hostname_for_vm_id(vm_id).map(str::to_string) {
            Some(hostname) => self.expire_all_for_host(&hostname),
            None => Vec::new(),
        }
    }

    pub fn expire_all(&mut self) -> Vec<(Offer, RejectReason)> {
        let hostnames: Vec<String> = self.offers_by_host.keys().cloned().collect();
        let mut all = Vec::new();
        for hostname in hostnames {
            all.extend(self.expire_all_for_host(&hostname));
        }
        all
    }

    /// Remove and return every offer older than `max_age` as of `now`.
    ///
    /// Called at the start of every round, before any task is considered
    /// (spec.md §4.1). An offer at exactly `max_age` is retained; anything
    /// older is rejected (spec.md §8 boundary behavior).
    pub fn sweep_expired(&mut self, max_age: Duration, now: Instant) -> Vec<(Offer, RejectReason)> {
        let mut expired = Vec::new();
        for offers in self.offers_by_host.values_mut() {
            let mut i = 0;
            while i < offers.len() {
                let age = offers[i]
                    .received_at
                    .map(|r| now.saturating_duration_since(r))
                    .unwrap_or(Duration::ZERO);
                if age > max_age {
                    let offer = offers.remove(i);
                    debug!(offer_id = %offer.id, host = %offer.hostname, ?age, "offer expired");
                    expired.push(offer);
                } else {
                    i += 1;
                }
            }
        }
        for offer in &expired {
            self.ids.remove(&offer.id);
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "rejecting expired offers");
        }
        expired
            .into_iter()
            .map(|o| (o, RejectReason::Expired))
            .collect()
    }

    /// Remove a host's offers entirely because it produced no successful
    /// assignment and holds no running tasks this round (spec.md §4.6 step 6).
    pub fn evict_idle_host(&mut self, hostname: &str) -> Vec<(Offer, RejectReason)> {
        let offers = self.offers_by_host.remove(hostname).unwrap_or_default();
        for offer in &offers {
            self.ids.remove(&offer.id);
        }
        offers.into_iter().map(|o| (o, RejectReason::IdleHost)).collect()
    }

    /// `true` if the host has no offers left (used by the inactive-host
    /// sweep alongside the host's running-task state).
    pub fn is_empty_for_host(&self, hostname: &str) -> bool {
        self.offers_by_host
            .get(hostname)
            .map(Vec::is_empty)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn offer(id: &str, host: &str) -> Offer {
        Offer::new(id, host, format!("vm-{host}"), ResourceVector::new(1.0, 1024.0, 0.0, 0.0, 0.0))
    }

    #[test]
    fn add_offers_accepts_unique_ids() {
        let mut store = OfferStore::new();
        let outcome = store
            .add_offers(vec![offer("a", "h1"), offer("b", "h1")], false)
            .unwrap();
        assert_eq!(outcome.accepted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.offers_for_host("h1").len(), 2);
    }

    #[test]
    fn add_offers_rejects_duplicate_id_but_keeps_earlier_accepts() {
        let mut store = OfferStore::new();
        store.add_offers(vec![offer("a", "h1")], false).unwrap();
        let err = store.add_offers(vec![offer("a", "h2")], false).unwrap_err();
        assert_eq!(err.0, "a");
        // earlier offer from the first batch is still present
        assert_eq!(store.offers_for_host("h1").len(), 1);
        assert!(store.offers_for_host("h2").is_empty());
    }

    #[test]
    fn duplicate_within_same_batch_keeps_first_and_fails_on_second() {
        let mut store = OfferStore::new();
        let err = store
            .add_offers(vec![offer("a", "h1"), offer("a", "h2")], false)
            .unwrap_err();
        assert_eq!(err.0, "a");
        assert_eq!(store.offers_for_host("h1").len(), 1);
        assert!(store.offers_for_host("h2").is_empty());
    }

    #[test]
    fn sweep_expired_retains_offer_at_exact_boundary() {
        let mut store = OfferStore::new();
        store.add_offers(vec![offer("a", "h1")], false).unwrap();
        let now = Instant::now();
        let max_age = Duration::from_millis(50);
        sleep(Duration::from_millis(10));
        // age < max_age, retained
        let expired = store.sweep_expired(max_age, now);
        assert!(expired.is_empty());
        assert_eq!(store.offers_for_host("h1").len(), 1);
    }

    #[test]
    fn sweep_expired_rejects_offers_older_than_max_age() {
        let mut store = OfferStore::new();
        store.add_offers(vec![offer("a", "h1")], false).unwrap();
        sleep(Duration::from_millis(20));
        let expired = store.sweep_expired(Duration::from_millis(5), Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1, RejectReason::Expired);
        assert!(store.offers_for_host("h1").is_empty());
    }

    #[test]
    fn get_hostname_for_vm_id_resolves() {
        let mut store = OfferStore::new();
        store.add_offers(vec![offer("a", "h1")], false).unwrap();
        assert_eq!(store.get_hostname_for_vm_id("vm-h1"), Some("h1"));
        assert_eq!(store.get_hostname_for_vm_id("nope"), None);
    }

    #[test]
    fn single_offer_per_host_replaces_same_vm_id_instead_of_accumulating() {
        let mut store = OfferStore::new();
        store.add_offers(vec![offer("a", "h1")], true).unwrap();
        assert_eq!(store.offers_for_host("h1").len(), 1);
        assert_eq!(store.offers_for_host("h1")[0].resources.cpu, 1.0);

        let mut replacement = offer("b", "h1");
        replacement.resources.cpu = 8.0;
        store.add_offers(vec![replacement], true).unwrap();

        // still one offer for h1 (the stale "a" was replaced, not summed)
        assert_eq!(store.offers_for_host("h1").len(), 1);
        assert_eq!(store.offers_for_host("h1")[0].id, "b".to_string());
        assert_eq!(store.offers_for_host("h1")[0].resources.cpu, 8.0);
    }

    #[test]
    fn single_offer_per_host_extends_when_vm_id_differs() {
        let mut store = OfferStore::new();
        store.add_offers(vec![offer("a", "h1")], true).unwrap();
        let other_vm = Offer::new("b", "h1", "vm-h1-2", ResourceVector::new(2.0, 0.0, 0.0, 0.0, 0.0));
        store.add_offers(vec![other_vm], true).unwrap();
        assert_eq!(store.offers_for_host("h1").len(), 2);
    }

    #[test]
    fn evict_idle_host_removes_all_its_offers() {
        let mut store = OfferStore::new();
        store
            .add_offers(vec![offer("a", "h1"), offer("b", "h1")], false)
            .unwrap();
        let evicted = store.evict_idle_host("h1");
        assert_eq!(evicted.len(), 2);
        assert!(evicted.iter().all(|(_, r)| *r == RejectReason::IdleHost));
        assert!(store.offers_for_host("h1").is_empty());
    }
}
