//! Value store with admission control.
//!
//! Remote values are admitted only within per-address and per-network
//! quotas, and only if the pluggable [SecurityConstraint] agrees. Local
//! values are always admitted and never expire.

mod bag;
mod constraints;
mod expiration;

use lru::LruCache;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::common::{Id, ValueEntity};
use crate::config::DatabaseConfig;
use crate::routing_table::RoutingTable;

pub use bag::ValueBag;
pub use constraints::*;
pub use expiration::{ExpirationPolicy, ValueLifetime};

/// Addresses whose rejected store attempts are remembered.
const FLOOD_TRACKING_CAPACITY: usize = 1024;

#[derive(Debug)]
/// Thread safe value store, every method takes `&self`.
pub struct Database {
    config: DatabaseConfig,
    inner: RwLock<Inner>,
    constraint: Option<Box<dyn SecurityConstraint>>,
    host_filter: Option<Arc<dyn HostFilter>>,
}

#[derive(Debug)]
struct Inner {
    bags: HashMap<Id, ValueBag>,
    /// Remote values per creator IP.
    per_address: HashMap<IpAddr, usize>,
    /// Remote values per creator network.
    per_network: HashMap<IpAddr, usize>,
    /// Rejected store attempts per creator IP.
    rejected: LruCache<IpAddr, usize>,
    /// Local tombstones that still need to be published once.
    pending_deletes: HashMap<(Id, Id), ValueEntity>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Database {
            config,
            inner: RwLock::new(Inner::new()),
            constraint: None,
            host_filter: None,
        }
    }

    /// Consult this policy before admitting any remote value.
    pub fn with_security_constraint(mut self, constraint: Box<dyn SecurityConstraint>) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_host_filter(mut self, host_filter: Arc<dyn HostFilter>) -> Self {
        self.host_filter = Some(host_filter);
        self
    }

    // === Getters ===

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Number of primary keys.
    pub fn key_count(&self) -> usize {
        self.inner.read().bags.len()
    }

    /// Number of stored values, under all keys.
    pub fn value_count(&self) -> usize {
        self.inner.read().bags.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().bags.is_empty()
    }

    // === Public Methods ===

    /// Stores a value, or removes the stored one if `entity` is a tombstone.
    ///
    /// Returns `true` if the value was accepted, or for a tombstone, if a
    /// stored value was removed. A rejection is not an error.
    pub fn store(&self, entity: ValueEntity) -> bool {
        let mut inner = self.inner.write();

        if !self.allow_store(&mut inner, &entity) {
            return false;
        }

        if entity.is_tombstone() {
            inner.remove_by_tombstone(entity)
        } else {
            inner.add(entity, self.config.max_values_per_key)
        }
    }

    /// Removes a value unconditionally.
    pub fn remove(&self, primary_key: &Id, secondary_key: &Id) -> Option<ValueEntity> {
        self.inner.write().remove(primary_key, secondary_key)
    }

    /// Values under `primary_key`, by secondary key.
    pub fn get(&self, primary_key: &Id) -> HashMap<Id, ValueEntity> {
        self.inner
            .read()
            .bags
            .get(primary_key)
            .map(|bag| {
                bag.iter()
                    .map(|e| (*e.secondary_key(), e.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, primary_key: &Id, secondary_key: &Id) -> bool {
        self.inner
            .read()
            .bags
            .get(primary_key)
            .map(|bag| bag.contains(secondary_key))
            .unwrap_or(false)
    }

    pub fn key_set(&self) -> HashSet<Id> {
        self.inner.read().bags.keys().copied().collect()
    }

    pub fn values(&self) -> Vec<ValueEntity> {
        self.inner
            .read()
            .bags
            .values()
            .flat_map(|bag| bag.iter().cloned())
            .collect()
    }

    /// Moving average of requests per second for `primary_key`, `0` if no
    /// value is stored under it.
    ///
    /// `increment` records a new request before reading the load.
    pub fn get_request_load(&self, primary_key: &Id, increment: bool) -> f32 {
        if !increment {
            return self
                .inner
                .read()
                .bags
                .get(primary_key)
                .map(|bag| bag.request_load())
                .unwrap_or(0.0);
        }

        self.inner
            .write()
            .bags
            .get_mut(primary_key)
            .map(|bag| {
                bag.increment_request_load(
                    self.config.request_load_smoothing,
                    self.config.request_load_nulling_delay,
                )
            })
            .unwrap_or(0.0)
    }

    /// Local values never published, or not published within the republish
    /// interval, followed by local deletions not yet published.
    pub fn values_to_publish(&self) -> Vec<ValueEntity> {
        let inner = self.inner.read();
        let interval = self.config.republish_interval;

        let mut values: Vec<ValueEntity> = inner
            .bags
            .values()
            .flat_map(|bag| bag.iter())
            .filter(|e| e.is_local())
            .filter(|e| match e.publish_time() {
                Some(published) => published.elapsed() >= interval,
                None => true,
            })
            .cloned()
            .collect();

        values.extend(inner.pending_deletes.values().cloned());
        values
    }

    /// Records that a local value (or deletion) reached `location_count` nodes.
    pub fn published(&self, primary_key: &Id, secondary_key: &Id, location_count: usize) {
        let mut inner = self.inner.write();

        if inner
            .pending_deletes
            .remove(&(*primary_key, *secondary_key))
            .is_some()
        {
            trace!(?primary_key, "Local deletion published");
            return;
        }

        if let Some(entity) = inner
            .bags
            .get_mut(primary_key)
            .and_then(|bag| bag.get_mut(secondary_key))
        {
            entity.mark_published(location_count);
        }
    }

    /// Removes every remote value `policy` considers expired, returning how
    /// many were removed.
    pub fn expunge(&self, policy: &dyn ExpirationPolicy, table: &RoutingTable) -> usize {
        let expired: Vec<(Id, Id)> = {
            let inner = self.inner.read();

            inner
                .bags
                .values()
                .flat_map(|bag| bag.iter())
                .filter(|e| !e.is_local() && policy.is_expired(e, table))
                .map(|e| (*e.primary_key(), *e.secondary_key()))
                .collect()
        };

        let mut inner = self.inner.write();
        let mut removed = 0;

        for (primary_key, secondary_key) in expired {
            // A store may have replaced the value since it was collected.
            let still_expired = inner
                .bags
                .get(&primary_key)
                .and_then(|bag| bag.get(&secondary_key))
                .map(|e| !e.is_local() && policy.is_expired(e, table))
                .unwrap_or(false);

            if still_expired && inner.remove(&primary_key, &secondary_key).is_some() {
                removed += 1;
            }
        }

        removed
    }

    pub fn clear(&self) {
        *self.inner.write() = Inner::new();
    }

    // === Private Methods ===

    fn allow_store(&self, inner: &mut Inner, entity: &ValueEntity) -> bool {
        if entity.is_local() {
            return true;
        }

        let creator_address = entity.creator().address();

        if let Some(filter) = &self.host_filter {
            if !filter.allow(&creator_address) || !filter.allow(&entity.sender().address()) {
                debug!(?entity, "Refusing store from filtered host");
                return false;
            }
        }

        if self.config.validate_creator
            && !entity.is_direct()
            && !is_public_address(&creator_address)
        {
            debug!(?entity, "Refusing indirect store for an implausible creator address");
            return false;
        }

        let existing = inner.bags.get(entity.primary_key());

        if !entity.is_tombstone() {
            let replaces = existing
                .and_then(|bag| bag.get(entity.secondary_key()))
                .is_some();

            if !replaces && !self.within_quotas(inner, entity) {
                return false;
            }

            if let Some(current) = inner
                .bags
                .get(entity.primary_key())
                .and_then(|bag| bag.get(entity.secondary_key()))
            {
                if current.is_local() {
                    trace!(?entity, "A remote value never replaces a local one");
                    return false;
                }

                if current.is_direct() && !entity.is_direct() {
                    trace!(?entity, "An indirect store never replaces a direct one");
                    return false;
                }
            }
        }

        if let Some(constraint) = &self.constraint {
            if !constraint.allow_store(inner.bags.get(entity.primary_key()), entity) {
                debug!(?entity, "Refused by security constraint");
                return false;
            }
        }

        true
    }

    /// Per-address, per-network, key and per-key limits for a new remote value.
    fn within_quotas(&self, inner: &mut Inner, entity: &ValueEntity) -> bool {
        let config = &self.config;
        let ip = entity.creator().address().ip();

        let per_address = inner.per_address.get(&ip).copied().unwrap_or(0);
        let per_network = inner
            .per_network
            .get(&network_of(&ip))
            .copied()
            .unwrap_or(0);

        if per_address >= config.max_values_per_address
            || per_network >= config.max_values_per_network
        {
            debug!(?ip, per_address, per_network, "Creator address exceeds its quota");
            self.record_rejection(inner, entity.creator().address(), per_address);

            return false;
        }

        match inner.bags.get(entity.primary_key()) {
            None if inner.bags.len() >= config.max_keys => {
                debug!(keys = inner.bags.len(), "Database is full");
                false
            }
            Some(bag) if bag.len() >= config.max_values_per_key => {
                // Values from reachable creators push out firewalled ones.
                !entity.creator().is_firewalled() && bag.oldest_firewalled().is_some()
            }
            _ => true,
        }
    }

    fn record_rejection(&self, inner: &mut Inner, address: SocketAddr, stored: usize) {
        let ip = address.ip();

        let rejected = match inner.rejected.get_mut(&ip) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                inner.rejected.put(ip, 1);
                1
            }
        };

        if stored + rejected >= self.config.flood_ban_limit {
            warn!(?address, stored, rejected, "Banning flooding host");

            if let Some(filter) = &self.host_filter {
                filter.ban(&address);
            }
        }
    }
}

impl Inner {
    fn new() -> Self {
        Inner {
            bags: HashMap::new(),
            per_address: HashMap::new(),
            per_network: HashMap::new(),
            rejected: LruCache::new(
                NonZeroUsize::new(FLOOD_TRACKING_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
            pending_deletes: HashMap::new(),
        }
    }

    /// Adds an entity that passed admission.
    fn add(&mut self, entity: ValueEntity, max_values_per_key: usize) -> bool {
        let primary_key = *entity.primary_key();
        let secondary_key = *entity.secondary_key();

        if entity.is_local() {
            self.pending_deletes.remove(&(primary_key, secondary_key));
        }

        let evict = self.bags.get(&primary_key).and_then(|bag| {
            let full = bag.len() >= max_values_per_key && !bag.contains(&secondary_key);

            if full && !entity.is_local() {
                bag.oldest_firewalled()
            } else {
                None
            }
        });

        if let Some(evicted) = evict {
            trace!(?primary_key, ?evicted, "Evicting firewalled value");
            self.remove(&primary_key, &evicted);
        }

        self.count(&entity, true);

        let replaced = self
            .bags
            .entry(primary_key)
            .or_insert_with(|| ValueBag::new(primary_key))
            .insert(entity);

        if let Some(replaced) = replaced {
            self.count(&replaced, false);
        }

        true
    }

    /// Applies a tombstone that passed admission.
    fn remove_by_tombstone(&mut self, tombstone: ValueEntity) -> bool {
        let primary_key = *tombstone.primary_key();
        let secondary_key = *tombstone.secondary_key();

        if !tombstone.is_direct() && !tombstone.is_local() {
            trace!(?tombstone, "Ignoring indirect deletion");
            return false;
        }

        let removable = match self.bags.get(&primary_key).and_then(|b| b.get(&secondary_key)) {
            Some(current) => !current.is_local() || tombstone.is_local(),
            None => false,
        };

        let removed = removable && self.remove(&primary_key, &secondary_key).is_some();

        if tombstone.is_local() {
            self.pending_deletes
                .insert((primary_key, secondary_key), tombstone);
        }

        removed
    }

    fn remove(&mut self, primary_key: &Id, secondary_key: &Id) -> Option<ValueEntity> {
        let bag = self.bags.get_mut(primary_key)?;
        let removed = bag.remove(secondary_key)?;

        if bag.is_empty() {
            self.bags.remove(primary_key);
        }

        self.count(&removed, false);

        Some(removed)
    }

    /// Keeps the per-address and per-network counters in step with the bags.
    fn count(&mut self, entity: &ValueEntity, added: bool) {
        if entity.is_local() {
            return;
        }

        let ip = entity.creator().address().ip();

        adjust(&mut self.per_address, ip, added);
        adjust(&mut self.per_network, network_of(&ip), added);
    }
}

fn adjust(counters: &mut HashMap<IpAddr, usize>, ip: IpAddr, added: bool) {
    if added {
        *counters.entry(ip).or_insert(0) += 1;
    } else if let Some(count) = counters.get_mut(&ip) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            counters.remove(&ip);
        }
    }
}
