//! Kademlia routing table over a binary trie of bucket prefixes.
//!
//! Buckets split when they cover the local node id, when they are the
//! sibling subtree next to the local node's bucket, or while they are
//! shallower than [RoutingTableConfig::depth_limit]. Everything else
//! overflows into a per-bucket replacement cache.

mod bucket;
mod trie;

use flume::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

use crate::common::{ClosestContacts, Contact, Id, ID_BITS};
use crate::config::RoutingTableConfig;
use crate::{Error, Result};

pub use bucket::Bucket;
use trie::Trie;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Fire and forget requests from the routing table to the lookup and
/// transport layers. Outcomes come back through [RoutingTable::add] and
/// [RoutingTable::handle_failure].
pub enum RoutingEvent {
    /// Ping this contact to check it is still alive.
    Ping(Contact),
    /// Run a lookup for this random id to refresh the bucket covering it.
    Refresh(Id),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What [RoutingTable::add] did with a contact.
pub enum AddOutcome {
    /// Added as a new live contact.
    Added,
    /// Merged into an existing live or cached contact.
    Updated,
    /// The bucket is full, the contact went into its replacement cache.
    Cached,
    /// Took the place of a least recently seen contact that never answered.
    Replaced,
    /// Firewalled, or conflicting with a recently alive contact.
    Ignored,
    /// Claims the id of a known contact from another address, that contact
    /// was pinged to check it is still around.
    SpoofCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What [RoutingTable::handle_failure] did with a contact.
pub enum FailureOutcome {
    /// Neither a live nor a cached contact.
    NotFound,
    /// Too many failures in a row, the local node is probably offline.
    Ignored,
    /// Failure recorded, the contact is not dead yet.
    Recorded(u32),
    /// A dead live contact was removed, with the cached contact promoted
    /// into its place if any.
    Evicted { promoted: Option<Id> },
    /// A dead cached contact was dropped.
    Uncached,
}

#[derive(Debug)]
/// Thread safe routing table, every method takes `&self`.
pub struct RoutingTable {
    local_id: Id,
    local_address: Option<SocketAddr>,
    config: RoutingTableConfig,
    inner: RwLock<Inner>,
    events: (Sender<RoutingEvent>, Receiver<RoutingEvent>),
}

#[derive(Debug)]
struct Inner {
    trie: Trie,
    buckets: Vec<Bucket>,
    /// Sibling of the local node's bucket, created by its last split.
    smallest_subtree: Option<usize>,
    consecutive_failures: usize,
}

impl RoutingTable {
    /// Create a new [RoutingTable] for the local node id.
    pub fn new(local_id: Id, config: RoutingTableConfig) -> Self {
        let events = flume::bounded(config.event_capacity.max(1));

        RoutingTable {
            local_id,
            local_address: None,
            inner: RwLock::new(Inner::new(config.max_cache_size)),
            config,
            events,
        }
    }

    /// Rejects contacts other than the local node claiming this address.
    pub fn with_local_address(mut self, address: SocketAddr) -> Self {
        self.local_address = Some(address);
        self
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn local_id(&self) -> &Id {
        &self.local_id
    }

    pub fn config(&self) -> &RoutingTableConfig {
        &self.config
    }

    /// Receiver of [RoutingEvent]s.
    ///
    /// The channel is bounded, events are dropped while it is full.
    pub fn events(&self) -> Receiver<RoutingEvent> {
        self.events.1.clone()
    }

    /// Number of live contacts.
    pub fn size(&self) -> usize {
        self.inner.read().buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.read().buckets.len()
    }

    /// Snapshot of every bucket, ordered from the all-zeros prefix up.
    pub fn buckets(&self) -> Vec<Bucket> {
        let inner = self.inner.read();

        inner
            .trie
            .buckets()
            .into_iter()
            .map(|index| inner.buckets[index].clone())
            .collect()
    }

    /// Snapshot of the bucket covering `id`.
    pub fn bucket(&self, id: &Id) -> Bucket {
        let inner = self.inner.read();

        inner.buckets[inner.trie.bucket_for(id)].clone()
    }

    /// Every live contact.
    pub fn contacts(&self) -> Vec<Contact> {
        let inner = self.inner.read();

        inner
            .buckets
            .iter()
            .flat_map(|b| b.contacts().iter().cloned())
            .collect()
    }

    /// Every contact waiting in a replacement cache.
    pub fn cached_contacts(&self) -> Vec<Contact> {
        let inner = self.inner.read();

        inner
            .buckets
            .iter()
            .flat_map(|b| b.cached_contacts())
            .collect()
    }

    /// Live or cached contact with that id.
    pub fn get(&self, id: &Id) -> Option<Contact> {
        let inner = self.inner.read();

        inner.buckets[inner.trie.bucket_for(id)].get(id).cloned()
    }

    /// Returns `true` if a live or cached contact has that id.
    pub fn contains_node(&self, id: &Id) -> bool {
        let inner = self.inner.read();

        inner.buckets[inner.trie.bucket_for(id)].get(id).is_some()
    }

    /// Returns `true` if `id` falls into the same bucket as the local node.
    pub fn is_close_to_local(&self, id: &Id) -> bool {
        let inner = self.inner.read();

        inner.buckets[inner.trie.bucket_for(id)].covers(&self.local_id)
    }

    /// Estimated number of nodes in the network, from how densely the `k`
    /// contacts closest to the local id are packed around it.
    pub fn estimated_size(&self) -> u128 {
        let mut closest = ClosestContacts::new(self.local_id);
        for contact in self.select(&self.local_id, self.config.k, &HashSet::new()) {
            closest.add(contact);
        }

        closest.size_estimate(self.config.k)
    }

    // === Public Methods ===

    /// Inserts a new contact or updates a known one.
    ///
    /// `known_alive` marks the contact alive, as when it just sent us a message.
    pub fn add(&self, mut contact: Contact, known_alive: bool) -> Result<AddOutcome> {
        if contact.node_id() == &self.local_id {
            return Err(Error::LocalNodeId(self.local_id));
        }

        if self.local_address == Some(contact.address()) {
            return Err(Error::LocalNodeAddress {
                id: *contact.node_id(),
                address: contact.address(),
            });
        }

        if contact.is_firewalled() {
            trace!(?contact, "Ignoring firewalled contact");
            return Ok(AddOutcome::Ignored);
        }

        if known_alive {
            contact.mark_alive();
        }

        let (outcome, ping) = self.inner.write().add(contact, &self.local_id, &self.config);

        if let Some(contact) = ping {
            self.emit(RoutingEvent::Ping(contact));
        }

        Ok(outcome)
    }

    /// Return up to `count` live contacts closest to `target`, skipping
    /// every id in `exclude`.
    ///
    /// Contacts are sorted by ascending XOR distance to `target`.
    pub fn select(&self, target: &Id, count: usize, exclude: &HashSet<Id>) -> Vec<Contact> {
        let inner = self.inner.read();
        let mut closest = Vec::new();

        for index in inner.trie.closest_buckets(target) {
            if closest.len() >= count {
                break;
            }

            let mut contacts: Vec<&Contact> = inner.buckets[index]
                .contacts()
                .iter()
                .filter(|c| !exclude.contains(c.node_id()))
                .collect();
            contacts.sort_by(|a, b| a.node_id().compare_by_distance(b.node_id(), target));

            let needed = count - closest.len();
            closest.extend(contacts.into_iter().take(needed).cloned());
        }

        closest
    }

    /// Records a failed request to the contact with that id, evicting it
    /// once it is dead.
    pub fn handle_failure(&self, id: &Id) -> FailureOutcome {
        if id == &self.local_id {
            return FailureOutcome::NotFound;
        }

        self.inner.write().handle_failure(id, &self.config)
    }

    /// Emits a [RoutingEvent::Refresh] for every bucket not refreshed within
    /// [RoutingTableConfig::refresh_interval], or every bucket if `force`.
    ///
    /// The bucket covering the local node is skipped, lookups for the local
    /// id keep it fresh anyway. Returns the number of refreshes requested.
    pub fn refresh_buckets(&self, force: bool) -> usize {
        let mut targets = Vec::new();

        {
            let mut inner = self.inner.write();

            for bucket in inner.buckets.iter_mut() {
                if bucket.covers(&self.local_id) {
                    continue;
                }

                if force || bucket.is_refresh_required(self.config.refresh_interval) {
                    let target = Id::random_with_prefix(bucket.prefix(), bucket.depth());
                    trace!(?bucket, ?target, "Refreshing bucket");

                    bucket.touch();
                    targets.push(target);
                }
            }
        }

        let count = targets.len();
        for target in targets {
            self.emit(RoutingEvent::Refresh(target));
        }

        count
    }

    /// Drops every contact and bucket.
    pub fn clear(&self) {
        *self.inner.write() = Inner::new(self.config.max_cache_size);
    }

    // === Private Methods ===

    fn emit(&self, event: RoutingEvent) {
        match self.events.0.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(?event, "Routing event channel is full, dropping event")
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Inner {
    fn new(max_cache_size: usize) -> Self {
        Inner {
            trie: Trie::new(0),
            buckets: vec![Bucket::new(Id::MIN, 0, max_cache_size)],
            smallest_subtree: None,
            consecutive_failures: 0,
        }
    }

    /// Returns the outcome and possibly a contact to ping.
    fn add(
        &mut self,
        contact: Contact,
        local_id: &Id,
        config: &RoutingTableConfig,
    ) -> (AddOutcome, Option<Contact>) {
        self.consecutive_failures = 0;

        loop {
            let index = self.trie.bucket_for(contact.node_id());
            let bucket = &mut self.buckets[index];

            if let Some(existing) = bucket.get(contact.node_id()) {
                let existing = existing.clone();
                return Self::update(bucket, existing, contact, config);
            }

            if !bucket.is_full(config.k) {
                trace!(?contact, "Adding contact");
                bucket.push(contact);

                return (AddOutcome::Added, None);
            }

            if !self.split(index, local_id, config) {
                return Self::replace(&mut self.buckets[index], contact);
            }
        }
    }

    fn update(
        bucket: &mut Bucket,
        existing: Contact,
        contact: Contact,
        config: &RoutingTableConfig,
    ) -> (AddOutcome, Option<Contact>) {
        // A contact that is not alive never takes over an alive one.
        if !existing.is_alive() || existing == contact {
            if let Some(merged) = bucket.update(&contact) {
                if merged.is_alive() {
                    bucket.touch();
                }
            }

            return (AddOutcome::Updated, None);
        }

        if contact.is_alive() && !existing.has_been_recently_alive(config.spoof_check_interval) {
            warn!(
                ?existing,
                claimed_by = ?contact.address(),
                "Contact address changed, checking for spoofing"
            );

            return (AddOutcome::SpoofCheck, Some(existing));
        }

        trace!(?existing, ?contact, "Ignoring conflicting contact");
        (AddOutcome::Ignored, None)
    }

    fn split(&mut self, index: usize, local_id: &Id, config: &RoutingTableConfig) -> bool {
        let bucket = &self.buckets[index];

        let contains_local = bucket.covers(local_id);
        let is_smallest_subtree = self.smallest_subtree == Some(index);
        let shallow = bucket.depth() < config.depth_limit;

        if !(contains_local || is_smallest_subtree || shallow) || bucket.depth() >= ID_BITS {
            return false;
        }

        trace!(?bucket, "Splitting bucket");

        let prefix = *bucket.prefix();
        let placeholder = Bucket::new(prefix, bucket.depth(), config.max_cache_size);
        let (left, right) = std::mem::replace(&mut self.buckets[index], placeholder).split();

        let left_has_local = left.covers(local_id);

        let right_index = self.buckets.len();
        self.buckets[index] = left;
        self.buckets.push(right);
        self.trie.split(&prefix, index, right_index);

        if is_smallest_subtree {
            self.smallest_subtree = None;
        }

        if contains_local {
            self.smallest_subtree = Some(if left_has_local { right_index } else { index });
        }

        true
    }

    fn replace(bucket: &mut Bucket, contact: Contact) -> (AddOutcome, Option<Contact>) {
        let least_recently_seen = match bucket.least_recently_seen() {
            Some(lrs) => lrs.clone(),
            None => return (AddOutcome::Ignored, None),
        };

        if contact.is_alive() && least_recently_seen.is_unknown() {
            trace!(?least_recently_seen, ?contact, "Replacing contact");

            bucket.remove_live(least_recently_seen.node_id());
            bucket.push(contact);
            bucket.touch();

            return (AddOutcome::Replaced, None);
        }

        trace!(?contact, "Adding contact to replacement cache");
        bucket.push_cached(contact);

        (AddOutcome::Cached, Some(least_recently_seen))
    }

    fn handle_failure(&mut self, id: &Id, config: &RoutingTableConfig) -> FailureOutcome {
        let index = self.trie.bucket_for(id);

        if self.buckets[index].get(id).is_none() {
            return FailureOutcome::NotFound;
        }

        if self.consecutive_failures >= config.max_consecutive_failures {
            trace!("Ignoring failure, the local node appears to be disconnected");
            return FailureOutcome::Ignored;
        }
        self.consecutive_failures += 1;

        let bucket = &mut self.buckets[index];

        let failures = match bucket.get_mut(id) {
            Some(contact) => {
                let threshold = if contact.is_alive() {
                    config.max_contact_failures
                } else {
                    config.max_unknown_failures
                };

                let failures = contact.record_failure();
                if failures >= threshold {
                    contact.mark_dead();
                    None
                } else {
                    Some(failures)
                }
            }
            None => return FailureOutcome::NotFound,
        };

        if let Some(failures) = failures {
            return FailureOutcome::Recorded(failures);
        }

        if bucket.contains_live(id) {
            trace!(?id, "Removing dead contact");
            bucket.remove_live(id);

            let promoted = bucket.pop_most_recently_cached().map(|mut contact| {
                contact.mark_unknown();
                let promoted = *contact.node_id();

                trace!(?contact, "Promoting cached contact");
                bucket.push(contact);
                bucket.touch();

                promoted
            });

            FailureOutcome::Evicted { promoted }
        } else {
            trace!(?id, "Removing dead contact from cache");
            bucket.remove_cached(id);

            FailureOutcome::Uncached
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::FIREWALLED_FLAG;

    /// Id starting with `bits` (a string of `0` and `1`), followed by `tail`
    /// in the last byte.
    fn id_with_prefix(bits: &str, tail: u8) -> Id {
        let mut id = Id::MIN;
        for (i, bit) in bits.chars().enumerate() {
            id = id.with_bit(i, bit == '1');
        }
        id.0[19] = tail;
        id
    }

    fn address(n: usize) -> SocketAddr {
        SocketAddr::from(([10, (n >> 16) as u8, (n >> 8) as u8, n as u8], 6881))
    }

    fn alive(id: Id, n: usize) -> Contact {
        Contact::alive(id, address(n))
    }

    fn table(depth_limit: usize) -> RoutingTable {
        RoutingTable::new(
            Id::MIN,
            RoutingTableConfig {
                depth_limit,
                ..Default::default()
            },
        )
    }

    fn assert_invariants(table: &RoutingTable) {
        let buckets = table.buckets();
        let k = table.config().k;

        assert!(buckets.iter().all(|b| b.len() <= k));
        assert_eq!(buckets.iter().map(|b| b.len()).sum::<usize>(), table.size());

        for bucket in &buckets {
            assert!(bucket.contacts().iter().all(|c| bucket.covers(c.node_id())));
        }
    }

    #[test]
    fn rejects_local_node() {
        let table = table(4).with_local_address(address(0));

        assert!(matches!(
            table.add(alive(Id::MIN, 1), true),
            Err(Error::LocalNodeId(_))
        ));
        assert!(matches!(
            table.add(alive(Id::random(), 0), true),
            Err(Error::LocalNodeAddress { .. })
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn ignores_firewalled() {
        let table = table(4);
        let contact = Contact::random().with_flags(FIREWALLED_FLAG);

        assert_eq!(table.add(contact, true).unwrap(), AddOutcome::Ignored);
        assert!(table.is_empty());
    }

    #[test]
    fn add_and_update() {
        let table = table(4);
        let id = Id::random();

        assert_eq!(table.add(Contact::new(id, address(1)), false).unwrap(), AddOutcome::Added);
        assert!(table.get(&id).unwrap().is_unknown());

        assert_eq!(table.add(alive(id, 1), true).unwrap(), AddOutcome::Updated);
        assert!(table.get(&id).unwrap().is_alive());

        assert!(table.contains_node(&id));
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn recently_alive_contact_is_not_taken_over() {
        let table = table(4);
        let id = Id::random();

        table.add(alive(id, 1), true).unwrap();

        assert_eq!(table.add(alive(id, 2), true).unwrap(), AddOutcome::Ignored);
        assert_eq!(table.get(&id).unwrap().address(), address(1));
    }

    #[test]
    fn spoof_check() {
        let table = RoutingTable::new(
            Id::MIN,
            RoutingTableConfig {
                spoof_check_interval: std::time::Duration::from_secs(0),
                ..Default::default()
            },
        );
        let events = table.events();
        let id = Id::random();

        table.add(alive(id, 1), true).unwrap();

        assert_eq!(table.add(alive(id, 2), true).unwrap(), AddOutcome::SpoofCheck);
        assert_eq!(events.try_recv().unwrap(), RoutingEvent::Ping(alive(id, 1)));
        assert_eq!(table.get(&id).unwrap().address(), address(1));
    }

    #[test]
    fn single_split_of_local_bucket() {
        let table = table(4);

        for n in 0..10 {
            table.add(alive(id_with_prefix("1", n as u8), n), true).unwrap();
        }
        for n in 10..20 {
            table.add(alive(id_with_prefix("0", n as u8), n), true).unwrap();
        }
        assert_eq!(table.bucket_count(), 1);
        assert_eq!(table.size(), 20);

        let outcome = table.add(alive(id_with_prefix("1", 20), 20), true).unwrap();

        assert_eq!(outcome, AddOutcome::Added);
        assert_eq!(table.bucket_count(), 2);
        assert_eq!(table.size(), 21);
        assert_invariants(&table);
    }

    #[test]
    fn local_bucket_splits_until_long_prefix_diverges() {
        let table = table(4);
        let events = table.events();

        // All share 155 leading zero bits with the local id.
        for n in 1..=20 {
            table.add(alive(id_with_prefix("", n as u8), n), true).unwrap();
        }
        assert_eq!(table.bucket_count(), 1);
        assert_eq!(table.size(), 20);

        let outcome = table.add(alive(id_with_prefix("", 21), 21), true).unwrap();

        // The bucket holding the local id keeps splitting past the depth
        // limit until bit 155 separates 16..=21 from 1..=15.
        assert_eq!(outcome, AddOutcome::Added);
        assert_eq!(table.bucket_count(), 157);
        assert_eq!(table.size(), 21);
        assert!(table.cached_contacts().is_empty());
        assert!(events.try_recv().is_err());

        let local = table.bucket(&Id::MIN);
        assert_eq!(local.depth(), 156);
        assert_eq!(local.len(), 15);

        let sibling = table.bucket(&id_with_prefix("", 16));
        assert_eq!(sibling.depth(), 156);
        assert_eq!(sibling.len(), 6);

        assert_invariants(&table);
    }

    /// Fills the root bucket with "1" contacts, then pushes the local bucket
    /// down twice, leaving a full "1" bucket at depth 1 that is no longer
    /// the sibling of the local node's bucket.
    fn fill_far_bucket(table: &RoutingTable) {
        let mut n = 0;
        for i in 0..20 {
            let bits = if i % 2 == 0 { "10" } else { "11" };
            table.add(alive(id_with_prefix(bits, i), n), true).unwrap();
            n += 1;
        }
        assert_eq!(table.bucket_count(), 1);

        // Splits the root: "0" holds the local node, "1" is its sibling.
        for i in 0..20 {
            table.add(alive(id_with_prefix("01", i), n), true).unwrap();
            n += 1;
        }
        assert_eq!(table.bucket_count(), 2);

        // Splits "0": "00" holds the local node, "01" is the new sibling.
        table.add(alive(id_with_prefix("00", 1), n), true).unwrap();
        assert_eq!(table.bucket_count(), 3);
        assert_eq!(table.size(), 41);
    }

    #[test]
    fn full_bucket_at_depth_limit_caches() {
        let table = table(1);
        fill_far_bucket(&table);

        let newcomer = alive(id_with_prefix("11", 100), 100);
        let outcome = table.add(newcomer.clone(), true).unwrap();

        assert_eq!(outcome, AddOutcome::Cached);
        assert_eq!(table.bucket_count(), 3);
        assert_eq!(table.size(), 41);
        assert_eq!(table.cached_contacts(), vec![newcomer]);
        assert_invariants(&table);
    }

    #[test]
    fn full_bucket_below_depth_limit_splits() {
        let table = table(2);
        fill_far_bucket(&table);

        let outcome = table.add(alive(id_with_prefix("11", 100), 100), true).unwrap();

        assert_eq!(outcome, AddOutcome::Added);
        assert_eq!(table.bucket_count(), 4);
        assert_eq!(table.size(), 42);
        assert!(table.cached_contacts().is_empty());
        assert_invariants(&table);
    }

    #[test]
    fn cache_pings_least_recently_seen() {
        let table = table(1);
        fill_far_bucket(&table);
        let events = table.events();

        table.add(alive(id_with_prefix("11", 100), 100), true).unwrap();

        let lrs = alive(id_with_prefix("10", 0), 0);
        assert_eq!(events.try_recv().unwrap(), RoutingEvent::Ping(lrs));
    }

    #[test]
    fn alive_newcomer_replaces_unknown() {
        let table = table(0);

        // Unknown contacts in a far bucket.
        for i in 0..20 {
            table.add(alive(id_with_prefix("01", i), i as usize), true).unwrap();
        }
        for i in 0..20 {
            let contact = Contact::new(id_with_prefix("1", i), address(100 + i as usize));
            table.add(contact, false).unwrap();
        }
        // Split "0" so "1" is no longer the smallest subtree.
        table.add(alive(id_with_prefix("00", 1), 200), true).unwrap();

        let newcomer = alive(id_with_prefix("1", 250), 250);
        assert_eq!(table.add(newcomer.clone(), true).unwrap(), AddOutcome::Replaced);

        let far = table.bucket(newcomer.node_id());
        assert_eq!(far.contacts().last(), Some(&newcomer));
        assert!(!table.contains_node(&id_with_prefix("1", 0)));
        assert_invariants(&table);
    }

    #[test]
    fn failures_evict_and_promote() {
        let table = table(1);
        fill_far_bucket(&table);

        let cached = alive(id_with_prefix("11", 100), 100);
        table.add(cached.clone(), true).unwrap();

        let victim = id_with_prefix("10", 0);
        for failures in 1..4 {
            assert_eq!(table.handle_failure(&victim), FailureOutcome::Recorded(failures));
        }
        assert_eq!(
            table.handle_failure(&victim),
            FailureOutcome::Evicted {
                promoted: Some(*cached.node_id())
            }
        );

        assert!(!table.contains_node(&victim));
        assert!(table.get(cached.node_id()).unwrap().is_unknown());
        assert!(table.cached_contacts().is_empty());
        assert_eq!(table.size(), 41);
    }

    #[test]
    fn dead_cached_contact_is_dropped() {
        let table = table(1);
        fill_far_bucket(&table);

        let cached = Contact::new(id_with_prefix("11", 100), address(100));
        table.add(cached.clone(), false).unwrap();

        assert_eq!(table.handle_failure(cached.node_id()), FailureOutcome::Recorded(1));
        assert_eq!(table.handle_failure(cached.node_id()), FailureOutcome::Uncached);
        assert!(!table.contains_node(cached.node_id()));
    }

    #[test]
    fn disconnection_guard() {
        let table = RoutingTable::new(
            Id::MIN,
            RoutingTableConfig {
                max_consecutive_failures: 2,
                ..Default::default()
            },
        );
        let id = Id::random();
        table.add(alive(id, 1), true).unwrap();

        assert_eq!(table.handle_failure(&id), FailureOutcome::Recorded(1));
        assert_eq!(table.handle_failure(&id), FailureOutcome::Recorded(2));
        assert_eq!(table.handle_failure(&id), FailureOutcome::Ignored);

        table.add(alive(Id::random(), 2), true).unwrap();
        assert_eq!(table.handle_failure(&id), FailureOutcome::Recorded(3));
        assert_eq!(table.handle_failure(&Id::random()), FailureOutcome::NotFound);
    }

    #[test]
    fn select_closest() {
        let table = table(4);

        for n in 0..200 {
            table.add(alive(Id::random(), n), true).unwrap();
        }
        assert_invariants(&table);

        let target = Id::random();
        let size = table.size();
        let selected = table.select(&target, 20, &HashSet::new());

        assert_eq!(selected.len(), 20.min(size));

        let distances: Vec<Id> = selected.iter().map(|c| c.node_id().distance(&target)).collect();
        assert!(distances.windows(2).all(|w| w[0] < w[1]));

        let mut expected: Vec<Id> = table.contacts().iter().map(|c| *c.node_id()).collect();
        expected.sort_by(|a, b| a.compare_by_distance(b, &target));
        let ids: Vec<Id> = selected.iter().map(|c| *c.node_id()).collect();
        assert_eq!(ids, expected[..ids.len()].to_vec());

        let exclude: HashSet<Id> = ids[..5].iter().copied().collect();
        let rest = table.select(&target, 20, &exclude);
        assert!(rest.iter().all(|c| !exclude.contains(c.node_id())));
        assert_eq!(rest[0].node_id(), &ids[5]);

        assert_eq!(table.select(&target, 10_000, &HashSet::new()).len(), size);
    }

    #[test]
    fn estimated_size() {
        let table = table(4);
        assert_eq!(table.estimated_size(), 0);

        for n in 0..200 {
            table.add(alive(Id::random(), n), true).unwrap();
        }

        assert!(table.estimated_size() > 0);
    }

    #[test]
    fn refresh() {
        let table = table(4);
        let events = table.events();

        for n in 0..100 {
            table.add(alive(Id::random(), n), true).unwrap();
        }

        let buckets = table.bucket_count();
        let refreshed = table.refresh_buckets(true);
        assert_eq!(refreshed, buckets - 1);

        for _ in 0..refreshed {
            match events.try_recv().unwrap() {
                RoutingEvent::Refresh(target) => assert!(!table.is_close_to_local(&target)),
                event => panic!("unexpected {:?}", event),
            }
        }

        assert_eq!(table.refresh_buckets(false), 0);
    }

    #[test]
    fn clear() {
        let table = table(4);
        for n in 0..50 {
            table.add(alive(Id::random(), n), true).unwrap();
        }

        table.clear();

        assert!(table.is_empty());
        assert_eq!(table.bucket_count(), 1);
    }
}
