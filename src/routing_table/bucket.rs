//! A leaf of the routing table: live contacts plus a replacement cache.
use lru::LruCache;
use std::fmt::{self, Debug, Formatter};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::common::{Contact, Id, ID_BITS};

/// Covers every id starting with the first `depth` bits of `prefix`.
///
/// Live contacts are kept in recency order, the least recently seen first.
pub struct Bucket {
    prefix: Id,
    depth: usize,
    contacts: Vec<Contact>,
    cache: LruCache<Id, Contact>,
    max_cache_size: usize,
    last_refresh: Instant,
}

impl Bucket {
    pub(crate) fn new(prefix: Id, depth: usize, max_cache_size: usize) -> Self {
        Bucket {
            prefix: prefix.prefix(depth),
            depth,
            contacts: Vec::new(),
            cache: LruCache::new(cache_capacity(max_cache_size)),
            max_cache_size,
            last_refresh: Instant::now(),
        }
    }

    // === Getters ===

    pub fn prefix(&self) -> &Id {
        &self.prefix
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Live contacts, least recently seen first.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Cached contacts, most recently seen first.
    pub fn cached_contacts(&self) -> Vec<Contact> {
        self.cache.iter().map(|(_, contact)| contact.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn last_refresh(&self) -> Instant {
        self.last_refresh
    }

    /// Returns `true` if `id` falls into the range of this bucket.
    pub fn covers(&self, id: &Id) -> bool {
        id.has_prefix(&self.prefix, self.depth)
    }

    pub fn is_refresh_required(&self, interval: Duration) -> bool {
        self.last_refresh.elapsed() >= interval
    }

    // === Crate Methods ===

    pub(crate) fn is_full(&self, k: usize) -> bool {
        self.contacts.len() >= k
    }

    /// Live or cached contact with that id.
    pub(crate) fn get(&self, id: &Id) -> Option<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.node_id() == id)
            .or_else(|| self.cache.peek(id))
    }

    pub(crate) fn get_mut(&mut self, id: &Id) -> Option<&mut Contact> {
        match self.contacts.iter().position(|c| c.node_id() == id) {
            Some(index) => self.contacts.get_mut(index),
            None => self.cache.peek_mut(id),
        }
    }

    pub(crate) fn contains_live(&self, id: &Id) -> bool {
        self.contacts.iter().any(|c| c.node_id() == id)
    }

    pub(crate) fn contains_cached(&self, id: &Id) -> bool {
        self.cache.contains(id)
    }

    pub(crate) fn least_recently_seen(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    pub(crate) fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    pub(crate) fn remove_live(&mut self, id: &Id) -> Option<Contact> {
        let index = self.contacts.iter().position(|c| c.node_id() == id)?;

        Some(self.contacts.remove(index))
    }

    /// Adds to the replacement cache, dropping the least recently seen
    /// cached contact if the cache is full.
    pub(crate) fn push_cached(&mut self, contact: Contact) {
        if self.max_cache_size == 0 {
            return;
        }

        self.cache.put(*contact.node_id(), contact);
    }

    pub(crate) fn remove_cached(&mut self, id: &Id) -> Option<Contact> {
        self.cache.pop(id)
    }

    /// Takes the most recently seen cached contact out of the cache.
    pub(crate) fn pop_most_recently_cached(&mut self) -> Option<Contact> {
        let id = *self.cache.iter().next()?.0;

        self.cache.pop(&id)
    }

    /// Merges a new sighting into the stored contact, live or cached.
    ///
    /// Returns the merged contact.
    pub(crate) fn update(&mut self, node: &Contact) -> Option<Contact> {
        let id = *node.node_id();

        if let Some(index) = self.contacts.iter().position(|c| c.node_id() == &id) {
            let mut contact = self.contacts.remove(index);
            contact.merge(node);

            if contact.is_alive() {
                self.contacts.push(contact.clone());
            } else {
                self.contacts.insert(index, contact.clone());
            }

            return Some(contact);
        }

        let contact = self.cache.get_mut(&id)?;
        contact.merge(node);

        Some(contact.clone())
    }

    pub(crate) fn touch(&mut self) {
        self.last_refresh = Instant::now();
    }

    /// Splits this bucket along the bit at `depth`, into the `0` half and
    /// the `1` half, keeping recency order in both.
    pub(crate) fn split(self) -> (Bucket, Bucket) {
        let depth = self.depth + 1;
        debug_assert!(depth <= ID_BITS);

        let bit = self.depth;
        let mut left = Bucket::new(self.prefix.with_bit(bit, false), depth, self.max_cache_size);
        let mut right = Bucket::new(self.prefix.with_bit(bit, true), depth, self.max_cache_size);
        left.last_refresh = self.last_refresh;
        right.last_refresh = self.last_refresh;

        for contact in self.contacts {
            if contact.node_id().bit(bit) {
                right.push(contact)
            } else {
                left.push(contact)
            }
        }

        for (_, contact) in self.cache.iter().rev() {
            if contact.node_id().bit(bit) {
                right.push_cached(contact.clone())
            } else {
                left.push_cached(contact.clone())
            }
        }

        (left, right)
    }
}

impl Clone for Bucket {
    fn clone(&self) -> Self {
        let mut cache = LruCache::new(cache_capacity(self.max_cache_size));
        for (id, contact) in self.cache.iter().rev() {
            cache.put(*id, contact.clone());
        }

        Bucket {
            prefix: self.prefix,
            depth: self.depth,
            contacts: self.contacts.clone(),
            cache,
            max_cache_size: self.max_cache_size,
            last_refresh: self.last_refresh,
        }
    }
}

impl Debug for Bucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("prefix", &self.prefix)
            .field("depth", &self.depth)
            .field("contacts", &self.contacts.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

fn cache_capacity(max_cache_size: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN)
}
