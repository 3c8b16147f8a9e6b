//! Contacts sorted by their distance to a target.
use std::vec::IntoIter;

use crate::common::{Contact, Id};

#[derive(Debug, Clone)]
/// Collects contacts in ascending XOR distance to a target, without duplicates.
pub struct ClosestContacts {
    target: Id,
    contacts: Vec<Contact>,
}

impl ClosestContacts {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            contacts: Vec::with_capacity(64),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    // === Public Methods ===

    /// Inserts a contact at its sorted position, ignoring a second copy of the same id.
    pub fn add(&mut self, contact: Contact) {
        let seek = contact.node_id().xor(&self.target);

        if let Err(pos) = self.contacts.binary_search_by(|probe| {
            if probe.node_id() == contact.node_id() {
                std::cmp::Ordering::Equal
            } else {
                probe.node_id().xor(&self.target).cmp(&seek)
            }
        }) {
            self.contacts.insert(pos, contact)
        }
    }

    /// Keeps only the `count` closest contacts.
    pub fn truncate(&mut self, count: usize) {
        self.contacts.truncate(count)
    }

    /// Distance of the furthest contact to the target, if any.
    pub fn furthest_distance(&self) -> Option<Id> {
        self.contacts
            .last()
            .map(|contact| contact.node_id().xor(&self.target))
    }

    /// An estimation of the network size from the distribution of the
    /// first `k` contacts around the target.
    ///
    /// Seeing `i` contacts within distance `d_i` of a target suggests the
    /// whole id space holds `i * d_max / d_i` nodes, the estimate is the
    /// average of that ratio over the closest contacts.
    ///
    /// Read more at [A New Method for Estimating P2P Network Size](https://eli.sohl.com/2020/06/05/dht-size-estimation.html)
    pub fn size_estimate(&self, k: usize) -> u128 {
        if self.is_empty() || k == 0 {
            return 0;
        };

        let mut sum: u128 = 0;
        let mut count: u128 = 0;

        for contact in self.contacts.iter().take(k) {
            count += 1;

            let xor = contact.node_id().xor(&self.target);

            // Drop the lower 4 bytes to get a u128 from u160.
            let mut high = [0_u8; 16];
            high.copy_from_slice(&xor.as_bytes()[0..16]);
            let distance = u128::from_be_bytes(high).saturating_add(1);

            let intervals = u128::MAX / distance;
            sum = sum.saturating_add(intervals.saturating_mul(count));
        }

        sum / count
    }
}

impl IntoIterator for ClosestContacts {
    type Item = Contact;
    type IntoIter = IntoIter<Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestContacts {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.iter()
    }
}
