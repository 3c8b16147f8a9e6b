//! Expiration of remote values.
use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;

use crate::common::ValueEntity;
use crate::routing_table::RoutingTable;

/// Decides whether a remote value has outlived its usefulness, given the
/// current routing table.
pub trait ExpirationPolicy: Debug + Send + Sync {
    fn is_expired(&self, entity: &ValueEntity, table: &RoutingTable) -> bool;
}

#[derive(Debug, Clone)]
/// Remote values live for `lifetime` while the local node is among the `k`
/// nodes closest to their primary key.
///
/// Every node closer than the k-th one halves the lifetime again, so values
/// cached far from their key fade out quickly.
pub struct ValueLifetime {
    pub lifetime: Duration,
    pub k: usize,
}

impl ValueLifetime {
    pub fn new(lifetime: Duration, k: usize) -> Self {
        ValueLifetime { lifetime, k }
    }

    /// Lifetime of a value under `entity`'s primary key on this node.
    pub fn lifetime_for(&self, entity: &ValueEntity, table: &RoutingTable) -> Duration {
        let key = entity.primary_key();
        let local = table.local_id();

        let closer = table
            .select(key, self.k * 2, &HashSet::new())
            .iter()
            .filter(|c| c.node_id().is_closer(local, key))
            .count();

        if closer < self.k {
            return self.lifetime;
        }

        let halvings = (closer - self.k + 1).min(16) as u32;

        self.lifetime / 2_u32.pow(halvings)
    }
}

impl ExpirationPolicy for ValueLifetime {
    fn is_expired(&self, entity: &ValueEntity, table: &RoutingTable) -> bool {
        if entity.is_local() {
            return false;
        }

        entity.creation_time().elapsed() >= self.lifetime_for(entity, table)
    }
}
