//! All values stored under one primary key.
use std::collections::hash_map::{HashMap, Values};
use std::time::{Duration, Instant};

use crate::common::{Id, ValueEntity};

/// Shortest delay between two requests taken into account by the request load.
const MIN_REQUEST_DELAY: f32 = 0.01;

#[derive(Debug, Clone)]
/// Values under one primary key, indexed by their secondary key.
pub struct ValueBag {
    primary_key: Id,
    entities: HashMap<Id, ValueEntity>,
    request_load: f32,
    last_request: Option<Instant>,
}

impl ValueBag {
    pub(crate) fn new(primary_key: Id) -> Self {
        ValueBag {
            primary_key,
            entities: HashMap::new(),
            request_load: 0.0,
            last_request: None,
        }
    }

    // === Getters ===

    pub fn primary_key(&self) -> &Id {
        &self.primary_key
    }

    pub fn get(&self, secondary_key: &Id) -> Option<&ValueEntity> {
        self.entities.get(secondary_key)
    }

    pub fn contains(&self, secondary_key: &Id) -> bool {
        self.entities.contains_key(secondary_key)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> Values<'_, Id, ValueEntity> {
        self.entities.values()
    }

    pub fn request_load(&self) -> f32 {
        self.request_load
    }

    // === Crate Methods ===

    pub(crate) fn get_mut(&mut self, secondary_key: &Id) -> Option<&mut ValueEntity> {
        self.entities.get_mut(secondary_key)
    }

    /// Inserts or replaces, returning the replaced entity.
    pub(crate) fn insert(&mut self, entity: ValueEntity) -> Option<ValueEntity> {
        debug_assert_eq!(entity.primary_key(), &self.primary_key);

        self.entities.insert(*entity.secondary_key(), entity)
    }

    pub(crate) fn remove(&mut self, secondary_key: &Id) -> Option<ValueEntity> {
        self.entities.remove(secondary_key)
    }

    /// Secondary key of the oldest remote value whose creator is firewalled.
    pub(crate) fn oldest_firewalled(&self) -> Option<Id> {
        self.entities
            .values()
            .filter(|e| !e.is_local() && e.creator().is_firewalled())
            .min_by_key(|e| e.creation_time())
            .map(|e| *e.secondary_key())
    }

    /// Updates the exponential moving average of the request frequency.
    ///
    /// The first request, and any request after more than `nulling_delay`
    /// of silence, resets the load to `0`.
    pub(crate) fn increment_request_load(&mut self, smoothing: f32, nulling_delay: Duration) -> f32 {
        let now = Instant::now();

        let last = match self.last_request.replace(now) {
            Some(last) => last,
            None => return self.request_load,
        };

        let delay = now.duration_since(last);
        if delay > nulling_delay {
            self.request_load = 0.0;
            return self.request_load;
        }

        let delay = delay.as_secs_f32().max(MIN_REQUEST_DELAY);
        self.request_load = smoothing * (1.0 / delay) + (1.0 - smoothing) * self.request_load;

        self.request_load
    }
}
