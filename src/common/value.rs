//! Values and the entities that carry them through the database.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::time::Instant;

use crate::common::{Contact, Id};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
/// Four character code describing the payload of a [DhtValue].
pub struct ValueType(pub u32);

impl ValueType {
    /// Wildcard used by find-value requests.
    pub const ANY: ValueType = ValueType(u32::from_be_bytes(*b"****"));
    pub const BINARY: ValueType = ValueType(u32::from_be_bytes(*b"BINA"));
    pub const TEXT: ValueType = ValueType(u32::from_be_bytes(*b"TEXT"));
    pub const TEST: ValueType = ValueType(u32::from_be_bytes(*b"TEST"));
    /// Signed payload, see [crate::database::SignedValueConstraint].
    pub const SIGN: ValueType = ValueType(u32::from_be_bytes(*b"SIGN"));

    /// Returns `true` if a request for `self` should return values of `other`.
    pub fn matches(&self, other: ValueType) -> bool {
        *self == ValueType::ANY || *self == other
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        match std::str::from_utf8(&bytes) {
            Ok(code) if bytes.iter().all(|b| b.is_ascii_graphic()) => write!(f, "{}", code),
            _ => write!(f, "{:#010x}", self.0),
        }
    }
}

impl Debug for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ValueType({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A typed, versioned payload. Empty data is a tombstone.
pub struct DhtValue {
    pub value_type: ValueType,
    pub version: u16,
    pub data: Bytes,
}

impl DhtValue {
    pub fn new(value_type: ValueType, version: u16, data: impl Into<Bytes>) -> Self {
        DhtValue {
            value_type,
            version,
            data: data.into(),
        }
    }

    /// A tombstone of the given type, used to delete a previously stored value.
    pub fn empty(value_type: ValueType) -> Self {
        DhtValue {
            value_type,
            version: 0,
            data: Bytes::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Clone)]
/// A value stored under `(primary_key, secondary_key)`, where the secondary
/// key is the id of the creator.
pub struct ValueEntity {
    primary_key: Id,
    secondary_key: Id,
    creator: Contact,
    sender: Contact,
    value: DhtValue,
    local: bool,
    creation_time: Instant,
    publish_time: Option<Instant>,
    location_count: usize,
}

impl ValueEntity {
    /// Value created by the local node.
    pub fn local(creator: Contact, primary_key: Id, value: DhtValue) -> Self {
        Self::build(creator.clone(), creator, primary_key, value, true)
    }

    /// Value received from `sender`, on behalf of `creator`.
    pub fn remote(creator: Contact, sender: Contact, primary_key: Id, value: DhtValue) -> Self {
        Self::build(creator, sender, primary_key, value, false)
    }

    fn build(creator: Contact, sender: Contact, primary_key: Id, value: DhtValue, local: bool) -> Self {
        ValueEntity {
            primary_key,
            secondary_key: *creator.node_id(),
            creator,
            sender,
            value,
            local,
            creation_time: Instant::now(),
            publish_time: None,
            location_count: 0,
        }
    }

    // === Getters ===

    pub fn primary_key(&self) -> &Id {
        &self.primary_key
    }

    pub fn secondary_key(&self) -> &Id {
        &self.secondary_key
    }

    pub fn creator(&self) -> &Contact {
        &self.creator
    }

    pub fn sender(&self) -> &Contact {
        &self.sender
    }

    pub fn value(&self) -> &DhtValue {
        &self.value
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    pub fn publish_time(&self) -> Option<Instant> {
        self.publish_time
    }

    pub fn location_count(&self) -> usize {
        self.location_count
    }

    /// Returns `true` if the creator sent this value itself.
    pub fn is_direct(&self) -> bool {
        self.creator.node_id() == self.sender.node_id()
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    pub fn has_been_published(&self) -> bool {
        self.publish_time.is_some()
    }

    // === Public Methods ===

    /// Records a successful publish to `location_count` remote nodes.
    pub fn mark_published(&mut self, location_count: usize) {
        self.publish_time = Some(Instant::now());
        self.location_count = location_count;
    }
}

impl PartialEq for ValueEntity {
    fn eq(&self, other: &Self) -> bool {
        self.primary_key == other.primary_key && self.secondary_key == other.secondary_key
    }
}

impl Eq for ValueEntity {}

impl Hash for ValueEntity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary_key.hash(state);
        self.secondary_key.hash(state);
    }
}

impl Debug for ValueEntity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueEntity")
            .field("primary_key", &self.primary_key)
            .field("secondary_key", &self.secondary_key)
            .field("value_type", &self.value.value_type)
            .field("len", &self.value.data.len())
            .field("local", &self.local)
            .field("direct", &self.is_direct())
            .finish()
    }
}
