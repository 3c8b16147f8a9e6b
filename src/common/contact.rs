//! Struct and implementation of a remote peer as seen by the routing table.
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::common::Id;

/// The contact can't accept unsolicited messages.
pub const FIREWALLED_FLAG: u8 = 0x01;
/// The contact announced that it is going offline.
pub const SHUTDOWN_FLAG: u8 = 0x02;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
/// Four character vendor code, e.g. `LIME`.
pub struct Vendor(pub u32);

impl Vendor {
    pub const UNKNOWN: Vendor = Vendor(0);

    pub fn from_code(code: &[u8; 4]) -> Vendor {
        Vendor(u32::from_be_bytes(*code))
    }
}

impl Display for Vendor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();

        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            for b in &bytes {
                write!(f, "{}", *b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

impl Debug for Vendor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Vendor({})", self)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
/// Two byte `major.minor` version.
pub struct Version(pub u16);

impl Version {
    pub const ZERO: Version = Version(0);

    pub fn new(major: u8, minor: u8) -> Version {
        Version(u16::from(major) << 8 | u16::from(minor))
    }

    pub fn major(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn minor(&self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Liveness of a [Contact].
pub enum ContactState {
    /// Heard of, but never answered us.
    Unknown,
    /// Answered at least once since its last failure streak.
    Alive,
    /// Failed too often, about to be evicted.
    Dead,
}

#[derive(Clone)]
/// Remote peer entry in the routing table.
///
/// The identity (`node_id`, `vendor`, `version`) is fixed at creation, while
/// the liveness fields change in place with every success or failure.
pub struct Contact {
    node_id: Id,
    address: SocketAddr,
    vendor: Vendor,
    version: Version,
    instance_id: u8,
    flags: u8,

    state: ContactState,
    failures: u32,
    last_seen: Option<Instant>,
    last_failure: Option<Instant>,
}

impl Contact {
    /// Creates a new [ContactState::Unknown] contact from an id and socket address.
    pub fn new(node_id: Id, address: SocketAddr) -> Contact {
        Contact {
            node_id,
            address,
            vendor: Vendor::UNKNOWN,
            version: Version::ZERO,
            instance_id: 0,
            flags: 0,

            state: ContactState::Unknown,
            failures: 0,
            last_seen: None,
            last_failure: None,
        }
    }

    /// Creates a contact that just proved to be alive.
    pub fn alive(node_id: Id, address: SocketAddr) -> Contact {
        let mut contact = Contact::new(node_id, address);
        contact.mark_alive();
        contact
    }

    pub fn with_vendor(mut self, vendor: Vendor) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_instance_id(mut self, instance_id: u8) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    // === Getters ===

    pub fn node_id(&self) -> &Id {
        &self.node_id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn instance_id(&self) -> u8 {
        self.instance_id
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn state(&self) -> ContactState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    pub fn is_alive(&self) -> bool {
        self.state == ContactState::Alive
    }

    pub fn is_unknown(&self) -> bool {
        self.state == ContactState::Unknown
    }

    pub fn is_dead(&self) -> bool {
        self.state == ContactState::Dead
    }

    pub fn has_failed(&self) -> bool {
        self.failures > 0
    }

    pub fn is_firewalled(&self) -> bool {
        self.flags & FIREWALLED_FLAG != 0
    }

    pub fn is_shutdown(&self) -> bool {
        self.flags & SHUTDOWN_FLAG != 0
    }

    /// Returns `true` if this contact was alive within the past `interval`.
    pub fn has_been_recently_alive(&self, interval: Duration) -> bool {
        self.is_alive()
            && self
                .last_seen
                .map(|seen| seen.elapsed() < interval)
                .unwrap_or(false)
    }

    // === Public Methods ===

    /// Records a successful round trip.
    pub fn mark_alive(&mut self) {
        self.state = ContactState::Alive;
        self.failures = 0;
        self.last_seen = Some(Instant::now());
    }

    /// Demotes this contact back to [ContactState::Unknown], keeping its history.
    pub fn mark_unknown(&mut self) {
        self.state = ContactState::Unknown;
    }

    pub(crate) fn mark_dead(&mut self) {
        self.state = ContactState::Dead;
    }

    /// Records a failed round trip and returns the new failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(Instant::now());
        self.failures
    }

    /// Takes over the mutable facets of a newer sighting of the same node.
    pub fn merge(&mut self, newer: &Contact) {
        debug_assert_eq!(self.node_id, newer.node_id);

        self.address = newer.address;
        self.instance_id = newer.instance_id;
        self.flags = newer.flags;

        if newer.is_alive() {
            self.mark_alive();
        }
    }

    /// Returns `true` if both contacts share the same IP address.
    pub fn same_ip(&self, other: &Contact) -> bool {
        self.address.ip() == other.address.ip()
    }

    #[cfg(test)]
    pub fn random() -> Contact {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let address = SocketAddr::from((rng.gen::<[u8; 4]>(), rng.gen::<u16>()));

        Contact::new(Id::random(), address)
    }
}

impl PartialEq for Contact {
    /// Two contacts are the same if they share id and address.
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.address == other.address
    }
}

impl Eq for Contact {}

impl Debug for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("node_id", &self.node_id)
            .field("address", &self.address)
            .field("vendor", &self.vendor)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("failures", &self.failures)
            .finish()
    }
}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {:?})", self.node_id, self.address, self.state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn liveness() {
        let mut contact = Contact::random();
        assert!(contact.is_unknown());
        assert!(contact.last_seen().is_none());

        contact.mark_alive();
        assert!(contact.is_alive());
        assert!(contact.has_been_recently_alive(Duration::from_secs(60)));

        assert_eq!(contact.record_failure(), 1);
        assert_eq!(contact.record_failure(), 2);
        assert!(contact.has_failed());
        assert!(contact.last_failure().is_some());

        contact.mark_alive();
        assert_eq!(contact.failures(), 0);
    }

    #[test]
    fn merge_takes_new_address() {
        let mut existing = Contact::random();
        let newer = Contact::alive(*existing.node_id(), "10.0.0.1:4000".parse().unwrap())
            .with_instance_id(3);

        existing.merge(&newer);

        assert_eq!(existing.address(), newer.address());
        assert_eq!(existing.instance_id(), 3);
        assert!(existing.is_alive());
    }

    #[test]
    fn flags() {
        let contact = Contact::random().with_flags(FIREWALLED_FLAG);
        assert!(contact.is_firewalled());
        assert!(!contact.is_shutdown());
    }

    #[test]
    fn vendor_and_version_display() {
        assert_eq!(Vendor::from_code(b"LIME").to_string(), "LIME");
        assert_eq!(Version::new(0, 1).to_string(), "0.1");
        assert_eq!(Version::new(2, 5).major(), 2);
    }
}
