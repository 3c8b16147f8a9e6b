//! Configuration of the routing table, the database and the local node.
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::{Vendor, Version};

/// Default bucket size, `k` in Kademlia.
pub const DEFAULT_K: usize = 20;
/// Default capacity of a bucket's replacement cache.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 16;
/// Default depth at which buckets away from the local node stop splitting.
pub const DEFAULT_DEPTH_LIMIT: usize = 4;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SPOOF_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REPUBLISH_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_VALUE_LIFETIME: Duration = Duration::from_secs(60 * 60);
/// Current version of the wire protocol.
pub const DEFAULT_PROTOCOL_VERSION: u16 = 0x0001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Routing table settings.
pub struct RoutingTableConfig {
    /// Maximum number of live contacts in a bucket.
    ///
    /// Defaults to [DEFAULT_K]
    pub k: usize,
    /// Maximum number of contacts in a bucket's replacement cache.
    ///
    /// Defaults to [DEFAULT_MAX_CACHE_SIZE]
    pub max_cache_size: usize,
    /// Buckets that neither hold the local node nor neighbour it only split
    /// while their depth is below this limit.
    ///
    /// Defaults to [DEFAULT_DEPTH_LIMIT]
    pub depth_limit: usize,
    /// Failures after which an alive contact is considered dead.
    ///
    /// Defaults to `4`
    pub max_contact_failures: u32,
    /// Failures after which a contact that never answered is considered dead.
    ///
    /// Defaults to `2`
    pub max_unknown_failures: u32,
    /// After that many failures in a row, without a single successful
    /// contact in between, the local node assumes it is offline itself
    /// and stops evicting contacts.
    ///
    /// Defaults to `100`
    pub max_consecutive_failures: usize,
    /// Buckets not touched within this interval get refreshed.
    ///
    /// Defaults to [DEFAULT_REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// A contact seen alive within this interval can't be taken over by a
    /// newcomer claiming its id from another address.
    ///
    /// Defaults to [DEFAULT_SPOOF_CHECK_INTERVAL]
    pub spoof_check_interval: Duration,
    /// Capacity of the [crate::routing_table::RoutingEvent] channel.
    ///
    /// Defaults to `256`
    pub event_capacity: usize,
}

impl Default for RoutingTableConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            depth_limit: DEFAULT_DEPTH_LIMIT,
            max_contact_failures: 4,
            max_unknown_failures: 2,
            max_consecutive_failures: 100,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            spoof_check_interval: DEFAULT_SPOOF_CHECK_INTERVAL,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Database settings.
pub struct DatabaseConfig {
    /// Maximum number of distinct primary keys.
    ///
    /// Defaults to `50_000`
    pub max_keys: usize,
    /// Maximum number of values under one primary key.
    ///
    /// Defaults to `5`
    pub max_values_per_key: usize,
    /// Maximum number of remote values created from one IP address.
    ///
    /// Defaults to `5`
    pub max_values_per_address: usize,
    /// Maximum number of remote values created from one network
    /// (`/24` for IPv4, `/48` for IPv6).
    ///
    /// Defaults to `20`
    pub max_values_per_network: usize,
    /// Store attempts from one creator address before it is reported to the
    /// [crate::database::HostFilter] as flooding.
    ///
    /// Defaults to `15`
    pub flood_ban_limit: usize,
    /// Reject indirect stores whose creator address is not publicly routable.
    ///
    /// Defaults to `true`
    pub validate_creator: bool,
    /// Smoothing factor of the request load moving average.
    ///
    /// Defaults to `0.25`
    pub request_load_smoothing: f32,
    /// Silence after which the request load of a key drops back to zero.
    ///
    /// Defaults to `5` minutes
    pub request_load_nulling_delay: Duration,
    /// Local values are published again after this interval.
    ///
    /// Defaults to [DEFAULT_REPUBLISH_INTERVAL]
    pub republish_interval: Duration,
    /// Lifetime of remote values for the default expiration policy.
    ///
    /// Defaults to [DEFAULT_VALUE_LIFETIME]
    pub value_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_keys: 50_000,
            max_values_per_key: 5,
            max_values_per_address: 5,
            max_values_per_network: 20,
            flood_ban_limit: 15,
            validate_creator: true,
            request_load_smoothing: 0.25,
            request_load_nulling_delay: Duration::from_secs(5 * 60),
            republish_interval: DEFAULT_REPUBLISH_INTERVAL,
            value_lifetime: DEFAULT_VALUE_LIFETIME,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Settings of a local node.
pub struct Config {
    /// Vendor code announced in every outgoing message.
    ///
    /// Defaults to `KADC`
    pub vendor: Vendor,
    /// Software version announced in every outgoing message.
    ///
    /// Defaults to `0.3`
    pub version: Version,
    /// Wire protocol version.
    ///
    /// Defaults to [DEFAULT_PROTOCOL_VERSION]
    pub protocol_version: u16,
    pub routing_table: RoutingTableConfig,
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendor: Vendor::from_code(b"KADC"),
            version: Version::new(0, 3),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            routing_table: RoutingTableConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}
