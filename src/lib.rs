#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;
mod error;

pub mod config;
pub mod database;
pub mod messages;
pub mod routing_table;
pub mod server;
pub mod tokens;

pub use crate::common::{
    ClosestContacts, Contact, ContactState, DhtValue, Id, ValueEntity, ValueType, Vendor,
    Version, FIREWALLED_FLAG, ID_SIZE, SHUTDOWN_FLAG,
};
pub use bytes::Bytes;
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use routing_table::RoutingTable;

#[cfg(feature = "signed-values")]
pub use ed25519_dalek::SigningKey;
