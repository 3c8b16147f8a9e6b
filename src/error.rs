//! Main Crate Error

use std::net::SocketAddr;

use crate::common::Id;
use crate::messages::{DecodeError, EncodeError};

#[derive(thiserror::Error, Debug)]
/// Kadcore crate error enum.
pub enum Error {
    /// Bytes of the wrong length were used to build an [Id].
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// A string that is not 40 hex characters was parsed as an [Id].
    #[error("Invalid Id encoding: {0}")]
    InvalidIdString(String),

    /// The routing table never holds the local node.
    #[error("{0:?} is the local node id")]
    LocalNodeId(Id),

    /// A remote contact claims the local node's socket address under another id.
    #[error("Contact {id:?} claims the local node address {address}")]
    LocalNodeAddress { id: Id, address: SocketAddr },

    #[error(transparent)]
    /// Transparent [DecodeError]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    /// Transparent [EncodeError]
    Encode(#[from] EncodeError),
}

/// Alias for `Result<T, kadcore::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
