//! Security tokens and message id tags.
//!
//! A [Tokens] MAC proves to a store request's receiver that the requester
//! recently looked the key up from the same address. Bound tokens also cover
//! a message id and a result count, for confirmations that must answer one
//! specific request. A [MessageIdTagger]
//! binds request ids to the destination so unsolicited or misrouted
//! responses can be told apart from real ones.

use crc::{Crc, CRC_32_ISCSI};
use rand::Rng;
use std::{
    fmt::{self, Debug, Formatter},
    net::{IpAddr, SocketAddr},
    time::{Duration, Instant},
};

use crate::messages::MessageId;

const SECRET_SIZE: usize = 20;
/// Size of a security token in bytes.
pub const TOKEN_SIZE: usize = 8;
const ROTATE_INTERVAL: Duration = Duration::from_secs(60 * 5);
const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Issues and validates security tokens bound to a requester's address.
///
/// Secrets rotate every 5 minutes and the previous secret stays valid, so a
/// token is accepted for 5 to 10 minutes after it was issued.
pub struct Tokens {
    prev_secret: [u8; SECRET_SIZE],
    curr_secret: [u8; SECRET_SIZE],
    last_updated: Instant,
}

impl Debug for Tokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tokens (_)")
    }
}

impl Default for Tokens {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokens {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        Tokens {
            prev_secret: rng.gen(),
            curr_secret: rng.gen(),
            last_updated: Instant::now(),
        }
    }

    // === Public Methods ===

    pub fn should_update(&self) -> bool {
        self.last_updated.elapsed() > ROTATE_INTERVAL
    }

    /// Validate that the token was generated for `address` within the past two rotations.
    pub fn validate(&self, address: SocketAddr, token: &[u8]) -> bool {
        let prev = generate_token(address, &self.prev_secret);
        let curr = generate_token(address, &self.curr_secret);

        token == curr || token == prev
    }

    pub fn rotate(&mut self) {
        self.prev_secret = self.curr_secret;
        self.curr_secret = rand::thread_rng().gen();

        self.last_updated = Instant::now();
    }

    pub fn generate_token(&self, address: SocketAddr) -> [u8; TOKEN_SIZE] {
        generate_token(address, &self.curr_secret)
    }

    /// Token bound to `address`, the id of the request it answers and the
    /// number of results that request asked for.
    pub fn generate_bound(
        &self,
        address: SocketAddr,
        message_id: &MessageId,
        count: usize,
    ) -> [u8; TOKEN_SIZE] {
        generate_bound(address, message_id, count, &self.curr_secret)
    }

    /// Validate a token from [Self::generate_bound] within the past two rotations.
    pub fn validate_bound(
        &self,
        address: SocketAddr,
        message_id: &MessageId,
        count: usize,
        token: &[u8],
    ) -> bool {
        let prev = generate_bound(address, message_id, count, &self.prev_secret);
        let curr = generate_bound(address, message_id, count, &self.curr_secret);

        token == curr || token == prev
    }
}

/// Tags the first bytes of request ids with a checksum of the destination.
pub struct MessageIdTagger {
    secret: [u8; SECRET_SIZE],
}

impl Debug for MessageIdTagger {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MessageIdTagger (_)")
    }
}

impl Default for MessageIdTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdTagger {
    pub fn new() -> Self {
        MessageIdTagger {
            secret: rand::thread_rng().gen(),
        }
    }

    /// A fresh random id for a request sent to `destination`.
    pub fn create(&self, destination: SocketAddr) -> MessageId {
        MessageId::random().with_tag(self.tag(destination))
    }

    /// Returns `true` if `id` was created by [Self::create] for `source`.
    pub fn verify(&self, id: &MessageId, source: SocketAddr) -> bool {
        id.tag() == self.tag(source)
    }

    fn tag(&self, address: SocketAddr) -> [u8; 4] {
        let mut digest = CASTAGNOLI.digest();

        digest.update(&self.secret);
        digest.update(&ip_octets(&address.ip()));
        digest.update(&address.port().to_be_bytes());

        digest.finalize().to_be_bytes()
    }
}

// === Private Methods ===

fn generate_token(address: SocketAddr, secret: &[u8; SECRET_SIZE]) -> [u8; TOKEN_SIZE] {
    truncate(address_hasher(address, secret).digest())
}

fn generate_bound(
    address: SocketAddr,
    message_id: &MessageId,
    count: usize,
    secret: &[u8; SECRET_SIZE],
) -> [u8; TOKEN_SIZE] {
    let mut hasher = address_hasher(address, secret);

    hasher.update(message_id.as_bytes());
    hasher.update(&(count as u64).to_be_bytes());

    truncate(hasher.digest())
}

fn address_hasher(address: SocketAddr, secret: &[u8; SECRET_SIZE]) -> sha1_smol::Sha1 {
    let mut hasher = sha1_smol::Sha1::new();

    hasher.update(secret);
    hasher.update(&ip_octets(&address.ip()));
    hasher.update(&address.port().to_be_bytes());

    hasher
}

fn truncate(digest: sha1_smol::Digest) -> [u8; TOKEN_SIZE] {
    let digest = digest.bytes();

    let mut token = [0; TOKEN_SIZE];
    token.copy_from_slice(&digest[..TOKEN_SIZE]);

    token
}

fn ip_octets(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}
