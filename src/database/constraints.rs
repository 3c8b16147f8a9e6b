//! Pluggable admission policies consulted before a value is stored.
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};

use crate::common::ValueEntity;
use crate::database::ValueBag;

/// Last say on whether a value may be stored.
///
/// Called after the built-in quota checks, with the values already stored
/// under the same primary key, if any.
pub trait SecurityConstraint: Debug + Send + Sync {
    fn allow_store(&self, existing: Option<&ValueBag>, entity: &ValueEntity) -> bool;
}

/// Refuses stores from blocked hosts and learns about hosts that flood
/// the database.
pub trait HostFilter: Debug + Send + Sync {
    /// Returns `false` to refuse any store involving this address.
    fn allow(&self, address: &SocketAddr) -> bool;

    /// Called once an address exceeded the flood limit.
    fn ban(&self, address: &SocketAddr);
}

/// Returns `true` for addresses a remote node could plausibly be reached at.
pub fn is_public_address(address: &SocketAddr) -> bool {
    if address.port() == 0 {
        return false;
    }

    match address.ip() {
        IpAddr::V4(ip) => {
            !(ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_broadcast()
                || ip.is_documentation()
                || ip.is_unspecified()
                || ip.is_multicast())
        }
        IpAddr::V6(ip) => {
            let first = ip.segments()[0];
            let unique_local = first & 0xfe00 == 0xfc00;
            let link_local = first & 0xffc0 == 0xfe80;

            !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || unique_local || link_local)
        }
    }
}

/// The network an address belongs to for quota purposes, `/24` for IPv4
/// and `/48` for IPv6.
pub fn network_of(ip: &IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            IpAddr::from([a, b, c, 0])
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            IpAddr::from([s[0], s[1], s[2], 0, 0, 0, 0, 0])
        }
    }
}

#[cfg(feature = "signed-values")]
pub use signed::*;

#[cfg(feature = "signed-values")]
mod signed {
    use bytes::{BufMut, Bytes, BytesMut};
    use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
    use std::convert::TryFrom;

    use super::SecurityConstraint;
    use crate::common::{DhtValue, Id, ValueEntity, ValueType};
    use crate::database::ValueBag;

    const KEY_SIZE: usize = 32;
    const SIGNATURE_SIZE: usize = 64;

    #[derive(Debug, Clone, Copy, Default)]
    /// Admission policy for [ValueType::SIGN] values.
    ///
    /// A signed payload is `ed25519 public key (32) || signature (64) || data`.
    /// The signature covers the primary key, the value version and the data.
    /// Once a key holds signed values, only values signed by the same public
    /// key are accepted under it. Other value types pass through.
    pub struct SignedValueConstraint;

    impl SignedValueConstraint {
        /// Builds a signed [DhtValue] for `primary_key`.
        pub fn sign(signer: &SigningKey, primary_key: &Id, version: u16, data: &[u8]) -> DhtValue {
            let signature = signer.sign(&signable(primary_key, version, data));

            let mut payload = BytesMut::with_capacity(KEY_SIZE + SIGNATURE_SIZE + data.len());
            payload.put_slice(signer.verifying_key().as_bytes());
            payload.put_slice(&signature.to_bytes());
            payload.put_slice(data);

            DhtValue::new(ValueType::SIGN, version, payload.freeze())
        }

        /// The public key of a signed value, if it is well formed.
        pub fn public_key(value: &DhtValue) -> Option<&[u8]> {
            if value.value_type != ValueType::SIGN || value.data.len() < KEY_SIZE + SIGNATURE_SIZE {
                return None;
            }

            Some(&value.data[..KEY_SIZE])
        }

        /// The signed data without key and signature.
        pub fn payload(value: &DhtValue) -> Option<Bytes> {
            Self::public_key(value)?;

            Some(value.data.slice(KEY_SIZE + SIGNATURE_SIZE..))
        }

        fn verify(primary_key: &Id, value: &DhtValue) -> bool {
            let key = match Self::public_key(value).map(|key| VerifyingKey::try_from(key)) {
                Some(Ok(key)) => key,
                _ => return false,
            };

            let signature =
                match Signature::from_slice(&value.data[KEY_SIZE..KEY_SIZE + SIGNATURE_SIZE]) {
                    Ok(signature) => signature,
                    Err(_) => return false,
                };

            let data = &value.data[KEY_SIZE + SIGNATURE_SIZE..];

            key.verify(&signable(primary_key, value.version, data), &signature)
                .is_ok()
        }
    }

    impl SecurityConstraint for SignedValueConstraint {
        fn allow_store(&self, existing: Option<&ValueBag>, entity: &ValueEntity) -> bool {
            let value = entity.value();

            if value.value_type != ValueType::SIGN || value.is_empty() {
                return true;
            }

            if !Self::verify(entity.primary_key(), value) {
                return false;
            }

            let key = Self::public_key(value);

            existing
                .map(|bag| {
                    bag.iter()
                        .filter(|e| e.value().value_type == ValueType::SIGN)
                        .all(|e| Self::public_key(e.value()) == key)
                })
                .unwrap_or(true)
        }
    }

    fn signable(primary_key: &Id, version: u16, data: &[u8]) -> Vec<u8> {
        let mut signable = Vec::with_capacity(primary_key.as_bytes().len() + 2 + data.len());
        signable.extend_from_slice(primary_key.as_bytes());
        signable.extend_from_slice(&version.to_be_bytes());
        signable.extend_from_slice(data);

        signable
    }
}
