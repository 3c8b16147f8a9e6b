//! Kademlia node Id, value key or lookup target
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::{Error, Result};

/// The size of ids in bytes.
pub const ID_SIZE: usize = 20;
/// The size of ids in bits.
pub const ID_BITS: usize = ID_SIZE * 8;
pub const MAX_DISTANCE: u8 = ID_BITS as u8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
/// 160 bit identifier of a node, a value key or a lookup target.
///
/// Ids are compared byte by byte (big-endian), and the distance between two
/// ids is their bitwise XOR read as an unsigned 160 bit integer.
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    /// The all-zero id, the left-most point of the id space.
    pub const MIN: Id = Id([0; ID_SIZE]);
    /// The all-one id, the right-most point of the id space.
    pub const MAX: Id = Id([0xff; ID_SIZE]);

    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Returns a random id that shares the first `depth` bits with `prefix`.
    ///
    /// Used to pick a lookup target inside a bucket's range.
    pub fn random_with_prefix(prefix: &Id, depth: usize) -> Id {
        let depth = depth.min(ID_BITS);
        let random = Id::random();

        let mut bytes = prefix.prefix(depth).0;
        for (i, byte) in bytes.iter_mut().enumerate() {
            let fixed_bits = depth.saturating_sub(i * 8).min(8);
            // Mask of the bits this byte takes from the random id.
            let mask = if fixed_bits == 8 {
                0
            } else {
                0xff_u8 >> fixed_bits
            };
            *byte |= random.0[i] & mask;
        }

        Id(bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Bitwise XOR of two ids.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Id(result)
    }

    /// XOR distance between this Id and another one.
    ///
    /// Distances are ids themselves and order like big-endian integers, so
    /// `a.distance(t) < b.distance(t)` means `a` is closer to `t` than `b`.
    pub fn distance(&self, other: &Id) -> Id {
        self.xor(other)
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// The distance is the number of bits after the common prefix.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn log_distance(&self, other: &Id) -> u8 {
        MAX_DISTANCE - self.common_prefix_len(other) as u8
    }

    /// Number of leading bits shared by both ids, `160` for equal ids.
    pub fn common_prefix_len(&self, other: &Id) -> usize {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                // leading zeros so far + leading zeros of this byte
                return i * 8 + (a ^ b).leading_zeros() as usize;
            }
        }

        ID_BITS
    }

    /// Value of the bit at `index`, where bit `0` is the most significant bit.
    pub fn bit(&self, index: usize) -> bool {
        let byte = self.0[index / 8];

        byte & (0x80 >> (index % 8)) != 0
    }

    /// Returns a copy of this id with the bit at `index` set to `value`.
    pub fn with_bit(mut self, index: usize, value: bool) -> Id {
        let mask = 0x80 >> (index % 8);

        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }

        self
    }

    /// Keeps the first `depth` bits and zeroes the rest.
    pub fn prefix(&self, depth: usize) -> Id {
        let depth = depth.min(ID_BITS);
        let mut bytes = self.0;

        for (i, byte) in bytes.iter_mut().enumerate() {
            let kept = depth.saturating_sub(i * 8).min(8);
            *byte &= match kept {
                0 => 0,
                8 => 0xff,
                n => !(0xff_u8 >> n),
            };
        }

        Id(bytes)
    }

    /// Returns `true` if this id starts with the first `depth` bits of `prefix`.
    pub fn has_prefix(&self, prefix: &Id, depth: usize) -> bool {
        self.common_prefix_len(prefix) >= depth.min(ID_BITS)
    }

    /// Orders `self` and `other` by their XOR distance to `target`.
    pub fn compare_by_distance(&self, other: &Id, target: &Id) -> Ordering {
        self.xor(target).cmp(&other.xor(target))
    }

    /// Returns `true` if `self` is strictly closer to `target` than `other`.
    pub fn is_closer(&self, other: &Id, target: &Id) -> bool {
        self.compare_by_distance(other, target) == Ordering::Less
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        if s.len() != ID_SIZE * 2 || !s.is_ascii() {
            return Err(Error::InvalidIdString(s.to_string()));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidIdString(s.to_string()))?;
        }

        Ok(Id(bytes))
    }
}
