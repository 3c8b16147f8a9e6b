//! Binary wire messages exchanged between nodes.
//!
//! Every message starts with the same envelope: message id, opcode, protocol
//! version, a size field and the sender's descriptor. The body depends on
//! the opcode. All integers are big-endian.

mod decode;
mod encode;
mod factory;

use bytes::Bytes;
use std::convert::TryFrom;
use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddr;

use rand::Rng;

use crate::common::{Contact, DhtValue, Id, ValueEntity, ValueType, Vendor, Version};

pub use factory::MessageFactory;

/// Size of a [MessageId] in bytes.
pub const MESSAGE_ID_SIZE: usize = 20;

/// Largest number of entries any list in a message may carry.
pub const MAX_LIST_LEN: usize = u8::MAX as usize;
/// Largest security token in bytes.
pub const MAX_TOKEN_LEN: usize = u8::MAX as usize;
/// Largest value payload or text in bytes.
pub const MAX_DATA_LEN: usize = u16::MAX as usize;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Reasons a buffer could not be decoded into a [Message].
pub enum DecodeError {
    #[error("Message is truncated")]
    Truncated,

    #[error("Unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("Unknown stats kind {0}")]
    UnknownStatsKind(u8),

    #[error("Size field does not match the message length")]
    LengthMismatch,

    #[error("Invalid socket address length {0}")]
    InvalidAddressLength(u8),

    #[error("Contact without a socket address")]
    MissingAddress,

    #[error("Integer of {0} bytes does not fit in 128 bits")]
    BigIntegerTooLarge(u8),

    #[error("Text is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Fields that do not fit their length prefix on the wire.
pub enum EncodeError {
    #[error("List of {0} entries exceeds {max}", max = MAX_LIST_LEN)]
    TooManyEntries(usize),

    #[error("Token of {0} bytes exceeds {max}", max = MAX_TOKEN_LEN)]
    TokenTooLong(usize),

    #[error("Value of {0} bytes exceeds {max}", max = MAX_DATA_LEN)]
    ValueTooLarge(usize),

    #[error("Text of {0} bytes exceeds {max}", max = MAX_DATA_LEN)]
    TextTooLong(usize),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
/// Identifies a request and the response echoing it.
///
/// The first 4 bytes may carry a tag bound to the destination address,
/// see [crate::tokens::MessageIdTagger].
pub struct MessageId(pub [u8; MESSAGE_ID_SIZE]);

impl MessageId {
    pub fn random() -> MessageId {
        MessageId(rand::thread_rng().gen())
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }

    pub fn tag(&self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }

    pub fn with_tag(mut self, tag: [u8; 4]) -> Self {
        self.0[..4].copy_from_slice(&tag);
        self
    }
}

impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    PingRequest = 0x01,
    PingResponse = 0x02,
    StoreRequest = 0x03,
    StoreResponse = 0x04,
    FindNodeRequest = 0x05,
    FindNodeResponse = 0x06,
    FindValueRequest = 0x07,
    FindValueResponse = 0x08,
    StatsRequest = 0x09,
    StatsResponse = 0x0A,
}

impl TryFrom<u8> for OpCode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(OpCode::PingRequest),
            0x02 => Ok(OpCode::PingResponse),
            0x03 => Ok(OpCode::StoreRequest),
            0x04 => Ok(OpCode::StoreResponse),
            0x05 => Ok(OpCode::FindNodeRequest),
            0x06 => Ok(OpCode::FindNodeResponse),
            0x07 => Ok(OpCode::FindValueRequest),
            0x08 => Ok(OpCode::FindValueResponse),
            0x09 => Ok(OpCode::StatsRequest),
            0x0A => Ok(OpCode::StatsResponse),
            _ => Err(DecodeError::UnknownOpcode(value)),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub message_id: MessageId,

    /// Protocol version of the sender.
    pub version: u16,

    /// The sender as it describes itself.
    pub contact: MessageContact,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    FindValue(FindValueRequestArguments),
    Store(StoreRequestArguments),
    Stats(StatsKind),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Ping(PingResponseArguments),
    FindNode(FindNodeResponseArguments),
    FindValue(FindValueResponseArguments),
    Store(StoreResponseArguments),
    Stats(StatsResponseArguments),
}

// === Sender ===

#[derive(Debug, PartialEq, Eq, Clone)]
/// Sender descriptor carried in every envelope.
pub struct MessageContact {
    pub vendor: Vendor,
    pub version: Version,
    pub node_id: Id,
    /// Where the sender accepts messages, absent if it does not know yet.
    pub address: Option<SocketAddr>,
    pub instance_id: u8,
    pub flags: u8,
}

impl MessageContact {
    /// The sender as an alive [Contact], falling back to the address the
    /// message came from.
    pub fn to_contact(&self, source: SocketAddr) -> Contact {
        Contact::alive(self.node_id, self.address.unwrap_or(source))
            .with_vendor(self.vendor)
            .with_version(self.version)
            .with_instance_id(self.instance_id)
            .with_flags(self.flags)
    }
}

impl From<&Contact> for MessageContact {
    fn from(contact: &Contact) -> Self {
        MessageContact {
            vendor: contact.vendor(),
            version: contact.version(),
            node_id: *contact.node_id(),
            address: Some(contact.address()),
            instance_id: contact.instance_id(),
            flags: contact.flags(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// A contact as listed in find-node responses and value creators.
pub struct ContactInfo {
    pub vendor: Vendor,
    pub version: Version,
    pub node_id: Id,
    pub address: SocketAddr,
}

impl ContactInfo {
    /// A [Contact] we only heard of.
    pub fn to_contact(&self) -> Contact {
        Contact::new(self.node_id, self.address)
            .with_vendor(self.vendor)
            .with_version(self.version)
    }
}

impl From<&Contact> for ContactInfo {
    fn from(contact: &Contact) -> Self {
        ContactInfo {
            vendor: contact.vendor(),
            version: contact.version(),
            node_id: *contact.node_id(),
            address: contact.address(),
        }
    }
}

// === Values ===

#[derive(Debug, PartialEq, Eq, Clone)]
/// A [ValueEntity] as it travels on the wire.
pub struct StoredValue {
    pub creator: ContactInfo,
    pub primary_key: Id,
    pub value: DhtValue,
}

impl StoredValue {
    /// Rebuilds the entity on the receiving side.
    pub fn to_entity(&self, sender: Contact) -> ValueEntity {
        ValueEntity::remote(self.creator.to_contact(), sender, self.primary_key, self.value.clone())
    }
}

impl From<&ValueEntity> for StoredValue {
    fn from(entity: &ValueEntity) -> Self {
        StoredValue {
            creator: ContactInfo::from(entity.creator()),
            primary_key: *entity.primary_key(),
            value: entity.value().clone(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const SUCCEEDED: StatusCode = StatusCode(0x0001);
    pub const FAILED: StatusCode = StatusCode(0x0002);
}

impl Debug for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            StatusCode::SUCCEEDED => write!(f, "SUCCEEDED"),
            StatusCode::FAILED => write!(f, "FAILED"),
            StatusCode(code) => write!(f, "StatusCode({:#06x})", code),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// Outcome of storing one value.
pub struct StoreStatus {
    pub primary_key: Id,
    pub secondary_key: Id,
    pub code: StatusCode,
    pub description: String,
}

// === PING ===

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    /// The requester's address as seen by the responder.
    pub external_address: Option<SocketAddr>,
    pub estimated_size: u128,
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    /// Token the requester must present to store at the responder.
    pub token: Option<Bytes>,
    pub contacts: Vec<ContactInfo>,
}

// === FIND_VALUE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueRequestArguments {
    pub target: Id,
    /// Only return values of these creators, all of them if empty.
    pub secondary_keys: Vec<Id>,
    pub value_type: ValueType,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindValueResponseArguments {
    pub request_load: f32,
    pub values: Vec<StoredValue>,
    /// Secondary keys of values that did not fit in this response.
    pub secondary_keys: Vec<Id>,
}

// === STORE ===

#[derive(Debug, PartialEq, Clone)]
pub struct StoreRequestArguments {
    pub token: Option<Bytes>,
    pub values: Vec<StoredValue>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct StoreResponseArguments {
    pub statuses: Vec<StoreStatus>,
}

// === STATS ===

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatsKind {
    Statistics = 0,
    Database = 1,
    RoutingTable = 2,
}

impl TryFrom<u8> for StatsKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatsKind::Statistics),
            1 => Ok(StatsKind::Database),
            2 => Ok(StatsKind::RoutingTable),
            _ => Err(DecodeError::UnknownStatsKind(value)),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct StatsResponseArguments {
    pub text: String,
}

impl Message {
    /// Encodes the message, failing if a list, token, value or text is
    /// longer than its length prefix allows. Messages built by a
    /// [MessageFactory] always fit.
    pub fn to_bytes(&self) -> Result<Bytes, EncodeError> {
        encode::encode(self)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message, DecodeError> {
        decode::decode(bytes.as_ref())
    }

    pub fn opcode(&self) -> OpCode {
        match &self.message_type {
            MessageType::Request(request) => match request {
                RequestSpecific::Ping => OpCode::PingRequest,
                RequestSpecific::FindNode(_) => OpCode::FindNodeRequest,
                RequestSpecific::FindValue(_) => OpCode::FindValueRequest,
                RequestSpecific::Store(_) => OpCode::StoreRequest,
                RequestSpecific::Stats(_) => OpCode::StatsRequest,
            },
            MessageType::Response(response) => match response {
                ResponseSpecific::Ping(_) => OpCode::PingResponse,
                ResponseSpecific::FindNode(_) => OpCode::FindNodeResponse,
                ResponseSpecific::FindValue(_) => OpCode::FindValueResponse,
                ResponseSpecific::Store(_) => OpCode::StoreResponse,
                ResponseSpecific::Stats(_) => OpCode::StatsResponse,
            },
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.message_type, MessageType::Request(_))
    }

    /// Return the Id of the sender of the Message
    pub fn author_id(&self) -> &Id {
        &self.contact.node_id
    }

    /// If the response contains contacts closer to the target, return them.
    pub fn closer_contacts(&self) -> Option<&[ContactInfo]> {
        match &self.message_type {
            MessageType::Response(ResponseSpecific::FindNode(arguments)) => {
                Some(&arguments.contacts)
            }
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&Bytes> {
        match &self.message_type {
            MessageType::Response(ResponseSpecific::FindNode(arguments)) => {
                arguments.token.as_ref()
            }
            MessageType::Request(RequestSpecific::Store(arguments)) => arguments.token.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sender() -> MessageContact {
        MessageContact {
            vendor: Vendor::from_code(b"KADC"),
            version: Version::new(0, 3),
            node_id: Id::random(),
            address: Some("99.100.101.102:1030".parse().unwrap()),
            instance_id: 7,
            flags: 0,
        }
    }

    fn message(message_type: MessageType) -> Message {
        Message {
            message_id: MessageId::random(),
            version: 1,
            contact: sender(),
            message_type,
        }
    }

    fn contact_info(n: u8) -> ContactInfo {
        ContactInfo {
            vendor: Vendor::from_code(b"LIME"),
            version: Version::new(1, n),
            node_id: Id::random(),
            address: ([49, 50, 52, n], 5354).into(),
        }
    }

    fn stored_value(n: u8) -> StoredValue {
        StoredValue {
            creator: contact_info(n),
            primary_key: Id::random(),
            value: DhtValue::new(ValueType::TEXT, u16::from(n), vec![n; n as usize]),
        }
    }

    fn assert_round_trip(original: Message) {
        let bytes = original.to_bytes().unwrap();
        let parsed = Message::from_bytes(&bytes).unwrap();

        assert_eq!(parsed, original);
    }

    #[test]
    fn test_ping_request() {
        assert_round_trip(message(MessageType::Request(RequestSpecific::Ping)));
    }

    #[test]
    fn test_ping_request_without_address() {
        let mut original = message(MessageType::Request(RequestSpecific::Ping));
        original.contact.address = None;

        assert_round_trip(original);
    }

    #[test]
    fn test_ping_response() {
        assert_round_trip(message(MessageType::Response(ResponseSpecific::Ping(
            PingResponseArguments {
                external_address: Some("[2001:db8::1]:6881".parse().unwrap()),
                estimated_size: 1_234_567,
            },
        ))));

        assert_round_trip(message(MessageType::Response(ResponseSpecific::Ping(
            PingResponseArguments {
                external_address: None,
                estimated_size: 0,
            },
        ))));

        assert_round_trip(message(MessageType::Response(ResponseSpecific::Ping(
            PingResponseArguments {
                external_address: None,
                estimated_size: u128::MAX,
            },
        ))));
    }

    #[test]
    fn test_find_node_request() {
        assert_round_trip(message(MessageType::Request(RequestSpecific::FindNode(
            FindNodeRequestArguments {
                target: Id::random(),
            },
        ))));
    }

    #[test]
    fn test_find_node_response() {
        assert_round_trip(message(MessageType::Response(ResponseSpecific::FindNode(
            FindNodeResponseArguments {
                token: Some(Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8])),
                contacts: (0..20).map(contact_info).collect(),
            },
        ))));
    }

    #[test]
    fn test_find_node_response_empty() {
        assert_round_trip(message(MessageType::Response(ResponseSpecific::FindNode(
            FindNodeResponseArguments {
                token: None,
                contacts: vec![],
            },
        ))));
    }

    #[test]
    fn test_find_node_response_max_contacts() {
        assert_round_trip(message(MessageType::Response(ResponseSpecific::FindNode(
            FindNodeResponseArguments {
                token: Some(Bytes::from_static(b"token")),
                contacts: (0..u8::MAX).map(contact_info).collect(),
            },
        ))));
    }

    #[test]
    fn test_find_value_request() {
        assert_round_trip(message(MessageType::Request(RequestSpecific::FindValue(
            FindValueRequestArguments {
                target: Id::random(),
                secondary_keys: vec![Id::random(), Id::random()],
                value_type: ValueType::ANY,
            },
        ))));

        assert_round_trip(message(MessageType::Request(RequestSpecific::FindValue(
            FindValueRequestArguments {
                target: Id::random(),
                secondary_keys: (0..MAX_LIST_LEN).map(|_| Id::random()).collect(),
                value_type: ValueType::TEXT,
            },
        ))));
    }

    #[test]
    fn lists_over_count_ceiling_do_not_encode() {
        let message = message(MessageType::Request(RequestSpecific::FindValue(
            FindValueRequestArguments {
                target: Id::random(),
                secondary_keys: (0..MAX_LIST_LEN + 1).map(|_| Id::random()).collect(),
                value_type: ValueType::ANY,
            },
        )));
        assert_eq!(message.to_bytes(), Err(EncodeError::TooManyEntries(256)));

        let message = message_with_contacts(300);
        assert_eq!(message.to_bytes(), Err(EncodeError::TooManyEntries(300)));
    }

    fn message_with_contacts(count: usize) -> Message {
        message(MessageType::Response(ResponseSpecific::FindNode(
            FindNodeResponseArguments {
                token: None,
                contacts: (0..count).map(|n| contact_info(n as u8)).collect(),
            },
        )))
    }

    #[test]
    fn test_find_value_response() {
        assert_round_trip(message(MessageType::Response(ResponseSpecific::FindValue(
            FindValueResponseArguments {
                request_load: 2.5,
                values: (0..3).map(stored_value).collect(),
                secondary_keys: vec![Id::random()],
            },
        ))));

        assert_round_trip(message(MessageType::Response(ResponseSpecific::FindValue(
            FindValueResponseArguments {
                request_load: 0.0,
                values: vec![],
                secondary_keys: vec![],
            },
        ))));
    }

    #[test]
    fn test_store_request() {
        assert_round_trip(message(MessageType::Request(RequestSpecific::Store(
            StoreRequestArguments {
                token: Some(Bytes::from_static(&[9; 8])),
                values: (0..u8::MAX).map(stored_value).collect(),
            },
        ))));

        assert_round_trip(message(MessageType::Request(RequestSpecific::Store(
            StoreRequestArguments {
                token: None,
                values: vec![],
            },
        ))));
    }

    #[test]
    fn test_store_response() {
        assert_round_trip(message(MessageType::Response(ResponseSpecific::Store(
            StoreResponseArguments {
                statuses: vec![
                    StoreStatus {
                        primary_key: Id::random(),
                        secondary_key: Id::random(),
                        code: StatusCode::SUCCEEDED,
                        description: String::new(),
                    },
                    StoreStatus {
                        primary_key: Id::random(),
                        secondary_key: Id::random(),
                        code: StatusCode::FAILED,
                        description: "Quota exceeded, ünïcode".to_string(),
                    },
                ],
            },
        ))));
    }

    #[test]
    fn test_stats() {
        for kind in [StatsKind::Statistics, StatsKind::Database, StatsKind::RoutingTable].iter() {
            assert_round_trip(message(MessageType::Request(RequestSpecific::Stats(*kind))));
        }

        assert_round_trip(message(MessageType::Response(ResponseSpecific::Stats(
            StatsResponseArguments {
                text: "size: 42".to_string(),
            },
        ))));
    }

    #[test]
    fn opcodes() {
        let ping = message(MessageType::Request(RequestSpecific::Ping));
        assert_eq!(ping.opcode(), OpCode::PingRequest);
        assert!(ping.is_request());

        for code in 0x01..=0x0A_u8 {
            assert_eq!(OpCode::try_from(code).unwrap() as u8, code);
        }
        assert_eq!(OpCode::try_from(0x0B), Err(DecodeError::UnknownOpcode(0x0B)));
        assert_eq!(OpCode::try_from(0x00), Err(DecodeError::UnknownOpcode(0x00)));
    }

    #[test]
    fn message_id_tag() {
        let id = MessageId::random().with_tag([1, 2, 3, 4]);

        assert_eq!(id.tag(), [1, 2, 3, 4]);
    }

    #[test]
    fn sender_to_contact() {
        let mut sender = sender();
        let source: SocketAddr = "1.2.3.4:5".parse().unwrap();

        let contact = sender.to_contact(source);
        assert!(contact.is_alive());
        assert_eq!(Some(contact.address()), sender.address);
        assert_eq!(contact.instance_id(), 7);

        sender.address = None;
        assert_eq!(sender.to_contact(source).address(), source);
    }
}
