//! Builds outgoing [Message]s on behalf of the local node.
use bytes::Bytes;
use std::net::SocketAddr;

use rand::Rng;
use tracing::debug;

use super::{
    ContactInfo, FindNodeRequestArguments, FindNodeResponseArguments, FindValueRequestArguments,
    FindValueResponseArguments, Message, MessageContact, MessageId, MessageType,
    PingResponseArguments, RequestSpecific, ResponseSpecific, StatsKind, StatsResponseArguments,
    StoreRequestArguments, StoreResponseArguments, StoreStatus, StoredValue, MAX_DATA_LEN,
    MAX_LIST_LEN,
};
use crate::common::{Contact, Id, ValueEntity, ValueType, FIREWALLED_FLAG};
use crate::config::Config;
use crate::tokens::{MessageIdTagger, Tokens};

#[derive(Debug)]
/// Creates requests tagged for their destination and responses echoing
/// the request they answer, all signed with the local node's descriptor.
///
/// Also issues and checks the security tokens carried by find node
/// responses and store requests.
///
/// Every list, value and text it puts in a message fits the wire format,
/// so [Message::to_bytes] never fails on its output.
/// # Example
/// ```
/// use kadcore::{Config, Id};
/// use kadcore::messages::MessageFactory;
///
/// let factory = MessageFactory::new(Id::random(), &Config::default());
/// let destination = "1.2.3.4:6881".parse().unwrap();
///
/// let ping = factory.create_ping_request(destination);
///
/// assert!(factory.is_response_from(&ping.message_id, destination));
/// ```
pub struct MessageFactory {
    local: MessageContact,
    protocol_version: u16,
    tagger: MessageIdTagger,
    tokens: Tokens,
}

impl MessageFactory {
    pub fn new(local_id: Id, config: &Config) -> Self {
        MessageFactory {
            local: MessageContact {
                vendor: config.vendor,
                version: config.version,
                node_id: local_id,
                address: None,
                instance_id: rand::thread_rng().gen(),
                flags: 0,
            },
            protocol_version: config.protocol_version,
            tagger: MessageIdTagger::new(),
            tokens: Tokens::new(),
        }
    }

    /// Address advertised to peers.
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.local.address = Some(address);
        self
    }

    pub fn with_firewalled(mut self, firewalled: bool) -> Self {
        if firewalled {
            self.local.flags |= FIREWALLED_FLAG;
        } else {
            self.local.flags &= !FIREWALLED_FLAG;
        }
        self
    }

    // === Getters ===

    pub fn local(&self) -> &MessageContact {
        &self.local
    }

    pub fn local_id(&self) -> &Id {
        &self.local.node_id
    }

    /// Returns `true` if `id` belongs to a request we sent to `source`.
    pub fn is_response_from(&self, id: &MessageId, source: SocketAddr) -> bool {
        self.tagger.verify(id, source)
    }

    pub fn tokens(&self) -> &Tokens {
        &self.tokens
    }

    // === Security Tokens ===

    /// Rotates the token secrets once they are due.
    pub fn rotate_tokens(&mut self) {
        if self.tokens.should_update() {
            self.tokens.rotate()
        }
    }

    /// Token a requester at `address` must present to store values here.
    pub fn security_token(&self, address: SocketAddr) -> Bytes {
        Bytes::copy_from_slice(&self.tokens.generate_token(address))
    }

    pub fn verify_security_token(&self, address: SocketAddr, token: Option<&[u8]>) -> bool {
        token
            .map(|token| self.tokens.validate(address, token))
            .unwrap_or(false)
    }

    /// Token confirming the request `message_id` from `address` that asked
    /// for `count` results.
    pub fn confirmation_token(
        &self,
        address: SocketAddr,
        message_id: &MessageId,
        count: usize,
    ) -> Bytes {
        Bytes::copy_from_slice(&self.tokens.generate_bound(address, message_id, count))
    }

    pub fn verify_confirmation_token(
        &self,
        address: SocketAddr,
        message_id: &MessageId,
        count: usize,
        token: &[u8],
    ) -> bool {
        self.tokens.validate_bound(address, message_id, count, token)
    }

    // === Requests ===

    pub fn create_ping_request(&self, destination: SocketAddr) -> Message {
        self.request(destination, RequestSpecific::Ping)
    }

    pub fn create_find_node_request(&self, destination: SocketAddr, target: Id) -> Message {
        self.request(
            destination,
            RequestSpecific::FindNode(FindNodeRequestArguments { target }),
        )
    }

    pub fn create_find_value_request(
        &self,
        destination: SocketAddr,
        target: Id,
        secondary_keys: &[Id],
        value_type: ValueType,
    ) -> Message {
        self.request(
            destination,
            RequestSpecific::FindValue(FindValueRequestArguments {
                target,
                secondary_keys: bounded(secondary_keys).to_vec(),
                value_type,
            }),
        )
    }

    pub fn create_store_request(
        &self,
        destination: SocketAddr,
        token: Option<Bytes>,
        values: &[ValueEntity],
    ) -> Message {
        self.request(
            destination,
            RequestSpecific::Store(StoreRequestArguments {
                token,
                values: bounded(&encodable(values))
                    .iter()
                    .map(StoredValue::from)
                    .collect(),
            }),
        )
    }

    pub fn create_stats_request(&self, destination: SocketAddr, kind: StatsKind) -> Message {
        self.request(destination, RequestSpecific::Stats(kind))
    }

    // === Responses ===

    pub fn create_ping_response(
        &self,
        request: &Message,
        external_address: SocketAddr,
        estimated_size: u128,
    ) -> Message {
        self.response(
            request,
            ResponseSpecific::Ping(PingResponseArguments {
                external_address: Some(external_address),
                estimated_size,
            }),
        )
    }

    /// Answers `requester` with `contacts` and a fresh security token.
    pub fn create_find_node_response(
        &self,
        request: &Message,
        requester: SocketAddr,
        contacts: &[Contact],
    ) -> Message {
        self.response(
            request,
            ResponseSpecific::FindNode(FindNodeResponseArguments {
                token: Some(self.security_token(requester)),
                contacts: bounded(contacts).iter().map(ContactInfo::from).collect(),
            }),
        )
    }

    /// Values beyond the list limit are announced by secondary key only.
    pub fn create_find_value_response(
        &self,
        request: &Message,
        request_load: f32,
        values: &[ValueEntity],
    ) -> Message {
        let values = encodable(values);
        let (included, rest) = values.split_at(values.len().min(MAX_LIST_LEN));

        self.response(
            request,
            ResponseSpecific::FindValue(FindValueResponseArguments {
                request_load,
                values: included.iter().map(StoredValue::from).collect(),
                secondary_keys: bounded(rest).iter().map(|e| *e.secondary_key()).collect(),
            }),
        )
    }

    pub fn create_store_response(&self, request: &Message, statuses: Vec<StoreStatus>) -> Message {
        let mut statuses = statuses;
        statuses.truncate(MAX_LIST_LEN);
        for status in statuses.iter_mut() {
            truncate_text(&mut status.description);
        }

        self.response(
            request,
            ResponseSpecific::Store(StoreResponseArguments { statuses }),
        )
    }

    pub fn create_stats_response(&self, request: &Message, text: String) -> Message {
        let mut text = text;
        truncate_text(&mut text);

        self.response(
            request,
            ResponseSpecific::Stats(StatsResponseArguments { text }),
        )
    }

    // === Private Methods ===

    fn request(&self, destination: SocketAddr, request: RequestSpecific) -> Message {
        Message {
            message_id: self.tagger.create(destination),
            version: self.protocol_version,
            contact: self.local.clone(),
            message_type: MessageType::Request(request),
        }
    }

    fn response(&self, request: &Message, response: ResponseSpecific) -> Message {
        Message {
            message_id: request.message_id,
            version: self.protocol_version,
            contact: self.local.clone(),
            message_type: MessageType::Response(response),
        }
    }
}

fn bounded<T>(items: &[T]) -> &[T] {
    &items[..items.len().min(MAX_LIST_LEN)]
}

/// Values whose payload fits a 2-byte length.
fn encodable(values: &[ValueEntity]) -> Vec<ValueEntity> {
    values
        .iter()
        .filter(|entity| {
            let fits = entity.value().data.len() <= MAX_DATA_LEN;
            if !fits {
                debug!(primary_key = ?entity.primary_key(), "Skipping oversized value");
            }
            fits
        })
        .cloned()
        .collect()
}

/// Cuts `text` at a char boundary to fit a 2-byte length.
fn truncate_text(text: &mut String) {
    if text.len() <= MAX_DATA_LEN {
        return;
    }

    let mut len = MAX_DATA_LEN;
    while !text.is_char_boundary(len) {
        len -= 1;
    }
    text.truncate(len);
}
