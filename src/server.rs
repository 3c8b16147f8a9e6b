//! Turning incoming requests into responses.

use std::collections::HashSet;
use std::fmt::{Debug, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::common::{Contact, Id, ValueEntity};
use crate::database::Database;
use crate::messages::{
    FindNodeRequestArguments, FindValueRequestArguments, Message, MessageFactory, MessageType,
    RequestSpecific, StatsKind, StatusCode, StoreRequestArguments, StoreStatus,
};
use crate::routing_table::RoutingTable;

/// Dht server that can handle incoming requests
pub trait Server: Debug + Send + Sync {
    /// Handle an incoming request received from `from`.
    ///
    /// Returns the response to send back, or `None` to drop the request
    /// without answering.
    fn handle_request(&mut self, from: SocketAddr, request: &Message) -> Option<Message>;
}

#[derive(Debug)]
/// Default implementation of [Server] trait.
///
/// Answers from the shared [RoutingTable] and [Database], and learns every
/// sender it hears from.
pub struct DefaultServer {
    routing_table: Arc<RoutingTable>,
    database: Arc<Database>,
    factory: MessageFactory,
}

impl DefaultServer {
    pub fn new(
        routing_table: Arc<RoutingTable>,
        database: Arc<Database>,
        factory: MessageFactory,
    ) -> Self {
        DefaultServer {
            routing_table,
            database,
            factory,
        }
    }

    // === Getters ===

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    // === Public Methods ===

    /// Learns from a response to one of our requests.
    ///
    /// Returns `false` if the response does not answer a request sent to
    /// `from`, in which case it is ignored entirely.
    pub fn handle_response(&mut self, from: SocketAddr, response: &Message) -> bool {
        if response.is_request() || !self.factory.is_response_from(&response.message_id, from) {
            debug!(?from, message_id = ?response.message_id, "Unsolicited response");
            return false;
        }

        if !self.learn_sender(from, response) {
            return false;
        }

        for info in response.closer_contacts().unwrap_or_default() {
            if info.node_id == *self.routing_table.local_id() {
                continue;
            }

            if let Err(error) = self.routing_table.add(info.to_contact(), false) {
                trace!(?error, "Skipping closer contact");
            }
        }

        true
    }

    // === Private Methods ===

    /// Adds the sender as alive, returns `false` if it impersonates us.
    fn learn_sender(&self, from: SocketAddr, message: &Message) -> bool {
        let sender = message.contact.to_contact(from);

        match self.routing_table.add(sender, true) {
            Ok(outcome) => {
                trace!(?from, ?outcome, "Added sender");
                true
            }
            Err(error) => {
                warn!(?from, ?error, "Sender impersonates the local node");
                false
            }
        }
    }

    fn closest(&self, target: &Id, requester: &Id) -> Vec<Contact> {
        let mut exclude = HashSet::new();
        exclude.insert(*requester);

        self.routing_table
            .select(target, self.routing_table.config().k, &exclude)
    }

    fn handle_find_value(
        &self,
        from: SocketAddr,
        request: &Message,
        arguments: &FindValueRequestArguments,
    ) -> Message {
        let wanted: HashSet<&Id> = arguments.secondary_keys.iter().collect();

        let values: Vec<ValueEntity> = self
            .database
            .get(&arguments.target)
            .into_iter()
            .map(|(_, entity)| entity)
            .filter(|entity| !entity.is_tombstone())
            .filter(|entity| arguments.value_type.matches(entity.value().value_type))
            .filter(|entity| wanted.is_empty() || wanted.contains(entity.secondary_key()))
            .collect();

        if values.is_empty() {
            let contacts = self.closest(&arguments.target, request.author_id());

            return self
                .factory
                .create_find_node_response(request, from, &contacts);
        }

        let load = self.database.get_request_load(&arguments.target, true);

        self.factory
            .create_find_value_response(request, load, &values)
    }

    fn handle_store(
        &self,
        from: SocketAddr,
        request: &Message,
        arguments: &StoreRequestArguments,
    ) -> Option<Message> {
        if !self
            .factory
            .verify_security_token(from, arguments.token.as_deref())
        {
            debug!(?from, requester_id = ?request.author_id(), "Invalid token");
            return None;
        }

        let sender = request.contact.to_contact(from);

        let statuses = arguments
            .values
            .iter()
            .map(|value| {
                let entity = value.to_entity(sender.clone());
                let primary_key = *entity.primary_key();
                let secondary_key = *entity.secondary_key();

                if self.database.store(entity) {
                    StoreStatus {
                        primary_key,
                        secondary_key,
                        code: StatusCode::SUCCEEDED,
                        description: String::new(),
                    }
                } else {
                    StoreStatus {
                        primary_key,
                        secondary_key,
                        code: StatusCode::FAILED,
                        description: "Rejected".to_string(),
                    }
                }
            })
            .collect();

        Some(self.factory.create_store_response(request, statuses))
    }

    fn stats(&self, kind: StatsKind) -> String {
        let mut text = String::new();

        // Writing to a String can't fail.
        let _ = match kind {
            StatsKind::Statistics => writeln!(
                text,
                "contacts: {}\nbuckets: {}\nestimated size: {}\nkeys: {}\nvalues: {}",
                self.routing_table.size(),
                self.routing_table.bucket_count(),
                self.routing_table.estimated_size(),
                self.database.key_count(),
                self.database.value_count(),
            ),
            StatsKind::Database => self.database.values().iter().try_for_each(|entity| {
                writeln!(
                    text,
                    "{} {} {} {}",
                    entity.primary_key(),
                    entity.secondary_key(),
                    entity.value().value_type,
                    entity.value().data.len()
                )
            }),
            StatsKind::RoutingTable => self.routing_table.buckets().iter().try_for_each(|bucket| {
                writeln!(
                    text,
                    "{}/{} live: {} cached: {}",
                    bucket.prefix(),
                    bucket.depth(),
                    bucket.len(),
                    bucket.cache_len()
                )
            }),
        };

        text
    }
}

impl Server for DefaultServer {
    fn handle_request(&mut self, from: SocketAddr, request: &Message) -> Option<Message> {
        let request_specific = match &request.message_type {
            MessageType::Request(request_specific) => request_specific,
            MessageType::Response(_) => return None,
        };

        // Lazily rotate secrets before handling a request
        self.factory.rotate_tokens();

        if !self.learn_sender(from, request) {
            return None;
        }

        let response = match request_specific {
            RequestSpecific::Ping => self.factory.create_ping_response(
                request,
                from,
                self.routing_table.estimated_size(),
            ),
            RequestSpecific::FindNode(FindNodeRequestArguments { target }) => {
                let contacts = self.closest(target, request.author_id());

                self.factory
                    .create_find_node_response(request, from, &contacts)
            }
            RequestSpecific::FindValue(arguments) => {
                self.handle_find_value(from, request, arguments)
            }
            RequestSpecific::Store(arguments) => self.handle_store(from, request, arguments)?,
            RequestSpecific::Stats(kind) => {
                self.factory.create_stats_response(request, self.stats(*kind))
            }
        };

        Some(response)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use crate::common::{DhtValue, ValueType};
    use crate::config::{Config, DatabaseConfig, RoutingTableConfig};
    use crate::messages::ResponseSpecific;

    const CLIENT: &str = "8.8.8.8:6881";
    const SERVER: &str = "9.9.9.9:6881";

    fn server() -> DefaultServer {
        let local_id = Id::random();

        DefaultServer::new(
            Arc::new(RoutingTable::new(local_id, RoutingTableConfig::default())),
            Arc::new(Database::new(DatabaseConfig::default())),
            MessageFactory::new(local_id, &Config::default())
                .with_address(SERVER.parse().unwrap()),
        )
    }

    fn client() -> MessageFactory {
        MessageFactory::new(Id::random(), &Config::default()).with_address(CLIENT.parse().unwrap())
    }

    fn response_of(message: Message) -> ResponseSpecific {
        match message.message_type {
            MessageType::Response(response) => response,
            MessageType::Request(_) => panic!("expected a response"),
        }
    }

    fn find_node_token(server: &mut DefaultServer, client: &MessageFactory) -> Option<Bytes> {
        let from = CLIENT.parse().unwrap();
        let request = client.create_find_node_request(SERVER.parse().unwrap(), Id::random());

        match response_of(server.handle_request(from, &request).unwrap()) {
            ResponseSpecific::FindNode(arguments) => arguments.token,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ping_adds_sender() {
        let mut server = server();
        let client = client();

        let request = client.create_ping_request(SERVER.parse().unwrap());
        let response = server.handle_request(CLIENT.parse().unwrap(), &request).unwrap();

        assert_eq!(response.message_id, request.message_id);
        match response_of(response) {
            ResponseSpecific::Ping(arguments) => {
                assert_eq!(arguments.external_address, Some(CLIENT.parse().unwrap()));
            }
            other => panic!("unexpected {:?}", other),
        }

        let contact = server.routing_table().get(client.local_id()).unwrap();
        assert!(contact.is_alive());
    }

    #[test]
    fn firewalled_sender_is_not_added() {
        let mut server = server();
        let client = client().with_firewalled(true);

        let request = client.create_ping_request(SERVER.parse().unwrap());
        assert!(server.handle_request(CLIENT.parse().unwrap(), &request).is_some());

        assert!(!server.routing_table().contains_node(client.local_id()));
    }

    #[test]
    fn impersonating_sender_is_dropped() {
        let mut server = server();
        let local_id = *server.routing_table().local_id();
        let impostor = MessageFactory::new(local_id, &Config::default());

        let request = impostor.create_ping_request(SERVER.parse().unwrap());

        assert!(server.handle_request(CLIENT.parse().unwrap(), &request).is_none());
    }

    #[test]
    fn find_node_excludes_requester() {
        let mut server = server();
        let client = client();

        for n in 0..10 {
            server
                .routing_table()
                .add(Contact::alive(Id::random(), ([1, 1, 1, n], 6881).into()), true)
                .unwrap();
        }

        let request = client.create_find_node_request(SERVER.parse().unwrap(), *client.local_id());
        let response = server.handle_request(CLIENT.parse().unwrap(), &request).unwrap();

        match response_of(response) {
            ResponseSpecific::FindNode(arguments) => {
                assert_eq!(arguments.contacts.len(), 10);
                assert!(arguments.contacts.iter().all(|c| &c.node_id != client.local_id()));
                assert!(arguments.token.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn store_then_find_value() {
        let mut server = server();
        let client = client();
        let from: SocketAddr = CLIENT.parse().unwrap();

        let token = find_node_token(&mut server, &client);

        let key = Id::random();
        let creator = Contact::alive(*client.local_id(), from);
        let entity = ValueEntity::local(creator, key, DhtValue::new(ValueType::TEXT, 1, "hello"));

        let request = client.create_store_request(SERVER.parse().unwrap(), token, &[entity]);
        match response_of(server.handle_request(from, &request).unwrap()) {
            ResponseSpecific::Store(arguments) => {
                assert_eq!(arguments.statuses.len(), 1);
                assert_eq!(arguments.statuses[0].code, StatusCode::SUCCEEDED);
                assert_eq!(arguments.statuses[0].secondary_key, *client.local_id());
            }
            other => panic!("unexpected {:?}", other),
        }

        let request =
            client.create_find_value_request(SERVER.parse().unwrap(), key, &[], ValueType::ANY);
        match response_of(server.handle_request(from, &request).unwrap()) {
            ResponseSpecific::FindValue(arguments) => {
                assert_eq!(arguments.values.len(), 1);
                assert_eq!(arguments.values[0].value.data, Bytes::from_static(b"hello"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // Other types fall back to a find node response.
        let request =
            client.create_find_value_request(SERVER.parse().unwrap(), key, &[], ValueType::BINARY);
        match response_of(server.handle_request(from, &request).unwrap()) {
            ResponseSpecific::FindNode(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn store_with_invalid_token_is_dropped() {
        let mut server = server();
        let client = client();
        let from: SocketAddr = CLIENT.parse().unwrap();

        let creator = Contact::alive(*client.local_id(), from);
        let entity =
            ValueEntity::local(creator, Id::random(), DhtValue::new(ValueType::TEXT, 1, "v"));

        let request = client.create_store_request(
            SERVER.parse().unwrap(),
            Some(Bytes::from_static(&[0; 8])),
            &[entity.clone()],
        );
        assert!(server.handle_request(from, &request).is_none());

        let request = client.create_store_request(SERVER.parse().unwrap(), None, &[entity]);
        assert!(server.handle_request(from, &request).is_none());

        // Token issued to another address.
        let token = find_node_token(&mut server, &client);
        let creator = Contact::alive(*client.local_id(), from);
        let entity =
            ValueEntity::local(creator, Id::random(), DhtValue::new(ValueType::TEXT, 1, "v"));
        let request = client.create_store_request(SERVER.parse().unwrap(), token, &[entity]);
        assert!(server
            .handle_request("8.8.4.4:6881".parse().unwrap(), &request)
            .is_none());

        assert!(server.database().is_empty());
    }

    #[test]
    fn store_reports_rejections() {
        let mut server = server();
        let client = client();
        let from: SocketAddr = CLIENT.parse().unwrap();
        let token = find_node_token(&mut server, &client);

        // Indirect store on behalf of a creator at a private address.
        let creator = Contact::alive(Id::random(), "192.168.1.1:6881".parse().unwrap());
        let spoofed = ValueEntity::local(creator, Id::random(), DhtValue::new(ValueType::TEXT, 1, "v"));

        let request = client.create_store_request(SERVER.parse().unwrap(), token, &[spoofed]);
        match response_of(server.handle_request(from, &request).unwrap()) {
            ResponseSpecific::Store(arguments) => {
                assert_eq!(arguments.statuses[0].code, StatusCode::FAILED);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn stats() {
        let mut server = server();
        let client = client();

        let request = client.create_stats_request(SERVER.parse().unwrap(), StatsKind::Statistics);
        match response_of(server.handle_request(CLIENT.parse().unwrap(), &request).unwrap()) {
            ResponseSpecific::Stats(arguments) => {
                assert!(arguments.text.contains("contacts: 1"), "{}", arguments.text);
            }
            other => panic!("unexpected {:?}", other),
        }

        let request = client.create_stats_request(SERVER.parse().unwrap(), StatsKind::RoutingTable);
        match response_of(server.handle_request(CLIENT.parse().unwrap(), &request).unwrap()) {
            ResponseSpecific::Stats(arguments) => assert!(arguments.text.contains("live: 1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn responses_must_be_solicited() {
        let mut server = server();
        let peer = client();
        let from: SocketAddr = CLIENT.parse().unwrap();

        let request = server.factory().create_find_node_request(from, Id::random());

        let closer: Vec<Contact> = (0..3)
            .map(|n| Contact::alive(Id::random(), ([2, 2, 2, n], 6881).into()))
            .collect();
        let response = peer.create_find_node_response(&request, from, &closer);

        assert!(!server.handle_response("8.8.4.4:6881".parse().unwrap(), &response));
        assert!(server.routing_table().is_empty());

        assert!(server.handle_response(from, &response));
        assert!(server.routing_table().get(peer.local_id()).unwrap().is_alive());
        for contact in &closer {
            let known = server.routing_table().get(contact.node_id()).unwrap();
            assert!(known.is_unknown());
        }
        assert_eq!(server.routing_table().size(), 4);
    }
}
