//! Simulates a small network of in-memory nodes exchanging encoded messages,
//! then stores a value at the nodes closest to its key and looks it up.
//!
//! Run: `cargo run --example simulate -- --nodes 300`

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::Level;

use kadcore::messages::{Message, MessageFactory, MessageType, ResponseSpecific, StatusCode};
use kadcore::routing_table::RoutingEvent;
use kadcore::server::{DefaultServer, Server};
use kadcore::{
    Bytes, ClosestContacts, Config, Contact, Database, DhtValue, Id, RoutingTable, ValueEntity,
    ValueType,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of nodes in the simulated network
    #[arg(short, long, default_value_t = 200)]
    nodes: usize,

    /// Print debug logs
    #[arg(short, long)]
    verbose: bool,
}

struct Node {
    address: SocketAddr,
    server: DefaultServer,
}

fn address(index: usize) -> SocketAddr {
    let [_, b, c, d] = (index as u32).to_be_bytes();
    SocketAddr::from(([20, b, c, d], 6881))
}

fn index_of(address: SocketAddr) -> usize {
    match address {
        SocketAddr::V4(v4) => {
            let [_, b, c, d] = v4.ip().octets();
            u32::from_be_bytes([0, b, c, d]) as usize
        }
        SocketAddr::V6(_) => usize::MAX,
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = Config::default();
    let k = config.routing_table.k;

    let mut nodes: Vec<Node> = (0..cli.nodes.max(2))
        .map(|index| {
            let id = Id::random();
            let address = address(index);

            Node {
                address,
                server: DefaultServer::new(
                    Arc::new(
                        RoutingTable::new(id, config.routing_table.clone())
                            .with_local_address(address),
                    ),
                    Arc::new(Database::new(config.database.clone())),
                    MessageFactory::new(id, &config).with_address(address),
                ),
            }
        })
        .collect();

    println!("\n=== BOOTSTRAP ===");
    let start = Instant::now();

    let seed = Contact::new(*nodes[0].server.factory().local_id(), nodes[0].address);
    for index in 1..nodes.len() {
        let _ = nodes[index].server.routing_table().add(seed.clone(), false);

        let own_id = *nodes[index].server.factory().local_id();
        lookup(&mut nodes, index, own_id, k);
    }

    let pings = answer_pings(&mut nodes);

    let sizes: Vec<usize> = nodes.iter().map(|n| n.server.routing_table().size()).collect();
    println!(
        "Bootstrapped {} nodes in {:?}, {} liveness pings, average table size {:.1}",
        nodes.len(),
        start.elapsed(),
        pings,
        sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
    );

    let estimated = nodes[nodes.len() / 2].server.routing_table().estimated_size();
    println!("Estimated network size: {} (actual {})", estimated, nodes.len());

    println!("\n=== STORE ===");
    let key = Id::random();
    let publisher = 1;

    let (closest, tokens) = lookup(&mut nodes, publisher, key, k);

    let creator_id = *nodes[publisher].server.factory().local_id();
    let creator = Contact::alive(creator_id, nodes[publisher].address);
    let value = ValueEntity::local(creator, key, DhtValue::new(ValueType::TEXT, 1, "hello"));
    nodes[publisher].server.database().store(value.clone());

    let mut stored = 0;
    for contact in closest.contacts() {
        let to = index_of(contact.address());
        let token = tokens.get(&contact.address()).cloned().flatten();

        let request = nodes[publisher]
            .server
            .factory()
            .create_store_request(contact.address(), token, &[value.clone()]);

        if let Some(response) = exchange(&mut nodes, publisher, to, request) {
            if let MessageType::Response(ResponseSpecific::Store(arguments)) = response.message_type
            {
                stored += arguments
                    .statuses
                    .iter()
                    .filter(|s| s.code == StatusCode::SUCCEEDED)
                    .count();
            }
        }
    }
    nodes[publisher]
        .server
        .database()
        .published(&key, &creator_id, stored);
    println!("Stored at {} of {} closest nodes", stored, closest.len());

    println!("\n=== FIND VALUE ===");
    let reader = nodes.len() - 1;
    let (closest, _) = lookup(&mut nodes, reader, key, k);

    for contact in closest.contacts() {
        let to = index_of(contact.address());
        let request = nodes[reader].server.factory().create_find_value_request(
            contact.address(),
            key,
            &[],
            ValueType::ANY,
        );

        if let Some(response) = exchange(&mut nodes, reader, to, request) {
            if let MessageType::Response(ResponseSpecific::FindValue(arguments)) =
                response.message_type
            {
                for value in arguments.values {
                    println!(
                        "Found {:?} created by {} at {}",
                        String::from_utf8_lossy(&value.value.data),
                        value.creator.node_id,
                        contact.address()
                    );
                }
                break;
            }
        }
    }
}

/// Sends `request` from node `from` to node `to` and feeds the response back.
fn exchange(nodes: &mut [Node], from: usize, to: usize, request: Message) -> Option<Message> {
    let source = nodes[from].address;
    let destination = nodes.get(to)?.address;

    let request = Message::from_bytes(request.to_bytes().ok()?).ok()?;
    let response = nodes[to].server.handle_request(source, &request)?;

    let response = Message::from_bytes(response.to_bytes().ok()?).ok()?;
    nodes[from].server.handle_response(destination, &response);

    Some(response)
}

/// Iterative find node, returns the `k` closest contacts and the tokens
/// they handed out.
fn lookup(
    nodes: &mut [Node],
    from: usize,
    target: Id,
    k: usize,
) -> (ClosestContacts, HashMap<SocketAddr, Option<Bytes>>) {
    let mut closest = ClosestContacts::new(target);
    let mut queried = HashSet::new();
    let mut tokens = HashMap::new();

    let own_id = *nodes[from].server.factory().local_id();
    for contact in nodes[from]
        .server
        .routing_table()
        .select(&target, k, &HashSet::new())
    {
        closest.add(contact);
    }

    loop {
        let next: Vec<Contact> = closest
            .contacts()
            .iter()
            .filter(|c| !queried.contains(c.node_id()))
            .take(3)
            .cloned()
            .collect();

        if next.is_empty() {
            break;
        }

        for contact in next {
            queried.insert(*contact.node_id());

            let request = nodes[from]
                .server
                .factory()
                .create_find_node_request(contact.address(), target);

            let response = match exchange(nodes, from, index_of(contact.address()), request) {
                Some(response) => response,
                None => {
                    nodes[from].server.routing_table().handle_failure(contact.node_id());
                    continue;
                }
            };

            if let MessageType::Response(ResponseSpecific::FindNode(arguments)) =
                response.message_type
            {
                tokens.insert(contact.address(), arguments.token);

                for info in arguments.contacts {
                    if info.node_id != own_id {
                        closest.add(info.to_contact());
                    }
                }
            }
        }

        closest.truncate(k);
    }

    (closest, tokens)
}

/// Answers the liveness pings every routing table asked for.
fn answer_pings(nodes: &mut [Node]) -> usize {
    let mut count = 0;

    for from in 0..nodes.len() {
        let events: Vec<RoutingEvent> = nodes[from].server.routing_table().events().try_iter().collect();

        for event in events {
            if let RoutingEvent::Ping(contact) = event {
                let request = nodes[from].server.factory().create_ping_request(contact.address());

                if exchange(nodes, from, index_of(contact.address()), request).is_none() {
                    nodes[from].server.routing_table().handle_failure(contact.node_id());
                }
                count += 1;
            }
        }
    }

    count
}
