//! Hammers the routing table and the database from many threads and checks
//! their invariants hold afterwards.
//!
//! Run with: cargo test --test concurrency

use std::collections::HashSet;
use std::net::SocketAddr;

use kadcore::config::{DatabaseConfig, RoutingTableConfig};
use kadcore::{Contact, Database, DhtValue, Id, RoutingTable, ValueEntity, ValueType};
use rayon::prelude::*;

fn address(n: u32) -> SocketAddr {
    let [_, b, c, d] = n.to_be_bytes();
    SocketAddr::from(([11, b, c, d], 6881))
}

fn assert_table_invariants(table: &RoutingTable) {
    let config = table.config();
    let buckets = table.buckets();

    assert_eq!(
        table.size(),
        buckets.iter().map(|b| b.len()).sum::<usize>(),
        "size is the sum of live contacts"
    );

    let mut seen = HashSet::new();
    for bucket in &buckets {
        assert!(bucket.len() <= config.k, "bucket over capacity");
        assert!(bucket.cache_len() <= config.max_cache_size, "cache over capacity");

        for contact in bucket.contacts().iter().chain(bucket.cached_contacts().iter()) {
            assert!(bucket.covers(contact.node_id()), "contact in the wrong bucket");
            assert!(seen.insert(*contact.node_id()), "duplicate contact");
        }
    }
}

#[test]
fn concurrent_routing_table() {
    let table = RoutingTable::new(Id::random(), RoutingTableConfig::default());

    (0..5_000_u32).into_par_iter().for_each(|n| {
        let id = Id::random();
        let _ = table.add(Contact::new(id, address(n)), n % 3 != 0);

        match n % 4 {
            0 => {
                let target = Id::random();
                let selected = table.select(&target, 20, &HashSet::new());

                let distances: Vec<Id> =
                    selected.iter().map(|c| c.node_id().distance(&target)).collect();
                assert!(distances.windows(2).all(|w| w[0] <= w[1]));
            }
            1 => {
                table.handle_failure(&id);
            }
            2 => {
                table.refresh_buckets(false);
            }
            _ => {
                let _ = table.get(&id);
            }
        }
    });

    assert_table_invariants(&table);
    assert!(table.bucket_count() > 1);
}

#[test]
fn concurrent_database() {
    let config = DatabaseConfig {
        max_values_per_address: 3,
        ..DatabaseConfig::default()
    };
    let database = Database::new(config);

    let stored: usize = (0..2_000_u32)
        .into_par_iter()
        .map(|n| {
            // 200 creators on distinct networks, 10 attempts each.
            let creator_index = n % 200;
            let creator = Contact::alive(
                Id::from_bytes([creator_index as u8; 20]).unwrap(),
                SocketAddr::from(([12, (creator_index / 256) as u8, creator_index as u8, 1], 6881)),
            );

            let entity = ValueEntity::remote(
                creator.clone(),
                creator,
                Id::random(),
                DhtValue::new(ValueType::TEST, 0, n.to_be_bytes().to_vec()),
            );

            database.store(entity) as usize
        })
        .sum();

    // Every creator got exactly its quota in, whatever the interleaving.
    assert_eq!(stored, 200 * 3);
    assert_eq!(database.value_count(), stored);
    assert_eq!(database.key_count(), stored);
}
