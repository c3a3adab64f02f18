//! Partition-level end-to-end: route, drain, query, checkpoint, restore.

use serde_json::json;

use co_index::AttrKey;
use co_partition::{PartitionConfig, SegmentExpr, Table};
use co_types::{PropKind, NONE, PROP_EVENT};

fn table(partitions: usize) -> Table {
    let table = Table::new("events", partitions, PartitionConfig::default());
    {
        let mut catalog = table.catalog().write();
        catalog.create("sku", PropKind::Text, false, false).unwrap();
        catalog
            .create("amount", PropKind::Double, false, false)
            .unwrap();
        catalog
            .create("country", PropKind::Text, false, true)
            .unwrap();
    }
    table
}

fn submit(table: &Table, now: i64, row: serde_json::Value) {
    table.submit_insert(&row.to_string(), now).unwrap();
}

#[test]
fn inserts_route_drain_and_become_queryable() {
    let mut table = table(4);
    let now = 1_700_000_000_000;

    submit(
        &table,
        now,
        json!({"id": "Alice", "event": "view", "stamp": now, "sku": "A"}),
    );
    submit(
        &table,
        now,
        json!({"id": "alice", "event": "buy", "stamp": now + 1_000, "amount": 2.5}),
    );
    table.tick_all(now + 2_000);

    let pid = table.partition_for("alice");
    let partition = table.partition_mut(pid);
    let lin = partition.get_customer("ALICE").expect("alice exists");

    let doc = partition.read_grid(lin, None).unwrap();
    assert_eq!(doc["id"], "alice");
    let rows = doc["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["event"], "view");
    assert_eq!(rows[0]["sku"], "A");
    assert_eq!(rows[1]["event"], "buy");
    assert_eq!(rows[1]["amount"], 2.5);

    // Other partitions never saw the row.
    for id in 0..table.num_partitions() {
        if id != pid {
            assert!(table.partition(id).customers().is_empty());
        }
    }
}

#[test]
fn bad_rows_drop_without_poisoning_the_partition() {
    let mut table = table(1);
    let now = 1_700_000_000_000;

    submit(&table, now, json!({"id": "bob", "event": "view", "stamp": now}));
    // Unparseable stamp and a row without an id, interleaved.
    submit(
        &table,
        now,
        json!({"id": "bob", "event": "view", "stamp": "yesterday-ish"}),
    );
    table
        .side_log()
        .append(table.hash(), 0, "{ not json", now);
    submit(
        &table,
        now,
        json!({"id": "bob", "event": "buy", "stamp": now + 1}),
    );
    table.tick_all(now + 10);

    let partition = table.partition_mut(0);
    let lin = partition.get_customer("bob").unwrap();
    let doc = partition.read_grid(lin, None).unwrap();
    assert_eq!(doc["rows"].as_array().unwrap().len(), 2);
}

#[test]
fn segments_evaluate_over_the_index() {
    let mut table = table(1);
    let now = 1_700_000_000_000;

    for (uid, event) in [
        ("u1", "view"),
        ("u2", "view"),
        ("u2", "buy"),
        ("u3", "buy"),
    ] {
        submit(
            &table,
            now,
            json!({"id": uid, "event": event, "stamp": now}),
        );
    }
    table.tick_all(now + 10);

    let partition = table.partition_mut(0);
    let viewed = AttrKey {
        prop: PROP_EVENT,
        value: partition.attrs().resolve_text(PROP_EVENT, "view").unwrap(),
    };
    let bought = AttrKey {
        prop: PROP_EVENT,
        value: partition.attrs().resolve_text(PROP_EVENT, "buy").unwrap(),
    };

    let u1 = partition.get_customer("u1").unwrap() as usize;
    let u2 = partition.get_customer("u2").unwrap() as usize;
    let u3 = partition.get_customer("u3").unwrap() as usize;

    let viewed_and_bought = partition
        .evaluate_segment(&SegmentExpr::bits(viewed).and(SegmentExpr::bits(bought)));
    assert_eq!(viewed_and_bought.iter().collect::<Vec<_>>(), vec![u2]);

    let viewed_not_bought = partition
        .evaluate_segment(&SegmentExpr::bits(viewed).and_not(SegmentExpr::bits(bought)));
    assert_eq!(viewed_not_bought.iter().collect::<Vec<_>>(), vec![u1]);

    let never_viewed = partition.evaluate_segment(&SegmentExpr::bits(viewed).not());
    assert_eq!(never_viewed.iter().collect::<Vec<_>>(), vec![u3]);

    // Named segments park their result under the segment column.
    partition.define_segment("buyers", SegmentExpr::bits(bought));
    let handle = partition.handle();
    handle.send(co_partition::PartitionMsg::RefreshSegments);
    partition.tick(now + 20);

    let everyone = partition.evaluate_segment(&SegmentExpr::bits(AttrKey {
        prop: PROP_EVENT,
        value: NONE,
    }));
    assert_eq!(everyone.population(), 3);
}

#[test]
fn iterate_customers_visits_prepared_grids() {
    let mut table = table(1);
    let now = 1_700_000_000_000;

    for uid in ["a", "b", "c"] {
        submit(
            &table,
            now,
            json!({"id": uid, "event": "view", "stamp": now, "sku": uid}),
        );
    }
    table.tick_all(now + 10);

    let partition = table.partition_mut(0);
    let everyone = partition.evaluate_segment(&SegmentExpr::bits(AttrKey {
        prop: PROP_EVENT,
        value: NONE,
    }));

    let subset = vec!["stamp".to_owned(), "event".to_owned(), "sku".to_owned()];
    let mut visited = Vec::new();
    partition.iterate_customers(&everyone, Some(&subset), |lin, grid| {
        visited.push((lin, grid.num_rows()));
    });
    assert_eq!(visited, vec![(0, 1), (1, 1), (2, 1)]);
}

#[test]
fn cull_bounds_every_customer_and_cleans_the_index() {
    let config = PartitionConfig {
        event_max: 50,
        ..PartitionConfig::default()
    };
    let mut table = Table::new("events", 1, config);
    {
        let mut catalog = table.catalog().write();
        catalog.create("sku", PropKind::Text, false, false).unwrap();
    }

    let now = 1_700_000_000_000;
    for i in 0..10_000_i64 {
        let uid = format!("user{}", i % 100);
        submit(
            &table,
            now,
            json!({"id": uid, "event": "view", "stamp": now + i, "sku": format!("sku{i}")}),
        );
    }
    // Several drain slices may be needed.
    let partition = table.partition_mut(0);
    partition.drain_inserts(now + 20_000);

    assert_eq!(partition.customers().len(), 100);
    let everyone = partition.evaluate_segment(&SegmentExpr::bits(AttrKey {
        prop: PROP_EVENT,
        value: NONE,
    }));
    let mut checked = 0;
    partition.iterate_customers(&everyone, None, |_, grid| {
        assert!(grid.num_rows() <= 50);
        checked += 1;
    });
    assert_eq!(checked, 100);

    // user0's first sku (sku0) was culled away and de-indexed; its last
    // (sku9900) survives.
    let sku = table
        .catalog()
        .read()
        .property_by_name("sku")
        .unwrap()
        .id;
    let partition = table.partition_mut(0);
    let dead = partition.attrs().resolve_text(sku, "sku0").unwrap();
    let live = partition.attrs().resolve_text(sku, "sku9900").unwrap();
    let user0 = partition.get_customer("user0").unwrap() as usize;
    assert!(!partition
        .attrs_mut()
        .get_bits(AttrKey { prop: sku, value: dead })
        .test(user0));
    assert!(partition
        .attrs_mut()
        .get_bits(AttrKey { prop: sku, value: live })
        .test(user0));
}

#[test]
fn checkpoint_restore_round_trip() {
    let mut table = table(1);
    let now = 1_700_000_000_000;

    for i in 0..200 {
        submit(
            &table,
            now,
            json!({
                "id": format!("user{i}"),
                "event": if i % 2 == 0 { "view" } else { "buy" },
                "stamp": now + i,
                "sku": format!("sku{}", i % 10),
                "country": if i % 3 == 0 { "CA" } else { "US" },
            }),
        );
    }
    table.tick_all(now + 1_000);

    let bytes = table.partition_mut(0).checkpoint(false);

    // Restore into a fresh table sharing the same schema shape.
    let mut fresh = table;
    {
        let partition = fresh.partition_mut(0);
        partition.restore(&bytes, now + 2_000).unwrap();

        assert_eq!(partition.customers().len(), 200);
        // Linear order survives: uid -> linear id is unchanged.
        for i in (0..200).step_by(17) {
            let uid = format!("user{i}");
            assert_eq!(partition.get_customer(&uid), Some(i));
        }

        let viewed_key = AttrKey {
            prop: PROP_EVENT,
            value: partition.attrs().resolve_text(PROP_EVENT, "view").unwrap(),
        };
        let viewed = partition.evaluate_segment(&SegmentExpr::bits(viewed_key));
        assert_eq!(viewed.population(), 100);
        assert!(viewed.test(0));
        assert!(!viewed.test(1));

        // Grids expand from the restored records.
        let doc = partition.read_grid(3, None).unwrap();
        assert_eq!(doc["id"], "user3");
        assert_eq!(doc["rows"].as_array().unwrap().len(), 1);
    }
}

#[test]
fn checkpoint_with_sidelog_replays_unconsumed_rows() {
    let mut table = table(1);
    let now = 1_700_000_000_000;

    submit(&table, now, json!({"id": "a", "event": "view", "stamp": now}));
    table.tick_all(now + 10);
    // A row that has not been drained yet.
    submit(&table, now, json!({"id": "b", "event": "view", "stamp": now}));

    let bytes = table.partition_mut(0).checkpoint(true);

    let mut fresh = Table::new("events", 1, PartitionConfig::default());
    {
        let mut catalog = fresh.catalog().write();
        catalog.create("sku", PropKind::Text, false, false).unwrap();
        catalog
            .create("amount", PropKind::Double, false, false)
            .unwrap();
        catalog
            .create("country", PropKind::Text, false, true)
            .unwrap();
    }
    fresh
        .partition_mut(0)
        .restore(&bytes, now + 100)
        .unwrap();

    // The restored log replays from the head: both rows apply (the first
    // idempotently, it is already in the restored record).
    fresh.tick_all(now + 200);
    let partition = fresh.partition_mut(0);
    assert!(partition.get_customer("a").is_some());
    assert!(partition.get_customer("b").is_some());

    let doc = partition
        .read_grid(partition.get_customer("a").unwrap(), None)
        .unwrap();
    assert_eq!(doc["rows"].as_array().unwrap().len(), 1);
}
