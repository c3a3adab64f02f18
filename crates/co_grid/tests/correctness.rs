//! End-to-end grid behavior: insert idempotence, ordering, culling, props.

use std::sync::Arc;

use serde_json::json;

use co_alloc::BucketPool;
use co_grid::{CustomerRecord, EventOrder, Grid, InsertOutcome};
use co_index::{AttrKey, AttributeStore, StoreConfig};
use co_types::{PropKind, PropertyCatalog, PropertyMapping, NONE, PROP_EVENT};

struct Fixture {
    catalog: PropertyCatalog,
    attrs: AttributeStore,
    order: EventOrder,
    mapping: Arc<PropertyMapping>,
    pool: Arc<BucketPool>,
}

impl Fixture {
    fn new() -> Self {
        let mut catalog = PropertyCatalog::new();
        catalog.create("sku", PropKind::Text, false, false).unwrap();
        catalog
            .create("amount", PropKind::Double, false, false)
            .unwrap();
        catalog.create("tags", PropKind::Text, true, false).unwrap();
        catalog
            .create("country", PropKind::Text, false, true)
            .unwrap();

        let pool = Arc::new(BucketPool::new());
        Self {
            catalog,
            attrs: AttributeStore::new(Arc::clone(&pool), StoreConfig::default()),
            order: EventOrder::new(),
            mapping: Arc::new(PropertyMapping::new()),
            pool,
        }
    }

    fn grid(&self) -> Grid {
        let mut grid = Grid::new(Arc::clone(&self.mapping), Arc::clone(&self.pool));
        grid.map_schema(&self.catalog, None).unwrap();
        grid
    }

    fn mount_new(&self, grid: &mut Grid, id: &str, linear_id: i32) {
        let record = CustomerRecord::new(co_types::hash_str(id), linear_id, id);
        grid.mount(record);
        grid.prepare(&self.catalog);
    }

    fn insert(&mut self, grid: &mut Grid, row: serde_json::Value) -> InsertOutcome {
        grid.insert_event(&row, &self.catalog, &mut self.attrs, &self.order)
            .unwrap()
    }

    fn event_key(&self, event: &str) -> AttrKey {
        AttrKey {
            prop: PROP_EVENT,
            value: self.attrs.resolve_text(PROP_EVENT, event).unwrap(),
        }
    }

    fn prop_id(&self, name: &str) -> co_types::PropId {
        self.catalog.property_by_name(name).unwrap().id
    }

    fn col(&self, name: &str) -> usize {
        let map = self.mapping.map_all(&self.catalog);
        map.grid_col(self.prop_id(name)).unwrap()
    }
}

// ----------------------------------------------------------------------------

#[test]
fn duplicate_insert_is_idempotent() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "alice", 0);

    let row = json!({"id": "alice", "event": "view", "stamp": "2024-01-01T00:00:00Z", "sku": "A"});
    assert_eq!(fx.insert(&mut grid, row.clone()), InsertOutcome::Inserted);
    assert_eq!(fx.insert(&mut grid, row), InsertOutcome::Replaced);
    assert_eq!(grid.num_rows(), 1);

    fx.attrs.flush_dirty();
    let key = fx.event_key("view");
    assert!(fx.attrs.get_bits(key).test(0));
    assert!(fx
        .attrs
        .get_bits(AttrKey {
            prop: PROP_EVENT,
            value: NONE
        })
        .test(0));
}

#[test]
fn same_stamp_distinct_contents_are_two_rows() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "bob", 0);

    let stamp = 1_704_067_200_000_i64;
    fx.insert(
        &mut grid,
        json!({"id": "bob", "event": "buy", "stamp": stamp, "amount": 1.50}),
    );
    fx.insert(
        &mut grid,
        json!({"id": "bob", "event": "buy", "stamp": stamp, "amount": 2.50}),
    );

    assert_eq!(grid.num_rows(), 2);

    let amount_col = fx.col("amount");
    let sum: i64 = grid.rows().iter().map(|row| row[amount_col]).sum();
    assert_eq!(sum, 40_000); // 4.00 scaled by 10_000
}

#[test]
fn rows_stay_ordered_under_out_of_order_inserts() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "carol", 0);

    let base = 1_700_000_000_000_i64;
    for offset in [5_000, 1_000, 3_000, 2_000, 4_000, 1_500_i64] {
        fx.insert(
            &mut grid,
            json!({"event": "view", "stamp": base + offset, "sku": format!("s{offset}")}),
        );
    }

    let stamp_col = fx.col("stamp");
    let stamps: Vec<i64> = grid.rows().iter().map(|row| row[stamp_col]).collect();
    let mut sorted = stamps.clone();
    sorted.sort_unstable();
    assert_eq!(stamps, sorted);
    assert_eq!(grid.num_rows(), 6);
}

#[test]
fn z_order_breaks_stamp_ties() {
    let mut fx = Fixture::new();
    fx.order.set("session_start", 0);
    fx.order.set("purchase", 50);

    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "dave", 0);

    let stamp = 1_700_000_000_000_i64;
    fx.insert(&mut grid, json!({"event": "purchase", "stamp": stamp}));
    fx.insert(&mut grid, json!({"event": "session_start", "stamp": stamp}));
    fx.insert(&mut grid, json!({"event": "view", "stamp": stamp}));

    let event_col = fx.col("event");
    let events: Vec<&str> = grid
        .rows()
        .iter()
        .map(|row| fx.attrs.text(PROP_EVENT, row[event_col]).unwrap())
        .collect();
    assert_eq!(events, vec!["session_start", "purchase", "view"]);
}

#[test]
fn commit_round_trips_through_the_record() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "erin", 0);

    fx.insert(
        &mut grid,
        json!({"event": "view", "stamp": 1_700_000_000, "sku": "A", "tags": ["new", "sale"]}),
    );
    fx.insert(
        &mut grid,
        json!({"event": "buy", "stamp": 1_700_000_100, "amount": 9.99}),
    );

    let rows_before: Vec<_> = grid.rows().to_vec();
    let record = grid.commit(&fx.catalog).unwrap();
    assert!(record.raw_bytes > 0);
    assert!(!record.events.is_empty());

    grid.mount(record);
    grid.prepare(&fx.catalog);

    // The synthetic session column only exists after a prepare, so blank it
    // on both sides before comparing.
    let session_col = fx.col("session");
    let normalize = |rows: &[co_grid::RowVec]| {
        rows.iter()
            .map(|row| {
                let mut row = row.clone();
                row[session_col] = NONE;
                row
            })
            .collect::<Vec<_>>()
    };
    similar_asserts::assert_eq!(normalize(grid.rows()), normalize(&rows_before));

    // Re-committing without inserts hands the record back unchanged.
    let record = grid.commit(&fx.catalog).unwrap();
    let raw_bytes = record.raw_bytes;
    grid.mount(record);
    grid.prepare(&fx.catalog);
    let record = grid.commit(&fx.catalog).unwrap();
    assert_eq!(record.raw_bytes, raw_bytes);
}

#[test]
fn replayed_commit_bytes_are_identical() {
    let mut fx = Fixture::new();

    let build = |fx: &mut Fixture| {
        let mut grid = fx.grid();
        fx.mount_new(&mut grid, "frank", 0);
        for (stamp, sku) in [(1_700_000_000, "A"), (1_700_000_050, "B")] {
            fx.insert(&mut grid, json!({"event": "view", "stamp": stamp, "sku": sku}));
        }
        grid.commit(&fx.catalog).unwrap()
    };

    let first = build(&mut fx);
    let second = build(&mut fx);
    assert_eq!(first.raw_bytes, second.raw_bytes);
    assert_eq!(first.events, second.events);
}

#[test]
fn cull_trims_rows_and_clears_dead_index_bits() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "gail", 0);

    let base = 1_700_000_000_000_i64;
    for i in 0..30_i64 {
        fx.insert(
            &mut grid,
            json!({"event": "view", "stamp": base + i * 1_000, "sku": format!("sku{i}")}),
        );
    }
    fx.attrs.flush_dirty();

    let sku = fx.prop_id("sku");
    let dead_key = AttrKey {
        prop: sku,
        value: fx.attrs.resolve_text(sku, "sku0").unwrap(),
    };
    let live_key = AttrKey {
        prop: sku,
        value: fx.attrs.resolve_text(sku, "sku29").unwrap(),
    };
    assert!(fx.attrs.get_bits(dead_key).test(0));

    let now = base + 100_000;
    let removed = grid.cull(&fx.catalog, &mut fx.attrs, now, 10, i64::MAX / 2);
    assert!(removed);
    assert_eq!(grid.num_rows(), 10);

    fx.attrs.flush_dirty();
    assert!(!fx.attrs.get_bits(dead_key).test(0));
    assert!(fx.attrs.get_bits(live_key).test(0));

    // Within budget and TTL: no work.
    assert!(!grid.cull(&fx.catalog, &mut fx.attrs, now, 10, i64::MAX / 2));
}

#[test]
fn ttl_cull_drops_the_expired_prefix() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "hank", 0);

    let old = 1_000_000_000_000_i64;
    let fresh = 1_700_000_000_000_i64;
    for stamp in [old, old + 1_000, fresh, fresh + 1_000] {
        fx.insert(&mut grid, json!({"event": "view", "stamp": stamp}));
    }

    let ttl = 86_400_000; // one day
    assert!(grid.cull(&fx.catalog, &mut fx.attrs, fresh + 2_000, 100, ttl));
    assert_eq!(grid.num_rows(), 2);

    let stamp_col = fx.col("stamp");
    assert!(grid.rows().iter().all(|row| row[stamp_col] >= fresh));
}

#[test]
fn customer_property_updates_flip_index_bits() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "iris", 5);

    let outcome = fx.insert(&mut grid, json!({"country": "CA"}));
    assert_eq!(outcome, InsertOutcome::PropsOnly);
    assert_eq!(grid.num_rows(), 0);

    fx.attrs.flush_dirty();
    let country = fx.prop_id("country");
    let ca = AttrKey {
        prop: country,
        value: fx.attrs.resolve_text(country, "CA").unwrap(),
    };
    assert!(fx.attrs.get_bits(ca).test(5));

    fx.insert(&mut grid, json!({"country": "US"}));
    fx.attrs.flush_dirty();

    let us = AttrKey {
        prop: country,
        value: fx.attrs.resolve_text(country, "US").unwrap(),
    };
    let presence = AttrKey {
        prop: country,
        value: NONE,
    };
    assert!(!fx.attrs.get_bits(ca).test(5));
    assert!(fx.attrs.get_bits(us).test(5));
    assert!(fx.attrs.get_bits(presence).test(5));

    // The bag survives a commit round trip.
    let record = grid.commit(&fx.catalog).unwrap();
    assert!(record.props.is_some());
    grid.mount(record);
    let bag = grid.props();
    assert_eq!(
        bag.as_str_of("country"),
        Some("US".to_owned()),
    );
}

#[test]
fn sessions_are_synthesized_on_prepare() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "jack", 0);

    let base = 1_700_000_000_000_i64;
    let hour = 3_600_000;
    for stamp in [base, base + 60_000, base + hour * 2, base + hour * 2 + 1_000] {
        fx.insert(&mut grid, json!({"event": "view", "stamp": stamp}));
    }

    let record = grid.commit(&fx.catalog).unwrap();
    grid.mount(record);
    grid.prepare(&fx.catalog);

    let session_col = fx.col("session");
    let sessions: Vec<i64> = grid.rows().iter().map(|row| row[session_col]).collect();
    assert_eq!(sessions, vec![1, 1, 2, 2]);
}

#[test]
fn junk_rows_do_nothing() {
    let mut fx = Fixture::new();
    let mut grid = fx.grid();
    fx.mount_new(&mut grid, "kate", 0);

    assert_eq!(
        fx.insert(&mut grid, json!({"unknown_field": 1})),
        InsertOutcome::Junk
    );
    assert_eq!(grid.num_rows(), 0);

    let err = grid.insert_event(
        &json!({"event": "view", "stamp": "not a time"}),
        &fx.catalog,
        &mut fx.attrs,
        &fx.order,
    );
    assert!(err.is_err());
    assert_eq!(grid.num_rows(), 0);
}

// Small helper used by the props test.
trait BagExt {
    fn as_str_of(&self, key: &str) -> Option<String>;
}

impl BagExt for co_types::Value {
    fn as_str_of(&self, key: &str) -> Option<String> {
        let co_types::Value::Dict(dict) = self else {
            return None;
        };
        dict.get(&co_types::Value::from(key))
            .and_then(|value| value.as_str())
            .map(str::to_owned)
    }
}
