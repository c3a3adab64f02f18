//! Smallest end-to-end tour: schema, inserts, a segment, a grid read.

use serde_json::json;

use co_index::AttrKey;
use co_partition::{PartitionConfig, SegmentExpr, Table};
use co_types::{now_ms, PropKind, PROP_EVENT};

fn main() -> anyhow::Result<()> {
    co_log::setup_logging();

    let mut table = Table::new("events", 4, PartitionConfig::default());
    {
        let mut catalog = table.catalog().write();
        catalog.create("sku", PropKind::Text, false, false)?;
        catalog.create("amount", PropKind::Double, false, false)?;
        catalog.create("country", PropKind::Text, false, true)?;
    }

    let now = now_ms();
    for (uid, event, sku) in [
        ("alice", "view", "keyboard"),
        ("alice", "buy", "keyboard"),
        ("bob", "view", "monitor"),
        ("carol", "view", "keyboard"),
    ] {
        let row = json!({
            "id": uid,
            "event": event,
            "stamp": now,
            "sku": sku,
            "country": "CA",
        });
        table.submit_insert(&row.to_string(), now)?;
    }
    table.tick_all(now + 1);

    // Buyers, per partition.
    for id in 0..table.num_partitions() {
        let partition = table.partition_mut(id);
        let Some(bought) = partition.attrs().resolve_text(PROP_EVENT, "buy") else {
            continue;
        };
        let buyers = partition.evaluate_segment(&SegmentExpr::bits(AttrKey {
            prop: PROP_EVENT,
            value: bought,
        }));

        let mut uids = Vec::new();
        partition.iterate_customers(&buyers, None, |_, grid| {
            if let Some(record) = grid.record() {
                uids.push(record.id.clone());
            }
        });
        if !uids.is_empty() {
            co_log::info!(partition = id, buyers = ?uids, "segment result");
        }
    }

    // One customer's expanded grid as JSON.
    let pid = table.partition_for("alice");
    let partition = table.partition_mut(pid);
    let lin = partition.get_customer("alice").expect("alice was inserted");
    let doc = partition.read_grid(lin, None).expect("alice has a record");
    println!("{}", serde_json::to_string_pretty(&doc)?);

    Ok(())
}
