use std::sync::Arc;

use smallvec::SmallVec;

use co_alloc::BucketPool;
use co_index::{AttrKey, AttributeStore, DiffSide, IndexDiffing};
use co_types::codec;
use co_types::{
    fix_milli, hash_pair, hash_str, parse_stamp, to_iso8601, PropKind, Property, PropertyCatalog,
    PropertyMap, PropertyMapping, SchemaError, Value, DOUBLE_SCALE, NONE, PROP_EVENT,
    PROP_OMIT_FIRST, PROP_OMIT_LAST,
};

use crate::record::CustomerRecord;
use crate::zorder::EventOrder;

/// Session gap: a new synthetic session starts when consecutive stamps are
/// further apart than this.
pub const DEFAULT_SESSION_TIME_MS: i64 = 30 * 60 * 1000;

/// One expanded row; width is the grid's `property_count`.
pub type RowVec = SmallVec<[i64; 8]>;

// ----------------------------------------------------------------------------

/// Set-valued cells store `(offset, len)` into the grid's side array, packed
/// into the i64 cell. Always non-negative, so it never collides with the
/// `NONE` sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetRef {
    pub offset: u32,
    pub len: u32,
}

static_assertions::assert_eq_size!(SetRef, i64);

impl SetRef {
    #[inline]
    pub fn to_cell(self) -> i64 {
        (((self.offset as u64) << 32) | self.len as u64) as i64
    }

    #[inline]
    pub fn from_cell(cell: i64) -> Self {
        Self {
            offset: (cell as u64 >> 32) as u32,
            len: cell as u32,
        }
    }
}

// ----------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum InsertError {
    #[error("row is not a json object")]
    NotAnObject,

    #[error("unparseable stamp {0:?}")]
    BadStamp(String),

    #[error("negative stamp {0}")]
    NegativeStamp(i64),
}

/// What [`Grid::insert_event`] did with the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row went in.
    Inserted,

    /// An existing row with the same `(stamp, z-order, content-hash)` was
    /// replaced; replays are idempotent.
    Replaced,

    /// Only customer properties were present; they were applied, no row.
    PropsOnly,

    /// Nothing usable in the row.
    Junk,
}

// ----------------------------------------------------------------------------

/// One customer's working set: the compressed record expanded into mutable
/// rows.
///
/// Usage is mount → prepare → mutate → commit; the grid object itself is
/// reused across customers so the schema mapping is paid once per job.
pub struct Grid {
    mapping: Arc<PropertyMapping>,
    pool: Arc<BucketPool>,
    map: Option<Arc<PropertyMap>>,

    session_time: i64,

    rows: Vec<RowVec>,
    set_data: Vec<i64>,
    record: Option<CustomerRecord>,
    has_insert: bool,
}

impl Grid {
    pub fn new(mapping: Arc<PropertyMapping>, pool: Arc<BucketPool>) -> Self {
        Self {
            mapping,
            pool,
            map: None,
            session_time: DEFAULT_SESSION_TIME_MS,
            rows: Vec::new(),
            set_data: Vec::new(),
            record: None,
            has_insert: false,
        }
    }

    /// Acquire the property map: the full schema, or the named subset
    /// (typical for queries, which touch a handful of properties).
    pub fn map_schema(
        &mut self,
        catalog: &PropertyCatalog,
        names: Option<&[String]>,
    ) -> Result<(), SchemaError> {
        let map = match names {
            None => self.mapping.map_all(catalog),
            Some(names) => self.mapping.map_subset(catalog, names)?,
        };
        if let Some(old) = self.map.replace(map) {
            self.mapping.release(old);
        }
        Ok(())
    }

    pub fn set_session_time(&mut self, session_time_ms: i64) {
        self.session_time = session_time_ms;
    }

    /// Remember the record; no decompression yet.
    pub fn mount(&mut self, record: CustomerRecord) {
        self.rows.clear();
        self.set_data.clear();
        self.has_insert = false;
        self.record = Some(record);
    }

    pub fn record(&self) -> Option<&CustomerRecord> {
        self.record.as_ref()
    }

    pub fn rows(&self) -> &[RowVec] {
        &self.rows
    }

    pub fn set_data(&self) -> &[i64] {
        &self.set_data
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_full_schema(&self) -> bool {
        self.map.as_ref().is_some_and(|map| map.is_full_schema())
    }

    /// Expand the mounted record's packed events into rows.
    ///
    /// Only mapped properties land in cells; set values expand into the side
    /// array; the synthetic session column is computed when mapped. A corrupt
    /// blob aborts (invariant violation).
    pub fn prepare(&mut self, catalog: &PropertyCatalog) {
        let Some(map) = self.map.clone() else {
            return;
        };
        self.rows.clear();
        self.set_data.clear();
        let Some(record) = &self.record else {
            return;
        };
        if record.events.is_empty() || record.raw_bytes <= 0 || map.property_count == 0 {
            return;
        }

        let mut raw = self.pool.rent(record.raw_bytes as usize);
        raw.resize(record.raw_bytes as usize, 0);
        let got = lz4_flex::block::decompress_into(&record.events, &mut raw)
            .expect("corrupt packed-event blob");
        assert_eq!(got, record.raw_bytes as usize, "corrupt packed-event blob");

        let uuid_cell = map.uuid_col.map(|col| (col, record.hashed_id));
        let mut row = blank_row(&map, uuid_cell);
        let mut session = 0_i64;
        let mut last_session_stamp = 0_i64;

        let mut read = raw.as_slice();
        while !read.is_empty() {
            let prop_id = codec::read_i16(&mut read).expect("corrupt packed-event blob") as i32;

            if prop_id == -1 {
                // End of row.
                if let Some(session_col) = map.session_col {
                    let stamp = row[map.stamp_col];
                    if stamp - last_session_stamp > self.session_time {
                        session += 1;
                    }
                    last_session_stamp = stamp;
                    row[session_col] = session;
                }
                self.rows.push(row);
                row = blank_row(&map, uuid_cell);
                continue;
            }

            // Tombstoned properties still decode (their set-ness is kept on
            // the slot); properties never defined decode as plain values.
            let is_set = catalog
                .property_any(prop_id)
                .is_some_and(|prop| prop.is_set);

            if is_set {
                let count = codec::read_u16(&mut read).expect("corrupt packed-event blob");
                let offset = self.set_data.len() as u32;
                for _ in 0..count {
                    let value = codec::read_i64(&mut read).expect("corrupt packed-event blob");
                    self.set_data.push(value);
                }
                if let Some(col) = map.grid_col(prop_id) {
                    row[col] = SetRef {
                        offset,
                        len: count as u32,
                    }
                    .to_cell();
                }
            } else {
                let value = codec::read_i64(&mut read).expect("corrupt packed-event blob");
                if let Some(col) = map.grid_col(prop_id) {
                    row[col] = value;
                }
            }
        }

        drop(read);
        self.pool.give(raw);
    }

    /// Parse one JSON row and place it by `(stamp, z-order, content-hash)`.
    ///
    /// Customer properties in the row go through the props bag (diffed and
    /// dirty-marked); the event itself inserts in time order, replacing an
    /// identical row in place.
    pub fn insert_event(
        &mut self,
        row_json: &serde_json::Value,
        catalog: &PropertyCatalog,
        attrs: &mut AttributeStore,
        order: &EventOrder,
    ) -> Result<InsertOutcome, InsertError> {
        let object = row_json.as_object().ok_or(InsertError::NotAnObject)?;
        let map = self.map.clone().expect("map_schema before insert_event");
        let (customer_id, linear_id) = {
            let record = self.record.as_ref().expect("mount before insert_event");
            (record.hashed_id, record.linear_id)
        };

        let uuid_cell = map.uuid_col.map(|col| (col, customer_id));
        let mut new_row = blank_row(&map, uuid_cell);
        let mut customer_updates: Vec<(String, Value)> = Vec::new();
        let mut has_event_field = false;

        for (name, node) in object {
            let Some(&col) = map.insert_map.get(&hash_str(name)) else {
                continue;
            };
            let prop_id = map.schema_id(col);
            let Some(prop) = catalog.property(prop_id) else {
                continue;
            };

            if prop.is_customer {
                customer_updates.push((name.clone(), json_to_bag_value(node, prop)));
                continue;
            }

            if prop_id == PROP_EVENT {
                has_event_field = true;
            }

            attrs.ensure(AttrKey::presence(prop_id));
            attrs.mark_dirty(customer_id, linear_id, prop_id, NONE, true);

            match node {
                serde_json::Value::Array(members) if prop.is_set => {
                    let offset = self.set_data.len() as u32;
                    for member in members {
                        let Some(value) = coerce_scalar(member, prop, attrs) else {
                            continue;
                        };
                        attrs.ensure(AttrKey {
                            prop: prop_id,
                            value,
                        });
                        attrs.mark_dirty(customer_id, linear_id, prop_id, value, true);
                        self.set_data.push(value);
                    }
                    new_row[col] = SetRef {
                        offset,
                        len: (self.set_data.len() as u32) - offset,
                    }
                    .to_cell();
                }
                serde_json::Value::Array(_) => {}
                scalar => {
                    let Some(value) = coerce_scalar(scalar, prop, attrs) else {
                        continue;
                    };
                    attrs.ensure(AttrKey {
                        prop: prop_id,
                        value,
                    });
                    attrs.mark_dirty(customer_id, linear_id, prop_id, value, true);

                    if prop.is_set {
                        // A bare scalar on a set property is a one-member set.
                        let offset = self.set_data.len() as u32;
                        self.set_data.push(value);
                        new_row[col] = SetRef { offset, len: 1 }.to_cell();
                    } else {
                        new_row[col] = value;
                    }
                }
            }
        }

        let had_customer_props = !customer_updates.is_empty();
        if had_customer_props {
            let mut bag = self.props();
            let Value::Dict(dict) = &mut bag else {
                unreachable!("props() always yields a dict");
            };
            for (name, value) in customer_updates {
                if value.is_none() {
                    dict.remove(&Value::Text(name));
                } else {
                    dict.insert(Value::Text(name), value);
                }
            }
            self.set_props(bag, catalog, attrs);
        }

        if !has_event_field {
            return Ok(if had_customer_props {
                InsertOutcome::PropsOnly
            } else {
                InsertOutcome::Junk
            });
        }

        // Normalize the stamp last so it wins over whatever the generic loop
        // put in the column.
        let stamp = match object.get("stamp") {
            None => 0,
            Some(serde_json::Value::String(text)) => {
                fix_milli(parse_stamp(text).ok_or_else(|| InsertError::BadStamp(text.clone()))?)
            }
            Some(node) => fix_milli(node.as_i64().unwrap_or(0)),
        };
        if stamp < 0 {
            return Err(InsertError::NegativeStamp(stamp));
        }
        new_row[map.stamp_col] = stamp;

        let event_hash = match map.grid_col(PROP_EVENT) {
            Some(col) => new_row[col],
            None => NONE,
        };
        let z = order.get(event_hash);

        let stamp_col = map.stamp_col;
        let event_col = map.grid_col(PROP_EVENT);
        let start = self.rows.partition_point(|row| {
            (row[stamp_col], row_zorder(row, event_col, order)) < (stamp, z)
        });

        let new_hash = self.content_hash_of(&new_row, catalog);
        let mut pos = start;
        let mut replace_at = None;
        while pos < self.rows.len() {
            let row = &self.rows[pos];
            if row[stamp_col] != stamp || row_zorder(row, event_col, order) != z {
                break;
            }
            if self.content_hash_of(row, catalog) == new_hash {
                replace_at = Some(pos);
                break;
            }
            pos += 1;
        }

        self.has_insert = true;
        match replace_at {
            Some(at) => {
                self.rows[at] = new_row;
                Ok(InsertOutcome::Replaced)
            }
            None => {
                self.rows.insert(pos, new_row);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    /// Re-encode and recompress the rows into a fresh record.
    ///
    /// Consumes the mounted record; the caller hands the replacement back to
    /// the customer table. Without inserts the mounted record returns
    /// untouched.
    pub fn commit(&mut self, catalog: &PropertyCatalog) -> Option<CustomerRecord> {
        let mut record = self.record.take()?;
        if !self.has_insert {
            return Some(record);
        }
        let map = self.map.clone().expect("map_schema before commit");

        let estimate = self.rows.len() * (map.property_count + 1) * 10
            + self.set_data.len() * std::mem::size_of::<i64>();
        let mut raw = self.pool.rent(estimate);

        for row in &self.rows {
            for col in 0..map.property_count {
                let cell = row[col];
                if cell == NONE {
                    continue;
                }
                let prop_id = map.schema_id(col);
                if (PROP_OMIT_FIRST..=PROP_OMIT_LAST).contains(&prop_id) {
                    continue;
                }
                let Some(prop) = catalog.property(prop_id) else {
                    continue;
                };

                if prop.is_set {
                    let set_ref = SetRef::from_cell(cell);
                    raw.extend_from_slice(&(prop_id as i16).to_le_bytes());
                    raw.extend_from_slice(&(set_ref.len as u16).to_le_bytes());
                    let start = set_ref.offset as usize;
                    for value in &self.set_data[start..start + set_ref.len as usize] {
                        raw.extend_from_slice(&value.to_le_bytes());
                    }
                } else {
                    raw.extend_from_slice(&(prop_id as i16).to_le_bytes());
                    raw.extend_from_slice(&cell.to_le_bytes());
                }
            }
            raw.extend_from_slice(&(-1_i16).to_le_bytes());
        }

        let mut compressed = self
            .pool
            .rent(lz4_flex::block::get_maximum_output_size(raw.len()));
        if raw.is_empty() {
            compressed.clear();
        } else {
            compressed.resize(compressed.capacity(), 0);
            let comp_bytes = lz4_flex::block::compress_into(&raw, &mut compressed)
                .expect("commit buffer was sized by compress_bound");
            compressed.truncate(comp_bytes);
        }

        record.raw_bytes = raw.len() as i32;
        let old_events = std::mem::replace(&mut record.events, compressed);
        self.pool.give(old_events);
        self.pool.give(raw);

        self.has_insert = false;
        Some(record)
    }

    /// Drop rows beyond the row budget and rows past the TTL, clearing index
    /// bits for `(prop, value)` pairs that no longer occur anywhere in the
    /// remaining rows or the props bag.
    ///
    /// Returns whether anything was removed.
    pub fn cull(
        &mut self,
        catalog: &PropertyCatalog,
        attrs: &mut AttributeStore,
        now_ms: i64,
        event_max: usize,
        event_ttl_ms: i64,
    ) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        let map = self.map.clone().expect("map_schema before cull");
        let stamp_col = map.stamp_col;
        let cutoff = now_ms - event_ttl_ms;

        if self.rows.len() <= event_max && self.rows[0][stamp_col] > cutoff {
            return false;
        }
        let (customer_id, linear_id) = {
            let record = self.record.as_ref().expect("mount before cull");
            (record.hashed_id, record.linear_id)
        };

        let mut diff = IndexDiffing::new();
        self.snapshot_rows(&mut diff, DiffSide::Before, catalog);
        // The props bag contributes to both sides so bag-held values are
        // never mistaken for removed.
        self.snapshot_bag(&mut diff, catalog, attrs);

        let mut removed = false;
        if self.rows.len() > event_max {
            let excess = self.rows.len() - event_max;
            self.rows.drain(..excess);
            removed = true;
        }

        let expired = self
            .rows
            .iter()
            .take_while(|row| row[stamp_col] <= cutoff)
            .count();
        if expired > 0 {
            self.rows.drain(..expired);
            removed = true;
        }

        self.snapshot_rows(&mut diff, DiffSide::After, catalog);
        diff.iter_removed(|key| {
            attrs.mark_dirty(customer_id, linear_id, key.prop, key.value, false);
        });

        if removed {
            co_log::trace!(
                linear_id,
                remaining = self.rows.len(),
                "culled customer rows"
            );
            self.has_insert = true;
        }
        removed
    }

    // --- props bag ---

    /// The customer's property bag as a value tree (an empty dict when the
    /// customer has none).
    pub fn props(&self) -> Value {
        let blob = self.record.as_ref().and_then(|record| record.props.as_ref());
        match blob {
            None => Value::Dict(Default::default()),
            Some(blob) => {
                let mut read = blob.as_slice();
                Value::decode(&mut read).expect("corrupt props blob")
            }
        }
    }

    /// Replace the props bag, diffing the indexable pairs against the stored
    /// bag and queueing only the flips. A bag that hashes identically is a
    /// no-op.
    pub fn set_props(&mut self, bag: Value, catalog: &PropertyCatalog, attrs: &mut AttributeStore) {
        let Some(record) = &self.record else {
            debug_assert!(false, "mount before set_props");
            return;
        };
        let (customer_id, linear_id) = (record.hashed_id, record.linear_id);

        let old_bag = self.props();
        if old_bag.blob_hash() == bag.blob_hash() {
            return;
        }

        let mut diff = IndexDiffing::new();
        for key in bag_keys(&old_bag, catalog, attrs) {
            diff.add(key, DiffSide::Before);
        }
        for key in bag_keys(&bag, catalog, attrs) {
            diff.add(key, DiffSide::After);
        }

        let record = self.record.as_mut().expect("checked above");
        if bag.is_none() || bag.is_empty() {
            record.props = None;
        } else {
            let mut blob = Vec::new();
            bag.encode_into(&mut blob);
            record.props = Some(blob);
        }

        diff.iter_removed(|key| {
            attrs.mark_dirty(customer_id, linear_id, key.prop, key.value, false);
        });
        diff.iter_added(|key| {
            attrs.ensure(key);
            attrs.mark_dirty(customer_id, linear_id, key.prop, key.value, true);
        });
    }

    // --- read path ---

    /// Render the expanded grid as JSON: identity, props, and rows in time
    /// order.
    pub fn to_json(&self, catalog: &PropertyCatalog, attrs: &AttributeStore) -> serde_json::Value {
        let map = self.map.as_ref().expect("map_schema before to_json");
        let record = self.record.as_ref();

        let mut rows_json = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut row_json = serde_json::Map::new();
            let stamp = row[map.stamp_col];
            row_json.insert("stamp".to_owned(), stamp.into());
            row_json.insert("stamp_iso".to_owned(), to_iso8601(stamp).into());

            for col in 0..map.property_count {
                let cell = row[col];
                if cell == NONE || col == map.stamp_col {
                    continue;
                }
                let prop_id = map.schema_id(col);
                if (PROP_OMIT_FIRST..=PROP_OMIT_LAST).contains(&prop_id)
                    && Some(col) != map.session_col
                {
                    continue;
                }
                let Some(prop) = catalog.property(prop_id) else {
                    continue;
                };

                let rendered = if prop.is_set {
                    let set_ref = SetRef::from_cell(cell);
                    let start = set_ref.offset as usize;
                    let members: Vec<serde_json::Value> = self.set_data
                        [start..start + set_ref.len as usize]
                        .iter()
                        .map(|&value| render_cell(value, prop, attrs))
                        .collect();
                    serde_json::Value::Array(members)
                } else {
                    render_cell(cell, prop, attrs)
                };
                row_json.insert(prop.name.clone(), rendered);
            }
            rows_json.push(serde_json::Value::Object(row_json));
        }

        serde_json::json!({
            "id": record.map(|r| r.id.clone()),
            "props": bag_to_json(&self.props()),
            "rows": rows_json,
        })
    }

    // --- internals ---

    /// Content hash: stamp folded with every indexable value in the row, sets
    /// expanded. Identifies "the same event" for idempotent replay.
    fn content_hash_of(&self, row: &[i64], catalog: &PropertyCatalog) -> i64 {
        let map = self.map.as_ref().expect("mapped");
        let mut hash = row[map.stamp_col];

        for col in 0..map.property_count {
            let cell = row[col];
            if cell == NONE || col == map.stamp_col {
                continue;
            }
            let prop_id = map.schema_id(col);
            if (PROP_OMIT_FIRST..=PROP_OMIT_LAST).contains(&prop_id) {
                continue;
            }
            let Some(prop) = catalog.property(prop_id) else {
                continue;
            };
            if prop.is_customer {
                continue;
            }

            if prop.is_set {
                let set_ref = SetRef::from_cell(cell);
                let start = set_ref.offset as usize;
                for value in &self.set_data[start..start + set_ref.len as usize] {
                    hash = hash_pair(*value, hash);
                }
            } else {
                hash = hash_pair(cell, hash);
            }
        }
        hash
    }

    /// Add every indexable `(prop, value)` pair in the current rows to one
    /// side of the diff, presence entries included.
    fn snapshot_rows(&self, diff: &mut IndexDiffing, side: DiffSide, catalog: &PropertyCatalog) {
        let Some(map) = self.map.as_ref() else {
            return;
        };
        for row in &self.rows {
            for col in 0..map.property_count {
                let cell = row[col];
                if cell == NONE || col == map.stamp_col {
                    continue;
                }
                let prop_id = map.schema_id(col);
                if (PROP_OMIT_FIRST..=PROP_OMIT_LAST).contains(&prop_id) {
                    continue;
                }
                let Some(prop) = catalog.property(prop_id) else {
                    continue;
                };
                if prop.is_customer {
                    continue;
                }

                diff.add(AttrKey::presence(prop_id), side);
                if prop.is_set {
                    let set_ref = SetRef::from_cell(cell);
                    let start = set_ref.offset as usize;
                    for value in &self.set_data[start..start + set_ref.len as usize] {
                        diff.add(
                            AttrKey {
                                prop: prop_id,
                                value: *value,
                            },
                            side,
                        );
                    }
                } else {
                    diff.add(
                        AttrKey {
                            prop: prop_id,
                            value: cell,
                        },
                        side,
                    );
                }
            }
        }
    }

    fn snapshot_bag(
        &self,
        diff: &mut IndexDiffing,
        catalog: &PropertyCatalog,
        attrs: &mut AttributeStore,
    ) {
        for key in bag_keys(&self.props(), catalog, attrs) {
            diff.add(key, DiffSide::Before);
            diff.add(key, DiffSide::After);
        }
    }
}

impl Drop for Grid {
    fn drop(&mut self) {
        if let Some(map) = self.map.take() {
            self.mapping.release(map);
        }
    }
}

// ----------------------------------------------------------------------------
// Free helpers

fn blank_row(map: &PropertyMap, uuid_cell: Option<(usize, i64)>) -> RowVec {
    let mut row = smallvec::smallvec![NONE; map.property_count];
    if let Some((col, id)) = uuid_cell {
        row[col] = id;
    }
    row
}

#[inline]
fn row_zorder(row: &RowVec, event_col: Option<usize>, order: &EventOrder) -> i32 {
    match event_col {
        Some(col) if row[col] != NONE => order.get(row[col]),
        _ => crate::zorder::DEFAULT_Z_ORDER,
    }
}

/// Type-aware coercion of one JSON scalar into its indexed i64 encoding.
/// Text values are interned as a side effect.
fn coerce_scalar(
    node: &serde_json::Value,
    prop: &Property,
    attrs: &mut AttributeStore,
) -> Option<i64> {
    use serde_json::Value as Json;
    match node {
        Json::Number(number) if number.is_f64() => {
            let value = number.as_f64()?;
            Some(match prop.kind {
                PropKind::Int => value as i64,
                PropKind::Double => (value * DOUBLE_SCALE as f64).round() as i64,
                PropKind::Bool => i64::from(value != 0.0),
                PropKind::Text => attrs.ensure_text(prop.id, &value.to_string()),
            })
        }
        Json::Number(number) => {
            let value = number.as_i64()?;
            Some(match prop.kind {
                PropKind::Int => value,
                PropKind::Double => value * DOUBLE_SCALE,
                PropKind::Bool => i64::from(value != 0),
                PropKind::Text => attrs.ensure_text(prop.id, &value.to_string()),
            })
        }
        Json::String(text) => match prop.kind {
            PropKind::Int | PropKind::Double => None,
            PropKind::Bool => Some(i64::from(text != "0")),
            PropKind::Text => Some(attrs.ensure_text(prop.id, text)),
        },
        Json::Bool(flag) => Some(match prop.kind {
            PropKind::Int => i64::from(*flag),
            PropKind::Double => i64::from(*flag) * DOUBLE_SCALE,
            PropKind::Bool => i64::from(*flag),
            PropKind::Text => attrs.ensure_text(prop.id, if *flag { "true" } else { "false" }),
        }),
        _ => None,
    }
}

/// JSON scalar (or array, for set properties) into a typed bag value.
fn json_to_bag_value(node: &serde_json::Value, prop: &Property) -> Value {
    use serde_json::Value as Json;

    fn scalar(node: &Json, kind: PropKind) -> Value {
        match (node, kind) {
            (Json::Number(n), PropKind::Int) => {
                n.as_i64().map_or(Value::None, Value::I64)
            }
            (Json::Number(n), PropKind::Double) => {
                n.as_f64().map_or(Value::None, Value::F64)
            }
            (Json::Number(n), PropKind::Bool) => Value::Bool(n.as_f64() != Some(0.0)),
            (Json::Number(n), PropKind::Text) => Value::Text(n.to_string()),
            (Json::String(s), PropKind::Text) => Value::Text(s.clone()),
            (Json::String(s), PropKind::Bool) => Value::Bool(s != "0"),
            (Json::String(_), _) => Value::None,
            (Json::Bool(b), PropKind::Bool | PropKind::Int) => Value::Bool(*b),
            (Json::Bool(b), PropKind::Double) => Value::F64(f64::from(*b)),
            (Json::Bool(b), PropKind::Text) => Value::Text(b.to_string()),
            _ => Value::None,
        }
    }

    match node {
        Json::Array(members) if prop.is_set => Value::Set(
            members
                .iter()
                .map(|member| scalar(member, prop.kind))
                .filter(|value| !value.is_none())
                .collect(),
        ),
        Json::Null => Value::None,
        other => scalar(other, prop.kind),
    }
}

/// The indexable `(prop, value)` pairs of a props bag, presence entries
/// included. Text values are interned as a side effect (idempotent).
fn bag_keys(bag: &Value, catalog: &PropertyCatalog, attrs: &mut AttributeStore) -> Vec<AttrKey> {
    let Value::Dict(dict) = bag else {
        return Vec::new();
    };

    let mut keys = Vec::new();
    for (name, value) in dict {
        let Some(name) = name.as_str() else {
            continue;
        };
        let Some(prop) = catalog.property_by_name(name) else {
            continue;
        };
        if !prop.is_customer || value.is_none() {
            continue;
        }

        keys.push(AttrKey::presence(prop.id));
        for member in value.iter_scalars() {
            let encoded = match (member, prop.kind) {
                (Value::I64(v), PropKind::Double) => Some(v * DOUBLE_SCALE),
                (Value::F64(v), PropKind::Double) => {
                    Some((v * DOUBLE_SCALE as f64).round() as i64)
                }
                (Value::I64(v), _) => Some(*v),
                (Value::F64(v), _) => Some(*v as i64),
                (Value::Bool(b), _) => Some(i64::from(*b)),
                (Value::Text(s), _) => Some(attrs.ensure_text(prop.id, s)),
                _ => None,
            };
            if let Some(value) = encoded {
                keys.push(AttrKey {
                    prop: prop.id,
                    value,
                });
            }
        }
    }
    keys
}

fn render_cell(cell: i64, prop: &Property, attrs: &AttributeStore) -> serde_json::Value {
    match prop.kind {
        PropKind::Int => cell.into(),
        PropKind::Double => (cell as f64 / DOUBLE_SCALE as f64).into(),
        PropKind::Bool => (cell != 0).into(),
        PropKind::Text => attrs
            .text(prop.id, cell)
            .map_or(serde_json::Value::Null, |text| text.into()),
    }
}

fn bag_to_json(bag: &Value) -> serde_json::Value {
    match bag {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::I64(v) => (*v).into(),
        Value::F64(v) => (*v).into(),
        Value::Text(s) => s.as_str().into(),
        Value::List(items) => items.iter().map(bag_to_json).collect(),
        Value::Set(items) => items.iter().map(bag_to_json).collect(),
        Value::Dict(items) => {
            let mut object = serde_json::Map::new();
            for (key, value) in items {
                if let Some(name) = key.as_str() {
                    object.insert(name.to_owned(), bag_to_json(value));
                }
            }
            serde_json::Value::Object(object)
        }
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_ref_cell_packing() {
        let set_ref = SetRef {
            offset: 123_456,
            len: 7,
        };
        let cell = set_ref.to_cell();
        assert!(cell >= 0);
        assert_eq!(SetRef::from_cell(cell), set_ref);
        assert_ne!(cell, NONE);
    }
}
