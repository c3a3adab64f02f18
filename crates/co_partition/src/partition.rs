use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

use co_alloc::{BlockArena, BlockPool, BucketPool};
use co_bitmap::Bitmap;
use co_grid::{EventOrder, Grid, DEFAULT_SESSION_TIME_MS};
use co_index::{AttrKey, AttributeStore, StoreConfig};
use co_types::codec::CodecError;
use co_types::{hash_str, PropertyCatalog, PropertyMapping, PROP_SEGMENT};

use crate::customers::CustomerTable;
use crate::runtime::{Cell, RunResult, TaskLoop};
use crate::segment::SegmentExpr;
use crate::side_log::SideLog;

// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct PartitionConfig {
    /// Row budget per customer; culls trim the oldest beyond this.
    pub event_max: usize,

    /// Rows older than this are culled.
    pub event_ttl_ms: i64,

    /// Gap that starts a new synthetic session.
    pub session_time_ms: i64,

    /// How many log entries one drain slice consumes.
    pub insert_batch: usize,

    /// How often the named segments re-evaluate.
    pub segment_refresh_ms: i64,

    pub store: StoreConfig,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            event_max: 5_000,
            event_ttl_ms: 365 * 86_400_000,
            session_time_ms: DEFAULT_SESSION_TIME_MS,
            insert_batch: 500,
            segment_refresh_ms: 60_000,
            store: StoreConfig::default(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RestoreError {
    #[error("attribute block: {0}")]
    Attributes(#[from] co_index::DecodeError),

    #[error("checkpoint truncated or malformed")]
    Malformed(#[from] CodecError),
}

/// Messages other threads may dispatch into a partition's loop.
pub enum PartitionMsg {
    /// Route an insert through the side log.
    Insert(String),

    DefineSegment(String, SegmentExpr),

    RefreshSegments,
}

/// Cheap cross-thread handle to a partition's mailbox.
#[derive(Clone)]
pub struct PartitionHandle {
    tx: Sender<PartitionMsg>,
}

impl PartitionHandle {
    pub fn send(&self, msg: PartitionMsg) {
        // A dropped partition just drops the message.
        let _ = self.tx.send(msg);
    }
}

// ----------------------------------------------------------------------------

/// Everything one partition owns. All mutation happens on the thread driving
/// [`Partition::tick`]; other threads talk through the side log or the
/// mailbox.
pub struct PartitionCore {
    pub id: i32,
    table_hash: i64,
    config: PartitionConfig,

    pool: Arc<BucketPool>,
    block_pool: Arc<BlockPool>,
    side_log: Arc<SideLog>,
    catalog: Arc<RwLock<PropertyCatalog>>,
    order: Arc<RwLock<EventOrder>>,
    mapping: Arc<PropertyMapping>,

    pub customers: CustomerTable,
    pub attrs: AttributeStore,

    segments: ahash::HashMap<String, SegmentExpr>,
}

impl PartitionCore {
    /// Drain one batch from the side log into the grid and index.
    pub fn drain_inserts(&mut self, limit: usize, now_ms: i64) -> usize {
        let batch = self.side_log.read(self.table_hash, self.id, limit, now_ms);
        for json in &batch {
            self.apply_insert(json, now_ms);
        }
        if !batch.is_empty() {
            self.attrs.flush_dirty();
        }
        batch.len()
    }

    fn apply_insert(&mut self, json: &str, now_ms: i64) {
        let doc: serde_json::Value = match serde_json::from_str(json) {
            Ok(doc) => doc,
            Err(error) => {
                co_log::warn!(partition = self.id, %error, "dropping malformed insert row");
                return;
            }
        };
        let uid = match doc.get("id") {
            Some(serde_json::Value::String(uid)) => uid.clone(),
            Some(serde_json::Value::Number(uid)) => uid.to_string(),
            _ => {
                co_log::warn!(partition = self.id, "dropping insert row without id");
                return;
            }
        };

        let linear_id = self.customers.get_or_create(&uid);
        let Some(record) = self.customers.take_record(linear_id) else {
            return;
        };

        let catalog = self.catalog.read();
        let order = self.order.read();

        let mut grid = Grid::new(Arc::clone(&self.mapping), Arc::clone(&self.pool));
        if let Err(error) = grid.map_schema(&catalog, None) {
            co_log::error!(partition = self.id, %error, "full schema map failed");
            self.customers.replace_record(record);
            return;
        }
        grid.set_session_time(self.config.session_time_ms);
        grid.mount(record);
        grid.prepare(&catalog);

        if let Err(error) = grid.insert_event(&doc, &catalog, &mut self.attrs, &order) {
            co_log::warn!(partition = self.id, %error, "dropping unusable insert row");
        }
        grid.cull(
            &catalog,
            &mut self.attrs,
            now_ms,
            self.config.event_max,
            self.config.event_ttl_ms,
        );

        if let Some(record) = grid.commit(&catalog) {
            self.customers.replace_record(record);
        }
    }

    /// Re-evaluate every named segment and park the result in the index
    /// under `(segment column, hash(name))`.
    pub fn refresh_segments(&mut self) {
        let segments: Vec<(i64, SegmentExpr)> = self
            .segments
            .iter()
            .map(|(name, expr)| (hash_str(name), expr.clone()))
            .collect();

        let universe = self.customers.linear_len();
        for (name_hash, expr) in segments {
            let result = expr.evaluate(&mut self.attrs, universe);
            let slot = self.attrs.get_bits(AttrKey {
                prop: PROP_SEGMENT,
                value: name_hash,
            });
            slot.op_copy(&result);
        }
    }
}

// ----------------------------------------------------------------------------
// Built-in cells

struct InsertDrain {
    batch: usize,
    idle_backoff_ms: i64,
}

impl Cell<PartitionCore> for InsertDrain {
    fn name(&self) -> &'static str {
        "insert-drain"
    }

    fn run(&mut self, core: &mut PartitionCore, now_ms: i64) -> RunResult {
        let drained = core.drain_inserts(self.batch, now_ms);
        if drained == self.batch {
            RunResult::Again
        } else {
            RunResult::At(now_ms + self.idle_backoff_ms)
        }
    }
}

struct SegmentRefresh {
    interval_ms: i64,
}

impl Cell<PartitionCore> for SegmentRefresh {
    fn name(&self) -> &'static str {
        "segment-refresh"
    }

    fn run(&mut self, core: &mut PartitionCore, now_ms: i64) -> RunResult {
        core.refresh_segments();
        RunResult::At(now_ms + self.interval_ms)
    }
}

// ----------------------------------------------------------------------------

/// One shard of the database: its own customer table, attribute index,
/// property maps, segments, and cooperative task loop.
pub struct Partition {
    core: PartitionCore,
    tasks: TaskLoop<PartitionCore>,
    mailbox_tx: Sender<PartitionMsg>,
    mailbox_rx: Receiver<PartitionMsg>,
}

impl Partition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i32,
        table_hash: i64,
        catalog: Arc<RwLock<PropertyCatalog>>,
        order: Arc<RwLock<EventOrder>>,
        side_log: Arc<SideLog>,
        pool: Arc<BucketPool>,
        block_pool: Arc<BlockPool>,
        config: PartitionConfig,
    ) -> Self {
        let core = PartitionCore {
            id,
            table_hash,
            config,
            attrs: AttributeStore::new(Arc::clone(&pool), config.store),
            pool,
            block_pool,
            side_log,
            catalog,
            order,
            mapping: Arc::new(PropertyMapping::new()),
            customers: CustomerTable::new(),
            segments: Default::default(),
        };

        let mut tasks = TaskLoop::new();
        tasks.add(
            Box::new(InsertDrain {
                batch: config.insert_batch,
                idle_backoff_ms: 25,
            }),
            0,
        );
        tasks.add(
            Box::new(SegmentRefresh {
                interval_ms: config.segment_refresh_ms,
            }),
            config.segment_refresh_ms,
        );

        let (mailbox_tx, mailbox_rx) = crossbeam_channel::unbounded();
        Self {
            core,
            tasks,
            mailbox_tx,
            mailbox_rx,
        }
    }

    pub fn id(&self) -> i32 {
        self.core.id
    }

    pub fn handle(&self) -> PartitionHandle {
        PartitionHandle {
            tx: self.mailbox_tx.clone(),
        }
    }

    pub fn customers(&self) -> &CustomerTable {
        &self.core.customers
    }

    pub fn attrs(&self) -> &AttributeStore {
        &self.core.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut AttributeStore {
        &mut self.core.attrs
    }

    /// Queue an insert; durability is the log append. The row is applied the
    /// next time the drain cell runs.
    pub fn submit_insert(&self, json: &str, now_ms: i64) -> usize {
        self.core
            .side_log
            .append(self.core.table_hash, self.core.id, json, now_ms)
    }

    /// Drive the loop: drain the mailbox, then run everything due.
    pub fn tick(&mut self, now_ms: i64) {
        while let Ok(msg) = self.mailbox_rx.try_recv() {
            match msg {
                PartitionMsg::Insert(json) => {
                    self.submit_insert(&json, now_ms);
                }
                PartitionMsg::DefineSegment(name, expr) => {
                    self.core.segments.insert(name, expr);
                }
                PartitionMsg::RefreshSegments => self.core.refresh_segments(),
            }
        }
        self.tasks.run_due(&mut self.core, now_ms);
    }

    /// Synchronous drain, for callers that cannot wait for the loop (tests,
    /// shutdown flush).
    pub fn drain_inserts(&mut self, now_ms: i64) -> usize {
        let mut total = 0;
        loop {
            let drained = self.core.drain_inserts(self.core.config.insert_batch, now_ms);
            total += drained;
            if drained < self.core.config.insert_batch {
                return total;
            }
        }
    }

    pub fn get_customer(&self, uid: &str) -> Option<i32> {
        self.core.customers.linear_id_of(uid)
    }

    /// Expand one customer into JSON, optionally restricted to a property
    /// subset.
    pub fn read_grid(
        &mut self,
        linear_id: i32,
        subset: Option<&[String]>,
    ) -> Option<serde_json::Value> {
        let record = self.core.customers.record(linear_id)?.clone();
        let catalog = self.core.catalog.read();

        let mut grid = Grid::new(Arc::clone(&self.core.mapping), Arc::clone(&self.core.pool));
        grid.map_schema(&catalog, subset).ok()?;
        grid.set_session_time(self.core.config.session_time_ms);
        grid.mount(record);
        grid.prepare(&catalog);
        Some(grid.to_json(&catalog, &self.core.attrs))
    }

    pub fn define_segment(&mut self, name: &str, expr: SegmentExpr) {
        self.core.segments.insert(name.to_owned(), expr);
    }

    pub fn evaluate_segment(&mut self, expr: &SegmentExpr) -> Bitmap {
        let universe = self.core.customers.linear_len();
        expr.evaluate(&mut self.core.attrs, universe)
    }

    /// Visit every set bit with a prepared grid.
    pub fn iterate_customers(
        &mut self,
        bits: &Bitmap,
        subset: Option<&[String]>,
        mut visitor: impl FnMut(i32, &Grid),
    ) {
        let catalog = self.core.catalog.read();
        let mut grid = Grid::new(Arc::clone(&self.core.mapping), Arc::clone(&self.core.pool));
        if grid.map_schema(&catalog, subset).is_err() {
            return;
        }
        grid.set_session_time(self.core.config.session_time_ms);

        for bit in bits.iter() {
            let Some(record) = self.core.customers.record(bit as i32) else {
                continue;
            };
            grid.mount(record.clone());
            grid.prepare(&catalog);
            visitor(bit as i32, &grid);
        }
    }

    /// Serialize this partition: ATTRIBUTES, then PEOPLE, then (optionally)
    /// the side log.
    pub fn checkpoint(&mut self, include_sidelog: bool) -> Vec<u8> {
        let mut arena = BlockArena::new(Arc::clone(&self.core.block_pool));
        self.core.attrs.serialize(&mut arena);
        self.core.customers.serialize(&mut arena);
        if include_sidelog {
            self.core.side_log.serialize(&mut arena);
        }
        arena.flatten()
    }

    /// [`Self::checkpoint`], streamed into a writer.
    pub fn checkpoint_into(
        &mut self,
        writer: &mut impl std::io::Write,
        include_sidelog: bool,
    ) -> std::io::Result<()> {
        writer.write_all(&self.checkpoint(include_sidelog))
    }

    /// Rebuild this partition from a checkpoint. The attribute store and
    /// customer table are replaced wholesale; if side-log bytes follow, they
    /// are restored and every reader rewinds for replay.
    pub fn restore(&mut self, bytes: &[u8], now_ms: i64) -> Result<(), RestoreError> {
        let mut read = bytes;

        self.core.attrs =
            AttributeStore::new(Arc::clone(&self.core.pool), self.core.config.store);
        self.core.attrs.deserialize(&mut read)?;

        self.core.customers = CustomerTable::new();
        self.core.customers.deserialize(&mut read)?;

        if !read.is_empty() {
            self.core.side_log.deserialize(&mut read, now_ms)?;
        }
        Ok(())
    }
}
