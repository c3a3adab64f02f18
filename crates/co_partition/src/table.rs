use std::sync::Arc;

use parking_lot::RwLock;

use co_alloc::{BlockPool, BucketPool};
use co_grid::EventOrder;
use co_types::{hash_str, PropertyCatalog};

use crate::partition::{Partition, PartitionConfig};
use crate::side_log::SideLog;

#[derive(thiserror::Error, Debug)]
pub enum RouteError {
    #[error("insert row is not valid json: {0}")]
    BadJson(#[from] serde_json::Error),

    #[error("insert row has no usable id")]
    MissingId,
}

/// A table: shared schema plus N fixed partitions.
///
/// The table owns the read-mostly, lock-guarded state every partition
/// consults (property catalog, event ordering) and the process-wide side log
/// and allocator pools. Partitions are single-threaded islands; this type
/// only routes.
pub struct Table {
    name: String,
    hash: i64,

    catalog: Arc<RwLock<PropertyCatalog>>,
    order: Arc<RwLock<EventOrder>>,
    side_log: Arc<SideLog>,
    pool: Arc<BucketPool>,
    block_pool: Arc<BlockPool>,

    partitions: Vec<Partition>,
}

impl Table {
    pub fn new(name: &str, num_partitions: usize, config: PartitionConfig) -> Self {
        assert!(num_partitions > 0);
        let hash = hash_str(name);
        let catalog = Arc::new(RwLock::new(PropertyCatalog::new()));
        let order = Arc::new(RwLock::new(EventOrder::new()));
        let side_log = SideLog::new();
        let pool = Arc::new(BucketPool::new());
        let block_pool = BlockPool::new();

        let partitions = (0..num_partitions)
            .map(|id| {
                Partition::new(
                    id as i32,
                    hash,
                    Arc::clone(&catalog),
                    Arc::clone(&order),
                    Arc::clone(&side_log),
                    Arc::clone(&pool),
                    Arc::clone(&block_pool),
                    config,
                )
            })
            .collect();

        Self {
            name: name.to_owned(),
            hash,
            catalog,
            order,
            side_log,
            pool,
            block_pool,
            partitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> i64 {
        self.hash
    }

    pub fn catalog(&self) -> &Arc<RwLock<PropertyCatalog>> {
        &self.catalog
    }

    pub fn event_order(&self) -> &Arc<RwLock<EventOrder>> {
        &self.order
    }

    pub fn side_log(&self) -> &Arc<SideLog> {
        &self.side_log
    }

    pub fn buffer_pool(&self) -> &Arc<BucketPool> {
        &self.pool
    }

    pub fn block_pool(&self) -> &Arc<BlockPool> {
        &self.block_pool
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition(&self, id: usize) -> &Partition {
        &self.partitions[id]
    }

    pub fn partition_mut(&mut self, id: usize) -> &mut Partition {
        &mut self.partitions[id]
    }

    /// Which partition owns a customer id.
    pub fn partition_for(&self, uid: &str) -> usize {
        let hash = hash_str(&uid.to_ascii_lowercase()) as u64;
        (hash % self.partitions.len() as u64) as usize
    }

    /// Route one insert row into the owning partition's log slice.
    pub fn submit_insert(&self, json: &str, now_ms: i64) -> Result<usize, RouteError> {
        let doc: serde_json::Value = serde_json::from_str(json)?;
        let uid = match doc.get("id") {
            Some(serde_json::Value::String(uid)) => uid.clone(),
            Some(serde_json::Value::Number(uid)) => uid.to_string(),
            _ => return Err(RouteError::MissingId),
        };

        let partition = self.partition_for(&uid);
        self.side_log
            .append(self.hash, partition as i32, json, now_ms);
        Ok(partition)
    }

    /// Drive every partition's loop once. (Production hosts one thread per
    /// partition; this keeps single-threaded embedders and tests honest.)
    pub fn tick_all(&mut self, now_ms: i64) {
        for partition in &mut self.partitions {
            partition.tick(now_ms);
        }
    }
}
