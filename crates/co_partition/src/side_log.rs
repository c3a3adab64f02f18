use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use co_alloc::BlockArena;
use co_types::codec::{self, CodecError};

/// Checkpoint block type for the (optional) side-log section.
pub const SIDELOG_BLOCK: u64 = 3;

/// Entries retained even when every reader is past them.
const MIN_LOG_SIZE: usize = 1000;

/// Trimming runs at most this often.
const TRIM_INTERVAL_MS: i64 = 60_000;

// ----------------------------------------------------------------------------

struct Entry {
    seq: u64,
    stamp: i64,
    table_hash: i64,
    partition: i32,
    json: Arc<str>,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<Entry>,
    next_seq: u64,

    /// Last consumed sequence per `(table, partition)` reader; `None` means
    /// "start of log" and blocks trimming until the reader catches up.
    cursors: ahash::HashMap<(i64, i32), Option<u64>>,

    last_trim_ms: i64,
}

/// The transaction log inserts flow through before they land in a partition.
///
/// One per process, passed explicitly; a single lock covers append, cursor
/// movement and trimming (the sections are tiny). Durability of an insert is
/// defined as "the append returned".
#[derive(Default)]
pub struct SideLog {
    inner: Mutex<Inner>,
}

impl SideLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Append one insert; visible to readers as soon as this returns.
    pub fn append(&self, table_hash: i64, partition: i32, json: &str, now_ms: i64) -> usize {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(Entry {
            seq,
            stamp: now_ms,
            table_hash,
            partition,
            json: Arc::from(json),
        });
        inner.entries.len()
    }

    /// Up to `limit` entries for this reader, strictly after its cursor, in
    /// append order. Advances the cursor past everything it scanned.
    pub fn read(
        &self,
        table_hash: i64,
        partition: i32,
        limit: usize,
        now_ms: i64,
    ) -> Vec<Arc<str>> {
        let mut out = Vec::new();
        {
            let mut inner = self.inner.lock();
            let cursor = inner
                .cursors
                .get(&(table_hash, partition))
                .copied()
                .flatten();

            let mut last_scanned = cursor;
            for entry in &inner.entries {
                if cursor.is_some_and(|consumed| entry.seq <= consumed) {
                    continue;
                }
                last_scanned = Some(entry.seq);
                if entry.table_hash == table_hash && entry.partition == partition {
                    out.push(Arc::clone(&entry.json));
                    if out.len() == limit {
                        break;
                    }
                }
            }

            inner.cursors.insert((table_hash, partition), last_scanned);
            inner.trim(now_ms);
        }
        out
    }

    /// Rewind a reader to the start of the log (forces a full replay, and
    /// holds trimming until the reader catches up again).
    pub fn reset_cursor(&self, table_hash: i64, partition: i32) {
        self.inner.lock().cursors.insert((table_hash, partition), None);
    }

    /// Forget every reader belonging to a partition (partition teardown).
    pub fn remove_cursors(&self, partition: i32) {
        self.inner
            .lock()
            .cursors
            .retain(|(_, p), _| *p != partition);
    }

    /// Trim if the interval allows; exposed for the maintenance cell.
    pub fn trim(&self, now_ms: i64) {
        self.inner.lock().trim(now_ms);
    }

    // --- checkpoint ---

    /// Write the SIDELOG block: every live entry in order.
    pub fn serialize(&self, arena: &mut BlockArena) {
        let inner = self.inner.lock();

        arena.put_u64(SIDELOG_BLOCK);
        arena.put_i64(inner.entries.len() as i64);
        for entry in &inner.entries {
            arena.put_i64(entry.stamp);
            arena.put_i64(entry.table_hash);
            arena.put_i32(entry.partition);
            arena.put_i32(entry.json.len() as i32);
            arena.extend(entry.json.as_bytes());
        }
    }

    /// Read a SIDELOG block. Restored entries come first; entries already in
    /// this log re-append after them (restamped), and every cursor rewinds to
    /// the start so the whole preserved log replays.
    pub fn deserialize(&self, read: &mut &[u8], now_ms: i64) -> Result<(), CodecError> {
        let block_type = codec::read_u64(read)?;
        if block_type != SIDELOG_BLOCK {
            return Err(CodecError);
        }
        let count = codec::read_i64(read)?;

        let mut inner = self.inner.lock();
        let old_entries = std::mem::take(&mut inner.entries);
        inner.next_seq = 0;

        for _ in 0..count {
            let stamp = codec::read_i64(read)?;
            let table_hash = codec::read_i64(read)?;
            let partition = codec::read_i32(read)?;
            let json_len = codec::read_i32(read)? as usize;
            let json = std::str::from_utf8(codec::take(read, json_len)?)
                .map_err(|_| CodecError)?;

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.push_back(Entry {
                seq,
                stamp,
                table_hash,
                partition,
                json: Arc::from(json),
            });
        }

        for entry in old_entries {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.push_back(Entry {
                seq,
                stamp: now_ms,
                ..entry
            });
        }

        for cursor in inner.cursors.values_mut() {
            *cursor = None;
        }

        co_log::debug!(entries = inner.entries.len(), "side log restored");
        Ok(())
    }
}

impl Inner {
    fn trim(&mut self, now_ms: i64) {
        if now_ms - self.last_trim_ms < TRIM_INTERVAL_MS {
            return;
        }
        self.last_trim_ms = now_ms;

        // A reader still at the start pins the whole log.
        if self.cursors.values().any(Option::is_none) {
            return;
        }
        let Some(min_cursor) = self.cursors.values().flatten().min().copied() else {
            return;
        };

        let before = self.entries.len();
        while self.entries.len() > MIN_LOG_SIZE {
            match self.entries.front() {
                Some(front) if front.seq < min_cursor => {
                    self.entries.pop_front();
                }
                _ => break,
            }
        }

        let trimmed = before - self.entries.len();
        if trimmed > 0 {
            co_log::debug!(
                trimmed,
                remaining = self.entries.len(),
                "transaction log trimmed"
            );
        }
    }
}

// ----------------------------------------------------------------------------
