use std::sync::Arc;

use itertools::Itertools as _;
use nohash_hasher::IntMap;

use co_alloc::{BlockArena, BucketPool};
use co_bitmap::{Bitmap, StoredBits};
use co_map::{RingHint, RingMap};
use co_trie::RadixTrie16;
use co_types::codec::{self, CodecError};
use co_types::{PropId, NONE, PROP_OMIT_FIRST, PROP_OMIT_LAST, PROP_STAMP};

use crate::AttributeBlob;
use crate::LruCache;

/// Checkpoint block type for the attribute section.
pub const ATTRIBUTES_BLOCK: u64 = 1;

// ----------------------------------------------------------------------------

/// Index key: a property and one of its values (hashed, for text).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrKey {
    pub prop: PropId,
    pub value: i64,
}

impl AttrKey {
    /// The property-presence entry: set for every customer holding *any*
    /// value on the property.
    #[inline]
    pub fn presence(prop: PropId) -> Self {
        Self { prop, value: NONE }
    }
}

/// Comparison mode for [`AttributeStore::property_values`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListMode {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Present,
}

#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Capacity of the live-bitmap cache.
    ///
    /// Size this against the widest AND/OR chain a segment evaluation is
    /// expected to hold live at once; a cache smaller than that working set
    /// re-mounts the same bitmap over and over.
    pub live_bitmaps: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { live_bitmaps: 50 }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("attribute block truncated")]
    Truncated(#[from] CodecError),

    #[error("expected block type {expected}, found {found}")]
    BadBlockType { expected: u64, found: u64 },

    #[error("attribute text is not utf-8")]
    BadText(#[from] std::str::Utf8Error),
}

// ----------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Change {
    linear_id: i32,
    set: bool,
}

/// One partition's inverted index over event and customer property values.
///
/// At rest every `(prop, value)` maps to a compressed [`StoredBits`]; a small
/// LRU keeps the hot bitmaps mounted. Mutations arrive through
/// [`AttributeStore::mark_dirty`] and take effect at
/// [`AttributeStore::flush_dirty`], in the order they were recorded.
pub struct AttributeStore {
    pool: Arc<BucketPool>,
    config: StoreConfig,

    index: RingMap<AttrKey, StoredBits>,
    blob: AttributeBlob,
    live: LruCache<AttrKey, Bitmap>,
    changes: ahash::HashMap<AttrKey, Vec<Change>>,

    /// `(customer-id, value) -> linear-id`, one trie per customer-indexed
    /// property.
    customer_index: IntMap<PropId, RadixTrie16<(i64, i64), i32>>,
}

impl AttributeStore {
    pub fn new(pool: Arc<BucketPool>, config: StoreConfig) -> Self {
        Self {
            pool,
            live: LruCache::new(config.live_bitmaps),
            config,
            index: RingMap::with_hint(RingHint::Lt5Million),
            blob: AttributeBlob::new(),
            changes: Default::default(),
            customer_index: Default::default(),
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    pub fn num_attrs(&self) -> usize {
        self.index.len()
    }

    pub fn num_live(&self) -> usize {
        self.live.len()
    }

    pub fn pending_changes(&self) -> usize {
        self.changes.values().map(Vec::len).sum()
    }

    /// Make sure an index entry exists for this key.
    pub fn ensure(&mut self, key: AttrKey) {
        self.index.get_or_insert_with(key, StoredBits::empty);
    }

    /// Intern a text value and make sure its index entry exists; returns the
    /// hash the value indexes under.
    pub fn ensure_text(&mut self, prop: PropId, text: &str) -> i64 {
        let value = self.blob.store(prop, text);
        self.ensure(AttrKey { prop, value });
        value
    }

    pub fn exists(&self, key: AttrKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn text(&self, prop: PropId, value: i64) -> Option<&str> {
        self.blob.get(prop, value)
    }

    /// The index hash a text value resolves to, if it was ever interned.
    pub fn resolve_text(&self, prop: PropId, text: &str) -> Option<i64> {
        self.blob.resolve(prop, text)
    }

    /// A live, mutable bitmap for this key.
    ///
    /// On a cache miss the at-rest record is mounted (created empty if the
    /// key was never seen). On eviction the evictee is re-compressed and its
    /// record replaced in place. Mutations to the returned bitmap are not
    /// visible in the at-rest record until eviction or [`Self::serialize`].
    pub fn get_bits(&mut self, key: AttrKey) -> &mut Bitmap {
        if self.live.contains(&key) {
            return self.live.get_mut(&key).expect("just checked");
        }

        let stored = self.index.get_or_insert_with(key, StoredBits::empty);
        let bits = Bitmap::mount(stored);

        if let Some((evicted_key, evicted_bits)) = self.live.insert(key, bits) {
            co_log::trace!(prop = evicted_key.prop, "bitmap cache eviction");
            let stored = evicted_bits.store(&self.pool);
            match self.index.get_mut(&evicted_key) {
                Some(record) => {
                    let old = std::mem::replace(record, stored);
                    old.release(&self.pool);
                }
                None => {
                    self.index.insert(evicted_key, stored);
                }
            }
        }

        self.live.get_mut(&key).expect("just inserted")
    }

    /// Queue a bit change; applied at the next [`Self::flush_dirty`].
    ///
    /// The stamp column and the bookkeeping columns never index. Customer-
    /// indexed properties also maintain their `(customer, value)` trie here.
    pub fn mark_dirty(
        &mut self,
        customer_id: i64,
        linear_id: i32,
        prop: PropId,
        value: i64,
        set: bool,
    ) {
        if prop == PROP_STAMP || (PROP_OMIT_FIRST..=PROP_OMIT_LAST).contains(&prop) {
            return;
        }

        if let Some(trie) = self.customer_index.get_mut(&prop) {
            if set {
                trie.set((customer_id, value), linear_id);
            } else {
                trie.remove((customer_id, value));
            }
        }

        self.changes
            .entry(AttrKey { prop, value })
            .or_default()
            .push(Change { linear_id, set });
    }

    /// Apply every queued change, per key in the order recorded. No
    /// compression happens here; that waits for eviction or serialize.
    pub fn flush_dirty(&mut self) {
        let changes = std::mem::take(&mut self.changes);
        for (key, list) in changes {
            let bits = self.get_bits(key);
            for change in list {
                if change.set {
                    bits.set(change.linear_id as usize);
                } else {
                    bits.clear(change.linear_id as usize);
                }
            }
        }
    }

    /// Enumerate the `(prop, *)` entries matching `mode` against `value`.
    ///
    /// `Eq`/`Neq` short-circuit to a single lookup (`Neq` is resolved by the
    /// query layer as presence-minus-equals); range modes and `Present` skip
    /// the presence entry itself.
    pub fn property_values(&self, prop: PropId, mode: ListMode, value: i64) -> Vec<AttrKey> {
        match mode {
            ListMode::Eq | ListMode::Neq => {
                let key = AttrKey { prop, value };
                if self.exists(key) {
                    vec![key]
                } else {
                    Vec::new()
                }
            }
            _ => self
                .index
                .keys()
                .filter(|key| key.prop == prop && key.value != NONE)
                .filter(|key| match mode {
                    ListMode::Present => true,
                    ListMode::Gt => key.value > value,
                    ListMode::Gte => key.value >= value,
                    ListMode::Lt => key.value < value,
                    ListMode::Lte => key.value <= value,
                    ListMode::Eq | ListMode::Neq => unreachable!(),
                })
                .copied()
                .collect(),
        }
    }

    /// Register a property for per-customer `(customer, value)` indexing.
    pub fn create_customer_index(&mut self, prop: PropId) {
        self.customer_index.entry(prop).or_default();
    }

    pub fn customer_index(&self, prop: PropId) -> Option<&RadixTrie16<(i64, i64), i32>> {
        self.customer_index.get(&prop)
    }

    // --- checkpoint ---

    /// Write the ATTRIBUTES block: flushes queued changes, writes live
    /// bitmaps back to their records, then emits every record.
    pub fn serialize(&mut self, arena: &mut BlockArena) {
        self.flush_dirty();

        // The at-rest copies must be current before they hit the wire.
        for (key, bits) in self.live.iter() {
            let stored = bits.store(&self.pool);
            match self.index.get_mut(key) {
                Some(record) => {
                    let old = std::mem::replace(record, stored);
                    old.release(&self.pool);
                }
                None => {
                    self.index.insert(*key, stored);
                }
            }
        }

        arena.put_u64(ATTRIBUTES_BLOCK);
        let section_len = arena.reserve_i64();
        let body_start = arena.bytes();

        // Fixed order so two checkpoints of the same state are byte-equal.
        for (key, stored) in self.index.iter().sorted_by_key(|(key, _)| **key) {
            let text = self.blob.get(key.prop, key.value);

            arena.put_i32(key.prop);
            arena.put_i64(key.value);
            arena.put_i32(stored.uncompressed_words);
            arena.put_i32(text.map_or(0, |t| t.len() as i32));
            arena.put_i32(stored.data.len() as i32);
            arena.put_i64(stored.first_set_bit);
            arena.put_i32(stored.first_set_offset);
            arena.put_i32(stored.first_set_len);
            if let Some(text) = text {
                arena.extend(text.as_bytes());
            }
            arena.extend(&stored.data);
        }

        arena.fill_i64(section_len, (arena.bytes() - body_start) as i64);
    }

    /// Read an ATTRIBUTES block back into this (fresh) store.
    pub fn deserialize(&mut self, read: &mut &[u8]) -> Result<(), DecodeError> {
        let block_type = codec::read_u64(read)?;
        if block_type != ATTRIBUTES_BLOCK {
            return Err(DecodeError::BadBlockType {
                expected: ATTRIBUTES_BLOCK,
                found: block_type,
            });
        }
        let section_len = codec::read_i64(read)? as usize;
        let mut body = codec::take(read, section_len)?;

        let mut restored = 0_usize;
        while !body.is_empty() {
            let prop = codec::read_i32(&mut body)?;
            let value = codec::read_i64(&mut body)?;
            let uncompressed_words = codec::read_i32(&mut body)?;
            let text_len = codec::read_i32(&mut body)? as usize;
            let comp_bytes = codec::read_i32(&mut body)? as usize;
            let first_set_bit = codec::read_i64(&mut body)?;
            let first_set_offset = codec::read_i32(&mut body)?;
            let first_set_len = codec::read_i32(&mut body)?;

            if text_len > 0 {
                let text = std::str::from_utf8(codec::take(&mut body, text_len)?)?;
                self.blob.store_at(prop, value, text);
            }

            let mut data = self.pool.rent(comp_bytes);
            data.extend_from_slice(codec::take(&mut body, comp_bytes)?);

            self.index.insert(
                AttrKey { prop, value },
                StoredBits {
                    uncompressed_words,
                    first_set_bit,
                    first_set_offset,
                    first_set_len,
                    data,
                },
            );
            restored += 1;
        }

        co_log::debug!(attrs = restored, "attribute index restored");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
