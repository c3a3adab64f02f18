use nohash_hasher::IntMap;

use co_types::hash_str;

/// Tie-breaker applied when events share a timestamp.
pub const DEFAULT_Z_ORDER: i32 = 99;

/// Per-event-name ordering hints, `0..=99`.
///
/// Events without an entry sort last among rows sharing their stamp. Keyed by
/// the hash of the event name, since that's what the rows store.
#[derive(Default)]
pub struct EventOrder {
    by_hash: IntMap<i64, i32>,
}

impl EventOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, event: &str, order: i32) {
        self.by_hash
            .insert(hash_str(event), order.clamp(0, DEFAULT_Z_ORDER));
    }

    #[inline]
    pub fn get(&self, event_hash: i64) -> i32 {
        self.by_hash
            .get(&event_hash)
            .copied()
            .unwrap_or(DEFAULT_Z_ORDER)
    }
}
