//! An open-addressed hash map with geometric ring expansion.
//!
//! Storage is a short chain of "rings". Each ring is a flat slot array probed
//! linearly over a tiny window (`hash % size ..= hash % size + overflow`); a
//! key that finds neither itself nor a free slot in one ring moves on to the
//! next, and a new ring is allocated on demand. Ring sizes follow a fixed
//! profile chosen from the expected population ([`RingHint`]), so small maps
//! stay small and big maps expand in a few large steps instead of rehashing.
//!
//! Because a probe window never crosses a ring, deletion just empties the
//! slot; no tombstones. Lookups scan every ring's window (there are rarely
//! more than two or three rings).

use std::hash::{BuildHasher, Hash};

// ----------------------------------------------------------------------------

/// Expected population of the map; picks the ring growth profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RingHint {
    /// A handful of entries; keeps the first ring tiny.
    Compact,
    #[default]
    Lt1Million,
    Lt5Million,
    Lt25Million,
    Gt25Million,
    Gt50Million,
    Gt150Million,
    Gt250Million,
    Gt1Billion,
}

struct Profile {
    sizes: &'static [usize],
    overflows: &'static [usize],
}

impl RingHint {
    fn profile(self) -> Profile {
        match self {
            Self::Compact => Profile {
                sizes: &[32, 256, 2048],
                overflows: &[2, 4, 8],
            },
            Self::Lt1Million => Profile {
                sizes: &[32, 1024, 4096, 8192, 16384],
                overflows: &[1, 2, 3, 3, 4],
            },
            Self::Lt5Million => Profile {
                sizes: &[1024, 4096, 8192, 65536, 131072],
                overflows: &[1, 2, 3, 3, 4],
            },
            Self::Lt25Million => Profile {
                sizes: &[2048, 8192, 65536, 262144, 1048576, 4194304],
                overflows: &[1, 2, 2, 3, 4, 6],
            },
            Self::Gt25Million => Profile {
                sizes: &[2048, 8192, 65536, 262144, 1048576, 4194304, 8388608],
                overflows: &[1, 2, 2, 3, 3, 4, 6],
            },
            Self::Gt50Million => Profile {
                sizes: &[4096, 8192, 65536, 262144, 1048576, 4194304, 8388608, 16777216],
                overflows: &[1, 2, 2, 3, 3, 4, 4, 6],
            },
            Self::Gt150Million => Profile {
                sizes: &[
                    8192, 65536, 262144, 1048576, 4194304, 8388608, 16777216, 33554432,
                ],
                overflows: &[1, 2, 2, 3, 3, 4, 4, 6],
            },
            Self::Gt250Million => Profile {
                sizes: &[1048576, 4194304, 8388608, 16777216, 33554432, 67108864],
                overflows: &[2, 2, 3, 3, 4, 6],
            },
            Self::Gt1Billion => Profile {
                sizes: &[8388608, 16777216, 33554432, 67108864, 134217728],
                overflows: &[1, 2, 3, 4, 6],
            },
        }
    }

    /// Ring dimensions for the `index`-th ring; past the end of the profile
    /// the last step repeats.
    fn ring_dims(self, index: usize) -> (usize, usize) {
        let profile = self.profile();
        let clamped = index.min(profile.sizes.len() - 1);
        (profile.sizes[clamped], profile.overflows[clamped])
    }
}

// ----------------------------------------------------------------------------

struct Ring<K, V> {
    size: usize,
    overflow: usize,
    slots: Vec<Option<(K, V)>>,
}

impl<K, V> Ring<K, V> {
    fn new(size: usize, overflow: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(size + overflow, || None);
        Self {
            size,
            overflow,
            slots,
        }
    }

    #[inline]
    fn window(&self, hash: u64) -> std::ops::RangeInclusive<usize> {
        let start = (hash as usize) % self.size;
        start..=start + self.overflow
    }
}

/// The map itself. Move-only; there is deliberately no `Clone`.
pub struct RingMap<K, V, S = ahash::RandomState> {
    rings: Vec<Ring<K, V>>,
    hasher: S,
    hint: RingHint,
    len: usize,
}

impl<K: Hash + Eq, V> Default for RingMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> RingMap<K, V> {
    pub fn new() -> Self {
        Self::with_hint(RingHint::default())
    }

    pub fn with_hint(hint: RingHint) -> Self {
        let (size, overflow) = hint.ring_dims(0);
        Self {
            rings: vec![Ring::new(size, overflow)],
            hasher: ahash::RandomState::default(),
            hint,
            len: 0,
        }
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> RingMap<K, V, S> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_rings(&self) -> usize {
        self.rings.len()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let (ring, slot) = self.find(key)?;
        self.rings[ring].slots[slot].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let (ring, slot) = self.find(key)?;
        self.rings[ring].slots[slot].as_mut().map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Insert or overwrite; returns the previous value on overwrite.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let slot = self.slot_for(&key);
        match &mut self.rings[slot.0].slots[slot.1] {
            Some((_, old)) => Some(std::mem::replace(old, value)),
            empty @ None => {
                *empty = Some((key, value));
                self.len += 1;
                None
            }
        }
    }

    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        let slot = self.slot_for(&key);
        let entry = &mut self.rings[slot.0].slots[slot.1];
        if entry.is_none() {
            *entry = Some((key, default()));
            self.len += 1;
        }
        entry.as_mut().map(|(_, v)| v).expect("slot just filled")
    }

    /// Remove a key. The slot simply goes empty; probe chains stay intact
    /// because they never leave a ring.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (ring, slot) = self.find(key)?;
        let (_, value) = self.rings[ring].slots[slot].take()?;
        self.len -= 1;
        Some(value)
    }

    /// Walk all entries in ring order, skipping empty slots.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.rings.iter().flat_map(|ring| {
            ring.slots
                .iter()
                .filter_map(|slot| slot.as_ref().map(|(k, v)| (k, v)))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.rings.iter_mut().flat_map(|ring| {
            ring.slots
                .iter_mut()
                .filter_map(|slot| slot.as_mut().map(|(k, v)| (&*k, v)))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    // --- internals ---

    fn find(&self, key: &K) -> Option<(usize, usize)> {
        let hash = self.hasher.hash_one(key);
        for (ri, ring) in self.rings.iter().enumerate() {
            for pos in ring.window(hash) {
                if let Some((k, _)) = &ring.slots[pos] {
                    if k == key {
                        return Some((ri, pos));
                    }
                }
            }
        }
        None
    }

    /// The slot this key lives in, or the slot it should be inserted into.
    ///
    /// Scans every ring for the key first (an earlier ring may have gained a
    /// free slot since the key spilled over), then settles on the first free
    /// slot seen, allocating a new ring when every window is full.
    fn slot_for(&mut self, key: &K) -> (usize, usize) {
        let hash = self.hasher.hash_one(key);
        let mut first_free = None;

        for (ri, ring) in self.rings.iter().enumerate() {
            for pos in ring.window(hash) {
                match &ring.slots[pos] {
                    Some((k, _)) if k == key => return (ri, pos),
                    Some(_) => {}
                    None => {
                        if first_free.is_none() {
                            first_free = Some((ri, pos));
                        }
                    }
                }
            }
        }

        if let Some(slot) = first_free {
            return slot;
        }

        // Every window in every ring is occupied: grow.
        let (size, overflow) = self.hint.ring_dims(self.rings.len());
        let ring = Ring::new(size, overflow);
        let pos = *ring.window(hash).start();
        self.rings.push(ring);
        (self.rings.len() - 1, pos)
    }
}

// ----------------------------------------------------------------------------
