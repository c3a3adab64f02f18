//! The 16-bit variant: two key bytes per level.
//!
//! An 8-byte key makes a four-level trie. Each node is a sorted array of
//! `(word, slot)` pairs grown in power-of-two pages; retired page buffers are
//! recycled through a free list shared by the whole trie, one class per
//! `page_bits`.

use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::TrieKey;

/// On a short page a sequential scan beats sub-division: a slot is small
/// enough that ~two cache lines of them go by before a branch miss would.
const LINEAR_CUTOFF: usize = 10;

/// A page at max size holds every possible word, sorted, so the word is the
/// slot index.
const MAX_PAGE_BITS: u8 = 16;

/// Pages the root starts at; everything below starts at one slot.
const ROOT_PAGE_BITS: u8 = 9;

type NodeId = u32;

enum Down<V> {
    Node(NodeId),
    Leaf(V),
}

struct Slot<V> {
    word: u16,
    down: Down<V>,
}

struct Page<V> {
    bits: u8,
    slots: Vec<Slot<V>>,
}

/// Free page buffers, one class per `page_bits`.
struct PagePool<V> {
    classes: Vec<Vec<Vec<Slot<V>>>>,
}

impl<V> PagePool<V> {
    fn new() -> Self {
        Self {
            classes: (0..=MAX_PAGE_BITS).map(|_| Vec::new()).collect(),
        }
    }

    fn take(&mut self, bits: u8) -> Vec<Slot<V>> {
        self.classes[bits as usize]
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(1 << bits))
    }

    fn give(&mut self, bits: u8, mut buf: Vec<Slot<V>>) {
        buf.clear();
        self.classes[bits as usize].push(buf);
    }
}

// ----------------------------------------------------------------------------

/// `Key -> Value` radix trie, two key bytes per level, most-significant word
/// first.
pub struct RadixTrie16<K: TrieKey, V> {
    pages: Vec<Page<V>>,
    pool: PagePool<V>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: TrieKey, V> Default for RadixTrie16<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TrieKey, V> RadixTrie16<K, V> {
    const LEVELS: usize = K::LEN / 2;

    pub fn new() -> Self {
        assert!(K::LEN >= 2 && K::LEN % 2 == 0, "16-bit trie needs an even-length key");
        let mut pool = PagePool::new();
        let root = Page {
            bits: ROOT_PAGE_BITS,
            slots: pool.take(ROOT_PAGE_BITS),
        };
        Self {
            pages: vec![root],
            pool,
            len: 0,
            _key: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or overwrite; returns the previous value on overwrite.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        let words = key_words::<K>(&key);
        let mut node = 0_usize;
        let mut down = Down::Leaf(value);

        for level in 0..Self::LEVELS {
            let word = words[level];
            let terminal = level == Self::LEVELS - 1;

            match search(&self.pages[node].slots, word) {
                Ok(index) => {
                    if terminal {
                        let Down::Leaf(value) = down else {
                            unreachable!("terminal level always carries the leaf");
                        };
                        let Down::Leaf(old) = &mut self.pages[node].slots[index].down else {
                            unreachable!("fixed-length keys terminate at the same depth");
                        };
                        return Some(std::mem::replace(old, value));
                    }
                    let Down::Node(next) = self.pages[node].slots[index].down else {
                        unreachable!("fixed-length keys terminate at the same depth");
                    };
                    node = next as usize;
                }
                Err(insert_at) => {
                    if terminal {
                        self.insert_slot(node, insert_at, word, down);
                        self.len += 1;
                        return None;
                    }
                    // Fill in the missing intermediate node, one slot wide.
                    let child = self.new_page(0);
                    self.insert_slot(node, insert_at, word, Down::Node(child));
                    node = child as usize;
                }
            }
        }
        unreachable!("loop always returns at the terminal level");
    }

    pub fn get(&self, key: K) -> Option<&V> {
        let index = self.find(&key)?;
        match &self.pages[index.0].slots[index.1].down {
            Down::Leaf(value) => Some(value),
            Down::Node(_) => None,
        }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let index = self.find(&key)?;
        match &mut self.pages[index.0].slots[index.1].down {
            Down::Leaf(value) => Some(value),
            Down::Node(_) => None,
        }
    }

    #[inline]
    pub fn exists(&self, key: K) -> bool {
        self.find(&key).is_some()
    }

    /// Remove a key, returning its value.
    ///
    /// Emptied intermediate pages stay in place; the trie never shrinks its
    /// node structure (the buffers get reused on the next insert).
    pub fn remove(&mut self, key: K) -> Option<V> {
        let (node, index) = self.find(&key)?;
        let slot = self.pages[node].slots.remove(index);
        self.len -= 1;
        match slot.down {
            Down::Leaf(value) => Some(value),
            Down::Node(_) => unreachable!("find only lands on terminal slots"),
        }
    }

    /// In-order cursor: keys ascend in unsigned byte order.
    pub fn iter(&self) -> Cursor<'_, K, V> {
        Cursor::new(self, false)
    }

    /// In-order cursor with the root level visited in signed-word order, so
    /// signed integer keys enumerate in numeric order.
    pub fn iter_signed(&self) -> Cursor<'_, K, V> {
        Cursor::new(self, true)
    }

    // --- internals ---

    fn find(&self, key: &K) -> Option<(usize, usize)> {
        let words = key_words::<K>(key);
        let mut node = 0_usize;
        for level in 0..Self::LEVELS {
            let index = search(&self.pages[node].slots, words[level]).ok()?;
            if level == Self::LEVELS - 1 {
                return Some((node, index));
            }
            match self.pages[node].slots[index].down {
                Down::Node(next) => node = next as usize,
                Down::Leaf(_) => return None,
            }
        }
        None
    }

    fn new_page(&mut self, bits: u8) -> NodeId {
        let id = self.pages.len() as NodeId;
        self.pages.push(Page {
            bits,
            slots: self.pool.take(bits),
        });
        id
    }

    fn insert_slot(&mut self, node: usize, at: usize, word: u16, down: Down<V>) {
        let (used, bits) = {
            let page = &self.pages[node];
            (page.slots.len(), page.bits)
        };
        if used == 1 << bits {
            // Page is full: move to the next size class, recycle the old
            // buffer.
            let new_bits = bits + 1;
            debug_assert!(new_bits <= MAX_PAGE_BITS);
            let mut grown = self.pool.take(new_bits);
            let page = &mut self.pages[node];
            grown.extend(page.slots.drain(..));
            let retired = std::mem::replace(&mut page.slots, grown);
            page.bits = new_bits;
            self.pool.give(bits, retired);
        }
        self.pages[node].slots.insert(at, Slot { word, down });
    }
}

fn key_words<K: TrieKey>(key: &K) -> SmallVec<[u16; 8]> {
    let mut bytes = SmallVec::<[u8; 16]>::from_elem(0, K::LEN);
    key.write_be(&mut bytes);
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Sorted-array search: `Ok(index)` on hit, `Err(insert_point)` on miss.
fn search<V>(slots: &[Slot<V>], word: u16) -> Result<usize, usize> {
    let used = slots.len();
    if used == 0 {
        return Err(0);
    }

    // Head/tail shortcut; append- and prepend-heavy workloads resolve here.
    match slots[0].word.cmp(&word) {
        std::cmp::Ordering::Equal => return Ok(0),
        std::cmp::Ordering::Greater => return Err(0),
        std::cmp::Ordering::Less => {}
    }
    match slots[used - 1].word.cmp(&word) {
        std::cmp::Ordering::Equal => return Ok(used - 1),
        std::cmp::Ordering::Less => return Err(used),
        std::cmp::Ordering::Greater => {}
    }

    // A full page holds every word in order: the word is the index.
    if used == 1 << MAX_PAGE_BITS {
        return Ok(word as usize);
    }

    if used <= LINEAR_CUTOFF {
        return linear_scan(slots, word, 1, used - 1);
    }

    // Proportional first split: assuming decent key distribution the word
    // sits near its proportional position, which beats starting at the
    // midpoint.
    let mut lo = 1;
    let mut hi = used - 2;
    let mut mid = ((word as usize * used) >> 16).clamp(lo, hi);
    loop {
        if hi - lo <= LINEAR_CUTOFF {
            return linear_scan(slots, word, lo, hi + 1);
        }
        match slots[mid].word.cmp(&word) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid - 1,
            std::cmp::Ordering::Equal => return Ok(mid),
        }
        if lo > hi {
            return Err(lo);
        }
        mid = lo + (hi - lo) / 2;
    }
}

fn linear_scan<V>(slots: &[Slot<V>], word: u16, from: usize, to: usize) -> Result<usize, usize> {
    for (index, slot) in slots.iter().enumerate().take(to).skip(from) {
        if slot.word >= word {
            return if slot.word == word {
                Ok(index)
            } else {
                Err(index)
            };
        }
    }
    Err(to)
}

// ----------------------------------------------------------------------------
// Cursor

struct Frame {
    node: usize,
    /// Visit position within the node (an index into `order` for the root
    /// when iterating signed, a direct slot index otherwise).
    pos: usize,
}

/// Depth-first in-order walk. Depth is bounded by the key length.
pub struct Cursor<'a, K: TrieKey, V> {
    trie: &'a RadixTrie16<K, V>,
    stack: SmallVec<[Frame; 8]>,
    key_bytes: SmallVec<[u8; 16]>,

    /// Root visit order for signed iteration: slot indices sorted by the
    /// signed interpretation of their word.
    root_order: Option<Vec<usize>>,
}

impl<'a, K: TrieKey, V> Cursor<'a, K, V> {
    fn new(trie: &'a RadixTrie16<K, V>, signed: bool) -> Self {
        let root_order = signed.then(|| {
            let mut order: Vec<usize> = (0..trie.pages[0].slots.len()).collect();
            order.sort_by_key(|&i| trie.pages[0].slots[i].word as i16);
            order
        });
        Self {
            trie,
            stack: smallvec::smallvec![Frame { node: 0, pos: 0 }],
            key_bytes: SmallVec::new(),
            root_order,
        }
    }

    fn slot_index(&self, depth: usize, pos: usize) -> usize {
        match (&self.root_order, depth) {
            (Some(order), 0) => order[pos],
            _ => pos,
        }
    }
}

impl<'a, K: TrieKey, V> Iterator for Cursor<'a, K, V> {
    type Item = (K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stack.is_empty() {
                return None;
            }
            let depth = self.stack.len() - 1;
            let frame = self.stack.last_mut()?;
            let node = &self.trie.pages[frame.node];

            if frame.pos >= node.slots.len() {
                self.stack.pop();
                if self.stack.is_empty() {
                    return None;
                }
                self.key_bytes.truncate(self.key_bytes.len() - 2);
                continue;
            }

            let idx = match (&self.root_order, depth) {
                (Some(order), 0) => order[frame.pos],
                _ => frame.pos,
            };
            let slot = &node.slots[idx];
            frame.pos += 1;

            match &slot.down {
                Down::Node(child) => {
                    self.key_bytes.extend_from_slice(&slot.word.to_be_bytes());
                    self.stack.push(Frame {
                        node: *child as usize,
                        pos: 0,
                    });
                }
                Down::Leaf(value) => {
                    self.key_bytes.extend_from_slice(&slot.word.to_be_bytes());
                    let key = K::read_be(&self.key_bytes);
                    self.key_bytes.truncate(self.key_bytes.len() - 2);
                    return Some((key, value));
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    use super::*;

    #[test]
    fn set_get_overwrite() {
        let mut trie = RadixTrie16::<i64, u32>::new();
        assert!(trie.get(42).is_none());

        assert_eq!(trie.set(42, 1), None);
        assert_eq!(trie.set(-42, 2), None);
        assert_eq!(trie.get(42), Some(&1));
        assert_eq!(trie.get(-42), Some(&2));
        assert!(trie.exists(42));
        assert!(!trie.exists(43));

        assert_eq!(trie.set(42, 7), Some(1));
        assert_eq!(trie.get(42), Some(&7));
        assert_eq!(trie.len(), 2);
    }

    #[test]
    fn get_returns_the_last_set_value_under_churn() {
        let mut trie = RadixTrie16::<u64, u64>::new();
        let mut oracle = std::collections::HashMap::new();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20_000 {
            let key = rng.gen_range(0..5_000_u64);
            match rng.gen_range(0..3) {
                0 | 1 => {
                    let value = rng.gen::<u64>();
                    assert_eq!(trie.set(key, value), oracle.insert(key, value));
                }
                _ => {
                    assert_eq!(trie.remove(key), oracle.remove(&key));
                }
            }
        }

        assert_eq!(trie.len(), oracle.len());
        for (key, value) in &oracle {
            assert_eq!(trie.get(*key), Some(value));
        }
    }

    #[test]
    fn sequential_appends_hit_the_tail_shortcut() {
        let mut trie = RadixTrie16::<u32, u32>::new();
        for i in 0..10_000 {
            trie.set(i, i * 2);
        }
        for i in 0..10_000 {
            assert_eq!(trie.get(i), Some(&(i * 2)));
        }
    }

    #[test]
    fn unsigned_iteration_is_sorted() {
        let mut trie = RadixTrie16::<u64, ()>::new();
        let mut rng = StdRng::seed_from_u64(13);
        let mut keys: Vec<u64> = (0..1_000).map(|_| rng.gen()).collect();
        for &key in &keys {
            trie.set(key, ());
        }

        keys.sort_unstable();
        keys.dedup();
        let walked: Vec<u64> = trie.iter().map(|(key, ())| key).collect();
        assert_eq!(walked, keys);
    }

    #[test]
    fn signed_iteration_is_numeric() {
        let mut trie = RadixTrie16::<i64, ()>::new();
        let mut keys = vec![-5_000_000_000, -1, 0, 1, 99, i64::MIN, i64::MAX];
        for &key in &keys {
            trie.set(key, ());
        }

        keys.sort_unstable();
        let walked: Vec<i64> = trie.iter_signed().map(|(key, ())| key).collect();
        assert_eq!(walked, keys);
    }

    #[test]
    fn pair_keys_group_by_prefix() {
        let mut trie = RadixTrie16::<(i64, i64), i32>::new();
        trie.set((7, 100), 1);
        trie.set((7, 50), 2);
        trie.set((8, 1), 3);

        let walked: Vec<(i64, i64)> = trie.iter().map(|(key, _)| key).collect();
        assert_eq!(walked, vec![(7, 50), (7, 100), (8, 1)]);
    }
}
