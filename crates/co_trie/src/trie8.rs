//! The 8-bit variant: one key byte per level.
//!
//! Twice the levels of [`crate::RadixTrie16`] and about half the memory; use
//! it where the key space is dense enough that wide pages would mostly sit
//! empty. The level walk is an explicit `0..K::LEN` loop over the key bytes.

use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::TrieKey;

/// Narrower slots than the 16-bit variant, so a longer linear window pays.
const LINEAR_CUTOFF: usize = 32;

/// A page at max size holds every possible byte, sorted, so the byte is the
/// slot index.
const MAX_PAGE_BITS: u8 = 8;

/// The root starts full-sized; everything below starts at one slot.
const ROOT_PAGE_BITS: u8 = 8;

type NodeId = u32;

enum Down<V> {
    Node(NodeId),
    Leaf(V),
}

struct Slot<V> {
    word: u8,
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

/// `Key -> Value` radix trie, one key byte per level, most-significant byte
/// first.
pub struct RadixTrie8<K: TrieKey, V> {
    pages: Vec<Page<V>>,
    pool: PagePool<V>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: TrieKey, V> Default for RadixTrie8<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TrieKey, V> RadixTrie8<K, V> {
    pub fn new() -> Self {
        assert!(K::LEN >= 1, "zero-length trie key");
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
        let mut bytes = SmallVec::<[u8; 16]>::from_elem(0, K::LEN);
        key.write_be(&mut bytes);

        let mut node = 0_usize;
        let mut down = Down::Leaf(value);

        for (level, &word) in bytes.iter().enumerate() {
            let terminal = level == K::LEN - 1;

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
                    let child = self.new_page(0);
                    self.insert_slot(node, insert_at, word, Down::Node(child));
                    node = child as usize;
                }
            }
        }
        unreachable!("loop always returns at the terminal level");
    }

    pub fn get(&self, key: K) -> Option<&V> {
        let (node, index) = self.find(&key)?;
        match &self.pages[node].slots[index].down {
            Down::Leaf(value) => Some(value),
            Down::Node(_) => None,
        }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let (node, index) = self.find(&key)?;
        match &mut self.pages[node].slots[index].down {
            Down::Leaf(value) => Some(value),
            Down::Node(_) => None,
        }
    }

    #[inline]
    pub fn exists(&self, key: K) -> bool {
        self.find(&key).is_some()
    }

    /// Remove a key, returning its value. Emptied intermediate pages stay in
    /// place.
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

    /// In-order cursor with the root level visited in signed-byte order, so
    /// signed integer keys enumerate in numeric order.
    pub fn iter_signed(&self) -> Cursor<'_, K, V> {
        Cursor::new(self, true)
    }

    // --- internals ---

    fn find(&self, key: &K) -> Option<(usize, usize)> {
        let mut bytes = SmallVec::<[u8; 16]>::from_elem(0, K::LEN);
        key.write_be(&mut bytes);

        let mut node = 0_usize;
        for (level, &word) in bytes.iter().enumerate() {
            let index = search(&self.pages[node].slots, word).ok()?;
            if level == K::LEN - 1 {
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

    fn insert_slot(&mut self, node: usize, at: usize, word: u8, down: Down<V>) {
        let (used, bits) = {
            let page = &self.pages[node];
            (page.slots.len(), page.bits)
        };
        if used == 1 << bits {
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

/// Sorted-array search: `Ok(index)` on hit, `Err(insert_point)` on miss.
fn search<V>(slots: &[Slot<V>], word: u8) -> Result<usize, usize> {
    let used = slots.len();
    if used == 0 {
        return Err(0);
    }

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

    if used == 1 << MAX_PAGE_BITS {
        return Ok(word as usize);
    }

    if used <= LINEAR_CUTOFF {
        return linear_scan(slots, word, 1, used - 1);
    }

    let mut lo = 1;
    let mut hi = used - 2;
    let mut mid = ((word as usize * used) >> 8).clamp(lo, hi);
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

fn linear_scan<V>(slots: &[Slot<V>], word: u8, from: usize, to: usize) -> Result<usize, usize> {
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
    pos: usize,
}

/// Depth-first in-order walk. Depth is bounded by the key length.
pub struct Cursor<'a, K: TrieKey, V> {
    trie: &'a RadixTrie8<K, V>,
    stack: SmallVec<[Frame; 16]>,
    key_bytes: SmallVec<[u8; 16]>,
    root_order: Option<Vec<usize>>,
}

impl<'a, K: TrieKey, V> Cursor<'a, K, V> {
    fn new(trie: &'a RadixTrie8<K, V>, signed: bool) -> Self {
        let root_order = signed.then(|| {
            let mut order: Vec<usize> = (0..trie.pages[0].slots.len()).collect();
            order.sort_by_key(|&i| trie.pages[0].slots[i].word as i8);
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
                self.key_bytes.pop();
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
                    self.key_bytes.push(slot.word);
                    self.stack.push(Frame {
                        node: *child as usize,
                        pos: 0,
                    });
                }
                Down::Leaf(value) => {
                    self.key_bytes.push(slot.word);
                    let key = K::read_be(&self.key_bytes);
                    self.key_bytes.pop();
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
    fn set_get_remove() {
        let mut trie = RadixTrie8::<u32, String>::new();
        assert_eq!(trie.set(5, "five".to_owned()), None);
        assert_eq!(trie.set(5, "FIVE".to_owned()), Some("five".to_owned()));
        assert_eq!(trie.get(5).map(String::as_str), Some("FIVE"));
        assert_eq!(trie.remove(5).as_deref(), Some("FIVE"));
        assert!(trie.is_empty());
        assert_eq!(trie.remove(5), None);
    }

    #[test]
    fn random_churn_matches_oracle() {
        let mut trie = RadixTrie8::<i64, i64>::new();
        let mut oracle = std::collections::HashMap::new();
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..20_000 {
            let key = rng.gen_range(-2_000..2_000_i64);
            if rng.gen_bool(0.7) {
                let value = rng.gen::<i64>();
                assert_eq!(trie.set(key, value), oracle.insert(key, value));
            } else {
                assert_eq!(trie.remove(key), oracle.remove(&key));
            }
        }

        for (key, value) in &oracle {
            assert_eq!(trie.get(*key), Some(value));
        }
    }

    #[test]
    fn dense_byte_range_fills_full_pages() {
        let mut trie = RadixTrie8::<u16, u16>::new();
        for i in 0..=u16::MAX {
            trie.set(i, i);
        }
        assert_eq!(trie.len(), 65536);
        for i in (0..=u16::MAX).step_by(257) {
            assert_eq!(trie.get(i), Some(&i));
        }
    }

    #[test]
    fn signed_iteration_is_numeric() {
        let mut trie = RadixTrie8::<i32, ()>::new();
        let mut keys = vec![-70_000, -1, 0, 3, 70_000, i32::MIN, i32::MAX];
        for &key in &keys {
            trie.set(key, ());
        }
        keys.sort_unstable();
        let walked: Vec<i32> = trie.iter_signed().map(|(key, ())| key).collect();
        assert_eq!(walked, keys);
    }
}
