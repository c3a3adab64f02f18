//! The inverted-index bitset.
//!
//! A [`Bitmap`] is an ordered set of non-negative integers (customer
//! linear-ids) stored as an array of 64-bit words. Live bitmaps are plain
//! word arrays; at rest they are LZ4 block-compressed with a small skip
//! header ([`StoredBits`]) describing the run of leading all-zero words, so
//! mounting a bitmap whose first customer sits at bit five million doesn't
//! decompress five million zeros' worth of nothing.
//!
//! Binary operations are word-wise up to the shorter of the two operands,
//! with the receiver zero-extended first when it is the short one; within one
//! partition every bitmap spans the same customer universe, so operand
//! lengths only differ while a freshly grown bitmap catches up.

use co_alloc::BucketPool;

const WORD_BITS: usize = 64;

// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bit_capacity(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(WORD_BITS)],
        }
    }

    /// Number of words currently backing the set.
    #[inline]
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % WORD_BITS);
    }

    #[inline]
    pub fn clear(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        if let Some(slot) = self.words.get_mut(word) {
            *slot &= !(1 << (bit % WORD_BITS));
        }
    }

    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        self.words
            .get(bit / WORD_BITS)
            .is_some_and(|word| word & (1 << (bit % WORD_BITS)) != 0)
    }

    /// Number of set bits.
    pub fn population(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Lowest set bit, if any.
    pub fn first_set(&self) -> Option<usize> {
        self.words.iter().enumerate().find_map(|(i, &word)| {
            (word != 0).then(|| i * WORD_BITS + word.trailing_zeros() as usize)
        })
    }

    /// Iterate set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }

    // --- binary ops; the receiver holds the result ---

    pub fn op_and(&mut self, other: &Self) {
        self.match_length(other);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= src;
        }
    }

    pub fn op_or(&mut self, other: &Self) {
        self.match_length(other);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= src;
        }
    }

    pub fn op_and_not(&mut self, other: &Self) {
        self.match_length(other);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= !src;
        }
    }

    pub fn op_not(&mut self) {
        for word in &mut self.words {
            *word = !*word;
        }
    }

    pub fn op_copy(&mut self, other: &Self) {
        self.words.clear();
        self.words.extend_from_slice(&other.words);
    }

    fn match_length(&mut self, other: &Self) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
    }

    // --- at-rest form ---

    /// Compress into a pool-rented buffer, computing the zero-prefix skip
    /// header.
    pub fn store(&self, pool: &BucketPool) -> StoredBits {
        let skip = self
            .words
            .iter()
            .position(|&word| word != 0)
            .unwrap_or(self.words.len());
        let live = &self.words[skip..];
        let live_bytes: &[u8] = bytemuck::cast_slice(live);

        let mut data = pool.rent(lz4_flex::block::get_maximum_output_size(live_bytes.len()));
        if !live_bytes.is_empty() {
            data.resize(data.capacity(), 0);
            let comp_bytes = lz4_flex::block::compress_into(live_bytes, &mut data)
                .expect("bitmap compression buffer was sized by compress_bound");
            data.truncate(comp_bytes);
        }

        StoredBits {
            uncompressed_words: self.words.len() as i32,
            first_set_bit: self.first_set().map_or(-1, |bit| bit as i64),
            first_set_offset: skip as i32,
            first_set_len: live.len() as i32,
            data,
        }
    }

    /// Rebuild a live bitmap from its at-rest form.
    ///
    /// A length mismatch means the blob is corrupt, which is an invariant
    /// violation: we abort rather than serve a half-mounted index.
    pub fn mount(stored: &StoredBits) -> Self {
        let mut words = vec![0_u64; stored.uncompressed_words as usize];
        let skip = stored.first_set_offset as usize;
        let live = &mut words[skip..skip + stored.first_set_len as usize];
        if live.is_empty() {
            return Self { words };
        }

        let live_bytes: &mut [u8] = bytemuck::cast_slice_mut(live);
        let expected = live_bytes.len();
        let got = lz4_flex::block::decompress_into(&stored.data, live_bytes)
            .expect("corrupt bitmap blob");
        assert_eq!(got, expected, "corrupt bitmap blob: length mismatch");

        Self { words }
    }
}

// ----------------------------------------------------------------------------

/// A bitmap at rest: LZ4 block data plus the zero-prefix skip header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBits {
    /// Word count of the live bitmap, including the skipped prefix.
    pub uncompressed_words: i32,

    /// Lowest set bit, `-1` when the set is empty.
    pub first_set_bit: i64,

    /// Leading all-zero words not present in `data`.
    pub first_set_offset: i32,

    /// Words actually compressed into `data`.
    pub first_set_len: i32,

    /// LZ4 block.
    pub data: Vec<u8>,
}

impl StoredBits {
    /// An empty at-rest bitmap (zero words).
    pub fn empty() -> Self {
        Self {
            uncompressed_words: 0,
            first_set_bit: -1,
            first_set_offset: 0,
            first_set_len: 0,
            data: Vec::new(),
        }
    }

    /// Hand the data buffer back to the pool it was rented from.
    pub fn release(self, pool: &BucketPool) {
        pool.give(self.data);
    }
}

// ----------------------------------------------------------------------------
