//! The stable 64-bit hash used across the core.
//!
//! Customer ids, property names, text values and row content hashes all go
//! through here. The choice of function is unimportant as long as it is
//! non-cryptographic, 64-bit and stable across processes, since hashes end up
//! in checkpoints; we use `ahash` with pinned seeds.

use std::hash::{BuildHasher as _, Hash};

/// Pinned seeds: hashes are persisted, so they must not vary per process.
const SEEDS: (u64, u64, u64, u64) = (
    0x6f70_656e_5f63_6f68,
    0x6f72_745f_6462_5f31,
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
);

#[inline]
fn build_hasher() -> ahash::RandomState {
    ahash::RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3)
}

#[inline]
pub fn hash_bytes(bytes: &[u8]) -> i64 {
    build_hasher().hash_one(bytes) as i64
}

#[inline]
pub fn hash_str(s: &str) -> i64 {
    hash_bytes(s.as_bytes())
}

#[inline]
pub fn hash_i64(v: i64) -> i64 {
    let mut hasher = build_hasher().build_hasher();
    v.hash(&mut hasher);
    std::hash::Hasher::finish(&hasher) as i64
}

/// Fold `value` into a running hash. Order-sensitive.
#[inline]
pub fn hash_pair(value: i64, last: i64) -> i64 {
    let mut hasher = build_hasher().build_hasher();
    value.hash(&mut hasher);
    last.hash(&mut hasher);
    std::hash::Hasher::finish(&hasher) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        assert_eq!(hash_str("view"), hash_str("view"));
        assert_eq!(hash_bytes(b"alice"), hash_str("alice"));
        assert_ne!(hash_str("view"), hash_str("buy"));
    }

    #[test]
    fn pair_is_order_sensitive() {
        assert_ne!(hash_pair(1, 2), hash_pair(2, 1));
        assert_ne!(hash_pair(1, hash_pair(2, 0)), hash_pair(2, hash_pair(1, 0)));
    }
}
