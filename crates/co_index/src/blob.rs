use co_map::{RingHint, RingMap};
use co_types::{hash_str, PropId};

/// Interned text values, keyed by `(property, value-hash)`.
///
/// Text properties index by the 64-bit hash of their value; the actual string
/// lives here so queries can render results. A hash collision between two
/// different strings on the same property is resolved by incrementing the key
/// until a free slot (or the matching string) is found; the incremented hash
/// is what goes into the attribute index, so the two stay distinct end to end.
#[derive(Default)]
pub struct AttributeBlob {
    map: RingMap<(PropId, i64), String>,
}

impl AttributeBlob {
    pub fn new() -> Self {
        Self {
            map: RingMap::with_hint(RingHint::Lt1Million),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Intern `text` under `prop`, returning the hash key it landed on.
    pub fn store(&mut self, prop: PropId, text: &str) -> i64 {
        let mut key = hash_str(text);
        loop {
            match self.map.get(&(prop, key)) {
                Some(existing) if existing == text => return key,
                Some(_) => key = key.wrapping_add(1),
                None => {
                    self.map.insert((prop, key), text.to_owned());
                    return key;
                }
            }
        }
    }

    /// Intern `text` at an explicit key (checkpoint restore).
    pub fn store_at(&mut self, prop: PropId, key: i64, text: &str) {
        self.map.insert((prop, key), text.to_owned());
    }

    pub fn get(&self, prop: PropId, key: i64) -> Option<&str> {
        self.map.get(&(prop, key)).map(String::as_str)
    }

    /// The hash key `text` resolves to, without interning.
    pub fn resolve(&self, prop: PropId, text: &str) -> Option<i64> {
        let mut key = hash_str(text);
        loop {
            match self.map.get(&(prop, key)) {
                Some(existing) if existing == text => return Some(key),
                Some(_) => key = key.wrapping_add(1),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut blob = AttributeBlob::new();
        let a = blob.store(1000, "toronto");
        let b = blob.store(1000, "toronto");
        assert_eq!(a, b);
        assert_eq!(blob.len(), 1);
        assert_eq!(blob.get(1000, a), Some("toronto"));
    }

    #[test]
    fn same_text_on_other_property_is_a_separate_entry() {
        let mut blob = AttributeBlob::new();
        let a = blob.store(1000, "toronto");
        let b = blob.store(1001, "toronto");
        assert_eq!(a, b); // same hash, different property key
        assert_eq!(blob.len(), 2);
    }

    #[test]
    fn collisions_rehash_by_incrementing() {
        let mut blob = AttributeBlob::new();
        let key = blob.store(1000, "alpha");
        // Force a collision by planting a different string at alpha's hash.
        blob.store_at(1000, key.wrapping_add(1), "occupied");
        blob.store_at(1000, key, "alpha");

        let mut blob2 = AttributeBlob::new();
        blob2.store_at(1000, key, "not alpha");
        let rehashed = blob2.store(1000, "alpha");
        assert_eq!(rehashed, key.wrapping_add(1));
        assert_eq!(blob2.get(1000, rehashed), Some("alpha"));
        assert_eq!(blob2.resolve(1000, "alpha"), Some(rehashed));
    }
}
