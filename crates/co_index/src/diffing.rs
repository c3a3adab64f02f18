use crate::store::AttrKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffSide {
    Before,
    After,
}

/// Before/after multisets of `(property, value)` pairs around a mutation.
///
/// The grid snapshots its indexable pairs before and after a commit or cull;
/// only pairs whose *presence* flipped turn into dirty-bit updates, so
/// idempotent re-writes cost nothing.
#[derive(Default)]
pub struct IndexDiffing {
    before: ahash::HashMap<AttrKey, u32>,
    after: ahash::HashMap<AttrKey, u32>,
}

impl IndexDiffing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.before.clear();
        self.after.clear();
    }

    pub fn add(&mut self, key: AttrKey, side: DiffSide) {
        let map = match side {
            DiffSide::Before => &mut self.before,
            DiffSide::After => &mut self.after,
        };
        *map.entry(key).or_default() += 1;
    }

    /// Pairs present after but not before.
    pub fn iter_added(&self, mut visit: impl FnMut(AttrKey)) {
        for key in self.after.keys() {
            if !self.before.contains_key(key) {
                visit(*key);
            }
        }
    }

    /// Pairs present before but no longer after.
    pub fn iter_removed(&self, mut visit: impl FnMut(AttrKey)) {
        for key in self.before.keys() {
            if !self.after.contains_key(key) {
                visit(*key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(prop: i32, value: i64) -> AttrKey {
        AttrKey { prop, value }
    }

    #[test]
    fn only_presence_flips_are_reported() {
        let mut diff = IndexDiffing::new();

        diff.add(key(1, 10), DiffSide::Before);
        diff.add(key(1, 10), DiffSide::Before); // twice before
        diff.add(key(1, 20), DiffSide::Before);

        diff.add(key(1, 10), DiffSide::After); // still present
        diff.add(key(1, 30), DiffSide::After); // new

        let mut added = Vec::new();
        diff.iter_added(|k| added.push(k));
        assert_eq!(added, vec![key(1, 30)]);

        let mut removed = Vec::new();
        diff.iter_removed(|k| removed.push(k));
        assert_eq!(removed, vec![key(1, 20)]);
    }

    #[test]
    fn reset_clears_both_sides() {
        let mut diff = IndexDiffing::new();
        diff.add(key(1, 1), DiffSide::Before);
        diff.reset();

        let mut seen = 0;
        diff.iter_removed(|_| seen += 1);
        diff.iter_added(|_| seen += 1);
        assert_eq!(seen, 0);
    }
}
