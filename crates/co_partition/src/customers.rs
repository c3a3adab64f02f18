use co_alloc::BlockArena;
use co_grid::CustomerRecord;
use co_map::{RingHint, RingMap};
use co_types::codec::{self, CodecError};
use co_types::hash_str;

/// Checkpoint block type for the people section.
pub const PEOPLE_BLOCK: u64 = 2;

/// `uid -> linear id -> record` for one partition.
///
/// Customer ids are lowercased, capped and hashed; two different ids landing
/// on the same hash walk forward by incrementing the key until they hit their
/// own record or an empty slot. The linear vector is append-only except for
/// dropped customers, whose slots go onto a LIFO reuse list.
pub struct CustomerTable {
    customer_map: RingMap<i64, i32>,
    linear: Vec<Option<CustomerRecord>>,
    reuse: Vec<i32>,
}

impl Default for CustomerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomerTable {
    pub fn new() -> Self {
        Self {
            customer_map: RingMap::with_hint(RingHint::Lt5Million),
            linear: Vec::new(),
            reuse: Vec::new(),
        }
    }

    /// Live customers.
    pub fn len(&self) -> usize {
        self.customer_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_map.is_empty()
    }

    /// Size of the linear-id space (including freed slots).
    pub fn linear_len(&self) -> usize {
        self.linear.len()
    }

    pub fn record(&self, linear_id: i32) -> Option<&CustomerRecord> {
        self.linear.get(usize::try_from(linear_id).ok()?)?.as_ref()
    }

    /// Move the record out for a grid mount; pair with
    /// [`Self::replace_record`].
    pub fn take_record(&mut self, linear_id: i32) -> Option<CustomerRecord> {
        self.linear.get_mut(usize::try_from(linear_id).ok()?)?.take()
    }

    /// Put a (possibly rebuilt) record back into its slot.
    pub fn replace_record(&mut self, record: CustomerRecord) {
        let slot = record.linear_id as usize;
        debug_assert!(slot < self.linear.len());
        self.linear[slot] = Some(record);
    }

    pub fn linear_id_of(&self, uid: &str) -> Option<i32> {
        let uid = normalize_uid(uid);
        let mut hash = hash_str(&uid);
        loop {
            let linear_id = *self.customer_map.get(&hash)?;
            match self.record(linear_id) {
                Some(record) if record.id == uid => return Some(linear_id),
                // Collision with a different id: walk forward.
                Some(_) => hash = hash.wrapping_add(1),
                None => return None,
            }
        }
    }

    /// Find or create the customer, returning its linear id.
    pub fn get_or_create(&mut self, uid: &str) -> i32 {
        let uid = normalize_uid(uid);
        let mut hash = hash_str(&uid);
        loop {
            match self.customer_map.get(&hash).copied() {
                Some(linear_id) => match self.record(linear_id) {
                    Some(record) if record.id == uid => return linear_id,
                    Some(_) => hash = hash.wrapping_add(1),
                    // The mapping points at a freed slot: reclaim it for
                    // this id.
                    None => {
                        self.customer_map.remove(&hash);
                    }
                },
                None => {
                    let linear_id = match self.reuse.pop() {
                        Some(freed) => freed,
                        None => {
                            self.linear.push(None);
                            (self.linear.len() - 1) as i32
                        }
                    };
                    self.linear[linear_id as usize] =
                        Some(CustomerRecord::new(hash, linear_id, &uid));
                    self.customer_map.insert(hash, linear_id);
                    return linear_id;
                }
            }
        }
    }

    /// Drop a customer: the slot is nulled and the linear id queued for
    /// reuse.
    ///
    /// Attribute bitmaps are NOT scrubbed; a reused linear id means "empty
    /// property set" only for properties its new owner actually writes.
    pub fn drop_customer(&mut self, uid: &str) -> bool {
        let uid = normalize_uid(uid);
        let mut hash = hash_str(&uid);
        loop {
            let Some(&linear_id) = self.customer_map.get(&hash) else {
                return false;
            };
            match self.record(linear_id) {
                Some(record) if record.id == uid => {
                    self.customer_map.remove(&hash);
                    self.linear[linear_id as usize] = None;
                    self.reuse.push(linear_id);
                    return true;
                }
                _ => hash = hash.wrapping_add(1),
            }
        }
    }

    /// Live records in linear-id order.
    pub fn iter(&self) -> impl Iterator<Item = &CustomerRecord> {
        self.linear.iter().filter_map(|slot| slot.as_ref())
    }

    // --- checkpoint ---

    /// Write the PEOPLE block: every live record in linear-id order.
    pub fn serialize(&self, arena: &mut BlockArena) {
        arena.put_u64(PEOPLE_BLOCK);
        let section_len = arena.reserve_i64();
        let body_start = arena.bytes();

        for record in self.iter() {
            record.serialize(arena);
        }

        arena.fill_i64(section_len, (arena.bytes() - body_start) as i64);
    }

    /// Read a PEOPLE block back, rebuilding the uid map and the reuse list.
    pub fn deserialize(&mut self, read: &mut &[u8]) -> Result<(), CodecError> {
        let block_type = codec::read_u64(read)?;
        if block_type != PEOPLE_BLOCK {
            return Err(CodecError);
        }
        let section_len = codec::read_i64(read)? as usize;
        let mut body = codec::take(read, section_len)?;

        self.customer_map = RingMap::with_hint(RingHint::Lt5Million);
        self.linear.clear();
        self.reuse.clear();

        while !body.is_empty() {
            let record = CustomerRecord::deserialize(&mut body)?;
            let slot = record.linear_id as usize;
            while self.linear.len() <= slot {
                self.linear.push(None);
            }
            self.customer_map.insert(record.hashed_id, record.linear_id);
            self.linear[slot] = Some(record);
        }

        for (index, slot) in self.linear.iter().enumerate() {
            if slot.is_none() {
                self.reuse.push(index as i32);
            }
        }

        co_log::debug!(customers = self.len(), "customer table restored");
        Ok(())
    }
}

fn normalize_uid(uid: &str) -> String {
    let mut uid = uid.to_ascii_lowercase();
    uid.truncate(co_grid::MAX_ID_BYTES);
    uid
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_find_and_reuse() {
        let mut table = CustomerTable::new();

        let alice = table.get_or_create("Alice");
        let bob = table.get_or_create("bob");
        assert_eq!(alice, 0);
        assert_eq!(bob, 1);

        // Lookup is case-insensitive and idempotent.
        assert_eq!(table.get_or_create("ALICE"), alice);
        assert_eq!(table.linear_id_of("aLiCe"), Some(alice));
        assert_eq!(table.linear_id_of("carol"), None);

        assert!(table.drop_customer("alice"));
        assert_eq!(table.linear_id_of("alice"), None);
        assert!(!table.drop_customer("alice"));

        // The freed linear id is handed to the next customer, LIFO.
        let carol = table.get_or_create("carol");
        assert_eq!(carol, alice);
        assert_eq!(table.linear_len(), 2);
    }

    #[test]
    fn take_and_replace_record() {
        let mut table = CustomerTable::new();
        let lin = table.get_or_create("alice");

        let mut record = table.take_record(lin).unwrap();
        assert!(table.record(lin).is_none());
        record.raw_bytes = 99;
        table.replace_record(record);
        assert_eq!(table.record(lin).unwrap().raw_bytes, 99);
    }

    #[test]
    fn checkpoint_round_trip_preserves_linear_order() {
        let mut table = CustomerTable::new();
        for name in ["a", "b", "c", "d"] {
            table.get_or_create(name);
        }
        table.drop_customer("b");

        let mut arena = BlockArena::new(co_alloc::BlockPool::new());
        table.serialize(&mut arena);
        let bytes = arena.flatten();

        let mut restored = CustomerTable::new();
        let mut read = bytes.as_slice();
        restored.deserialize(&mut read).unwrap();
        assert!(read.is_empty());

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.linear_len(), 4);
        assert_eq!(restored.linear_id_of("a"), Some(0));
        assert_eq!(restored.linear_id_of("c"), Some(2));
        assert_eq!(restored.linear_id_of("b"), None);

        // Slot 1 is back on the reuse list.
        assert_eq!(restored.get_or_create("e"), 1);
    }
}
