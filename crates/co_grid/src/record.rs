use co_alloc::BlockArena;
use co_types::codec::{self, CodecError};

/// Longest customer id we keep; anything longer is truncated at ingest.
pub const MAX_ID_BYTES: usize = 64;

/// One customer at rest: identity, the encoded props bag, and the LZ4 block
/// of packed event rows.
///
/// Replaced whole on every commit; `linear_id` is stable for the life of the
/// customer and is the bit position used across every bitmap in the
/// partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerRecord {
    pub hashed_id: i64,
    pub linear_id: i32,

    /// Raw (uncompressed) byte length of the packed event stream.
    pub raw_bytes: i32,

    /// Original id string, capped at [`MAX_ID_BYTES`].
    pub id: String,

    /// Encoded props bag, if the customer has one. Not part of the people
    /// checkpoint block (the attribute index carries the indexable side).
    pub props: Option<Vec<u8>>,

    /// LZ4 block of packed event rows.
    pub events: Vec<u8>,
}

impl CustomerRecord {
    pub fn new(hashed_id: i64, linear_id: i32, id: &str) -> Self {
        let mut id = id.to_owned();
        id.truncate(MAX_ID_BYTES);
        Self {
            hashed_id,
            linear_id,
            raw_bytes: 0,
            id,
            props: None,
            events: Vec::new(),
        }
    }

    pub fn size_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.id.len()
            + self.events.len()
            + self.props.as_ref().map_or(0, Vec::len)
    }

    /// Append this record to a people checkpoint section.
    ///
    /// Layout: `i64 hashed_id, i32 linear_id, i32 raw_bytes, i32 comp_bytes,
    /// i16 id_bytes, u64 placeholder, id bytes, event bytes`. The placeholder
    /// keeps the on-disk stride stable and is ignored on read.
    pub fn serialize(&self, arena: &mut BlockArena) {
        arena.put_i64(self.hashed_id);
        arena.put_i32(self.linear_id);
        arena.put_i32(self.raw_bytes);
        arena.put_i32(self.events.len() as i32);
        arena.put_i16(self.id.len() as i16);
        arena.put_u64(0);
        arena.extend(self.id.as_bytes());
        arena.extend(&self.events);
    }

    pub fn deserialize(read: &mut &[u8]) -> Result<Self, CodecError> {
        let hashed_id = codec::read_i64(read)?;
        let linear_id = codec::read_i32(read)?;
        let raw_bytes = codec::read_i32(read)?;
        let comp_bytes = codec::read_i32(read)? as usize;
        let id_bytes = codec::read_i16(read)? as usize;
        let _placeholder = codec::read_u64(read)?;

        let id = String::from_utf8_lossy(codec::take(read, id_bytes)?).into_owned();
        let events = codec::take(read, comp_bytes)?.to_vec();

        Ok(Self {
            hashed_id,
            linear_id,
            raw_bytes,
            id,
            props: None,
            events,
        })
    }
}
