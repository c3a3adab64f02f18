//! The per-customer grid: one customer's compressed event history expanded
//! into mutable rows.
//!
//! A customer at rest is a [`CustomerRecord`]: identity plus an LZ4 block of
//! packed `(property, value)` tuples in `(stamp, z-order, content-hash)`
//! order. The [`Grid`] mounts a record, expands it against a shared property
//! map, takes inserts (idempotent by content hash), and commits back to a
//! fresh record. Culling trims by row budget and TTL and de-indexes whatever
//! stopped occurring.

mod grid;
mod record;
mod zorder;

pub use grid::{
    Grid, InsertError, InsertOutcome, RowVec, SetRef, DEFAULT_SESSION_TIME_MS,
};
pub use record::{CustomerRecord, MAX_ID_BYTES};
pub use zorder::{EventOrder, DEFAULT_Z_ORDER};
