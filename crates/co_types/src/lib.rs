//! Core data model shared by every cohort storage crate.
//!
//! This is where the shape of the database lives: the dynamic [`Value`] type
//! that property bags and the script layer trade in, the per-table property
//! catalog, the shared (refcounted) projections of that catalog used by grids,
//! and the stable 64-bit hash everything is keyed by.

pub mod codec;
mod hash;
mod mapping;
mod property;
mod time;
mod value;

pub use hash::{hash_bytes, hash_i64, hash_pair, hash_str};
pub use mapping::{GridCol, PropertyMap, PropertyMapping};
pub use property::{
    PropKind, Property, PropertyCatalog, SchemaError, MAX_PROPERTIES, PROP_EMIT, PROP_EVENT,
    PROP_FIRST_USER, PROP_OMIT_FIRST, PROP_OMIT_LAST, PROP_SEGMENT, PROP_SESSION, PROP_STAMP,
    PROP_TRIGGERS, PROP_UUID,
};
pub use time::{fix_milli, now_ms, parse_stamp, to_iso8601};
pub use value::{BlobError, Value, ValueKind};

/// Numeric property id into the table schema, `0 <= id < MAX_PROPERTIES`.
pub type PropId = i32;

/// The column value meaning "not set". Also the `value` key of the
/// property-presence index entry.
pub const NONE: i64 = i64::MIN;

/// Doubles are stored as integers scaled by this factor.
pub const DOUBLE_SCALE: i64 = 10_000;
