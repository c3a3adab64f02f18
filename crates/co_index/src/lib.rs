//! The attribute index.
//!
//! Every `(property, value)` pair a partition has ever seen maps to a
//! compressed [`co_bitmap::Bitmap`] whose bits are customer linear-ids. This
//! crate owns that map, the bounded cache of live (decompressed) bitmaps, the
//! text blob that backs hashed text values, the dirty-change batching between
//! commits, and the per-customer secondary index for customer-indexed
//! properties.

mod blob;
mod diffing;
mod lru;
mod store;

pub use blob::AttributeBlob;
pub use diffing::{DiffSide, IndexDiffing};
pub use lru::LruCache;
pub use store::{AttrKey, AttributeStore, DecodeError, ListMode, StoreConfig, ATTRIBUTES_BLOCK};
