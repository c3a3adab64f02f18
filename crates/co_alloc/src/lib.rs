//! Memory substrate for the cohort storage core.
//!
//! Every on-heap structure in a partition rents its scratch memory from one of
//! two pools:
//!
//! * [`BlockArena`]: an append-only bump writer over pooled 256 KiB blocks.
//!   Millions of small writes go in, one [`BlockArena::flatten`] comes out,
//!   and [`BlockArena::reset`] makes it all go away just as fast.
//! * [`BucketPool`]: a thread-safe recycler of byte buffers in 33
//!   square-spaced size classes, for the compress/decompress scratch buffers
//!   that churn on every commit.
//!
//! Allocation failure is fatal everywhere in the core; neither type has a
//! fallible path.

mod block_arena;
mod bucket_pool;

pub use block_arena::{BlockArena, BlockPool, Patch, BLOCK_PAYLOAD_SIZE};
pub use bucket_pool::{BucketPool, NUM_CLASSES};
