//! Radix tries for packing sparse, high-cardinality maps with low per-entry
//! overhead: customer-id to linear-id, `(customer, value)` to linear-id, and
//! friends. Millions of keys fit in a few tens of megabytes.
//!
//! Two variants share one design, differing only in branching width:
//!
//! * [`RadixTrie16`]: two key bytes per level. Fewer, wider levels; the
//!   default for 8-byte keys.
//! * [`RadixTrie8`]: one key byte per level. Half the memory, roughly half
//!   the speed.
//!
//! Keys are traversed most-significant-word first, so an in-order walk yields
//! keys in ascending unsigned byte order ([`RadixTrie16::iter`]), and the
//! signed walk ([`RadixTrie16::iter_signed`]) reorders only the root level to
//! get numeric order for signed keys.
//!
//! Every level is a dynamically grown sorted array ("page"); retired page
//! buffers are recycled through a per-size-class free list shared by the whole
//! trie, one class per page size.

mod key;
mod trie16;
mod trie8;

pub use key::TrieKey;
pub use trie16::RadixTrie16;
pub use trie8::RadixTrie8;
