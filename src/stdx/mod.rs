//! Small, self-contained data structures backing the chunk manager.
//!
//! # Scope
//! `stdx` hosts narrow, fixed-capacity utilities tuned for predictable
//! memory use: everything here allocates once at construction and never
//! grows.
//!
//! # Design themes
//! - Fixed or upfront capacity; overflow is reported, never absorbed.
//! - Power-of-two capacities so index wrap-around is a single AND.
//! - Deterministic behavior under reuse in hot loops.
//!
//! # Module map
//! - `bitset`: allocation bitset with all-or-nothing group allocate.
//! - `fifo`: bounded FIFO of 64-bit identifiers.
//! - `hashed_set`: fixed-capacity id-keyed set with embedded chaining.

pub mod bitset;
pub mod fifo;
pub mod hashed_set;

pub use bitset::AllocBitset;
pub use fifo::IdFifo;
pub use hashed_set::{wang_hash64, FindOrInsert, HashedSet, SetEntry, NONE_ID};
