//! Fixed-capacity set keyed by 64-bit identifiers.
//!
//! Storage is a flat entry array plus a bucket table of `2 * capacity` chain
//! heads, so the load factor never exceeds 0.5 and chains stay short. Both
//! the per-bucket collision chains and the free list are threaded through a
//! single `next` field embedded in each entry; no side allocations happen
//! after construction.
//!
//! # Invariants
//! - `capacity` is a power of two; the bucket count is `2 * capacity` and
//!   bucket selection is `hash(id) & (2 * capacity - 1)`.
//! - An entry is free iff its id is [`NONE_ID`]; free entries form a singly
//!   linked list from `free` whose length is `capacity - len`.
//! - Chain links and bucket heads are entry indexes, or `-1` for "none".

/// Reserved identifier marking a free entry. Zero and positive ids are legal
/// keys; `-1` never is.
pub const NONE_ID: i64 = -1;

/// Thomas Wang's 64-to-32 bit integer mix.
///
/// The bit pattern is load-bearing: bucket placement must match across
/// implementations so that on-disk and cross-process descriptor layouts
/// agree.
#[inline]
pub fn wang_hash64(key: u64) -> u32 {
    let mut k = key;
    k = (!k).wrapping_add(k << 18);
    k ^= k >> 31;
    k = k.wrapping_mul(21);
    k ^= k >> 11;
    k = k.wrapping_add(k << 6);
    k ^= k >> 22;
    k as u32
}

/// An entry storable in a [`HashedSet`].
///
/// Implementors embed the chain link and expose the identifier. When a slot
/// is recycled the set calls [`reset`](Self::reset): a logical in-place
/// re-construction that must restore the entry's default state while
/// keeping any fixed-capacity members (queues, block lists) allocated.
pub trait SetEntry {
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn next_in_chain(&self) -> i32;
    fn set_next_in_chain(&mut self, next: i32);
    fn reset(&mut self);
}

/// Result of [`HashedSet::find_or_insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindOrInsert {
    /// An entry with the id already existed at this slot index.
    Found(usize),
    /// A fresh entry was created at this slot index.
    Inserted(usize),
    /// Insertion was needed but no free entry remained.
    Full,
}

/// Fixed-capacity id-keyed set with embedded chaining.
#[derive(Debug)]
pub struct HashedSet<T: SetEntry> {
    /// Bucket heads: entry index or -1.
    table: Box<[i32]>,
    entries: Box<[T]>,
    /// Head of the free list: entry index or -1.
    free: i32,
    size: u32,
}

impl<T: SetEntry> HashedSet<T> {
    /// Creates an empty set with room for `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero, not a power of two, or too large for
    /// `i32` indexing.
    pub fn new(capacity: usize) -> Self
    where
        T: Default,
    {
        Self::new_with(capacity, T::default)
    }

    /// Creates an empty set whose entries come from `factory`, for entry
    /// types whose fixed-capacity members are sized at runtime.
    ///
    /// # Panics
    /// Panics if `capacity` is zero, not a power of two, or too large for
    /// `i32` indexing.
    pub fn new_with(capacity: usize, mut factory: impl FnMut() -> T) -> Self {
        assert!(capacity > 0, "HashedSet capacity must be > 0");
        assert!(
            capacity.is_power_of_two(),
            "HashedSet capacity must be a power of two"
        );
        assert!(capacity <= i32::MAX as usize / 2);

        let table = vec![-1i32; 2 * capacity].into_boxed_slice();
        let mut entries = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let mut e = factory();
            e.set_id(NONE_ID);
            // Thread the free list through the entries themselves.
            e.set_next_in_chain(if i + 1 < capacity { (i + 1) as i32 } else { -1 });
            entries.push(e);
        }

        Self {
            table,
            entries: entries.into_boxed_slice(),
            free: 0,
            size: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of entries that can still be inserted.
    #[inline]
    pub fn space(&self) -> usize {
        self.capacity() - self.len()
    }

    #[inline]
    fn bucket(&self, id: i64) -> usize {
        (wang_hash64(id as u64) as usize) & (self.table.len() - 1)
    }

    /// Returns the slot index of the entry with `id`, if present.
    pub fn find_index(&self, id: i64) -> Option<usize> {
        let mut i = self.table[self.bucket(id)];
        while i >= 0 {
            let e = &self.entries[i as usize];
            if e.id() == id {
                return Some(i as usize);
            }
            i = e.next_in_chain();
        }
        None
    }

    /// Returns the entry with `id`, if present.
    #[inline]
    pub fn find(&self, id: i64) -> Option<&T> {
        self.find_index(id).map(|i| &self.entries[i])
    }

    /// Returns the entry with `id` mutably, if present.
    #[inline]
    pub fn find_mut(&mut self, id: i64) -> Option<&mut T> {
        self.find_index(id).map(|i| &mut self.entries[i])
    }

    /// Inserts a fresh entry for `id`, returning its slot index.
    ///
    /// Returns `None` if an entry with `id` already exists or no free entry
    /// remains. The new entry is reset in place with its id and chain link
    /// set.
    pub fn insert(&mut self, id: i64) -> Option<usize> {
        debug_assert!(id != NONE_ID, "NONE_ID is not a legal key");
        if self.free < 0 {
            return None;
        }

        let bucket = self.bucket(id);
        let mut i = self.table[bucket];
        let mut last = -1i32;
        while i >= 0 {
            let e = &self.entries[i as usize];
            if e.id() == id {
                return None;
            }
            last = i;
            i = e.next_in_chain();
        }

        Some(self.take_free(id, bucket, last))
    }

    /// Finds the entry with `id`, inserting a fresh one if absent.
    pub fn find_or_insert(&mut self, id: i64) -> FindOrInsert {
        debug_assert!(id != NONE_ID, "NONE_ID is not a legal key");
        let bucket = self.bucket(id);
        let mut i = self.table[bucket];
        let mut last = -1i32;
        while i >= 0 {
            let e = &self.entries[i as usize];
            if e.id() == id {
                return FindOrInsert::Found(i as usize);
            }
            last = i;
            i = e.next_in_chain();
        }

        if self.free < 0 {
            return FindOrInsert::Full;
        }
        FindOrInsert::Inserted(self.take_free(id, bucket, last))
    }

    /// Pops the free-list head and links it at the end of `bucket`'s chain
    /// (after `last`, or as the head when the chain was empty).
    fn take_free(&mut self, id: i64, bucket: usize, last: i32) -> usize {
        let c = self.free;
        assert!(c >= 0);
        self.free = self.entries[c as usize].next_in_chain();

        if last < 0 {
            self.table[bucket] = c;
        } else {
            self.entries[last as usize].set_next_in_chain(c);
        }

        // Logical in-place re-construction: the slot is reserved, the
        // contents start from scratch, capacity is retained.
        let e = &mut self.entries[c as usize];
        e.reset();
        e.set_id(id);
        e.set_next_in_chain(-1);
        self.size += 1;
        c as usize
    }

    /// Erases the entry with `id`, returning whether it existed.
    ///
    /// The slot is unlinked from its bucket chain, its id reset to
    /// [`NONE_ID`], and pushed onto the free list.
    pub fn erase(&mut self, id: i64) -> bool {
        let bucket = self.bucket(id);
        let mut i = self.table[bucket];
        let mut last = -1i32;
        while i >= 0 {
            let next = self.entries[i as usize].next_in_chain();
            if self.entries[i as usize].id() == id {
                if last < 0 {
                    self.table[bucket] = next;
                } else {
                    self.entries[last as usize].set_next_in_chain(next);
                }
                let e = &mut self.entries[i as usize];
                e.set_id(NONE_ID);
                e.set_next_in_chain(self.free);
                self.free = i;
                self.size -= 1;
                return true;
            }
            last = i;
            i = next;
        }
        false
    }

    /// Direct slot access; the slot may be free (`id() == NONE_ID`).
    #[inline]
    pub fn entry(&self, slot: usize) -> &T {
        &self.entries[slot]
    }

    /// Direct mutable slot access; the slot may be free.
    #[inline]
    pub fn entry_mut(&mut self, slot: usize) -> &mut T {
        &mut self.entries[slot]
    }

    /// Iterates the live entries with their slot indexes.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.id() != NONE_ID)
    }

    /// Walks the free list and returns its length. O(capacity); intended
    /// for tests and invariant checks.
    pub fn free_list_len(&self) -> usize {
        let mut n = 0usize;
        let mut i = self.free;
        while i >= 0 {
            n += 1;
            assert!(n <= self.capacity(), "cycle in free list");
            i = self.entries[i as usize].next_in_chain();
        }
        n
    }
}
