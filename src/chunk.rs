//! Per-chunk descriptor and the handle visits use to work with a chunk.
//!
//! A [`ChunkDescriptor`] is the manager's bookkeeping record for one spatial
//! chunk: owner visit, read-in state, the FIFO of waiting visits, and the
//! block/record counters. Records live in pool blocks of fixed `entry_size`
//! slices; blocks are acquired lazily as records are appended, so a freshly
//! created chunk owns no blocks until its owner starts reading data in.
//!
//! A [`ChunkHandle`] is a cheap, copyable reference to a descriptor slot.
//! Handle operations go through the manager mutex and re-validate that the
//! slot still holds the chunk they were created for, so a handle that
//! outlives its chunk fails loudly instead of corrupting a recycled slot.

use std::sync::Arc;

use crate::block_pool::BlockPool;
use crate::errors::{AllocError, Error};
use crate::manager::Shared;
use crate::stdx::{IdFifo, SetEntry, NONE_ID};

/// Bookkeeping record for one chunk.
///
/// Lives in the manager's descriptor set; all field access happens under
/// the manager mutex.
#[derive(Debug)]
pub struct ChunkDescriptor {
    id: i64,
    next: i32,
    /// Visit currently owning this chunk.
    pub(crate) visit_id: i64,
    /// True once the owner has fully read the chunk's data in.
    pub(crate) usable: bool,
    /// Visits waiting for ownership, first-interested-first-served.
    pub(crate) interested: IdFifo,
    /// Byte offsets of the pool blocks backing this chunk, in use order.
    blocks: Vec<usize>,
    /// Blocks currently holding records: `ceil(size / entries_per_block)`.
    next_block: usize,
    /// Total records stored.
    size: usize,
    /// Records committed so far; records `[delta, size)` are the open delta.
    delta: usize,
}

impl ChunkDescriptor {
    pub(crate) fn with_capacity(interested_capacity: usize, max_blocks_per_chunk: usize) -> Self {
        Self {
            id: NONE_ID,
            next: -1,
            visit_id: NONE_ID,
            usable: false,
            interested: IdFifo::new(interested_capacity),
            blocks: Vec::with_capacity(max_blocks_per_chunk),
            next_block: 0,
            size: 0,
            delta: 0,
        }
    }

    #[inline]
    pub(crate) fn record_count(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn delta_count(&self) -> usize {
        self.size - self.delta
    }

    #[inline]
    pub(crate) fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub(crate) fn blocks_in_use(&self) -> usize {
        self.next_block
    }

    #[inline]
    pub(crate) fn block_offsets(&self) -> &[usize] {
        &self.blocks
    }

    /// Appends one record, acquiring a pool block when the current one is
    /// full. The per-chunk block cap is enforced here, before the pool is
    /// touched.
    pub(crate) fn push_record(
        &mut self,
        pool: &BlockPool,
        entry_size: usize,
        record: &[u8],
    ) -> Result<(), AllocError> {
        assert!(record.len() == entry_size, "record length mismatch");
        let per_block = pool.block_size() / entry_size;
        let slot = self.size;
        let block_idx = slot / per_block;

        if block_idx == self.blocks.len() {
            if self.blocks.len() == pool.max_blocks_per_chunk() {
                return Err(AllocError::OutOfRange {
                    requested: self.blocks.len() + 1,
                    max: pool.max_blocks_per_chunk(),
                });
            }
            let mut offset = [0usize; 1];
            pool.allocate(&mut offset)?;
            self.blocks.push(offset[0]);
        }
        debug_assert!(block_idx < self.blocks.len());

        // SAFETY: the block belongs to this chunk, this chunk to the calling
        // visit, and the manager mutex is held; the write stays inside the
        // block (slot % per_block < per_block).
        unsafe {
            let dst = pool
                .block_ptr(self.blocks[block_idx])
                .add((slot % per_block) * entry_size);
            std::ptr::copy_nonoverlapping(record.as_ptr(), dst, entry_size);
        }

        self.size = slot + 1;
        self.next_block = block_idx + 1;
        Ok(())
    }

    /// Copies record `index` into `out`.
    ///
    /// # Panics
    /// Panics if `index >= record_count()` or `out` is not `entry_size`
    /// bytes.
    pub(crate) fn read_record(
        &self,
        pool: &BlockPool,
        entry_size: usize,
        index: usize,
        out: &mut [u8],
    ) {
        assert!(index < self.size, "record index out of bounds");
        assert!(out.len() == entry_size, "record length mismatch");
        let per_block = pool.block_size() / entry_size;

        // SAFETY: same ownership argument as `push_record`; the read stays
        // inside a block this chunk owns.
        unsafe {
            let src = pool
                .block_ptr(self.blocks[index / per_block])
                .add((index % per_block) * entry_size);
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), entry_size);
        }
    }

    /// Marks every stored record as committed.
    pub(crate) fn commit(&mut self) {
        self.delta = self.size;
    }

    /// Discards the open delta: record count returns to the last commit.
    /// Surplus blocks stay attached to the chunk; they are returned to the
    /// pool wholesale on [`free_blocks`](Self::free_blocks).
    pub(crate) fn rollback(&mut self, pool: &BlockPool, entry_size: usize) {
        let per_block = pool.block_size() / entry_size;
        self.size = self.delta;
        self.next_block = self.size.div_ceil(per_block);
        debug_assert!(self.next_block <= self.blocks.len());
    }

    /// Returns every block to the pool and zeroes the record bookkeeping.
    pub(crate) fn free_blocks(&mut self, pool: &BlockPool) {
        pool.free(&self.blocks);
        self.blocks.clear();
        self.next_block = 0;
        self.size = 0;
        self.delta = 0;
    }
}

impl SetEntry for ChunkDescriptor {
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    fn next_in_chain(&self) -> i32 {
        self.next
    }
    fn set_next_in_chain(&mut self, next: i32) {
        self.next = next;
    }
    fn reset(&mut self) {
        // Capacity-preserving re-init. Blocks must already have been
        // returned to the pool; a populated block list here means a leak.
        debug_assert!(self.blocks.is_empty(), "descriptor reset with live blocks");
        self.visit_id = NONE_ID;
        self.usable = false;
        self.interested.clear();
        self.blocks.clear();
        self.next_block = 0;
        self.size = 0;
        self.delta = 0;
    }
}

/// Reference to a chunk managed by a `ChunkManager`.
///
/// Cheap to clone. Not a lock guard: every operation acquires the manager
/// mutex for its own duration. Callers serialize data access through visit
/// ownership; the handle only guards against use after the chunk was
/// evicted.
#[derive(Clone)]
pub struct ChunkHandle {
    pub(crate) shared: Arc<Shared>,
    pub(crate) slot: usize,
    pub(crate) chunk_id: i64,
}

impl PartialEq for ChunkHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
            && self.slot == other.slot
            && self.chunk_id == other.chunk_id
    }
}

impl ChunkHandle {
    /// The chunk's identifier.
    #[inline]
    pub fn id(&self) -> i64 {
        self.chunk_id
    }

    fn with_descriptor<R>(&self, f: impl FnOnce(&mut ChunkDescriptor, &BlockPool) -> R) -> R {
        let mut state = self.shared.lock_state();
        let d = state.chunks.descriptor_mut(self.slot);
        assert!(
            d.id == self.chunk_id,
            "stale chunk handle: chunk {} no longer lives in slot {}",
            self.chunk_id,
            self.slot
        );
        f(d, &self.shared.pool)
    }

    /// Id of the visit currently owning this chunk.
    pub fn visit_id(&self) -> i64 {
        self.with_descriptor(|d, _| d.visit_id)
    }

    /// Whether the chunk's contents have been fully read in.
    pub fn is_usable(&self) -> bool {
        self.with_descriptor(|d, _| d.usable)
    }

    /// Marks the chunk fully read in. Called by the owner once its data
    /// load finished.
    pub fn mark_usable(&self) {
        self.with_descriptor(|d, _| d.usable = true);
    }

    /// Appends one record of `entry_size` bytes.
    pub fn push(&self, record: &[u8]) -> Result<(), Error> {
        let entry_size = self.shared.entry_size;
        self.with_descriptor(|d, pool| d.push_record(pool, entry_size, record))
            .map_err(Error::from)
    }

    /// Number of records currently stored.
    pub fn entry_count(&self) -> usize {
        self.with_descriptor(|d, _| d.record_count())
    }

    /// Number of records appended since the last commit.
    pub fn delta_count(&self) -> usize {
        self.with_descriptor(|d, _| d.delta_count())
    }

    /// Number of pool blocks attached to this chunk.
    pub fn block_count(&self) -> usize {
        self.with_descriptor(|d, _| d.block_count())
    }

    /// Copies record `index` into `out` (`entry_size` bytes).
    pub fn read_entry(&self, index: usize, out: &mut [u8]) {
        let entry_size = self.shared.entry_size;
        self.with_descriptor(|d, pool| d.read_record(pool, entry_size, index, out));
    }

    /// Marks all stored records committed.
    pub fn commit(&self) {
        self.with_descriptor(|d, _| d.commit());
    }

    /// Discards records appended since the last commit.
    pub fn rollback(&self) {
        let entry_size = self.shared.entry_size;
        self.with_descriptor(|d, pool| d.rollback(pool, entry_size));
    }

    /// Drops all records and returns every block to the pool. Used on
    /// hand-off when the chunk must be re-read from scratch.
    pub fn clear(&self) {
        self.with_descriptor(|d, pool| d.free_blocks(pool));
    }
}

impl std::fmt::Debug for ChunkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkHandle")
            .field("chunk_id", &self.chunk_id)
            .field("slot", &self.slot)
            .finish()
    }
}
