//! The chunk manager: visit registration, chunk ownership arbitration, and
//! commit/rollback coordination across worker threads.
//!
//! One mutex guards all visit and descriptor state; one condition variable
//! carries ownership hand-offs. Every public method acquires the mutex
//! exactly once, and [`ChunkManager::wait_for_ownership`] is the only call
//! that blocks for anything other than the mutex itself.
//!
//! # Hand-off
//! Each descriptor queues interested visits first-come-first-served. When a
//! visit ends, every chunk it owns is committed or rolled back and then
//! passed to the first *valid* (in-flight, unfailed) queued visit; invalid
//! entries are dropped from the queue head without re-queueing. A chunk with
//! no valid successor is evicted and its blocks return to the pool.
//!
//! # Failure
//! `fail_visit` only flips a flag. The failing thread is expected to call
//! `end_visit(id, rollback = true)` on its way out; a thread blocked in
//! `wait_for_ownership` for a failed visit runs to its deadline.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::block_pool::BlockPool;
use crate::chunk::{ChunkDescriptor, ChunkHandle};
use crate::deadline::Deadline;
use crate::errors::Error;
use crate::stdx::{FindOrInsert, HashedSet, SetEntry, NONE_ID};
use crate::sync::Condition;
use crate::visit::VisitTracker;

/// Capacities for a [`ChunkManager`], fixed for its whole lifetime.
#[derive(Clone, Copy, Debug)]
pub struct ManagerConfig {
    /// Maximum visits in flight at once. Power of two.
    pub max_visits_in_flight: usize,
    /// Chunk descriptor slots. Power of two.
    pub descriptor_capacity: usize,
    /// Total blocks in the shared pool.
    pub num_blocks: usize,
    /// Bytes per block; a multiple of `entry_size`.
    pub block_size: usize,
    /// Cap on blocks a single chunk may hold.
    pub max_blocks_per_chunk: usize,
    /// Per-chunk interest queue depth. Power of two.
    pub interest_capacity: usize,
    /// Bytes per stored record.
    pub entry_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_visits_in_flight: 16,
            descriptor_capacity: 64,
            num_blocks: 256,
            block_size: 4096,
            max_blocks_per_chunk: 16,
            interest_capacity: 16,
            entry_size: 64,
        }
    }
}

impl ManagerConfig {
    fn validate(&self) {
        assert!(self.max_visits_in_flight.is_power_of_two());
        assert!(self.descriptor_capacity.is_power_of_two());
        assert!(self.interest_capacity.is_power_of_two());
        assert!(self.num_blocks > 0);
        assert!(self.max_blocks_per_chunk > 0);
        assert!(self.max_blocks_per_chunk <= self.num_blocks);
        assert!(self.entry_size > 0);
        assert!(
            self.block_size % self.entry_size == 0,
            "block_size must be a multiple of entry_size"
        );
    }
}

/// Descriptor bookkeeping plus the hand-off logic. All methods assume the
/// manager mutex is held by the caller.
pub(crate) struct SubManager {
    chunks: HashedSet<ChunkDescriptor>,
}

impl SubManager {
    fn new(config: &ManagerConfig) -> Self {
        let interest = config.interest_capacity;
        let max_blocks = config.max_blocks_per_chunk;
        Self {
            chunks: HashedSet::new_with(config.descriptor_capacity, || {
                ChunkDescriptor::with_capacity(interest, max_blocks)
            }),
        }
    }

    #[inline]
    pub(crate) fn space(&self) -> usize {
        self.chunks.space()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.chunks.capacity()
    }

    #[inline]
    pub(crate) fn descriptor(&self, slot: usize) -> &ChunkDescriptor {
        self.chunks.entry(slot)
    }

    #[inline]
    pub(crate) fn descriptor_mut(&mut self, slot: usize) -> &mut ChunkDescriptor {
        self.chunks.entry_mut(slot)
    }

    /// Registers `visit_id` against each chunk id: absent chunks are created
    /// with the visit as owner (slot pushed to `to_read`), present chunks
    /// get the visit queued (slot pushed to `to_wait_for`).
    ///
    /// All-or-nothing: the first pass proves every mutation of the second
    /// pass will succeed, so a failure leaves no descriptor touched. The
    /// caller has already checked descriptor space and visit validity;
    /// `chunk_ids` is duplicate-free.
    fn create_or_register_interest(
        &mut self,
        visit_id: i64,
        chunk_ids: &[i64],
    ) -> Result<(Vec<usize>, Vec<usize>), Error> {
        // Pass 1: every existing chunk must have queue room for one more
        // interested party.
        for &id in chunk_ids {
            if let Some(d) = self.chunks.find(id) {
                if d.interested.is_full() {
                    return Err(Error::CapacityExceeded {
                        what: "interest queue",
                    });
                }
            }
        }

        let mut to_read = Vec::with_capacity(chunk_ids.len());
        let mut to_wait_for = Vec::with_capacity(chunk_ids.len());

        // Pass 2: cannot fail. Descriptor space was pre-checked by the
        // caller and queue room above.
        for &id in chunk_ids {
            match self.chunks.find_or_insert(id) {
                FindOrInsert::Inserted(slot) => {
                    let d = self.chunks.entry_mut(slot);
                    d.visit_id = visit_id;
                    d.usable = false;
                    to_read.push(slot);
                }
                FindOrInsert::Found(slot) => {
                    let d = self.chunks.entry_mut(slot);
                    d.interested
                        .enqueue(visit_id)
                        .expect("queue room was pre-checked");
                    to_wait_for.push(slot);
                }
                FindOrInsert::Full => unreachable!("descriptor space was pre-checked"),
            }
        }

        Ok((to_read, to_wait_for))
    }

    /// Removes from `to_wait_for` every chunk now owned by `visit_id`.
    /// Acquired chunks that were never fully read in lose their blocks and
    /// move to `to_read` for a fresh read. Returns whether `to_wait_for` is
    /// empty.
    ///
    /// Removal is swap-remove; list order is not meaningful.
    fn check_for_ownership(
        &mut self,
        pool: &BlockPool,
        visit_id: i64,
        to_wait_for: &mut Vec<ChunkHandle>,
        to_read: &mut Vec<ChunkHandle>,
    ) -> bool {
        let mut i = 0;
        while i < to_wait_for.len() {
            let handle = &to_wait_for[i];
            let d = self.chunks.entry_mut(handle.slot);
            // A failed visit's chunk can be evicted while the visit still
            // waits; its recycled slot must not be mistaken for ownership.
            if d.id() != handle.chunk_id || d.visit_id != visit_id {
                i += 1;
                continue;
            }
            if !d.usable {
                d.free_blocks(pool);
                to_read.push(handle.clone());
            }
            to_wait_for.swap_remove(i);
        }
        to_wait_for.is_empty()
    }

    /// Returns (slot, id) for each chunk id with a live descriptor.
    fn get_chunks(&self, chunk_ids: &[i64]) -> Vec<(usize, i64)> {
        chunk_ids
            .iter()
            .filter_map(|&id| self.chunks.find_index(id).map(|slot| (slot, id)))
            .collect()
    }

    /// Hands every chunk owned by `visit_id` to its first valid interested
    /// party, after committing (or rolling back) the open delta. Chunks
    /// with no valid successor are evicted; chunks owned by others forget
    /// the departing visit's queued interest. Returns whether any chunk
    /// changed hands.
    fn relinquish_ownership(
        &mut self,
        pool: &BlockPool,
        entry_size: usize,
        visit_id: i64,
        rollback: bool,
        tracker: &VisitTracker,
    ) -> bool {
        let mut changed = false;
        for slot in 0..self.chunks.capacity() {
            let d = self.chunks.entry_mut(slot);
            if d.id() == NONE_ID {
                continue;
            }
            if d.visit_id != visit_id {
                // The visit may still be queued here from an abandoned
                // wait; once it ends, no queue may keep naming it.
                d.interested.remove(visit_id);
                continue;
            }

            let mut successor = None;
            while let Some(next) = d.interested.dequeue() {
                if tracker.is_valid(next) {
                    successor = Some(next);
                    break;
                }
            }

            match successor {
                Some(next) => {
                    // Settle the departing owner's delta before the
                    // successor is published as owner.
                    if rollback {
                        d.rollback(pool, entry_size);
                    } else {
                        d.commit();
                    }
                    d.visit_id = next;
                    changed = true;
                }
                None => {
                    d.free_blocks(pool);
                    let id = d.id();
                    let erased = self.chunks.erase(id);
                    assert!(erased);
                }
            }
        }
        changed
    }

    /// Live descriptors as (chunk id, owner, usable, has interested
    /// parties), sorted by owner then chunk id.
    fn roster(&self) -> Vec<(i64, i64, bool, bool)> {
        let mut v: Vec<(i64, i64, bool, bool)> = self
            .chunks
            .iter()
            .map(|(_, d)| (d.id(), d.visit_id, d.usable, !d.interested.is_empty()))
            .collect();
        v.sort_unstable_by_key(|&(id, owner, _, _)| (owner, id));
        v
    }

    /// Writes the chunk roster grouped by owning visit, merging runs of
    /// chunks in the same state.
    fn report(&self, w: &mut impl fmt::Write) -> fmt::Result {
        let v = self.roster();
        if v.is_empty() {
            return writeln!(w, "    Chunks with an owner: None");
        }
        writeln!(w, "    Chunks with an owner:")?;

        let mut i = 0;
        while i < v.len() {
            let (_, owner, _, _) = v[i];
            if i == 0 || v[i - 1].1 != owner {
                writeln!(w, "    Owned by visit {owner}:")?;
            }
            // Extend the run while state matches the run head.
            let mut j = i + 1;
            while j < v.len() && Self::same_report_state(&v[i], &v[j]) {
                j += 1;
            }
            let state = if v[i].2 { "  usable" } else { "unusable" };
            let interest = if v[i].3 { ", interesting" } else { "" };
            if j - i > 1 {
                writeln!(w, "        chunks {}-{}: {}{}", v[i].0, v[j - 1].0, state, interest)?;
            } else {
                writeln!(w, "        chunk  {}: {}{}", v[i].0, state, interest)?;
            }
            i = j;
        }
        Ok(())
    }

    /// Two roster entries print as one run iff owner, usable state, and
    /// interest all match.
    fn same_report_state(a: &(i64, i64, bool, bool), b: &(i64, i64, bool, bool)) -> bool {
        a.1 == b.1 && a.2 == b.2 && a.3 == b.3
    }

    /// Writes a detailed report for one chunk.
    fn report_chunk(&self, chunk_id: i64, w: &mut impl fmt::Write) -> fmt::Result {
        match self.chunks.find(chunk_id) {
            None => writeln!(w, "    chunk {chunk_id}: not being tracked"),
            Some(d) => {
                writeln!(
                    w,
                    "    chunk {}: owned by visit {}, {}, {}interesting",
                    chunk_id,
                    d.visit_id,
                    if d.usable { "usable" } else { "unusable" },
                    if d.interested.is_empty() { "un" } else { "" },
                )?;
                writeln!(
                    w,
                    "        {} records in {} blocks ({} allocated), {} records in delta",
                    d.record_count(),
                    d.blocks_in_use(),
                    d.block_count(),
                    d.delta_count(),
                )
            }
        }
    }

    /// Writes the roster of chunks owned by one visit.
    fn report_visit_chunks(&self, visit_id: i64, w: &mut impl fmt::Write) -> fmt::Result {
        let v: Vec<(i64, i64, bool, bool)> = self
            .roster()
            .into_iter()
            .filter(|&(_, owner, _, _)| owner == visit_id)
            .collect();
        if v.is_empty() {
            return writeln!(w, "    Chunks belonging to visit {visit_id}: None");
        }
        writeln!(w, "    Chunks belonging to visit {visit_id}:")?;
        for (id, _, usable, interesting) in v {
            writeln!(
                w,
                "        chunk  {}: {}{}",
                id,
                if usable { "  usable" } else { "unusable" },
                if interesting { ", interesting" } else { "" },
            )?;
        }
        Ok(())
    }
}

/// Visit and chunk bookkeeping behind the manager mutex.
pub(crate) struct State {
    pub(crate) visits: VisitTracker,
    pub(crate) chunks: SubManager,
}

/// Everything a [`ChunkManager`] and its handles share.
pub(crate) struct Shared {
    state: Mutex<State>,
    owner_cond: Condition,
    pub(crate) pool: BlockPool,
    pub(crate) entry_size: usize,
    config: ManagerConfig,
}

impl Shared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("chunk manager mutex poisoned")
    }
}

/// Shared-state coordinator for chunk ownership among in-flight visits.
///
/// Clones share one underlying manager; hand one clone to each worker
/// thread.
#[derive(Clone)]
pub struct ChunkManager {
    shared: Arc<Shared>,
}

impl ChunkManager {
    /// Builds a manager with the given fixed capacities.
    ///
    /// # Panics
    /// Panics if the configuration is invalid (see [`ManagerConfig`] field
    /// requirements).
    pub fn new(config: ManagerConfig) -> Self {
        config.validate();
        let pool = BlockPool::new(
            config.num_blocks,
            config.block_size,
            config.max_blocks_per_chunk,
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    visits: VisitTracker::new(config.max_visits_in_flight),
                    chunks: SubManager::new(&config),
                }),
                owner_cond: Condition::new(),
                pool,
                entry_size: config.entry_size,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Registers `visit_id` as in-flight without further action.
    pub fn register_visit(&self, visit_id: i64) -> Result<(), Error> {
        let mut state = self.shared.lock_state();
        if state.visits.contains(visit_id) {
            return Err(Error::AlreadyInFlight { visit_id });
        }
        if state.visits.space() == 0 {
            return Err(Error::CapacityExceeded {
                what: "visit tracker",
            });
        }
        let inserted = state.visits.insert(visit_id);
        assert!(inserted);
        Ok(())
    }

    /// Marks `visit_id` failed. Idempotent; silent if the visit is unknown.
    pub fn fail_visit(&self, visit_id: i64) {
        self.shared.lock_state().visits.mark_failed(visit_id);
    }

    /// Whether `visit_id` is in flight and has not been marked failed.
    pub fn is_visit_in_flight(&self, visit_id: i64) -> bool {
        self.shared.lock_state().visits.is_valid(visit_id)
    }

    /// Begins visit processing: for each chunk id, either creates the chunk
    /// with the visit as owner (returned in `to_read`; its data must be
    /// read in) or queues the visit on the existing chunk (returned in
    /// `to_wait_for`; pass those to [`wait_for_ownership`]).
    ///
    /// `chunk_ids` must be duplicate-free. On error nothing was changed.
    ///
    /// [`wait_for_ownership`]: Self::wait_for_ownership
    pub fn start_visit(
        &self,
        visit_id: i64,
        chunk_ids: &[i64],
    ) -> Result<(Vec<ChunkHandle>, Vec<ChunkHandle>), Error> {
        #[cfg(debug_assertions)]
        {
            let mut sorted = chunk_ids.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            debug_assert!(
                sorted.len() == chunk_ids.len(),
                "chunk ids must be duplicate-free"
            );
        }

        let mut state = self.shared.lock_state();
        if state.chunks.space() < chunk_ids.len() {
            return Err(Error::CapacityExceeded {
                what: "chunk descriptors",
            });
        }
        if !state.visits.is_valid(visit_id) {
            return Err(Error::NotInFlight { visit_id });
        }

        let (read_slots, wait_slots) = state
            .chunks
            .create_or_register_interest(visit_id, chunk_ids)?;
        let to_read = self.handles(&state, read_slots);
        let to_wait_for = self.handles(&state, wait_slots);
        Ok((to_read, to_wait_for))
    }

    fn handles(&self, state: &MutexGuard<'_, State>, slots: Vec<usize>) -> Vec<ChunkHandle> {
        slots
            .into_iter()
            .map(|slot| ChunkHandle {
                shared: Arc::clone(&self.shared),
                slot,
                chunk_id: state.chunks.descriptor(slot).id(),
            })
            .collect()
    }

    /// Blocks until `visit_id` owns every chunk in `to_wait_for`, or the
    /// deadline expires (`DeadlineExceeded`).
    ///
    /// Acquired chunks are removed from `to_wait_for`; the subset that must
    /// be re-read from scratch (their previous owner failed before the read
    /// completed) is returned. Marking the visit failed does not interrupt
    /// the wait; the failing thread's own `end_visit` is the way out.
    pub fn wait_for_ownership(
        &self,
        visit_id: i64,
        to_wait_for: &mut Vec<ChunkHandle>,
        deadline: Deadline,
    ) -> Result<Vec<ChunkHandle>, Error> {
        let mut to_read = Vec::with_capacity(to_wait_for.len());
        let shared = &self.shared;
        let mut state = shared.lock_state();
        loop {
            if state
                .chunks
                .check_for_ownership(&shared.pool, visit_id, to_wait_for, &mut to_read)
            {
                return Ok(to_read);
            }
            let (guard, woken) = shared.owner_cond.wait_until(state, deadline);
            state = guard;
            if !woken {
                // One last look: the hand-off may have happened while this
                // thread was timing out.
                if state
                    .chunks
                    .check_for_ownership(&shared.pool, visit_id, to_wait_for, &mut to_read)
                {
                    return Ok(to_read);
                }
                return Err(Error::DeadlineExceeded { visit_id });
            }
        }
    }

    /// Returns a handle for each id that names a chunk currently in memory.
    /// Ownership is neither checked nor changed.
    pub fn get_chunks(&self, chunk_ids: &[i64]) -> Vec<ChunkHandle> {
        let state = self.shared.lock_state();
        state
            .chunks
            .get_chunks(chunk_ids)
            .into_iter()
            .map(|(slot, chunk_id)| ChunkHandle {
                shared: Arc::clone(&self.shared),
                slot,
                chunk_id,
            })
            .collect()
    }

    /// Ends the visit: commits (or rolls back) and hands off every chunk it
    /// owns, then forgets the visit. A failed visit always rolls back,
    /// whatever `rollback` says.
    ///
    /// Returns `true` iff the visit existed, was not failed, and committed.
    pub fn end_visit(&self, visit_id: i64, rollback: bool) -> bool {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let roll = rollback || !state.visits.is_valid(visit_id);
        if !state.visits.erase(visit_id) {
            return false;
        }

        let State { visits, chunks } = &mut *state;
        let changed =
            chunks.relinquish_ownership(&shared.pool, shared.entry_size, visit_id, roll, visits);
        drop(state);

        if changed {
            shared.owner_cond.notify_all();
        }
        !roll
    }

    /// Writes the visit roster.
    pub fn report_visits(&self, w: &mut impl fmt::Write) -> fmt::Result {
        self.shared.lock_state().visits.report(w)
    }

    /// Writes the chunk roster grouped by owner.
    pub fn report_chunks(&self, w: &mut impl fmt::Write) -> fmt::Result {
        self.shared.lock_state().chunks.report(w)
    }

    /// Writes one visit's status and the chunks it owns.
    pub fn report_visit(&self, visit_id: i64, w: &mut impl fmt::Write) -> fmt::Result {
        let state = self.shared.lock_state();
        state.visits.report_visit(visit_id, w)?;
        state.chunks.report_visit_chunks(visit_id, w)
    }

    /// Writes one chunk's detailed status.
    pub fn report_chunk(&self, chunk_id: i64, w: &mut impl fmt::Write) -> fmt::Result {
        self.shared.lock_state().chunks.report_chunk(chunk_id, w)
    }

    /// Panics if cross-structure invariants are violated. O(everything);
    /// intended for tests and debugging, not for production paths.
    pub fn check_invariants(&self) {
        use std::collections::HashSet;

        let state = self.shared.lock_state();
        let config = &self.shared.config;

        // In-flight visits never exceed the configured bound.
        assert!(state.visits.len() <= config.max_visits_in_flight);

        let mut chunk_ids: HashSet<i64> = HashSet::new();
        let mut offsets: HashSet<usize> = HashSet::new();
        let mut total_blocks = 0usize;

        for slot in 0..state.chunks.capacity() {
            let d = state.chunks.descriptor(slot);
            if d.id() == NONE_ID {
                continue;
            }
            // Chunk ids are unique across descriptors.
            assert!(chunk_ids.insert(d.id()), "duplicate chunk id {}", d.id());
            // Every owner is an in-flight (possibly failed) visit.
            assert!(
                state.visits.contains(d.visit_id),
                "chunk {} owned by unknown visit {}",
                d.id(),
                d.visit_id
            );
            // Queued visits are unique per chunk and still in flight
            // (ending a visit purges its queued interest everywhere).
            let queued: Vec<i64> = d.interested.iter().collect();
            let unique: HashSet<i64> = queued.iter().copied().collect();
            assert!(unique.len() == queued.len(), "duplicate interested visit");
            for &qid in &queued {
                assert!(
                    state.visits.contains(qid),
                    "ended visit {qid} still queued on chunk {}",
                    d.id()
                );
            }
            // Block offsets are unique and marked allocated in the pool.
            for &off in d.block_offsets() {
                assert!(offsets.insert(off), "block offset {off} shared");
                assert!(self.shared.pool.is_allocated(off));
            }
            total_blocks += d.block_count();
        }

        // The pool's allocated-bit count equals the union of descriptor
        // block lists: no leaked and no phantom blocks.
        assert!(
            config.num_blocks - self.shared.pool.free_blocks() == total_blocks,
            "pool bitmap disagrees with descriptor block lists"
        );
    }
}

impl fmt::Debug for ChunkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock_state();
        f.debug_struct("ChunkManager")
            .field("visits_in_flight", &state.visits.len())
            .field("chunks", &state.chunks.len())
            .field("free_blocks", &self.shared.pool.free_blocks())
            .finish_non_exhaustive()
    }
}
