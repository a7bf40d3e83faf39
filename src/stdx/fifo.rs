//! Bounded FIFO of 64-bit identifiers with power-of-two capacity.
//!
//! Backs the per-chunk interest queue: visits waiting for a chunk are served
//! strictly first-interested-first-served, so the queue must preserve
//! insertion order and reject overflow explicitly rather than dropping.
//!
//! # Invariants
//! - Capacity is a power of two; indexing wraps via `& mask`.
//! - `head` always indexes the logical front; `len <= capacity`.

/// Fixed-capacity FIFO queue of `i64` values.
///
/// Capacity is set at construction and must be a power of two, which turns
/// the wrap-around modulo into a single AND.
#[derive(Clone, Debug)]
pub struct IdFifo {
    buf: Box<[i64]>,
    head: u32,
    len: u32,
    mask: u32,
}

impl IdFifo {
    /// Creates an empty FIFO with room for `capacity` values.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "IdFifo capacity must be > 0");
        assert!(
            capacity.is_power_of_two(),
            "IdFifo capacity must be a power of two"
        );
        assert!(capacity <= u32::MAX as usize / 2);

        Self {
            buf: vec![0i64; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            mask: capacity as u32 - 1,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of queued values.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len as usize == self.buf.len()
    }

    /// Empties the queue.
    #[inline]
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Appends `elt`, returning `Err(elt)` when the queue is already full.
    ///
    /// Ownership stays with the caller on overflow instead of dropping
    /// silently.
    #[inline]
    pub fn enqueue(&mut self, elt: i64) -> Result<(), i64> {
        if self.is_full() {
            return Err(elt);
        }

        let tail = (self.head + self.len) & self.mask;
        self.buf[tail as usize] = elt;
        self.len += 1;

        debug_assert!(self.len as usize <= self.buf.len());
        Ok(())
    }

    /// Removes and returns the least recently inserted value, or `None`
    /// when empty.
    #[inline]
    pub fn dequeue(&mut self) -> Option<i64> {
        if self.is_empty() {
            return None;
        }

        let elt = self.buf[self.head as usize];
        self.head = (self.head + 1) & self.mask;
        self.len -= 1;
        Some(elt)
    }

    /// Removes the first occurrence of `elt`, preserving the order of the
    /// rest. Returns whether an occurrence was found. O(len).
    pub fn remove(&mut self, elt: i64) -> bool {
        let n = self.len;
        let mut found = false;
        for _ in 0..n {
            let v = self.dequeue().expect("len counted above");
            if !found && v == elt {
                found = true;
                continue;
            }
            self.enqueue(v).expect("net length can only shrink");
        }
        found
    }

    /// Iterates the queued values front to back without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len).map(move |i| self.buf[((self.head + i) & self.mask) as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::IdFifo;

    #[test]
    fn new_is_empty() {
        let q = IdFifo::new(8);
        assert!(q.is_empty());
        assert!(!q.is_full());
        assert_eq!(q.len(), 0);
        assert_eq!(q.capacity(), 8);
    }

    #[test]
    fn fifo_order() {
        let mut q = IdFifo::new(4);
        q.enqueue(10).unwrap();
        q.enqueue(-1).unwrap();
        q.enqueue(30).unwrap();

        assert_eq!(q.dequeue(), Some(10));
        assert_eq!(q.dequeue(), Some(-1));
        assert_eq!(q.dequeue(), Some(30));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn enqueue_full_returns_value() {
        let mut q = IdFifo::new(2);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        assert!(q.is_full());
        assert_eq!(q.enqueue(3), Err(3));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn dequeue_empty_returns_none() {
        let mut q = IdFifo::new(2);
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn wraps_around() {
        let mut q = IdFifo::new(4);
        for round in 0..10i64 {
            q.enqueue(round).unwrap();
            q.enqueue(round + 100).unwrap();
            assert_eq!(q.dequeue(), Some(round));
            assert_eq!(q.dequeue(), Some(round + 100));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn clear_empties() {
        let mut q = IdFifo::new(4);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);

        // Still usable after clear.
        q.enqueue(7).unwrap();
        assert_eq!(q.dequeue(), Some(7));
    }

    #[test]
    fn iter_front_to_back() {
        let mut q = IdFifo::new(4);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        q.enqueue(3).unwrap();
        q.dequeue();
        q.enqueue(4).unwrap();
        q.enqueue(5).unwrap();

        let items: Vec<i64> = q.iter().collect();
        assert_eq!(items, vec![2, 3, 4, 5]);
    }

    #[test]
    fn remove_preserves_order_of_the_rest() {
        let mut q = IdFifo::new(8);
        for v in [5, 6, 7, 6, 8] {
            q.enqueue(v).unwrap();
        }

        assert!(q.remove(6));
        let items: Vec<i64> = q.iter().collect();
        assert_eq!(items, vec![5, 7, 6, 8]);

        assert!(!q.remove(99));
        assert!(q.remove(6));
        assert!(q.remove(5));
        let items: Vec<i64> = q.iter().collect();
        assert_eq!(items, vec![7, 8]);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_capacity_panics() {
        let _ = IdFifo::new(6);
    }
}
