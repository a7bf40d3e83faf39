//! Visit bookkeeping: which visits are in flight and which have failed.
//!
//! A visit is *valid* while it is in flight and unfailed. Failure is sticky
//! and only ever flows one way; the failed entry stays in the tracker until
//! `end_visit` erases it, so hand-off logic can still see (and skip) it.

use std::fmt;

use crate::stdx::{HashedSet, SetEntry, NONE_ID};

/// One in-flight visit.
#[derive(Debug)]
pub struct Visit {
    id: i64,
    next: i32,
    failed: bool,
}

impl Default for Visit {
    fn default() -> Self {
        Self {
            id: NONE_ID,
            next: -1,
            failed: false,
        }
    }
}

impl Visit {
    #[inline]
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl SetEntry for Visit {
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
        *self = Self::default();
    }
}

/// Tracks the set of in-flight visits, bounded by `max_visits_in_flight`.
#[derive(Debug)]
pub struct VisitTracker {
    visits: HashedSet<Visit>,
}

impl VisitTracker {
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        Self {
            visits: HashedSet::new(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.visits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    #[inline]
    pub fn space(&self) -> usize {
        self.visits.space()
    }

    #[inline]
    pub fn contains(&self, visit_id: i64) -> bool {
        self.visits.find(visit_id).is_some()
    }

    /// Whether the visit is in flight and has not been marked failed.
    pub fn is_valid(&self, visit_id: i64) -> bool {
        match self.visits.find(visit_id) {
            Some(v) => !v.failed,
            None => false,
        }
    }

    /// Registers a visit; returns `false` when the tracker is full. The
    /// caller must have checked that the visit is not already present.
    pub fn insert(&mut self, visit_id: i64) -> bool {
        self.visits.insert(visit_id).is_some()
    }

    /// Marks the visit failed. No effect if the visit is unknown or already
    /// failed.
    pub fn mark_failed(&mut self, visit_id: i64) {
        if let Some(v) = self.visits.find_mut(visit_id) {
            v.failed = true;
        }
    }

    /// Removes the visit, returning whether it was being tracked.
    pub fn erase(&mut self, visit_id: i64) -> bool {
        self.visits.erase(visit_id)
    }

    /// Writes a roster of tracked visits, sorted by id.
    pub fn report(&self, w: &mut impl fmt::Write) -> fmt::Result {
        let mut ids: Vec<i64> = self.visits.iter().map(|(_, v)| v.id).collect();
        if ids.is_empty() {
            return writeln!(w, "    No visits being tracked");
        }
        ids.sort_unstable();
        for id in ids {
            let v = self.visits.find(id).expect("id came from iteration");
            writeln!(
                w,
                "    visit {:<24}: {}",
                id,
                if v.failed { "failed" } else { "in-flight" }
            )?;
        }
        Ok(())
    }

    /// Writes the status of one visit.
    pub fn report_visit(&self, visit_id: i64, w: &mut impl fmt::Write) -> fmt::Result {
        match self.visits.find(visit_id) {
            None => writeln!(w, "    visit {visit_id:<24}: not being tracked"),
            Some(v) => writeln!(
                w,
                "    visit {:<24}: {}",
                visit_id,
                if v.failed { "failed" } else { "in-flight" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::VisitTracker;

    #[test]
    fn register_and_validity() {
        let mut t = VisitTracker::new(16);
        assert!(!t.is_valid(1));

        assert!(t.insert(1));
        assert!(t.is_valid(1));
        assert!(t.contains(1));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn failed_visit_is_tracked_but_invalid() {
        let mut t = VisitTracker::new(16);
        t.insert(7);
        t.mark_failed(7);

        assert!(t.contains(7));
        assert!(!t.is_valid(7));
    }

    #[test]
    fn mark_failed_is_idempotent_and_silent_on_unknown() {
        let mut t = VisitTracker::new(16);
        t.mark_failed(99);
        assert!(!t.contains(99));

        t.insert(1);
        t.mark_failed(1);
        t.mark_failed(1);
        assert!(!t.is_valid(1));
    }

    #[test]
    fn erase_frees_space() {
        let mut t = VisitTracker::new(2);
        assert!(t.insert(1));
        assert!(t.insert(2));
        assert_eq!(t.space(), 0);
        assert!(!t.insert(3));

        assert!(t.erase(1));
        assert!(!t.erase(1));
        assert!(t.insert(3));
        assert!(t.is_valid(3));
    }

    #[test]
    fn report_sorts_and_labels() {
        let mut t = VisitTracker::new(16);
        t.insert(30);
        t.insert(10);
        t.insert(20);
        t.mark_failed(20);

        let mut out = String::new();
        t.report(&mut out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("visit 10"));
        assert!(lines[0].contains("in-flight"));
        assert!(lines[1].contains("visit 20"));
        assert!(lines[1].contains("failed"));
        assert!(lines[2].contains("visit 30"));

        let mut one = String::new();
        t.report_visit(99, &mut one).unwrap();
        assert!(one.contains("not being tracked"));
    }
}
