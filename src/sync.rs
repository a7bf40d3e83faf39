//! Condition-variable wrapper with predicate and deadline-bounded waits.
//!
//! Thin layer over `std::sync::Condvar` shaped around absolute
//! [`Deadline`]s: callers carry one deadline through arbitrarily many
//! wake-ups and re-checks, and every wait variant reports expiry as a plain
//! `false` instead of an error type.
//!
//! Spurious wake-ups can occur in every variant; the predicate variants
//! absorb them, the plain variants leave the re-check to the caller.

use std::sync::{Condvar, MutexGuard};

use crate::deadline::Deadline;

/// A condition variable tied to whichever mutex guard the caller passes in.
#[derive(Debug, Default)]
pub struct Condition {
    cv: Condvar,
}

impl Condition {
    pub fn new() -> Self {
        Self { cv: Condvar::new() }
    }

    /// Waits until woken by [`notify_all`](Self::notify_all). May wake
    /// spuriously.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cv.wait(guard).expect("condition mutex poisoned")
    }

    /// Waits until `predicate` returns `true`.
    pub fn wait_with<'a, T, P>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut predicate: P,
    ) -> MutexGuard<'a, T>
    where
        P: FnMut(&mut T) -> bool,
    {
        while !predicate(&mut guard) {
            guard = self.cv.wait(guard).expect("condition mutex poisoned");
        }
        guard
    }

    /// Waits until woken or until `deadline` expires.
    ///
    /// Returns `false` iff the deadline expired before a wake-up. A `true`
    /// return may still be a spurious wake-up; re-check state.
    pub fn wait_until<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Deadline,
    ) -> (MutexGuard<'a, T>, bool) {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return (guard, false);
        }
        let (guard, timeout) = self
            .cv
            .wait_timeout(guard, remaining)
            .expect("condition mutex poisoned");
        (guard, !timeout.timed_out())
    }

    /// Waits until `predicate` returns `true` or `deadline` expires.
    ///
    /// Returns `true` iff the predicate was satisfied before expiry. After a
    /// timed-out wake the predicate gets one final check, so a satisfied
    /// predicate is never reported as a timeout.
    pub fn wait_with_until<'a, T, P>(
        &self,
        mut guard: MutexGuard<'a, T>,
        deadline: Deadline,
        mut predicate: P,
    ) -> (MutexGuard<'a, T>, bool)
    where
        P: FnMut(&mut T) -> bool,
    {
        while !predicate(&mut guard) {
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return (guard, false);
            }
            let (g, timeout) = self
                .cv
                .wait_timeout(guard, remaining)
                .expect("condition mutex poisoned");
            guard = g;
            if timeout.timed_out() {
                let ok = predicate(&mut guard);
                return (guard, ok);
            }
        }
        (guard, true)
    }

    /// Wakes every waiting thread.
    ///
    /// Waiters block on visit-specific predicates, so `notify_one` could
    /// wake a thread whose predicate still fails while the one that could
    /// proceed keeps sleeping.
    pub fn notify_all(&self) {
        self.cv.notify_all();
    }
}
