//! Tube: FIFO of pending job keys plus the callers waiting for it to fill.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ports::clock::has_elapsed;
use crate::waiter::{Waiter, WaiterId, WaiterSet};

/// A work queue; the store keys tubes by name.
///
/// The FIFO may hold stale keys (jobs already reserved, finished or reaped).
/// It is not the source of truth for job state; the store checks each popped
/// key against the job table and skips anything that is not Ready.
#[derive(Debug)]
pub struct Tube {
    pending: VecDeque<String>,
    waiters: WaiterSet,
    updated_at: DateTime<Utc>,
}

impl Tube {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            pending: VecDeque::new(),
            waiters: WaiterSet::new(),
            updated_at: now,
        }
    }

    /// Append at the tail and broadcast to everyone waiting. Returns how many were woken.
    pub fn push(&mut self, key: String, now: DateTime<Utc>) -> usize {
        self.pending.push_back(key);
        self.updated_at = now;
        self.waiters.wake_all()
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    pub fn front(&self) -> Option<&str> {
        self.pending.front().map(String::as_str)
    }

    /// Keep only the keys `keep` accepts, preserving order.
    pub fn retain_pending<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.pending.len();
        self.pending.retain(|k| keep(k));
        before - self.pending.len()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn register_waiter(&mut self) -> Waiter {
        self.waiters.register()
    }

    pub fn deregister_waiter(&mut self, id: WaiterId) -> bool {
        self.waiters.deregister(id)
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn prune_abandoned_waiters(&mut self) -> usize {
        self.waiters.prune_abandoned()
    }

    /// Empty, nobody waiting, and untouched for longer than `retention`.
    pub fn is_idle(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.pending.is_empty()
            && self.waiters.is_empty()
            && has_elapsed(self.updated_at, now, retention)
    }
}
