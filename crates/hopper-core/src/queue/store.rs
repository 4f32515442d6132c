//! In-memory job store: jobs, tubes, and per-session reservation logs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::Tube;
use crate::domain::{Job, JobStatus, ReservedJob, SessionId};
use crate::error::WaitError;
use crate::observability::{JobReapStats, QueueCounts};
use crate::ports::Clock;
use crate::shard::ShardedMap;

/// Default idle time after which an empty tube is dropped.
pub const DEFAULT_TUBE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything behind the store lock.
///
/// One lock covers shard lookup, mutation and waiter broadcast, so sequences
/// like "pop if Ready, then mark Reserved" are atomic.
struct JobStoreState {
    /// All jobs (single source of truth for job state).
    jobs: ShardedMap<Job>,

    /// Tube name -> FIFO of keys.
    tubes: HashMap<String, Tube>,

    /// Reservation log: keys currently Reserved by each session.
    sessions: HashMap<SessionId, HashSet<String>>,
}

impl JobStoreState {
    fn new(shard_count: usize) -> Self {
        Self {
            jobs: ShardedMap::new(shard_count),
            tubes: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    fn log_reservation(&mut self, session: SessionId, key: &str) {
        self.sessions
            .entry(session)
            .or_default()
            .insert(key.to_string());
    }

    fn unlog_reservation(&mut self, session: SessionId, key: &str) {
        if let Some(keys) = self.sessions.get_mut(&session) {
            keys.remove(key);
            if keys.is_empty() {
                self.sessions.remove(&session);
            }
        }
    }

    /// Drop stale heads; true if the tube now starts with a Ready job.
    fn has_ready(&mut self, tube: &str) -> bool {
        let Self { jobs, tubes, .. } = self;
        let Some(tube) = tubes.get_mut(tube) else {
            return false;
        };
        while let Some(key) = tube.front() {
            if jobs
                .get(key)
                .is_some_and(|job| job.status == JobStatus::Ready)
            {
                return true;
            }
            tube.pop_front();
        }
        false
    }

    /// Reserved -> Ready and re-enqueue at the tail of its tube.
    fn restore(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let Some(job) = self.jobs.get_mut(key) else {
            return false;
        };
        let Some(owner) = job.restore() else {
            return false;
        };
        let tube_name = job.tube.clone();
        self.unlog_reservation(owner, key);
        self.tubes
            .entry(tube_name)
            .or_insert_with(|| Tube::new(now))
            .push(key.to_string(), now);
        true
    }
}

/// Job store shared by every connection.
pub struct JobStore {
    state: Mutex<JobStoreState>,
    clock: Arc<dyn Clock>,
    tube_retention: Duration,
}

impl JobStore {
    pub fn new(shard_count: usize, tube_retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(JobStoreState::new(shard_count)),
            clock,
            tube_retention,
        }
    }

    /// Add a Ready job to the tail of `tube`.
    ///
    /// Idempotent: returns false and changes nothing if `key` is already known
    /// in any state.
    pub async fn join(&self, tube: &str, key: &str, payload: Bytes) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.jobs.contains(key) {
            return false;
        }

        state.jobs.insert(
            key.to_string(),
            Job::new(tube.to_string(), key.to_string(), payload),
        );
        let woken = state
            .tubes
            .entry(tube.to_string())
            .or_insert_with(|| Tube::new(now))
            .push(key.to_string(), now);

        tracing::trace!(tube, key, woken, "job joined");
        true
    }

    /// Pop the first Ready job from `tube` and reserve it for `session`.
    ///
    /// Stale keys met on the way are discarded.
    pub async fn reserve(&self, tube: &str, session: SessionId) -> Option<ReservedJob> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let JobStoreState { jobs, tubes, .. } = &mut *state;
        let tube_entry = tubes.get_mut(tube)?;

        let mut reserved = None;
        while let Some(key) = tube_entry.pop_front() {
            let Some(job) = jobs.get_mut(&key) else {
                continue;
            };
            if !job.reserve(session) {
                continue;
            }
            reserved = Some(ReservedJob {
                key,
                payload: job.payload.clone(),
            });
            break;
        }

        let reserved = reserved?;
        tube_entry.touch(now);
        state.log_reservation(session, &reserved.key);
        tracing::trace!(tube, key = %reserved.key, %session, "job reserved");
        Some(reserved)
    }

    /// Reserved -> Delayed.
    ///
    /// Any session may finish any reserved job; the key is removed from the
    /// log of the session that reserved it. Returns false if the job is
    /// unknown or not currently Reserved.
    pub async fn finish(&self, key: &str, session: SessionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(owner) = state.jobs.get_mut(key).and_then(Job::finish) else {
            return false;
        };
        state.unlog_reservation(owner, key);
        if owner != session {
            tracing::debug!(key, %owner, %session, "job finished by another session");
        }
        true
    }

    /// Reserved -> Ready, re-enqueued at the tail of its tube.
    pub async fn restore(&self, key: &str, session: SessionId) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let restored = state.restore(key, now);
        if restored {
            tracing::trace!(key, %session, "job restored");
        }
        restored
    }

    /// Crash recovery: restore everything `session` still holds and drop its log.
    ///
    /// The server calls this exactly once per connection, after the
    /// connection has closed and its blocking waits were cancelled.
    pub async fn restore_all(&self, session: SessionId) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(keys) = state.sessions.remove(&session) else {
            return 0;
        };

        let mut restored = 0;
        for key in keys {
            let owned = state
                .jobs
                .get(&key)
                .is_some_and(|job| job.reserved_by == Some(session));
            if owned && state.restore(&key, now) {
                restored += 1;
            }
        }
        restored
    }

    /// True while the job is Ready or Reserved.
    pub async fn exists(&self, key: &str) -> bool {
        let state = self.state.lock().await;
        state
            .jobs
            .get(key)
            .is_some_and(|job| job.status.is_pending())
    }

    pub async fn status_of(&self, key: &str) -> Option<JobStatus> {
        let state = self.state.lock().await;
        state.jobs.get(key).map(|job| job.status)
    }

    /// Block until `tube` has a Ready job, `cancel` fires, or `timeout` elapses.
    ///
    /// `None` means no deadline. Returns `Ok(false)` when woken but another
    /// consumer drained the tube first.
    pub async fn await_non_empty(
        &self,
        tube: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<bool, WaitError> {
        let waiter = {
            let now = self.clock.now();
            let mut state = self.state.lock().await;
            if state.has_ready(tube) {
                return Ok(true);
            }

            let waiter = state
                .tubes
                .entry(tube.to_string())
                .or_insert_with(|| Tube::new(now))
                .register_waiter();

            // Re-check after registering: a join may have landed in between.
            if state.has_ready(tube) {
                if let Some(t) = state.tubes.get_mut(tube) {
                    t.deregister_waiter(waiter.id());
                }
                return Ok(true);
            }
            waiter
        };

        let outcome = waiter.wait(timeout, cancel).await;

        let mut state = self.state.lock().await;
        if let Some(t) = state.tubes.get_mut(tube) {
            t.deregister_waiter(waiter.id());
        }
        outcome?;
        Ok(state.has_ready(tube))
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        let mut counts = QueueCounts {
            tubes: state.tubes.len(),
            sessions: state.sessions.len(),
            waiters: state.tubes.values().map(Tube::waiter_count).sum(),
            ..QueueCounts::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Ready => counts.ready += 1,
                JobStatus::Reserved => counts.reserved += 1,
                JobStatus::Delayed => counts.delayed += 1,
            }
        }
        counts
    }

    /// One reaper pass: drop Delayed jobs, stale FIFO entries, abandoned
    /// waiters and tubes idle beyond the retention window.
    pub async fn reap(&self) -> JobReapStats {
        let now = self.clock.now();
        let retention = self.tube_retention;
        let mut state = self.state.lock().await;
        let JobStoreState { jobs, tubes, .. } = &mut *state;

        let reaped_jobs = jobs.retain(|_, job| job.status != JobStatus::Delayed).len();

        let mut waiters = 0;
        for tube in tubes.values_mut() {
            tube.retain_pending(|key| {
                jobs.get(key)
                    .is_some_and(|job| job.status == JobStatus::Ready)
            });
            waiters += tube.prune_abandoned_waiters();
        }

        let before = tubes.len();
        tubes.retain(|name, tube| {
            let idle = tube.is_idle(now, retention);
            if idle {
                tracing::debug!(tube = %name, "dropping idle tube");
            }
            !idle
        });

        JobReapStats {
            jobs: reaped_jobs,
            tubes: before - tubes.len(),
            waiters,
        }
    }
}
