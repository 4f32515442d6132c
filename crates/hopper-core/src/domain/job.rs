//! Job record and its state machine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::SessionId;

/// Job lifecycle.
///
/// State transitions:
/// - Ready -> Reserved (reserve)
/// - Reserved -> Ready (restore, explicit or crash recovery)
/// - Reserved -> Delayed (finish)
///
/// Delayed jobs are only waiting for the reaper. Nothing else is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Ready,
    Reserved,
    Delayed,
}

impl JobStatus {
    /// Ready or Reserved: the job still owes its producer a result.
    pub fn is_pending(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Reserved)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub tube: String,
    pub key: String,
    pub payload: Bytes,
    pub status: JobStatus,
    /// Session holding the reservation while `status == Reserved`.
    pub reserved_by: Option<SessionId>,
}

impl Job {
    pub fn new(tube: String, key: String, payload: Bytes) -> Self {
        Self {
            tube,
            key,
            payload,
            status: JobStatus::Ready,
            reserved_by: None,
        }
    }

    /// Ready -> Reserved. Returns false (and changes nothing) from any other state.
    pub fn reserve(&mut self, session: SessionId) -> bool {
        if self.status != JobStatus::Ready {
            return false;
        }
        self.status = JobStatus::Reserved;
        self.reserved_by = Some(session);
        true
    }

    /// Reserved -> Ready. Returns the session that held the reservation.
    pub fn restore(&mut self) -> Option<SessionId> {
        if self.status != JobStatus::Reserved {
            return None;
        }
        self.status = JobStatus::Ready;
        self.reserved_by.take()
    }

    /// Reserved -> Delayed. Returns the session that held the reservation.
    pub fn finish(&mut self) -> Option<SessionId> {
        if self.status != JobStatus::Reserved {
            return None;
        }
        self.status = JobStatus::Delayed;
        self.reserved_by.take()
    }
}

/// What a successful reservation hands to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    pub key: String,
    pub payload: Bytes,
}
