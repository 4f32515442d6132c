use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::ports::clock::has_elapsed;

/// One cached result.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub value: Bytes,
    pub created_at: DateTime<Utc>,
    /// `Duration::ZERO` means the item never expires.
    pub ttl: Duration,
}

impl CacheItem {
    pub fn new(value: Bytes, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            value,
            created_at: now,
            ttl,
        }
    }

    /// Replace the value and restart the TTL window; the TTL itself is kept.
    pub fn cover(&mut self, value: Bytes, now: DateTime<Utc>) {
        self.value = value;
        self.created_at = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.ttl.is_zero() && has_elapsed(self.created_at, now, self.ttl)
    }
}
