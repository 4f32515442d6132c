use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub ready: usize,
    pub reserved: usize,
    pub delayed: usize,
    pub tubes: usize,
    pub sessions: usize,
    pub waiters: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounts {
    pub items: usize,
    pub waiters: usize,
}

/// Snapshot returned in the `Status` reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerCounts {
    pub queue: QueueCounts,
    pub cache: CacheCounts,
}

/// What one job-store sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReapStats {
    pub jobs: usize,
    pub tubes: usize,
    pub waiters: usize,
}

/// What one cache sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheReapStats {
    pub items: usize,
    pub waiters: usize,
}
