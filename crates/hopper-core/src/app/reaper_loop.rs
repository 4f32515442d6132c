//! ReaperLoop - 期限切れデータの定期回収
//!
//! # フロー
//! 1. ResultCache::reap() で TTL 切れの結果を削除し、待っている呼び出し側を起こす
//! 2. JobStore::reap() で Delayed ジョブと放置された tube を削除
//! 3. shutdown token が発火したら終了

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::Services;
use crate::observability::{CacheReapStats, JobReapStats};

/// What one sweep reclaimed across both stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub jobs: JobReapStats,
    pub cache: CacheReapStats,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct ReaperLoop {
    services: Arc<Services>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(services: Arc<Services>, interval: Duration) -> Self {
        Self { services, interval }
    }

    pub async fn run_once(&self) -> ReapReport {
        let cache = self.services.cache.reap().await;
        let jobs = self.services.jobs.reap().await;
        ReapReport { jobs, cache }
    }

    /// Sweep every `interval` until `shutdown` fires. The first sweep happens
    /// one full interval after start.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        if !report.is_empty() {
                            tracing::debug!(
                                jobs = report.jobs.jobs,
                                tubes = report.jobs.tubes,
                                items = report.cache.items,
                                waiters = report.jobs.waiters + report.cache.waiters,
                                "reaper sweep"
                            );
                        }
                    }
                }
            }
            tracing::debug!("reaper stopped");
        })
    }
}
