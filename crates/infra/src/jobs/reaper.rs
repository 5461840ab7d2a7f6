//! Stall recovery for jobs whose worker vanished.
//!
//! A job stuck in `processing` past the stall timeout is moved forward to
//! `failed` rather than re-queued; a worker that later finishes it sees the
//! terminal status and drops its result.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::JobUpdate;
use super::worker::TaskHandle;
use crate::cache::{keys, CacheLayer};

pub const WORKER_LOST: &str = "worker lost";

pub struct StallReaper {
    jobs: Arc<dyn JobStore>,
    cache: CacheLayer,
    stall_timeout: Duration,
}

impl StallReaper {
    pub fn new(jobs: Arc<dyn JobStore>, cache: CacheLayer, stall_timeout: Duration) -> Self {
        Self {
            jobs,
            cache,
            stall_timeout,
        }
    }

    /// How often the background loop sweeps.
    pub fn sweep_interval(&self) -> Duration {
        (self.stall_timeout / 10).clamp(Duration::from_secs(1), Duration::from_secs(60))
    }

    /// Fail every job that has been processing longer than the stall timeout.
    /// Returns how many were failed.
    pub async fn sweep(&self) -> Result<usize, JobStoreError> {
        let stall = chrono::Duration::from_std(self.stall_timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(stall).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let mut reaped = 0;
        for id in self.jobs.stalled(cutoff).await? {
            match self.jobs.update(id, JobUpdate::failed(WORKER_LOST)).await {
                Ok(job) => {
                    warn!(job_id = %id, "failed stalled job");
                    self.cache.invalidate_pattern(&keys::job(id)).await;
                    self.cache.invalidate_pattern(&keys::analyses_list_pattern(job.user_id)).await;
                    reaped += 1;
                }
                // Record expired while in flight; nothing left to fail.
                Err(JobStoreError::NotFound(_)) => {
                    debug!(job_id = %id, "stalled job expired; releasing");
                    self.jobs.release(id).await?;
                }
                // Finished between the scan and the update.
                Err(JobStoreError::Invariant(_) | JobStoreError::Conflict(_)) => {
                    debug!(job_id = %id, "stalled job already resolved");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    pub fn spawn(self: Arc<Self>) -> TaskHandle {
        let (tx, mut stop) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.sweep_interval());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(stall_timeout_secs = self.stall_timeout.as_secs(), "stall reaper started");
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tick.tick() => {}
                }
                match self.sweep().await {
                    Ok(0) => {}
                    Ok(n) => info!(reaped = n, "stall sweep finished"),
                    Err(e) => warn!(error = %e, "stall sweep failed"),
                }
            }
            info!("stall reaper stopped");
        });
        TaskHandle::new(tx, join)
    }
}
