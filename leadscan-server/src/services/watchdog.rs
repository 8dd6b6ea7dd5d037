//! Stale scan watchdog
//!
//! Periodically closes out queued/running jobs whose `updated_at` has not
//! moved for `stale_after`, cancels their executor and takes the flight back
//! so a wedged job cannot block new scans forever. A stale job whose company
//! was already reconciled is completed rather than failed.

use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::scan_service::CancelTokens;
use super::single_flight::SingleFlightGuard;
use crate::db::{JobStore, JobStoreError};
use crate::models::{FailureCode, JobFailure, ScanStatus};

#[derive(Debug, Clone)]
pub struct Watchdog {
    jobs: JobStore,
    guard: SingleFlightGuard,
    tokens: CancelTokens,
    interval: Duration,
    stale_after: Duration,
}

impl Watchdog {
    pub fn new(
        jobs: JobStore,
        guard: SingleFlightGuard,
        tokens: CancelTokens,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            jobs,
            guard,
            tokens,
            interval,
            stale_after,
        }
    }

    /// One pass; returns the number of stale jobs closed out
    pub async fn sweep(&self) -> Result<usize, JobStoreError> {
        let cutoff = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|stale_after| Utc::now().checked_sub_signed(stale_after));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let mut settled_count = 0;

        for job in self.jobs.stale(cutoff).await? {
            let idle_secs = (Utc::now() - job.updated_at).num_seconds();
            let failure = JobFailure::new(
                FailureCode::WatchdogTimeout,
                format!(
                    "No progress for {}s while {} (last stage update {})",
                    idle_secs,
                    job.status,
                    job.updated_at.to_rfc3339()
                ),
            );

            match self.jobs.finish_abandoned(job.id, failure).await {
                Ok(settled) if settled.status == ScanStatus::Completed => {
                    settled_count += 1;
                    tracing::warn!(
                        scan_id = %job.id,
                        idle_secs,
                        "Watchdog completed stale scan that was already reconciled"
                    );
                }
                Ok(_) => {
                    settled_count += 1;
                    tracing::warn!(
                        scan_id = %job.id,
                        status = %job.status,
                        idle_secs,
                        "Watchdog force-failed stale scan"
                    );
                }
                // Finished between the query and the update
                Err(JobStoreError::Rejected { .. }) => continue,
                Err(e) => return Err(e),
            }

            if let Some(token) = self.tokens.read().await.get(&job.id) {
                token.cancel();
            }
            if self.guard.force_release(job.id) {
                tracing::warn!(scan_id = %job.id, "Watchdog released single-flight guard");
            }
        }

        self.release_orphaned_flight().await?;
        Ok(settled_count)
    }

    /// Free the flight if its owner is terminal and no executor still runs it
    async fn release_orphaned_flight(&self) -> Result<(), JobStoreError> {
        let Some(owner) = self.guard.active_job() else {
            return Ok(());
        };
        let orphaned = match self.jobs.get(owner).await? {
            Some(job) => job.is_terminal() && !self.tokens.read().await.contains_key(&owner),
            None => false,
        };
        if orphaned && self.guard.force_release(owner) {
            tracing::warn!(scan_id = %owner, "Watchdog released flight held by finished scan");
        }
        Ok(())
    }

    /// Run `sweep` every interval until `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                stale_after_secs = self.stale_after.as_secs(),
                "Scan watchdog started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!(error = %e, "Watchdog sweep failed");
                        }
                    }
                }
            }
            tracing::info!("Scan watchdog stopped");
        })
    }
}
