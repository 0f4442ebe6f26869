//! Recurring review sync: fetch from the place API, reconcile into the
//! store, prune to the retention limit.
//!
//! The pipeline is incremental: every candidate goes through
//! `insert_if_not_exists`, then the table is pruned to the newest N rows.
//! Re-running a cycle against an unchanged external result set inserts
//! nothing and leaves every `retrieved_at` untouched. A full-replace store
//! operation exists but is deliberately not wired into the scheduler; the
//! two reconciliation styles must not be mixed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use expro_core::DEFAULT_RETENTION;
use expro_places::ReviewSource;
use expro_store::ReviewStore;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "expro-sync";

/// Every 6 hours, on the hour (seconds-resolution cron).
pub const DEFAULT_SYNC_CRON: &str = "0 0 */6 * * *";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub cron: String,
    pub retention: u32,
    pub scheduler_enabled: bool,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            cron: std::env::var("REVIEWS_SYNC_CRON")
                .unwrap_or_else(|_| DEFAULT_SYNC_CRON.to_string()),
            retention: std::env::var("REVIEWS_RETENTION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETENTION),
            scheduler_enabled: std::env::var("EXPRO_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub inserted: usize,
    pub pruned: u64,
}

#[derive(Debug, Clone, Serialize)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// A previous cycle was still in flight; this tick was dropped.
    Skipped,
}

/// One sync pipeline instance. Owns the reentrancy flag, so constructing a
/// second instance over the same store would defeat the no-overlap guarantee;
/// the process keeps exactly one behind an `Arc`.
pub struct ReviewSync {
    store: ReviewStore,
    source: Arc<dyn ReviewSource>,
    retention: u32,
    in_flight: AtomicBool,
}

impl ReviewSync {
    pub fn new(store: ReviewStore, source: Arc<dyn ReviewSource>, retention: u32) -> Self {
        Self {
            store,
            source,
            retention,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one fetch → insert-if-new → prune pass. Public so tests and the
    /// CLI drive cycles directly instead of waiting on the cron interval.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("previous sync cycle still running; dropping this tick");
            return Ok(CycleOutcome::Skipped);
        }

        let result = self.cycle_inner().await;
        self.in_flight.store(false, Ordering::Release);
        result.map(CycleOutcome::Completed)
    }

    async fn cycle_inner(&self) -> Result<CycleSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        // The source boundary never errors; a failed fetch is an empty batch.
        let candidates = self.source.fetch_reviews().await;
        let fetched = candidates.len();

        let mut inserted = 0usize;
        for candidate in &candidates {
            if self
                .store
                .insert_if_not_exists(candidate)
                .await
                .context("inserting fetched review")?
            {
                inserted += 1;
            }
        }

        let pruned = self
            .store
            .prune(self.retention)
            .await
            .context("pruning review table")?;

        let finished_at = Utc::now();
        info!(%run_id, fetched, inserted, pruned, "review sync cycle complete");
        Ok(CycleSummary {
            run_id,
            started_at,
            finished_at,
            fetched,
            inserted,
            pruned,
        })
    }
}

/// Cron wrapper around [`ReviewSync`]. A cycle failure is logged and the
/// next tick runs on schedule; the fixed interval is the retry mechanism.
pub struct ReviewSyncScheduler {
    inner: JobScheduler,
}

impl ReviewSyncScheduler {
    pub async fn start(sync: Arc<ReviewSync>, cron: &str) -> Result<Self> {
        let inner = JobScheduler::new().await.context("creating scheduler")?;
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let sync = sync.clone();
            Box::pin(async move {
                match sync.run_cycle().await {
                    Ok(CycleOutcome::Completed(_)) | Ok(CycleOutcome::Skipped) => {}
                    Err(err) => error!(%err, "sync cycle failed; waiting for next tick"),
                }
            })
        })
        .with_context(|| format!("creating sync job for cron {cron}"))?;
        inner.add(job).await.context("adding sync job")?;
        inner.start().await.context("starting scheduler")?;
        Ok(Self { inner })
    }

    pub async fn stop(mut self) -> Result<()> {
        self.inner.shutdown().await.context("stopping scheduler")?;
        Ok(())
    }
}
