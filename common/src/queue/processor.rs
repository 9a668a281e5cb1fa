// Call queue drain processing
//
// One drain cycle claims every ready job in batches, hands each to the call
// dispatcher, and records the outcome. The scheduling engine decides when a
// drain runs; this module only knows how to empty the queue once.

use crate::db::repositories::CallQueueRepository;
use crate::dispatch::CallDispatcher;
use crate::errors::{DatabaseError, QueueError};
use crate::models::CallJob;
use crate::scheduler::clock::Clock;
use crate::scheduler::engine::CallQueueProcessor;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

const DEFAULT_DISPATCH_CONCURRENCY: usize = 8;

/// Persistence operations the drain needs from the call queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallQueueStore: Send + Sync {
    async fn claim_ready(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        default_timezone: &str,
    ) -> Result<Vec<CallJob>, DatabaseError>;

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), DatabaseError>;

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
impl CallQueueStore for CallQueueRepository {
    async fn claim_ready(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        default_timezone: &str,
    ) -> Result<Vec<CallJob>, DatabaseError> {
        CallQueueRepository::claim_ready(self, limit, now, default_timezone).await
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), DatabaseError> {
        CallQueueRepository::mark_completed(self, job_id).await
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), DatabaseError> {
        CallQueueRepository::mark_failed(self, job_id, error).await
    }
}

/// Drains the ready call queue in batches.
pub struct DrainProcessor {
    store: Arc<dyn CallQueueStore>,
    dispatcher: Arc<dyn CallDispatcher>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
    default_timezone: String,
    dispatch_concurrency: usize,
}

impl DrainProcessor {
    pub fn new(
        store: Arc<dyn CallQueueStore>,
        dispatcher: Arc<dyn CallDispatcher>,
        clock: Arc<dyn Clock>,
        batch_size: i64,
        default_timezone: String,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            batch_size,
            default_timezone,
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
        }
    }

    /// Set how many dispatch requests may be in flight at once.
    pub fn with_dispatch_concurrency(mut self, dispatch_concurrency: usize) -> Self {
        self.dispatch_concurrency = dispatch_concurrency;
        self
    }

    /// Dispatch one batch concurrently, recording each outcome.
    async fn dispatch_batch(&self, jobs: Vec<CallJob>) {
        stream::iter(jobs)
            .for_each_concurrent(self.dispatch_concurrency, |job| async move {
                self.dispatch_one(job).await;
            })
            .await;
    }

    async fn dispatch_one(&self, job: CallJob) {
        match self.dispatcher.dispatch(&job).await {
            Ok(()) => {
                telemetry::record_call_dispatched(true);
                if let Err(e) = self.store.mark_completed(job.id).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(e) => {
                telemetry::record_call_dispatched(false);
                warn!(job_id = %job.id, error = %e, "Call dispatch failed");
                if let Err(db_err) = self.store.mark_failed(job.id, &e.to_string()).await {
                    error!(job_id = %job.id, error = %db_err, "Failed to mark job failed");
                }
            }
        }
    }
}

#[async_trait]
impl CallQueueProcessor for DrainProcessor {
    /// Claim and dispatch ready jobs until the queue has no more.
    ///
    /// A partial batch means the queue is empty; a full one means another
    /// claim is worth trying. Every claimed job counts as processed whether
    /// its dispatch succeeded or not, since either way it left the queue.
    #[instrument(skip(self))]
    async fn drain_ready_jobs(&self) -> Result<u64, QueueError> {
        let mut total = 0u64;

        loop {
            let jobs = self
                .store
                .claim_ready(self.batch_size, self.clock.now(), &self.default_timezone)
                .await
                .map_err(|e| QueueError::ClaimFailed(e.to_string()))?;

            if jobs.is_empty() {
                break;
            }

            let claimed = jobs.len() as u64;
            self.dispatch_batch(jobs).await;
            total += claimed;

            if claimed < self.batch_size as u64 {
                break;
            }
        }

        Ok(total)
    }
}
