// Call queue repository implementation

use super::queries::call_job_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::CallJob;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

/// Repository for call queue database operations
pub struct CallQueueRepository {
    pool: DbPool,
}

impl CallQueueRepository {
    /// Create a new CallQueueRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Enqueue a new call job, either attached to a campaign or direct.
    #[instrument(skip(self, phone_number))]
    pub async fn enqueue(
        &self,
        campaign_id: Option<Uuid>,
        user_id: Uuid,
        phone_number: &str,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<CallJob, DatabaseError> {
        let job = sqlx::query_as::<_, CallJob>(&format!(
            r#"
            INSERT INTO call_jobs (
                id, campaign_id, user_id, phone_number, status,
                scheduled_for, attempts, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'queued', $5, 0, NOW(), NOW())
            RETURNING {}
            "#,
            call_job_queries::SELECT_ALL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(user_id)
        .bind(phone_number)
        .bind(scheduled_for)
        .fetch_one(self.pool.pool())
        .await?;

        tracing::info!(job_id = %job.id, campaign_id = ?campaign_id, "Call job enqueued");
        Ok(job)
    }

    /// Count queued jobs that were enqueued directly by a user rather than
    /// generated from a campaign.
    #[instrument(skip(self))]
    pub async fn count_direct_queued(&self) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS queued_count FROM call_jobs WHERE campaign_id IS NULL AND status = 'queued'",
        )
        .fetch_one(self.pool.pool())
        .await?;

        let count: i64 = row.try_get("queued_count")?;
        Ok(count)
    }

    /// Atomically claim a batch of ready jobs for dispatch.
    ///
    /// A job is ready when it is queued, its `scheduled_for` is unset or in
    /// the past, and it is either direct or belongs to an active campaign
    /// whose calling window contains the claim instant in the campaign's
    /// timezone. Timezone precedence matches the registry: campaign
    /// override, then user, then the configured default. Claimed rows move
    /// to `dispatching` in the same statement, and `FOR UPDATE SKIP LOCKED`
    /// keeps concurrent drains from claiming the same job twice.
    #[instrument(skip(self, default_timezone))]
    pub async fn claim_ready(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        default_timezone: &str,
    ) -> Result<Vec<CallJob>, DatabaseError> {
        let jobs = sqlx::query_as::<_, CallJob>(&format!(
            r#"
            UPDATE call_jobs
            SET status = 'dispatching', updated_at = NOW()
            WHERE id IN (
                SELECT j.id
                FROM call_jobs j
                LEFT JOIN campaigns c ON c.id = j.campaign_id
                LEFT JOIN users u ON u.id = j.user_id
                WHERE j.status = 'queued'
                  AND (j.scheduled_for IS NULL OR j.scheduled_for <= $1)
                  AND (
                      j.campaign_id IS NULL
                      OR (
                          c.status = 'active'
                          AND ($1 AT TIME ZONE COALESCE(
                                  CASE WHEN c.use_campaign_timezone THEN NULLIF(c.timezone, '') END,
                                  NULLIF(u.timezone, ''),
                                  $3
                              ))::time
                              BETWEEN c.first_call_time AND c.last_call_time
                      )
                  )
                ORDER BY j.created_at
                LIMIT $2
                FOR UPDATE OF j SKIP LOCKED
            )
            RETURNING {}
            "#,
            call_job_queries::SELECT_ALL_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .bind(default_timezone)
        .fetch_all(self.pool.pool())
        .await?;

        if !jobs.is_empty() {
            tracing::info!(claimed = jobs.len(), "Claimed ready call jobs");
        }
        Ok(jobs)
    }

    /// Mark a dispatched job as completed
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, job_id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE call_jobs SET status = 'completed', updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Call job not found: {}",
                job_id
            )));
        }
        Ok(())
    }

    /// Mark a dispatched job as failed, recording the error
    #[instrument(skip(self, error))]
    pub async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE call_jobs
            SET status = 'failed',
                attempts = attempts + 1,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Call job not found: {}",
                job_id
            )));
        }
        Ok(())
    }
}
