// Campaign repository implementation

use super::queries::campaign_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::CampaignScheduleRow;
use sqlx::Row;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// Repository for campaign-related database operations
pub struct CampaignRepository {
    pool: DbPool,
}

impl CampaignRepository {
    /// Create a new CampaignRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// List every active campaign that still has queued call jobs, together
    /// with the timezone fields needed to resolve its calling window.
    #[instrument(skip(self))]
    pub async fn list_schedulable(&self) -> Result<Vec<CampaignScheduleRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, CampaignScheduleRow>(campaign_queries::SELECT_SCHEDULABLE)
            .fetch_all(self.pool.pool())
            .await?;

        tracing::debug!(count = rows.len(), "Loaded schedulable campaigns");
        Ok(rows)
    }

    /// Count still-queued jobs per campaign for the given campaign ids.
    /// Campaigns with no queued jobs are absent from the result map.
    #[instrument(skip(self, campaign_ids), fields(campaigns = campaign_ids.len()))]
    pub async fn queued_counts(
        &self,
        campaign_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, i64>, DatabaseError> {
        if campaign_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT campaign_id, COUNT(*) AS queued_count
            FROM call_jobs
            WHERE campaign_id = ANY($1) AND status = 'queued'
            GROUP BY campaign_id
            "#,
        )
        .bind(campaign_ids)
        .fetch_all(self.pool.pool())
        .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let campaign_id: Uuid = row.try_get("campaign_id")?;
            let queued_count: i64 = row.try_get("queued_count")?;
            counts.insert(campaign_id, queued_count);
        }

        Ok(counts)
    }
}
