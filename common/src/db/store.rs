// Postgres-backed campaign store for the scheduling engine

use crate::db::repositories::{CallQueueRepository, CampaignRepository};
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::CampaignScheduleRow;
use crate::scheduler::CampaignStore;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Serves the engine's registry reloads and queued-count checks from the
/// campaign and call queue tables.
pub struct PostgresCampaignStore {
    campaigns: CampaignRepository,
    call_queue: CallQueueRepository,
}

impl PostgresCampaignStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            call_queue: CallQueueRepository::new(pool),
        }
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    async fn count_direct_queued(&self) -> Result<i64, DatabaseError> {
        self.call_queue.count_direct_queued().await
    }

    async fn list_schedulable_campaigns(&self) -> Result<Vec<CampaignScheduleRow>, DatabaseError> {
        self.campaigns.list_schedulable().await
    }

    async fn queued_counts(
        &self,
        campaign_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, i64>, DatabaseError> {
        self.campaigns.queued_counts(campaign_ids).await
    }
}
