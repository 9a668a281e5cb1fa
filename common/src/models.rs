// Domain models shared across the scheduler platform

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Campaign Models
// ============================================================================

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(format!("Unknown campaign status: {}", s)),
        }
    }
}

impl TryFrom<String> for CampaignStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One row of the scheduling reload query: an active campaign joined with its
/// queued-job count and the timezone fields needed to resolve its calling
/// window.
#[derive(Debug, Clone, FromRow)]
pub struct CampaignScheduleRow {
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    pub first_call_time: NaiveTime,
    pub last_call_time: NaiveTime,
    pub campaign_timezone: Option<String>,
    pub use_campaign_timezone: bool,
    pub user_timezone: Option<String>,
    pub queued_count: i64,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

/// In-memory registry entry for one campaign that warrants a future wake.
///
/// `first_call_time` and `last_call_time` are wall-clock times in `timezone`.
/// They are deliberately never normalized to UTC: the wall-clock-to-UTC
/// mapping shifts across DST transitions, so the conversion happens at
/// planning time against a concrete date.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignWindow {
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub first_call_time: NaiveTime,
    pub last_call_time: NaiveTime,
    pub timezone: String,
    pub queued_count: i64,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Call Job Models
// ============================================================================

/// Call job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallJobStatus {
    Queued,
    Dispatching,
    Completed,
    Failed,
}

impl std::fmt::Display for CallJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallJobStatus::Queued => write!(f, "queued"),
            CallJobStatus::Dispatching => write!(f, "dispatching"),
            CallJobStatus::Completed => write!(f, "completed"),
            CallJobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CallJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CallJobStatus::Queued),
            "dispatching" => Ok(CallJobStatus::Dispatching),
            "completed" => Ok(CallJobStatus::Completed),
            "failed" => Ok(CallJobStatus::Failed),
            _ => Err(format!("Unknown call job status: {}", s)),
        }
    }
}

impl TryFrom<String> for CallJobStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A queued outbound call, either attached to a campaign or queued directly
/// by a user. Direct jobs have `campaign_id = None` and are drained as soon
/// as the scheduler notices them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CallJob {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub user_id: Uuid,
    pub phone_number: String,
    #[sqlx(try_from = "String")]
    pub status: CallJobStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Scheduler State
// ============================================================================

/// Duty-cycle state of the scheduling engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No queued work anywhere; no timer armed.
    Idle,
    /// A timer is armed for a future window opening.
    ArmedFuture,
    /// Work remains after a drain; a short-interval timer is armed.
    ArmedContinuous,
    /// A drain cycle is running right now.
    Processing,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::ArmedFuture => write!(f, "armed_future"),
            SchedulerState::ArmedContinuous => write!(f, "armed_continuous"),
            SchedulerState::Processing => write!(f, "processing"),
        }
    }
}

/// Point-in-time snapshot of the engine, served to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub next_wake_at: Option<DateTime<Utc>>,
    pub registry_size: usize,
    pub drain_in_flight: bool,
    pub active_users: usize,
    pub last_reload_at: Option<DateTime<Utc>>,
    pub timers_armed: u64,
    pub timers_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_status_round_trip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Active,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Cancelled,
        ] {
            let parsed: CampaignStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_campaign_status_rejects_unknown() {
        let result: Result<CampaignStatus, _> = "archived".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_call_job_status_try_from_string() {
        let status = CallJobStatus::try_from("dispatching".to_string()).unwrap();
        assert_eq!(status, CallJobStatus::Dispatching);
        assert!(CallJobStatus::try_from("unknown".to_string()).is_err());
    }

    #[test]
    fn test_scheduler_state_display() {
        assert_eq!(SchedulerState::ArmedFuture.to_string(), "armed_future");
        assert_eq!(SchedulerState::Idle.to_string(), "idle");
    }
}
