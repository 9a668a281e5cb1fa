// Campaign window registry
//
// In-memory view of every campaign the scheduler may need to wake up for.
// The registry is rebuilt wholesale on every reload; nothing mutates
// individual entries in place, which keeps reload reasoning simple and makes
// a missed database notification at worst a one-reload delay.

use crate::models::{CampaignScheduleRow, CampaignStatus, CampaignWindow};
use crate::scheduler::clock::parse_timezone;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Registry of campaign calling windows keyed by campaign id
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: HashMap<Uuid, CampaignWindow>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire registry contents with a freshly built set.
    pub fn replace_all(&mut self, windows: Vec<CampaignWindow>) {
        self.windows = windows
            .into_iter()
            .map(|w| (w.campaign_id, w))
            .collect();
    }

    pub fn get(&self, campaign_id: &Uuid) -> Option<&CampaignWindow> {
        self.windows.get(campaign_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CampaignWindow> {
        self.windows.values()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Resolve the effective timezone for a campaign row.
///
/// Precedence: the campaign's own timezone when the override flag is set,
/// then the owning user's timezone, then the configured default.
pub fn resolve_timezone(row: &CampaignScheduleRow, default_timezone: &str) -> String {
    if row.use_campaign_timezone {
        if let Some(tz) = row
            .campaign_timezone
            .as_deref()
            .filter(|tz| !tz.is_empty())
        {
            return tz.to_string();
        }
    }

    if let Some(tz) = row.user_timezone.as_deref().filter(|tz| !tz.is_empty()) {
        return tz.to_string();
    }

    default_timezone.to_string()
}

/// Build registry entries from reload query rows.
///
/// Rows that cannot produce a usable window are skipped with a warning
/// rather than failing the whole reload: one campaign with a corrupt
/// timezone must not stop every other campaign from being scheduled.
pub fn build_windows(
    rows: Vec<CampaignScheduleRow>,
    default_timezone: &str,
) -> Vec<CampaignWindow> {
    let mut windows = Vec::with_capacity(rows.len());

    for row in rows {
        if row.status != CampaignStatus::Active {
            warn!(
                campaign_id = %row.campaign_id,
                status = %row.status,
                "Skipping non-active campaign in reload result"
            );
            continue;
        }

        if row.queued_count <= 0 {
            warn!(
                campaign_id = %row.campaign_id,
                "Skipping campaign with no queued jobs in reload result"
            );
            continue;
        }

        let timezone = resolve_timezone(&row, default_timezone);
        if let Err(e) = parse_timezone(&timezone) {
            warn!(
                campaign_id = %row.campaign_id,
                timezone = %timezone,
                error = %e,
                "Skipping campaign with unresolvable timezone"
            );
            continue;
        }

        if row.first_call_time > row.last_call_time {
            // An inverted window never tests as open; surface it instead of
            // silently scheduling wakes that do nothing.
            warn!(
                campaign_id = %row.campaign_id,
                first_call_time = %row.first_call_time,
                last_call_time = %row.last_call_time,
                "Campaign window ends before it starts"
            );
        }

        windows.push(CampaignWindow {
            campaign_id: row.campaign_id,
            user_id: row.user_id,
            first_call_time: row.first_call_time,
            last_call_time: row.last_call_time,
            timezone,
            queued_count: row.queued_count,
            next_scheduled_at: row.next_scheduled_at,
        });
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CampaignStatus;
    use chrono::NaiveTime;

    fn row(queued_count: i64) -> CampaignScheduleRow {
        CampaignScheduleRow {
            campaign_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: CampaignStatus::Active,
            first_call_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            last_call_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            campaign_timezone: None,
            use_campaign_timezone: false,
            user_timezone: Some("America/Chicago".to_string()),
            queued_count,
            next_scheduled_at: None,
        }
    }

    #[test]
    fn test_resolve_timezone_campaign_override_wins() {
        let mut r = row(5);
        r.campaign_timezone = Some("Europe/Berlin".to_string());
        r.use_campaign_timezone = true;
        assert_eq!(resolve_timezone(&r, "America/New_York"), "Europe/Berlin");
    }

    #[test]
    fn test_resolve_timezone_override_flag_off_uses_user() {
        let mut r = row(5);
        r.campaign_timezone = Some("Europe/Berlin".to_string());
        r.use_campaign_timezone = false;
        assert_eq!(resolve_timezone(&r, "America/New_York"), "America/Chicago");
    }

    #[test]
    fn test_resolve_timezone_empty_override_falls_through() {
        let mut r = row(5);
        r.campaign_timezone = Some(String::new());
        r.use_campaign_timezone = true;
        assert_eq!(resolve_timezone(&r, "America/New_York"), "America/Chicago");
    }

    #[test]
    fn test_resolve_timezone_default_when_nothing_set() {
        let mut r = row(5);
        r.user_timezone = None;
        assert_eq!(resolve_timezone(&r, "America/New_York"), "America/New_York");
    }

    #[test]
    fn test_build_windows_drops_zero_queued() {
        let windows = build_windows(vec![row(0), row(3)], "America/New_York");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].queued_count, 3);
    }

    #[test]
    fn test_build_windows_drops_non_active_campaign() {
        let mut paused = row(5);
        paused.status = CampaignStatus::Paused;
        let windows = build_windows(vec![paused, row(2)], "America/New_York");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].queued_count, 2);
    }

    #[test]
    fn test_build_windows_drops_bad_timezone() {
        let mut bad = row(2);
        bad.user_timezone = Some("Not/AZone".to_string());
        let windows = build_windows(vec![bad, row(1)], "America/New_York");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].timezone, "America/Chicago");
    }

    #[test]
    fn test_build_windows_keeps_inverted_window() {
        let mut inverted = row(4);
        inverted.first_call_time = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        inverted.last_call_time = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let windows = build_windows(vec![inverted], "America/New_York");
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn test_replace_all_is_wholesale() {
        let mut registry = WindowRegistry::new();
        let first = build_windows(vec![row(1), row(1)], "America/New_York");
        let stale_id = first[0].campaign_id;
        registry.replace_all(first);
        assert_eq!(registry.len(), 2);

        let second = build_windows(vec![row(7)], "America/New_York");
        registry.replace_all(second);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&stale_id).is_none());
    }
}
