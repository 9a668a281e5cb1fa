// Wake planning
//
// Pure calculation of when the scheduler should next wake up. The engine
// owns the single timer; this module only answers "given these windows and
// this instant, when is the earliest moment any campaign could have work".

use crate::errors::ClockError;
use crate::models::CampaignWindow;
use crate::scheduler::clock::{local_time_of_day, next_occurrence};
use chrono::{DateTime, NaiveTime, Utc};
use tracing::warn;

/// Whether `local` falls inside a calling window.
///
/// Both boundaries are inclusive: a window of 10:00 to 19:00 is open at
/// exactly 10:00:00 and still open at exactly 19:00:00.
pub fn window_contains(local: NaiveTime, first: NaiveTime, last: NaiveTime) -> bool {
    local >= first && local <= last
}

/// Earliest useful wake instant for one campaign.
///
/// Inside the window this is `now`, unless every queued job is deferred to a
/// future `next_scheduled_at`, in which case it is that instant. Outside the
/// window it is the next occurrence of `first_call_time`: later today if the
/// opening is still ahead, otherwise tomorrow.
pub fn next_wake_for(
    window: &CampaignWindow,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ClockError> {
    let local = local_time_of_day(now, &window.timezone)?;

    if window_contains(local, window.first_call_time, window.last_call_time) {
        if let Some(scheduled) = window.next_scheduled_at {
            if scheduled > now {
                return Ok(scheduled);
            }
        }
        return Ok(now);
    }

    next_occurrence(&window.timezone, window.first_call_time, now, false)
}

/// Global earliest wake across all registered windows.
///
/// Returns `None` when the registry is empty, which is the scheduler's
/// signal to go fully idle. Windows whose wake cannot be computed are
/// skipped so one bad campaign never blinds the planner to the rest.
pub fn plan_next_wake<'a, I>(windows: I, now: DateTime<Utc>) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = &'a CampaignWindow>,
{
    let mut earliest: Option<DateTime<Utc>> = None;

    for window in windows {
        match next_wake_for(window, now) {
            Ok(wake) => {
                if earliest.map_or(true, |e| wake < e) {
                    earliest = Some(wake);
                }
            }
            Err(e) => {
                warn!(
                    campaign_id = %window.campaign_id,
                    timezone = %window.timezone,
                    error = %e,
                    "Skipping campaign in wake planning"
                );
            }
        }
    }

    earliest
}
