// Scheduling engine implementation
//
// Event-driven duty cycle around a single armed timer. The engine sleeps
// until the earliest instant any campaign window could have work, drains the
// call queue when woken, and re-arms based on what it finds. It never polls
// on a fixed interval while idle.

use crate::config::SchedulerSettings;
use crate::errors::{DatabaseError, QueueError};
use crate::models::{SchedulerState, SchedulerStatus};
use crate::scheduler::activity::ActivityTracker;
use crate::scheduler::clock::{local_time_of_day, Clock};
use crate::scheduler::planner::{plan_next_wake, window_contains};
use crate::scheduler::registry::{build_windows, WindowRegistry};
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Consecutive drain failures before the engine escalates its logging.
const DRAIN_FAILURE_ALERT_THRESHOLD: u32 = 3;

/// Read access to campaign and queue state as the engine needs to see it.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Number of queued jobs with no campaign attached.
    async fn count_direct_queued(&self) -> Result<i64, DatabaseError>;

    /// Active campaigns with queued work, including timezone fields.
    async fn list_schedulable_campaigns(
        &self,
    ) -> Result<Vec<crate::models::CampaignScheduleRow>, DatabaseError>;

    /// Current queued counts for the given campaigns.
    async fn queued_counts(
        &self,
        campaign_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, i64>, DatabaseError>;
}

/// Collaborator that performs one drain of the ready call queue.
#[async_trait]
pub trait CallQueueProcessor: Send + Sync {
    /// Claim and dispatch every ready job, returning how many were processed.
    async fn drain_ready_jobs(&self) -> Result<u64, QueueError>;
}

/// Releases the single-flight drain flag even if the drain panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Timer slot and state shared under one lock. Held only for short
/// synchronous sections, never across an await.
struct EngineCore {
    state: SchedulerState,
    wake_at: Option<DateTime<Utc>>,
    timer: Option<JoinHandle<()>>,
    /// Incremented on every arm and cancel; a wake task whose epoch no
    /// longer matches was superseded and must do nothing.
    timer_epoch: u64,
    last_reload_at: Option<DateTime<Utc>>,
    consecutive_drain_failures: u32,
}

struct EngineInner {
    config: SchedulerSettings,
    clock: Arc<dyn Clock>,
    store: Arc<dyn CampaignStore>,
    processor: Arc<dyn CallQueueProcessor>,
    registry: tokio::sync::RwLock<WindowRegistry>,
    core: tokio::sync::Mutex<EngineCore>,
    drain_in_flight: AtomicBool,
    /// Set once at shutdown; wake and drain paths observing it stand down.
    stopped: AtomicBool,
    timers_armed: AtomicU64,
    timers_cancelled: AtomicU64,
    activity: ActivityTracker,
}

/// Campaign call scheduler.
///
/// Cheap to clone; all clones share the same engine state.
#[derive(Clone)]
pub struct CampaignScheduler {
    inner: Arc<EngineInner>,
}

impl CampaignScheduler {
    pub fn new(
        config: SchedulerSettings,
        clock: Arc<dyn Clock>,
        store: Arc<dyn CampaignStore>,
        processor: Arc<dyn CallQueueProcessor>,
    ) -> Self {
        let activity = ActivityTracker::new(config.activity_timeout());

        Self {
            inner: Arc::new(EngineInner {
                config,
                clock,
                store,
                processor,
                registry: tokio::sync::RwLock::new(WindowRegistry::new()),
                core: tokio::sync::Mutex::new(EngineCore {
                    state: SchedulerState::Idle,
                    wake_at: None,
                    timer: None,
                    timer_epoch: 0,
                    last_reload_at: None,
                    consecutive_drain_failures: 0,
                }),
                drain_in_flight: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                timers_armed: AtomicU64::new(0),
                timers_cancelled: AtomicU64::new(0),
                activity,
            }),
        }
    }

    /// Load the registry and arm the first timer.
    ///
    /// Unlike the running loop, startup propagates database errors: a
    /// scheduler that cannot see its campaigns should not come up.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), DatabaseError> {
        info!("Initializing campaign scheduler");

        let direct_work = self.inner.reload_registry().await?;
        if direct_work {
            spawn_drain(&self.inner, "startup direct jobs");
        }
        Arc::clone(&self.inner).plan_and_arm().await;

        Ok(())
    }

    /// React to a campaign being created, updated, paused, or deleted.
    ///
    /// The pending wake is cancelled, the registry rebuilt from scratch, and
    /// the timer re-planned. If the changed campaign's window is open right
    /// now, a drain is kicked off immediately rather than waiting for the
    /// next planned wake.
    #[instrument(skip(self))]
    pub async fn on_campaign_change(&self, campaign_id: Option<Uuid>) {
        info!(campaign_id = ?campaign_id, "Campaign change notification");

        self.inner.cancel_timer().await;
        Arc::clone(&self.inner).reload_and_plan().await;

        if let Some(id) = campaign_id {
            if self.inner.window_open_now(id).await {
                spawn_drain(&self.inner, "changed campaign window open");
            }
        }
    }

    /// React to a user queueing a call directly, outside any campaign.
    ///
    /// Direct calls bypass window planning entirely: the pending wake is
    /// cancelled and a drain runs immediately. If a drain is already in
    /// flight this coalesces into it.
    #[instrument(skip(self))]
    pub async fn on_direct_call_queued(&self, user_id: Uuid) {
        debug!(user_id = %user_id, "Direct call queued");

        self.inner.activity.mark_active(user_id).await;
        self.inner.cancel_timer().await;
        Arc::clone(&self.inner).drain_cycle("direct call queued").await;
    }

    /// Record dashboard activity for a user without touching the timer.
    pub async fn on_user_activity(&self, user_id: Uuid) {
        self.inner.activity.mark_active(user_id).await;
    }

    /// Rebuild the registry and re-plan the wake. Used by periodic
    /// reconciliation and exposed for embedders that watch external change
    /// feeds.
    pub async fn reload_and_plan(&self) {
        self.inner.cancel_timer().await;
        Arc::clone(&self.inner).reload_and_plan().await;
    }

    /// Point-in-time snapshot for the dashboard.
    pub async fn status(&self) -> SchedulerStatus {
        let registry_size = self.inner.registry.read().await.len();
        let active_users = self.inner.activity.active_count().await;
        let core = self.inner.core.lock().await;

        SchedulerStatus {
            state: core.state,
            next_wake_at: core.wake_at,
            registry_size,
            drain_in_flight: self.inner.drain_in_flight.load(Ordering::SeqCst),
            active_users,
            last_reload_at: core.last_reload_at,
            timers_armed: self.inner.timers_armed.load(Ordering::Relaxed),
            timers_cancelled: self.inner.timers_cancelled.load(Ordering::Relaxed),
        }
    }

    /// Stop the engine: cancel the pending wake and all activity timers and
    /// drop the registry contents. A drain already in flight finishes its
    /// batch but will not reload or re-arm afterwards.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Shutting down campaign scheduler");
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.cancel_timer().await;
        self.inner.activity.shutdown().await;
        self.inner.registry.write().await.replace_all(Vec::new());
    }
}

impl EngineInner {
    /// Rebuild the window registry from the store.
    ///
    /// Returns whether direct-queued work was found, so callers can trigger
    /// an immediate drain for jobs that no window will ever cover.
    async fn reload_registry(&self) -> Result<bool, DatabaseError> {
        let direct_queued = self.store.count_direct_queued().await?;
        let rows = self.store.list_schedulable_campaigns().await?;
        let windows = build_windows(rows, &self.config.default_timezone);

        let size = windows.len();
        self.registry.write().await.replace_all(windows);
        telemetry::record_registry_size(size);

        let now = self.clock.now();
        {
            let mut core = self.core.lock().await;
            core.last_reload_at = Some(now);
        }

        debug!(
            registry_size = size,
            direct_queued, "Window registry rebuilt"
        );
        Ok(direct_queued > 0)
    }

    /// Reload the registry and arm the next wake, retrying once and falling
    /// back to a delayed retry timer if the store stays unreachable. The
    /// running engine treats store failures as transient; only startup
    /// propagates them.
    async fn reload_and_plan(self: Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        for attempt in 0..2 {
            match self.reload_registry().await {
                Ok(direct_work) => {
                    if direct_work {
                        spawn_drain(&self, "direct jobs discovered in reload");
                    }
                    self.plan_and_arm().await;
                    return;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Registry reload failed");
                }
            }
        }

        // Both attempts failed; wake again later instead of going dark.
        let retry_at = self.now_plus(self.config.max_continuous_interval());
        warn!(retry_at = %retry_at, "Arming retry timer after failed reload");
        self.arm_timer(retry_at, SchedulerState::ArmedContinuous)
            .await;
    }

    /// Plan the earliest wake across the registry and arm a timer for it.
    /// An empty registry cancels instead: no work anywhere means fully idle.
    async fn plan_and_arm(self: Arc<Self>) {
        let now = self.clock.now();
        let wake = {
            let registry = self.registry.read().await;
            plan_next_wake(registry.iter(), now)
        };

        match wake {
            Some(wake_at) => {
                self.arm_timer(wake_at, SchedulerState::ArmedFuture).await;
            }
            None => {
                self.cancel_timer().await;
                debug!("Registry empty, scheduler idle");
            }
        }
    }

    /// Arm the single wake timer, replacing whatever was armed before.
    ///
    /// Returns a boxed future: the wake path loops back through this
    /// function (wake, drain, re-arm), and the recursive chain of futures
    /// needs one type-erased link in it.
    fn arm_timer(
        self: Arc<Self>,
        wake_at: DateTime<Utc>,
        state: SchedulerState,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let delay = (wake_at - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            // Fix the deadline here, at arm time; the spawned task may not
            // get its first poll until well after.
            let deadline = tokio::time::Instant::now() + delay;

            let mut core = self.core.lock().await;
            core.timer_epoch += 1;
            let epoch = core.timer_epoch;

            if let Some(previous) = core.timer.take() {
                previous.abort();
                self.timers_cancelled.fetch_add(1, Ordering::Relaxed);
            }

            let inner = Arc::clone(&self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                inner.handle_wake(epoch).await;
            });

            core.timer = Some(handle);
            core.wake_at = Some(wake_at);
            core.state = state;
            drop(core);

            self.timers_armed.fetch_add(1, Ordering::Relaxed);
            debug!(wake_at = %wake_at, delay_ms = delay.as_millis() as u64, state = %state, "Timer armed");
        })
    }

    /// Cancel the pending wake, if any.
    async fn cancel_timer(&self) {
        let mut core = self.core.lock().await;
        core.timer_epoch += 1;

        if let Some(handle) = core.timer.take() {
            handle.abort();
            self.timers_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!("Pending timer cancelled");
        }

        core.wake_at = None;
        if core.state != SchedulerState::Processing {
            core.state = SchedulerState::Idle;
        }
    }

    /// Entry point of the timer task once its sleep elapses.
    async fn handle_wake(self: Arc<Self>, epoch: u64) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut core = self.core.lock().await;
            if core.timer_epoch != epoch {
                // A newer arm or cancel superseded this wake while it slept.
                return;
            }
            core.timer = None;
            core.wake_at = None;
        }

        telemetry::record_wake();
        self.drain_cycle("timer fired").await;
    }

    /// Run one drain cycle and decide what comes next.
    ///
    /// Exactly one drain runs at a time; concurrent triggers coalesce into
    /// the in-flight cycle as no-ops. Afterwards, remaining work arms a
    /// short continuous-mode timer whose interval adapts to how slow the
    /// drain was, and an empty queue falls back to full reload and re-plan.
    async fn drain_cycle(self: Arc<Self>, reason: &'static str) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let Some(_guard) = DrainGuard::try_acquire(&self.drain_in_flight) else {
            debug!(reason, "Drain already in flight, coalescing trigger");
            return;
        };

        {
            let mut core = self.core.lock().await;
            core.state = SchedulerState::Processing;
        }

        info!(reason, "Drain cycle starting");
        let started = tokio::time::Instant::now();
        let result = self.processor.drain_ready_jobs().await;
        let elapsed = started.elapsed();
        drop(_guard);

        match result {
            Ok(processed) => {
                telemetry::record_drain(processed, elapsed);
                info!(
                    processed,
                    duration_ms = elapsed.as_millis() as u64,
                    "Drain cycle complete"
                );
                {
                    let mut core = self.core.lock().await;
                    core.consecutive_drain_failures = 0;
                    // Clear Processing; the follow-up below sets the real state.
                    core.state = SchedulerState::Idle;
                }

                if self.stopped.load(Ordering::SeqCst) {
                    debug!("Engine stopped, skipping post-drain planning");
                    return;
                }

                if self.still_busy().await {
                    let interval = continuous_interval_after(elapsed, &self.config);
                    let wake_at = self.now_plus(interval);
                    debug!(
                        interval_ms = interval.as_millis() as u64,
                        "Work remains, staying in continuous mode"
                    );
                    self.arm_timer(wake_at, SchedulerState::ArmedContinuous)
                        .await;
                } else {
                    self.reload_and_plan().await;
                }
            }
            Err(e) => {
                telemetry::record_drain_failure();
                let failures = {
                    let mut core = self.core.lock().await;
                    core.consecutive_drain_failures += 1;
                    core.state = SchedulerState::Idle;
                    core.consecutive_drain_failures
                };
                error!(error = %e, failures, "Drain cycle failed");
                if failures >= DRAIN_FAILURE_ALERT_THRESHOLD {
                    warn!(
                        failures,
                        "Drain has failed repeatedly, queue may be stalled"
                    );
                }
                self.reload_and_plan().await;
            }
        }
    }

    /// Whether any open window still has queued jobs, or direct work exists.
    /// Store errors count as busy so the engine keeps retrying on the paced
    /// continuous interval instead of going idle on bad information.
    async fn still_busy(&self) -> bool {
        let now = self.clock.now();
        let open_ids = self.open_campaign_ids(now).await;

        if !open_ids.is_empty() {
            match self.store.queued_counts(&open_ids).await {
                Ok(counts) => {
                    if counts.values().any(|&count| count > 0) {
                        return true;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to check queued counts, assuming busy");
                    return true;
                }
            }
        }

        match self.store.count_direct_queued().await {
            Ok(count) => count > 0,
            Err(e) => {
                warn!(error = %e, "Failed to check direct queue, assuming busy");
                true
            }
        }
    }

    /// Campaigns whose window contains the current local time.
    async fn open_campaign_ids(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let registry = self.registry.read().await;
        registry
            .iter()
            .filter(|w| match local_time_of_day(now, &w.timezone) {
                Ok(local) => window_contains(local, w.first_call_time, w.last_call_time),
                Err(_) => false,
            })
            .map(|w| w.campaign_id)
            .collect()
    }

    async fn window_open_now(&self, campaign_id: Uuid) -> bool {
        let now = self.clock.now();
        let registry = self.registry.read().await;
        match registry.get(&campaign_id) {
            Some(w) => match local_time_of_day(now, &w.timezone) {
                Ok(local) => window_contains(local, w.first_call_time, w.last_call_time),
                Err(_) => false,
            },
            None => false,
        }
    }

    fn now_plus(&self, interval: Duration) -> DateTime<Utc> {
        let delta = chrono::Duration::from_std(interval).unwrap_or_else(|_| {
            chrono::Duration::milliseconds(self.config.max_continuous_interval_ms as i64)
        });
        self.clock.now() + delta
    }
}

fn spawn_drain(inner: &Arc<EngineInner>, reason: &'static str) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        inner.drain_cycle(reason).await;
    });
}

/// Interval before the next continuous-mode wake, given how long the last
/// drain took. Fast drains use the base interval; slow drains back off in
/// proportion to their own duration, up to a ceiling.
pub fn continuous_interval_after(elapsed: Duration, config: &SchedulerSettings) -> Duration {
    if elapsed < config.slow_drain_threshold() {
        return config.continuous_interval();
    }

    let backed_off =
        Duration::from_millis((elapsed.as_millis() as f64 * config.continuous_backoff_factor) as u64);
    backed_off.min(config.max_continuous_interval())
}
