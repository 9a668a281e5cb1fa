// User activity tracking
//
// Keeps a sliding-expiry set of recently active users. Each mark replaces
// the user's expiry timer, so a user stays active as long as their marks
// arrive closer together than the timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

pub struct ActivityTracker {
    inner: Arc<ActivityInner>,
}

struct ActivityInner {
    timeout: Duration,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl ActivityTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                timeout,
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Record activity for a user, resetting their expiry timer.
    pub async fn mark_active(&self, user_id: Uuid) {
        let mut timers = self.inner.timers.lock().await;

        if let Some(existing) = timers.remove(&user_id) {
            existing.abort();
        }

        // Fix the deadline at mark time; the spawned task may not get its
        // first poll until later.
        let deadline = tokio::time::Instant::now() + self.inner.timeout;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.timers.lock().await.remove(&user_id);
            debug!(user_id = %user_id, "User activity expired");
        });

        timers.insert(user_id, handle);
    }

    pub async fn is_active(&self, user_id: Uuid) -> bool {
        self.inner.timers.lock().await.contains_key(&user_id)
    }

    pub async fn is_anyone_active(&self) -> bool {
        !self.inner.timers.lock().await.is_empty()
    }

    /// Number of users seen within the sliding window.
    pub async fn active_count(&self) -> usize {
        self.inner.timers.lock().await.len()
    }

    /// Abort all pending expiry timers.
    pub async fn shutdown(&self) {
        let mut timers = self.inner.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
