// Scheduling core: window registry, wake planning, and the timer engine

pub mod activity;
pub mod clock;
pub mod engine;
pub mod planner;
pub mod registry;

pub use activity::ActivityTracker;
pub use clock::{Clock, SystemClock};
pub use engine::{continuous_interval_after, CampaignScheduler, CampaignStore, CallQueueProcessor};
pub use registry::WindowRegistry;
