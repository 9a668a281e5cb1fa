// Common library shared between the scheduler service and its tests

pub mod config;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod telemetry;
