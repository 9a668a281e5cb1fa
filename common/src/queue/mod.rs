// Call queue drain module

pub mod processor;

pub use processor::{CallQueueStore, DrainProcessor};
