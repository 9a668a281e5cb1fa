// Repository layer for database operations

pub mod call_queue;
pub mod campaign;
pub mod queries;

pub use call_queue::CallQueueRepository;
pub use campaign::CampaignRepository;
