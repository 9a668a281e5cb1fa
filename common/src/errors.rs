// Error types for the scheduler platform

use thiserror::Error;

/// Timezone and local-time resolution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Local time {datetime} does not exist in timezone {timezone}")]
    NonexistentLocalTime { timezone: String, datetime: String },

    #[error("Date arithmetic out of range in timezone {0}")]
    DateOutOfRange(String),
}

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => return DatabaseError::DuplicateKey(db_err.to_string()),
                        "23503" => return DatabaseError::ForeignKeyViolation(db_err.to_string()),
                        _ => {}
                    }
                }
                DatabaseError::QueryFailed(err.to_string())
            }
            sqlx::Error::PoolTimedOut => DatabaseError::ConnectionFailed(err.to_string()),
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Call queue drain errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to claim queued jobs: {0}")]
    ClaimFailed(String),

    #[error("Failed to update job status: {0}")]
    UpdateFailed(String),

    #[error("Drain cycle failed: {0}")]
    DrainFailed(String),
}

impl From<DatabaseError> for QueueError {
    fn from(err: DatabaseError) -> Self {
        QueueError::DrainFailed(err.to_string())
    }
}

/// Outbound call dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatch request failed: {0}")]
    RequestFailed(String),

    #[error("Dispatch rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Dispatch timed out after {0}ms")]
    Timeout(u64),
}
