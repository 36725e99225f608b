use miqat_scheduler::SchedulerError;

use crate::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("schedule fetch failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("state store error: {0}")]
    Store(#[from] SchedulerError),

    #[error("local clock out of range")]
    ClockRange,
}

pub type Result<T> = std::result::Result<T, SyncError>;
