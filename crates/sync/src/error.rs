use thiserror::Error;

/// Error types for synchronization primitives.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// Semaphore count would exceed its maximum.
    #[error("semaphore count overflow")]
    Overflow,
}

pub type SyncResult<T> = Result<T, SyncError>;
