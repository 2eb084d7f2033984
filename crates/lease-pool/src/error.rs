//! Error types for pool operations

/// Errors from pool and scheduler operations.
///
/// "No credential available" is not an error: `Pool::acquire` returns
/// `Ok(None)` for it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown credential: {0}")]
    UnknownCredential(String),

    /// A credential selected for leasing was already leased. Indicates a
    /// broken locking discipline; never retried.
    #[error("allocation conflict: credential {0} is already leased")]
    AllocationConflict(String),

    #[error("no scheduler worker for category: {0}")]
    UnknownCategory(String),

    #[error("scheduler is shut down")]
    SchedulerClosed,

    #[error("credential store error: {0}")]
    Store(#[from] session_store::Error),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
