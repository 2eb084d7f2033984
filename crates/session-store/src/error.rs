//! Error types for credential storage

/// Errors from credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    Parse(String),

    #[error("credential already exists: {0}")]
    Duplicate(String),

    #[error("invalid category {0:?}: expected lowercase letters, digits, '-' or '_'")]
    InvalidCategory(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
