//! Configuration loading errors

use thiserror::Error;

/// Errors raised while reading and validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a validation failure on a named config field.
    pub fn invalid(field: &str, reason: impl std::fmt::Display) -> Self {
        Error::Config(format!("{field} {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_names_the_field() {
        let err = Error::invalid("pool.categories", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Configuration error: pool.categories must not be empty"
        );
    }

    #[test]
    fn io_error_converts() {
        let io_err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found").into();
        assert!(
            io_err.to_string().starts_with("I/O error:"),
            "got: {io_err}"
        );
    }
}
