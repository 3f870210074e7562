//! Common error types for moodcast

use thiserror::Error;

/// Common result type for moodcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across moodcast crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse failed: {}", err))
    }
}
