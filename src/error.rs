//! Error types.

use thiserror::Error;

/// Everything that can stand between a selection and its explanation.
///
/// None of these are fatal; each one ends up as a message in the popup.
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("API key not configured. Please set it in the extension settings.")]
    Configuration,

    #[error("Invalid API key. Please check your settings.")]
    Auth,

    #[error("API key does not have proper permissions.")]
    Permission,

    #[error("API rate limit exceeded. Please try again later.")]
    RateLimit,

    #[error("Network error. Please check your connection.")]
    Network(#[source] reqwest::Error),

    #[error("Failed to get explanation.")]
    Protocol(String),

    #[error("Failed to get explanation.")]
    Api(u16),

    #[error("Extension was reloaded. Please refresh the page.")]
    ContextInvalidated,
}

impl ExplainError {
    /// Maps a non-success HTTP status from the generation service.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 401 => ExplainError::Auth,
            403 => ExplainError::Permission,
            429 => ExplainError::RateLimit,
            other => ExplainError::Api(other),
        }
    }

    /// Text shown to the user in the popup.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no home directory")]
    NoHome,

    #[error("{0}")]
    Other(String),
}
