//! Custom error types for quillmind
//!
//! One error enum shared by the provider clients, the engine and the chat session.

use thiserror::Error;

/// Main error type for quillmind operations
#[derive(Error, Debug)]
pub enum QuillError {
    /// Ollama connection or API errors
    #[error("Ollama error: {0}")]
    Ollama(String),

    /// OpenAI-compatible cloud API errors
    #[error("Cloud API error: {0}")]
    Cloud(String),

    /// Embedded model worker errors
    #[error("Embedded engine error: {0}")]
    Embedded(String),

    /// Configuration and settings persistence errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider was asked to generate before it finished initializing
    #[error("Provider '{0}' is not ready")]
    NotReady(String),

    /// No provider could be brought up
    #[error("No chat provider available: {0}")]
    NoProvider(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed
    #[error("Settings parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Settings could not be serialized
    #[error("Settings serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Model not available
    #[error("Model '{0}' not available in Ollama. Run: ollama pull {0}")]
    ModelNotFound(String),

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for quillmind operations
pub type Result<T> = std::result::Result<T, QuillError>;

impl QuillError {
    /// Create an Ollama error
    pub fn ollama(msg: impl Into<String>) -> Self {
        Self::Ollama(msg.into())
    }

    /// Create a cloud API error
    pub fn cloud(msg: impl Into<String>) -> Self {
        Self::Cloud(msg.into())
    }

    /// Create an embedded engine error
    pub fn embedded(msg: impl Into<String>) -> Self {
        Self::Embedded(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
