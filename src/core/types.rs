//! Shared types used across quillmind modules
//!
//! Chat messages and the provider identifiers the engine selects between.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique id, stable across streaming updates
    pub id: Uuid,
    /// Role of the message sender
    pub role: Role,
    /// Content of the message (grows while streaming)
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// True only while tokens are still being appended
    #[serde(default)]
    pub is_streaming: bool,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_streaming: false,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create an empty assistant message that is about to receive tokens
    pub fn streaming_assistant() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }
}

/// The three chat backends the engine can select between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Locally running Ollama server
    Ollama,
    /// In-process model owned by a worker thread
    Embedded,
    /// Remote OpenAI-compatible API
    Cloud,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Ollama,
        ProviderKind::Embedded,
        ProviderKind::Cloud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::Embedded => "embedded",
            ProviderKind::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            "embedded" | "webllm" | "builtin" => Ok(ProviderKind::Embedded),
            "cloud" | "openai" | "remote" => Ok(ProviderKind::Cloud),
            other => Err(format!(
                "Unknown provider '{}'. Expected one of: ollama, embedded, cloud",
                other
            )),
        }
    }
}
