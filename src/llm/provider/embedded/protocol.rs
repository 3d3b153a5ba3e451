//! Messages exchanged with the embedded model worker
//!
//! Serialized as `{"type": ..., "payload": ...}` so the same shapes can cross a
//! process or IPC boundary if the worker is ever moved out of process.

use serde::{Deserialize, Serialize};

use crate::core::ChatMessage;

/// Host → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum WorkerRequest {
    /// Load (or confirm) a model
    Init { model_id: String },
    /// Generate a reply to the given history
    Chat {
        request_id: u64,
        messages: Vec<ChatMessage>,
    },
    /// Stop the running generation
    Abort,
}

/// Worker → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum WorkerEvent {
    /// Load progress as a fraction in 0.0..=1.0
    Progress { progress: f32, text: String },
    /// One piece of generated text
    Token { request_id: u64, text: String },
    /// Generation finished (also sent after an abort)
    Complete { request_id: u64 },
    /// `request_id` is `None` for load failures
    Error {
        request_id: Option<u64>,
        message: String,
    },
    /// Model loaded and ready to chat
    Ready { model_id: String },
}
