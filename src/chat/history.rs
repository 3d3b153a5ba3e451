//! Chat message log
//!
//! Holds every message shown to the user. Only the most recent messages,
//! prefixed by the system prompt, are sent to the provider. Error notes are
//! shown to the user but never sent back.

use std::collections::HashMap;
use uuid::Uuid;

use crate::core::{ChatMessage, Role};

#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    /// System prompt (always first in the provider context)
    system_prompt: Option<String>,
    /// Byte length of the model-written text in messages that carry a note
    note_offsets: HashMap<Uuid, usize>,
}

impl MessageLog {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: system_prompt.filter(|p| !p.trim().is_empty()),
            note_offsets: HashMap::new(),
        }
    }

    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn push(&mut self, message: ChatMessage) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Append streamed text; ignored once the message is frozen
    pub fn append_token(&mut self, id: Uuid, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) if message.is_streaming => {
                message.content.push_str(text);
                true
            }
            _ => false,
        }
    }

    /// Append a note to a message regardless of its streaming state
    pub fn append_note(&mut self, id: Uuid, note: &str) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            self.note_offsets
                .entry(id)
                .or_insert_with(|| message.content.len());
            if !message.content.is_empty() {
                message.content.push_str("\n\n");
            }
            message.content.push_str(note);
        }
    }

    /// Freeze a streaming message. Returns false if it was already frozen.
    pub fn finish(&mut self, id: Uuid) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) if message.is_streaming => {
                message.is_streaming = false;
                true
            }
            _ => false,
        }
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }

    /// Messages for the provider: system prompt + the last `window` messages,
    /// excluding any message still being streamed. Error notes are cut off and
    /// a reply left empty by that is dropped.
    pub fn context_window(&self, window: usize) -> Vec<ChatMessage> {
        let mut result = Vec::new();

        if let Some(ref prompt) = self.system_prompt {
            result.push(ChatMessage::system(prompt.clone()));
        }

        let settled: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| !m.is_streaming && m.role != Role::System)
            .filter_map(|m| self.without_note(m))
            .collect();
        let start = settled.len().saturating_sub(window);
        result.extend(settled.into_iter().skip(start));

        result
    }

    fn without_note(&self, message: &ChatMessage) -> Option<ChatMessage> {
        let Some(&offset) = self.note_offsets.get(&message.id) else {
            return Some(message.clone());
        };
        let content = message.content.get(..offset).unwrap_or_default().trim_end();
        if content.is_empty() {
            return None;
        }
        let mut message = message.clone();
        message.content = content.to_string();
        Some(message)
    }

    /// The last user message, for regenerating a reply
    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Drop trailing messages up to and including the last user message
    pub fn truncate_to_last_user(&mut self) -> Option<ChatMessage> {
        let index = self.messages.iter().rposition(|m| m.role == Role::User)?;
        let user = self.messages[index].clone();
        self.messages.truncate(index);
        let kept: Vec<Uuid> = self.messages.iter().map(|m| m.id).collect();
        self.note_offsets.retain(|id, _| kept.contains(id));
        Some(user)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.note_offsets.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(None)
    }
}
