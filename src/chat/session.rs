//! Chat session
//!
//! Owns the message list and routes one generation at a time to the active
//! provider. Tokens are written into the streaming assistant message in
//! arrival order; abort goes to the provider that started the generation.

use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::{ChatMessage, ProviderKind};
use crate::engine::EngineContext;
use crate::llm::{ChatProvider, Finish, TokenSink};

use super::history::MessageLog;

/// Why a send did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No provider is ready
    NotReady,
    /// Blank input
    Empty,
    /// A generation is already running
    Busy,
}

/// What happened to a `send_message` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was sent and the message list is unchanged
    Ignored(IgnoreReason),
    Completed,
    /// Stopped by the user; the partial reply is kept
    Aborted,
    /// The provider failed; the error is appended to the reply
    Failed(String),
}

struct InFlight {
    provider: Arc<dyn ChatProvider>,
    kind: ProviderKind,
    message_id: Uuid,
    handle: AbortHandle,
}

pub struct ChatSession {
    ctx: Arc<EngineContext>,
    log: Mutex<MessageLog>,
    busy: AtomicBool,
    abort_requested: AtomicBool,
    in_flight: Mutex<Option<InFlight>>,
}

/// Restores the idle state when a generation ends or its future is dropped
struct FlightGuard<'a> {
    session: &'a ChatSession,
    message_id: Uuid,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.session.in_flight.lock().take();
        self.session.log.lock().finish(self.message_id);
        self.session.busy.store(false, Ordering::SeqCst);
    }
}

impl ChatSession {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let chat = ctx.settings().snapshot().chat;
        Self {
            ctx,
            log: Mutex::new(MessageLog::new(chat.system_prompt)),
            busy: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            in_flight: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Copy of the message list
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.log.lock().messages().to_vec()
    }

    pub fn is_generating(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn set_system_prompt(&self, prompt: Option<String>) {
        self.log.lock().set_system_prompt(prompt);
    }

    /// Send `text` to the active provider and stream the reply.
    ///
    /// `on_token` sees every token that lands in the reply, in order.
    pub async fn send_message(&self, text: &str, on_token: &TokenSink<'_>) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored(IgnoreReason::Empty);
        }
        let Some(active) = self.ctx.ready_provider() else {
            tracing::debug!("Send ignored, engine not ready");
            return SendOutcome::Ignored(IgnoreReason::NotReady);
        };
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Send ignored, generation in flight");
            return SendOutcome::Ignored(IgnoreReason::Busy);
        }
        self.abort_requested.store(false, Ordering::SeqCst);

        // The window can change between sends
        let window = self.ctx.settings().snapshot().chat.context_window.max(1);
        let (history, message_id) = {
            let mut log = self.log.lock();
            log.push(ChatMessage::user(text));
            let history = log.context_window(window);
            let id = log.push(ChatMessage::streaming_assistant());
            (history, id)
        };
        let _guard = FlightGuard {
            session: self,
            message_id,
        };

        let (handle, registration) = AbortHandle::new_pair();
        *self.in_flight.lock() = Some(InFlight {
            provider: Arc::clone(&active.provider),
            kind: active.kind,
            message_id,
            handle,
        });

        tracing::debug!(provider = %active.kind, model = %active.model, messages = history.len(), "Sending chat");

        let sink = |token: &str| {
            if self.log.lock().append_token(message_id, token) {
                on_token(token);
            }
        };
        let result = Abortable::new(
            active.provider.stream_chat(&active.model, &history, &sink),
            registration,
        )
        .await;

        let aborted = self.abort_requested.load(Ordering::SeqCst);
        match result {
            Ok(Ok(outcome)) if outcome.finish == Finish::Aborted || aborted => SendOutcome::Aborted,
            Ok(Ok(_)) => SendOutcome::Completed,
            Ok(Err(e)) if aborted => {
                tracing::debug!(error = %e, "Provider error after abort");
                SendOutcome::Aborted
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = %active.kind, error = %e, "Generation failed");
                self.log
                    .lock()
                    .append_note(message_id, &format!("[Error: {}]", e));
                SendOutcome::Failed(e.to_string())
            }
            Err(_) => SendOutcome::Aborted,
        }
    }

    /// Stop the running generation. Returns false when nothing was running.
    pub fn abort_generation(&self) -> bool {
        let in_flight = self.in_flight.lock();
        let Some(flight) = in_flight.as_ref() else {
            return false;
        };

        tracing::info!(provider = %flight.kind, "Stopping generation");
        self.abort_requested.store(true, Ordering::SeqCst);
        flight.provider.abort();
        flight.handle.abort();
        self.log.lock().finish(flight.message_id);
        true
    }

    /// Regenerate the reply to the last user message
    pub async fn retry(&self, on_token: &TokenSink<'_>) -> SendOutcome {
        if self.is_generating() {
            return SendOutcome::Ignored(IgnoreReason::Busy);
        }
        if self.ctx.ready_provider().is_none() {
            return SendOutcome::Ignored(IgnoreReason::NotReady);
        }
        let last = self.log.lock().truncate_to_last_user();
        let Some(last) = last else {
            return SendOutcome::Ignored(IgnoreReason::Empty);
        };
        self.send_message(&last.content, on_token).await
    }

    /// Drop every message, stopping any running generation first
    pub fn clear(&self) {
        self.abort_generation();
        self.log.lock().clear();
    }
}
