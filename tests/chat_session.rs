//! Chat session behaviour against scripted providers

mod common;

use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{harness, test_settings, Ending, Harness, ScriptedProvider};
use quillmind::chat::{ChatSession, IgnoreReason, SendOutcome};
use quillmind::core::{ProviderKind, Role};

/// Engine settled on Ollama with the given provider script
async fn ready_on_ollama(ollama: ScriptedProvider) -> Harness {
    let h = harness(
        test_settings(),
        ollama.with_models(&["llama3.2:latest"]),
        ScriptedProvider::new(ProviderKind::Embedded),
        ScriptedProvider::new(ProviderKind::Cloud),
    );
    h.ctx.start().await;
    h
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_reply_is_concatenation_of_tokens() {
    let h = ready_on_ollama(
        ScriptedProvider::new(ProviderKind::Ollama).with_tokens(&["The ", "quick ", "brown ", "fox"]),
    )
    .await;
    let session = ChatSession::new(h.ctx.clone());

    let delivered = Mutex::new(Vec::new());
    let sink = |t: &str| delivered.lock().push(t.to_string());
    let outcome = session.send_message("Tell me something", &sink).await;

    assert_eq!(outcome, SendOutcome::Completed);
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Tell me something");
    assert_eq!(messages[1].role, Role::Assistant);
    assert!(!messages[1].is_streaming);
    assert_eq!(messages[1].content, delivered.lock().concat());
    assert_eq!(messages[1].content, "The quick brown fox");
}

#[tokio::test]
async fn test_abort_leaves_one_frozen_reply_without_error() {
    let h = ready_on_ollama(
        ScriptedProvider::new(ProviderKind::Ollama)
            .with_tokens(&["partial ", "answer"])
            .ending(Ending::Hang),
    )
    .await;
    let session = Arc::new(ChatSession::new(h.ctx.clone()));

    let task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.send_message("Explain", &|_: &str| {}).await })
    };

    wait_for(|| {
        session
            .messages()
            .last()
            .map(|m| m.content == "partial answer")
            .unwrap_or(false)
    })
    .await;
    assert!(session.is_generating());

    assert!(session.abort_generation());
    let outcome = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome, SendOutcome::Aborted);
    let replies: Vec<_> = session
        .messages()
        .into_iter()
        .filter(|m| m.role == Role::Assistant)
        .collect();
    assert_eq!(replies.len(), 1);
    assert!(!replies[0].is_streaming);
    assert_eq!(replies[0].content, "partial answer");
    assert!(!replies[0].content.contains("Error"));
    assert_eq!(h.ollama.abort_calls.load(Ordering::SeqCst), 1);
    assert!(!session.is_generating());
}

#[tokio::test]
async fn test_abort_with_nothing_running_is_noop() {
    let h = ready_on_ollama(ScriptedProvider::new(ProviderKind::Ollama)).await;
    let session = ChatSession::new(h.ctx.clone());

    assert!(!session.abort_generation());
    assert_eq!(h.ollama.abort_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_while_not_ready_is_ignored() {
    let h = harness(
        test_settings(),
        ScriptedProvider::new(ProviderKind::Ollama).offline(),
        ScriptedProvider::new(ProviderKind::Embedded).failing_init(1),
        ScriptedProvider::new(ProviderKind::Cloud),
    );
    let session = ChatSession::new(h.ctx.clone());

    // Before detection the engine is still detecting
    let outcome = session.send_message("hello", &|_: &str| {}).await;
    assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::NotReady));
    assert!(session.messages().is_empty());

    // After a failed initialization it is in error
    h.ctx.start().await;
    let outcome = session.send_message("hello", &|_: &str| {}).await;
    assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::NotReady));
    assert!(session.messages().is_empty());
    assert_eq!(h.embedded.chat_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_while_generating_is_ignored() {
    let h = ready_on_ollama(
        ScriptedProvider::new(ProviderKind::Ollama)
            .with_tokens(&["thinking"])
            .ending(Ending::Hang),
    )
    .await;
    let session = Arc::new(ChatSession::new(h.ctx.clone()));

    let task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.send_message("first", &|_: &str| {}).await })
    };
    wait_for(|| session.is_generating()).await;

    let before = session.messages().len();
    let outcome = session.send_message("second", &|_: &str| {}).await;
    assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::Busy));
    assert_eq!(session.messages().len(), before);
    assert_eq!(h.ollama.chat_calls.load(Ordering::SeqCst), 1);

    session.abort_generation();
    task.await.unwrap();
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let h = ready_on_ollama(ScriptedProvider::new(ProviderKind::Ollama)).await;
    let session = ChatSession::new(h.ctx.clone());

    let outcome = session.send_message("   ", &|_: &str| {}).await;
    assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::Empty));
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn test_generation_error_is_appended_inline() {
    let h = ready_on_ollama(
        ScriptedProvider::new(ProviderKind::Ollama)
            .with_tokens(&["Half an "])
            .ending(Ending::Fail("connection reset".into())),
    )
    .await;
    let session = ChatSession::new(h.ctx.clone());

    let outcome = session.send_message("Go", &|_: &str| {}).await;
    match outcome {
        SendOutcome::Failed(e) => assert!(e.contains("connection reset")),
        other => panic!("expected failure, got {:?}", other),
    }

    let reply = session.messages().pop().unwrap();
    assert!(!reply.is_streaming);
    assert!(reply.content.starts_with("Half an "));
    assert!(reply.content.contains("[Error:"));
    assert!(reply.content.contains("connection reset"));

    // The session stays usable
    h.ollama.set_ending(Ending::Complete);
    let outcome = session.send_message("Again", &|_: &str| {}).await;
    assert_eq!(outcome, SendOutcome::Completed);
    assert_eq!(session.messages().len(), 4);
}

#[tokio::test]
async fn test_history_sent_with_system_prompt_and_window() {
    let mut settings = test_settings();
    settings.chat.system_prompt = Some("Answer from the notes.".into());
    settings.chat.context_window = 3;
    let h = harness(
        settings,
        ScriptedProvider::new(ProviderKind::Ollama)
            .with_models(&["llama3.2:latest"])
            .with_tokens(&["ok"]),
        ScriptedProvider::new(ProviderKind::Embedded),
        ScriptedProvider::new(ProviderKind::Cloud),
    );
    h.ctx.start().await;
    let session = ChatSession::new(h.ctx.clone());

    for text in ["one", "two", "three"] {
        session.send_message(text, &|_: &str| {}).await;
    }

    let histories = h.ollama.histories.lock();
    let last = histories.last().unwrap();
    assert_eq!(last[0].role, Role::System);
    assert_eq!(last[0].content, "Answer from the notes.");
    let rest: Vec<&str> = last[1..].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(rest, vec!["two", "ok", "three"]);
    assert!(last.iter().all(|m| !m.is_streaming));
}

#[tokio::test]
async fn test_retry_regenerates_last_reply() {
    let h = ready_on_ollama(ScriptedProvider::new(ProviderKind::Ollama).with_tokens(&["v1"])).await;
    let session = ChatSession::new(h.ctx.clone());

    session.send_message("question", &|_: &str| {}).await;
    let outcome = session.retry(&|_: &str| {}).await;

    assert_eq!(outcome, SendOutcome::Completed);
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "question");
    assert_eq!(h.ollama.chat_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_empties_history() {
    let h = ready_on_ollama(ScriptedProvider::new(ProviderKind::Ollama)).await;
    let session = ChatSession::new(h.ctx.clone());

    session.send_message("hi", &|_: &str| {}).await;
    assert_eq!(session.messages().len(), 2);

    session.clear();
    assert!(session.messages().is_empty());
    assert_eq!(
        session.retry(&|_: &str| {}).await,
        SendOutcome::Ignored(IgnoreReason::Empty)
    );
}

#[tokio::test]
async fn test_abort_routes_to_provider_that_started_generation() {
    let h = ready_on_ollama(
        ScriptedProvider::new(ProviderKind::Ollama)
            .with_tokens(&["slow"])
            .ending(Ending::Hang),
    )
    .await;
    let session = Arc::new(ChatSession::new(h.ctx.clone()));

    let task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.send_message("hi", &|_: &str| {}).await })
    };
    wait_for(|| session.is_generating()).await;

    // Switching providers mid-stream must not redirect the abort
    h.ctx.switch_provider(ProviderKind::Cloud).await.unwrap();
    session.abort_generation();
    task.await.unwrap();

    assert!(h.ollama.abort_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.cloud.abort_calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.messages().iter().filter(|m| m.is_streaming).count(), 0);
}
