//! Settings changed while the engine is running

mod common;

use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use common::{harness, spawn_stub, test_settings, ScriptedProvider, StubReply, StubServer};
use quillmind::chat::{ChatSession, IgnoreReason, SendOutcome};
use quillmind::core::config::CloudProvider;
use quillmind::core::{ProviderKind, Settings, SettingsStore};
use quillmind::engine::{EngineContext, EnginePhase, EngineStatus};
use quillmind::llm::{ChatProvider, OpenAiClient, ProviderSet};

async fn cloud_stub() -> StubServer {
    spawn_stub(|req| match req.path.as_str() {
        "/v1/models" => StubReply::json(200, r#"{"data":[{"id":"gpt-4o-mini"}]}"#),
        "/v1/chat/completions" => StubReply::stream(
            "text/event-stream",
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
                "data: [DONE]\n\n",
            ],
        ),
        _ => StubReply::json(404, "{}"),
    })
    .await
}

/// Engine started on a real cloud client pointed at `url`
async fn cloud_engine(url: &str) -> Arc<EngineContext> {
    let mut settings: Settings = test_settings();
    settings.active_engine = Some(ProviderKind::Cloud);
    settings.cloud.api_key = "sk-old".into();
    settings.cloud.base_url = format!("{}/v1", url);
    settings.cloud.provider = CloudProvider::Custom;

    let cloud = OpenAiClient::new(settings.cloud.clone()).unwrap();
    let providers = ProviderSet::new(
        Arc::new(ScriptedProvider::new(ProviderKind::Ollama).offline()),
        Arc::new(ScriptedProvider::new(ProviderKind::Embedded)),
        Arc::new(cloud),
    );
    let ctx = EngineContext::with_providers(Arc::new(SettingsStore::in_memory(settings)), providers);
    assert_eq!(ctx.start().await, EnginePhase::CloudReady);
    ctx
}

#[tokio::test]
async fn test_new_api_key_reinitializes_active_cloud_client() {
    let stub = cloud_stub().await;
    let ctx = cloud_engine(&stub.url).await;
    let session = ChatSession::new(Arc::clone(&ctx));

    assert_ok!(ctx.update_settings(|s| s.cloud.api_key = "sk-new".into()).await);

    assert_eq!(ctx.store().phase(), EnginePhase::CloudReady);
    let active = ctx.ready_provider().unwrap();
    assert!(active.provider.is_ready());

    let outcome = session.send_message("hi", &|_: &str| {}).await;
    assert_eq!(outcome, SendOutcome::Completed);
    assert_eq!(session.messages()[1].content, "ok");

    let requests = stub.requests.lock();
    let chat = requests
        .iter()
        .rev()
        .find(|r| r.path == "/v1/chat/completions")
        .unwrap();
    assert_eq!(chat.header("authorization"), Some("Bearer sk-new"));
}

#[tokio::test]
async fn test_cleared_api_key_puts_engine_in_error_until_retry() {
    let stub = cloud_stub().await;
    let ctx = cloud_engine(&stub.url).await;
    let session = ChatSession::new(Arc::clone(&ctx));

    assert_err!(ctx.update_settings(|s| s.cloud.api_key.clear()).await);
    assert_eq!(ctx.store().snapshot().status(), EngineStatus::Error);
    assert!(ctx.ready_provider().is_none());

    let outcome = session.send_message("hi", &|_: &str| {}).await;
    assert_eq!(outcome, SendOutcome::Ignored(IgnoreReason::NotReady));
    assert!(session.messages().is_empty());

    assert_ok!(ctx.update_settings(|s| s.cloud.api_key = "sk-fixed".into()).await);
    assert_ok!(ctx.retry().await);
    assert_eq!(ctx.store().phase(), EnginePhase::CloudReady);
    assert_eq!(
        session.send_message("hi", &|_: &str| {}).await,
        SendOutcome::Completed
    );
}

#[tokio::test]
async fn test_unrelated_setting_leaves_provider_alone() {
    let h = harness(
        test_settings(),
        ScriptedProvider::new(ProviderKind::Ollama).with_models(&["llama3.2:latest"]),
        ScriptedProvider::new(ProviderKind::Embedded),
        ScriptedProvider::new(ProviderKind::Cloud),
    );
    h.ctx.start().await;

    h.ctx
        .update_settings(|s| s.chat.system_prompt = Some("Be brief.".into()))
        .await
        .unwrap();

    assert_eq!(h.ctx.store().phase(), EnginePhase::OllamaReady);
    assert_eq!(
        h.ollama
            .init_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_context_window_change_applies_to_running_session() {
    let h = harness(
        test_settings(),
        ScriptedProvider::new(ProviderKind::Ollama)
            .with_models(&["llama3.2:latest"])
            .with_tokens(&["ok"]),
        ScriptedProvider::new(ProviderKind::Embedded),
        ScriptedProvider::new(ProviderKind::Cloud),
    );
    h.ctx.start().await;
    let session = ChatSession::new(h.ctx.clone());

    session.send_message("one", &|_: &str| {}).await;
    h.ctx
        .update_settings(|s| s.chat.context_window = 1)
        .await
        .unwrap();
    session.send_message("two", &|_: &str| {}).await;

    let histories = h.ollama.histories.lock();
    let last = histories.last().unwrap();
    let contents: Vec<&str> = last.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["two"]);
}
