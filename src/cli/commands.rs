//! CLI commands
//!
//! Special commands that can be executed in the REPL.

use crate::chat::ChatSession;
use crate::core::config::CloudProvider;
use crate::core::{ProviderKind, QuillError, Result, Settings};
use crate::engine::{EngineContext, EngineStatus};
use crate::llm::OllamaClient;

/// Result of parsing a command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Send as a chat message
    Continue(String),
    /// Command was handled, show output
    Handled(String),
    /// Regenerate the last reply
    Retry,
    /// Exit the REPL
    Exit,
    /// Clear history
    Clear,
}

/// Parse and handle special commands
pub async fn handle_command(input: &str, session: &ChatSession) -> Result<CommandResult> {
    let input = input.trim();
    let stripped = input.strip_prefix('/').unwrap_or(input);
    let (cmd, args) = match stripped.split_once(' ') {
        Some((cmd, args)) => (cmd.to_lowercase(), args.trim()),
        None => (stripped.to_lowercase(), ""),
    };
    let ctx = session.context();

    match cmd.as_str() {
        "exit" | "quit" | "q" => Ok(CommandResult::Exit),

        "clear" | "reset" => {
            session.clear();
            Ok(CommandResult::Clear)
        }

        "help" | "?" => Ok(CommandResult::Handled(help_text())),

        "status" => Ok(CommandResult::Handled(status_text(session))),

        "models" => {
            let state = ctx.store().snapshot();
            let Some(kind) = state.active else {
                return Ok(CommandResult::Handled("No provider is active.".to_string()));
            };
            let models = ctx.providers().get(kind).list_models().await?;
            let selected = state.selected_model.unwrap_or_default();
            let list = models
                .iter()
                .map(|m| {
                    let marker = if *m == selected { "*" } else { " " };
                    format!("  {} {}", marker, m)
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(CommandResult::Handled(format!(
                "Models for {}:\n{}",
                kind, list
            )))
        }

        "use" | "engine" => {
            if args.is_empty() {
                return Ok(CommandResult::Handled(
                    "Usage: use <ollama|embedded|cloud>".to_string(),
                ));
            }
            let kind: ProviderKind = args.parse().map_err(QuillError::config)?;
            if session.is_generating() {
                session.abort_generation();
            }
            ctx.switch_provider(kind).await?;
            Ok(CommandResult::Handled(format!(
                "Switched to {} ({})",
                kind,
                ctx.store().selected_model().unwrap_or_default()
            )))
        }

        "model" => {
            if args.is_empty() {
                return Ok(CommandResult::Handled(format!(
                    "Current model: {}",
                    ctx.store()
                        .selected_model()
                        .unwrap_or_else(|| "(none)".to_string())
                )));
            }
            ctx.select_model(args).await?;
            Ok(CommandResult::Handled(format!("Model set to: {}", args)))
        }

        "test" => {
            let Some(kind) = ctx.store().active() else {
                return Ok(CommandResult::Handled("No provider is active.".to_string()));
            };
            let output = match ctx.providers().get(kind).test_connection().await {
                Ok(()) => format!("{}: connection OK", kind),
                Err(e) => format!("{}: {}", kind, e),
            };
            Ok(CommandResult::Handled(output))
        }

        "retry" => {
            let stalled = match ctx.store().snapshot().status() {
                EngineStatus::Error => true,
                // Store says ready but the client lost its initialization
                EngineStatus::Ready => ctx.ready_provider().is_none(),
                _ => false,
            };
            if stalled {
                ctx.retry().await?;
                Ok(CommandResult::Handled("Engine ready.".to_string()))
            } else {
                Ok(CommandResult::Retry)
            }
        }

        "pull" => {
            if args.is_empty() {
                return Ok(CommandResult::Handled("Usage: pull <model>".to_string()));
            }
            let client = OllamaClient::from_settings(&ctx.settings().snapshot())?;
            client.pull_model(args).await?;
            Ok(CommandResult::Handled(format!(
                "Pulled {}. Use 'use ollama' to switch to it.",
                args
            )))
        }

        "config" => handle_config_command(args, session).await,

        _ => {
            if input.starts_with('/') {
                Ok(CommandResult::Handled(format!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    cmd
                )))
            } else {
                Ok(CommandResult::Continue(input.to_string()))
            }
        }
    }
}

/// Handle 'config' subcommands
async fn handle_config_command(args: &str, session: &ChatSession) -> Result<CommandResult> {
    let ctx = session.context();
    let mut parts = args.splitn(3, ' ');
    let action = parts.next().unwrap_or("").to_lowercase();

    match action.as_str() {
        "" | "show" => {
            let settings = ctx.settings().snapshot();
            let location = ctx
                .settings()
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(in memory)".to_string());
            Ok(CommandResult::Handled(format!(
                "Settings file: {}\n\n{}",
                location,
                render_settings(&settings)?
            )))
        }

        "set" => {
            let key = parts.next().unwrap_or("").to_lowercase();
            let value = parts.next().unwrap_or("").trim().to_string();
            if key.is_empty() {
                return Ok(CommandResult::Handled(config_usage()));
            }

            let settings = apply_setting(ctx, &key, &value).await?;
            if key == "system_prompt" {
                session.set_system_prompt(settings.chat.system_prompt.clone());
            }
            Ok(CommandResult::Handled(format!("{} updated", key)))
        }

        _ => Ok(CommandResult::Handled(config_usage())),
    }
}

async fn apply_setting(ctx: &EngineContext, key: &str, value: &str) -> Result<Settings> {
    let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());

    match key {
        "ollama.host" => ctx.update_settings(|s| s.ollama.host = value.to_string()).await,
        "ollama.port" => {
            let port: u16 = value
                .parse()
                .map_err(|_| QuillError::config(format!("Invalid port: {}", value)))?;
            ctx.update_settings(|s| s.ollama.port = port).await
        }
        "cloud.api_key" => ctx.update_settings(|s| s.cloud.api_key = value.to_string()).await,
        "cloud.base_url" => ctx.update_settings(|s| s.cloud.base_url = value.to_string()).await,
        "cloud.model" => ctx.update_settings(|s| s.cloud.model_name = value.to_string()).await,
        "cloud.provider" => {
            let provider: CloudProvider = value.parse().map_err(QuillError::config)?;
            ctx.update_settings(|s| s.cloud.provider = provider).await
        }
        "embedded.model" => ctx.update_settings(|s| s.embedded.model_id = value.to_string()).await,
        "system_prompt" => ctx.update_settings(|s| s.chat.system_prompt = optional(value)).await,
        "context_window" => {
            let window: usize = value
                .parse()
                .map_err(|_| QuillError::config(format!("Invalid window size: {}", value)))?;
            ctx.update_settings(|s| s.chat.context_window = window).await
        }
        _ => Err(QuillError::config(format!(
            "Unknown setting: {}\n{}",
            key,
            config_usage()
        ))),
    }
}

/// Settings as TOML with the API key masked
fn render_settings(settings: &Settings) -> Result<String> {
    let mut shown = settings.clone();
    if !shown.cloud.api_key.is_empty() {
        shown.cloud.api_key = mask_key(&shown.cloud.api_key);
    }
    Ok(toml::to_string_pretty(&shown)?)
}

fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

fn status_text(session: &ChatSession) -> String {
    let ctx = session.context();
    let state = ctx.store().snapshot();
    let settings = ctx.settings().snapshot();

    let mut status = format!(
        "quillmind status:\n\
         ─────────────────────────────\n\
         Phase:     {}\n\
         Provider:  {}\n\
         Model:     {}\n\
         Ollama:    {} ({})\n\
         Embedded:  {}\n\
         Cloud:     {}\n\
         History:   {} messages",
        state.phase,
        state
            .active
            .map(|k| k.to_string())
            .unwrap_or_else(|| "(none)".to_string()),
        state.selected_model.as_deref().unwrap_or("(none)"),
        settings.ollama_url(),
        if state.ollama_detected {
            "detected"
        } else {
            "not detected"
        },
        if state.embedded_cached {
            "model cached"
        } else {
            "model not cached"
        },
        if settings.cloud.is_configured() {
            "configured"
        } else {
            "not configured"
        },
        session.messages().len(),
    );

    if let Some(ref progress) = state.progress {
        status.push_str(&format!("\nProgress:  {}% {}", progress.progress, progress.text));
    }
    if let Some(ref error) = state.last_error {
        status.push_str(&format!("\nError:     {}", error));
    }
    status
}

fn config_usage() -> String {
    "Usage: config [show] | config set <key> <value>\n\
     Keys: ollama.host, ollama.port, cloud.api_key, cloud.base_url, cloud.model,\n\
           cloud.provider, embedded.model, system_prompt, context_window"
        .to_string()
}

/// Generate help text
fn help_text() -> String {
    r#"quillmind commands:
─────────────────────────────────────────────
  help, ?          Show this help message
  exit, quit, q    Exit quillmind
  clear, reset     Clear conversation history
  status           Show engine state
  models           List models for the active provider
  use <provider>   Switch to ollama, embedded or cloud
  model <name>     Select a model for the active provider
  test             Check the active provider's connection
  retry            Retry initialization, or regenerate the last reply
  pull <model>     Download a model into Ollama
  config           Show settings (config set <key> <value> to change)

Keyboard Shortcuts:
  Ctrl+C           Stop the current reply
  Ctrl+D           Exit quillmind
─────────────────────────────────────────────"#
        .to_string()
}
