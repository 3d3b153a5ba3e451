//! Interactive REPL for quillmind
//!
//! Provides the main user interaction loop. Ctrl+C stops a running reply;
//! Ctrl+D exits.

use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::chat::{ChatSession, IgnoreReason, SendOutcome};
use crate::cli::commands::{handle_command, CommandResult};
use crate::core::{ProviderKind, Result};
use crate::engine::{EngineContext, EnginePhase};
use crate::llm::LoadProgress;

/// Choices given on the command line that override detection
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub engine: Option<ProviderKind>,
    pub model: Option<String>,
}

/// Detect backends, then apply any command-line engine or model choice
pub async fn start_engine(ctx: &EngineContext, options: &StartOptions) -> EnginePhase {
    let mut phase = ctx.start().await;

    if let Some(engine) = options.engine {
        if ctx.store().active() != Some(engine) || phase == EnginePhase::Error {
            if let Err(e) = ctx.switch_provider(engine).await {
                tracing::warn!(provider = %engine, error = %e, "Requested engine failed to start");
            }
            phase = ctx.store().phase();
        }
    }

    if let Some(ref model) = options.model {
        if ctx.store().selected_model().as_deref() != Some(model.as_str()) {
            if let Err(e) = ctx.select_model(model).await {
                tracing::warn!(model = %model, error = %e, "Requested model unavailable");
            }
            phase = ctx.store().phase();
        }
    }

    phase
}

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    ctx: Arc<EngineContext>,
    session: ChatSession,
    options: StartOptions,
}

/// What the user asked the assistant for
enum Prompt<'a> {
    Message(&'a str),
    Regenerate,
}

impl Repl {
    pub fn new(ctx: Arc<EngineContext>, options: StartOptions) -> Self {
        let session = ChatSession::new(Arc::clone(&ctx));
        Self {
            ctx,
            session,
            options,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Run the REPL
    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        let progress = spawn_progress_printer(&self.ctx);
        println!("Detecting chat backends...");
        let phase = start_engine(&self.ctx, &self.options).await;
        self.print_phase(phase);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = io::stdout();

        loop {
            print!("You: ");
            stdout.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::signal::ctrl_c() => {
                    println!("\n(Use 'exit' or Ctrl+D to quit)");
                    continue;
                }
            };

            let input = match line {
                Ok(Some(input)) => input,
                Ok(None) => {
                    // EOF (Ctrl+D)
                    println!("\nGoodbye!");
                    break;
                }
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            };

            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match handle_command(input, &self.session).await {
                Ok(CommandResult::Exit) => {
                    println!("\nGoodbye!");
                    break;
                }
                Ok(CommandResult::Clear) => {
                    println!("Conversation cleared.\n");
                }
                Ok(CommandResult::Handled(output)) => {
                    println!("{}\n", output);
                }
                Ok(CommandResult::Retry) => {
                    self.chat(Prompt::Regenerate).await?;
                }
                Ok(CommandResult::Continue(text)) => {
                    self.chat(Prompt::Message(&text)).await?;
                }
                Err(e) => {
                    eprintln!("Command error: {}\n", e);
                }
            }
        }

        progress.abort();
        Ok(())
    }

    /// Stream one reply, stopping it on Ctrl+C
    async fn chat(&self, prompt: Prompt<'_>) -> Result<()> {
        print!("\nAssistant: ");
        io::stdout().flush()?;

        let on_token = |token: &str| {
            print!("{}", token);
            let _ = io::stdout().flush();
        };

        let outcome = {
            let reply = async {
                match prompt {
                    Prompt::Message(text) => self.session.send_message(text, &on_token).await,
                    Prompt::Regenerate => self.session.retry(&on_token).await,
                }
            };
            tokio::pin!(reply);

            tokio::select! {
                outcome = &mut reply => outcome,
                _ = tokio::signal::ctrl_c() => {
                    self.session.abort_generation();
                    reply.await
                }
            }
        };

        match outcome {
            SendOutcome::Completed => println!("\n"),
            SendOutcome::Aborted => println!(" [stopped]\n"),
            SendOutcome::Failed(e) => println!("\n[Error: {}]\n", e),
            SendOutcome::Ignored(IgnoreReason::NotReady) => {
                let state = self.ctx.store().snapshot();
                println!("(engine not ready: {})", state.phase);
                if let Some(error) = state.last_error {
                    println!("Last error: {}. Type 'retry' to try again.", error);
                }
                println!();
            }
            SendOutcome::Ignored(IgnoreReason::Busy) => {
                println!("(a reply is still being generated)\n");
            }
            SendOutcome::Ignored(IgnoreReason::Empty) => println!("(nothing to send)\n"),
        }
        Ok(())
    }

    fn print_phase(&self, phase: EnginePhase) {
        let state = self.ctx.store().snapshot();
        match phase {
            EnginePhase::Error => {
                println!(
                    "Engine failed to start: {}",
                    state.last_error.as_deref().unwrap_or("unknown error")
                );
                println!("Type 'retry' to try again or 'use <provider>' to switch.\n");
            }
            _ => {
                println!(
                    "Ready: {} ({})\n",
                    state
                        .active
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| "(none)".to_string()),
                    state.selected_model.as_deref().unwrap_or("(none)")
                );
            }
        }
    }

    /// Print the startup banner
    fn print_banner(&self) {
        let settings = self.ctx.settings().snapshot();

        println!(
            r#"
+-----------------------------------------------------------+
|                                                           |
|   quillmind                                               |
|   Local-first chat assistant for your notes               |
|                                                           |
+-----------------------------------------------------------+
"#
        );
        println!("Ollama:     {}", settings.ollama_url());
        println!("Models dir: {}", settings.model_dir().display());
        println!();
        println!("Commands: help, status, models, use, model, retry, clear, exit");
        println!("-----------------------------------------------------------");
    }
}

/// Print model load progress to stderr while a provider initializes
fn spawn_progress_printer(ctx: &Arc<EngineContext>) -> JoinHandle<()> {
    let mut updates = WatchStream::new(ctx.store().subscribe());
    tokio::spawn(async move {
        let mut last: Option<LoadProgress> = None;
        while let Some(state) = updates.next().await {
            match state.progress {
                Some(progress) if last.as_ref() != Some(&progress) => {
                    eprint!("\r[{:>3}%] {:<50}", progress.progress, progress.text);
                    let _ = io::stderr().flush();
                    last = Some(progress);
                }
                Some(_) => {}
                None => {
                    if last.take().is_some() {
                        eprintln!();
                    }
                }
            }
        }
    })
}
