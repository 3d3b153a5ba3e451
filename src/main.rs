//! quillmind - local-first chat assistant
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use quillmind::chat::{ChatSession, SendOutcome};
use quillmind::cli::{start_engine, Repl, StartOptions};
use quillmind::core::SettingsOverrides;
use quillmind::{EngineContext, ProviderKind, SettingsStore};

/// quillmind - chat with your notes through Ollama, an embedded model or a cloud API
#[derive(Parser, Debug)]
#[command(name = "quillmind")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine to use instead of automatic detection (ollama, embedded, cloud)
    #[arg(long, short = 'e')]
    engine: Option<ProviderKind>,

    /// Model for the selected engine
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Ollama host (overrides OLLAMA_HOST)
    #[arg(long)]
    ollama_host: Option<String>,

    /// Ollama port (overrides OLLAMA_PORT)
    #[arg(long)]
    ollama_port: Option<u16>,

    /// Directory holding embedded model files
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Settings file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'd')]
    debug: bool,

    /// Single prompt mode (non-interactive)
    #[arg(long, short = 'p')]
    prompt: Option<String>,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "quillmind=debug" } else { "quillmind=warn" };
    let filter = std::env::var("QUILLMIND_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let settings = match args.config {
        Some(ref path) => {
            let _ = dotenvy::dotenv();
            let store = SettingsStore::open(path);
            store.apply_overrides(SettingsOverrides::from_env());
            store
        }
        None => SettingsStore::load(),
    };

    // CLI flags win over the environment
    settings.apply_overrides(SettingsOverrides {
        ollama_host: args.ollama_host.clone(),
        ollama_port: args.ollama_port,
        model_dir: args.model_dir.clone(),
        ..Default::default()
    });

    let ctx = EngineContext::new(Arc::new(settings))?;
    let options = StartOptions {
        engine: args.engine,
        model: args.model.clone(),
    };

    // Single prompt mode
    if let Some(prompt) = args.prompt {
        start_engine(&ctx, &options).await;
        let session = ChatSession::new(Arc::clone(&ctx));
        let on_token = |token: &str| {
            print!("{}", token);
            let _ = std::io::stdout().flush();
        };

        return match session.send_message(&prompt, &on_token).await {
            SendOutcome::Completed | SendOutcome::Aborted => {
                println!();
                Ok(())
            }
            SendOutcome::Failed(e) => Err(anyhow::anyhow!(e)),
            SendOutcome::Ignored(reason) => {
                let state = ctx.store().snapshot();
                Err(anyhow::anyhow!(
                    "Prompt not sent ({:?}); engine {}: {}",
                    reason,
                    state.phase,
                    state.last_error.unwrap_or_default()
                ))
            }
        };
    }

    // Interactive REPL mode
    let mut repl = Repl::new(ctx, options);
    repl.run().await?;

    Ok(())
}
