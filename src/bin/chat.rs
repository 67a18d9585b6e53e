//! Terminal chat with the Muse assistant.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use muse::assistant::Assistant;
use muse::config::MuseConfig;
use muse::features::FeatureId;
use muse::progress::generation::HttpGenerationProvider;
use muse::speech::backend::SpeechBackend;
use muse::speech::command::CommandSpeechBackend;
use muse::speech::queue::SpeechQueue;
use muse::stream::session::SessionState;
use muse::stream::transport::StreamTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Muse: streaming creative assistant in the terminal.
#[derive(Parser)]
#[command(name = "muse-chat", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Speak replies aloud.
    #[arg(long)]
    voice: bool,

    /// First name shared with the assistant.
    #[arg(long)]
    name: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat on stdin/stdout.
    Chat,

    /// Generate one artifact with progress.
    Generate {
        /// Feature id (`image`, `meme`, ...).
        feature: FeatureId,
        /// Prompt text.
        prompt: String,
    },

    /// List voices of the configured TTS command.
    Voices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only the conversation.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("muse=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MuseConfig::from_file(path)?,
        None => {
            let path = MuseConfig::default_config_path();
            if path.exists() {
                MuseConfig::from_file(&path)?
            } else {
                MuseConfig::default()
            }
        }
    };
    config.apply_env();
    if cli.voice {
        config.voice.enabled = true;
    }

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config, cli.name).await,
        Command::Generate { feature, prompt } => run_generate(config, feature, prompt).await,
        Command::Voices => list_voices(config).await,
    }
}

async fn run_chat(config: MuseConfig, name: Option<String>) -> anyhow::Result<()> {
    let transport = Arc::new(StreamTransport::from_config(&config));
    info!(gateway = transport.has_primary(), "muse-chat ready");

    let backend: Arc<dyn SpeechBackend> = Arc::new(CommandSpeechBackend::from_config(&config.voice));
    let mut assistant = Assistant::new(&config, Arc::clone(&transport)).with_speech(SpeechQueue::new(backend));
    if let Some(name) = name {
        assistant.set_user_context("FIRSTNAME", name);
    }

    println!("Muse v{}. Type /voice on|off, /clear, or /quit.", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                assistant.clear_history();
                continue;
            }
            "/voice on" => {
                assistant.set_voice_enabled(true);
                continue;
            }
            "/voice off" => {
                assistant.set_voice_enabled(false);
                continue;
            }
            _ => {}
        }

        let handle = assistant.send(
            line,
            |token| {
                print!("{token}");
                let _ = std::io::stdout().flush();
            },
            |_| {},
        );
        let cancel = handle.cancel_handle();
        let completion = tokio::select! {
            completion = handle.wait() => completion,
            _ = tokio::signal::ctrl_c() => {
                cancel.abort();
                println!("\n[canceled]");
                continue;
            }
        };

        match completion.state {
            SessionState::Failed => println!("{}", completion.text),
            _ => println!(),
        }
        if !completion.features.is_empty() {
            let ids: Vec<&str> = completion.features.iter().map(|f| f.as_str()).collect();
            println!("[suggested: {}]", ids.join(", "));
        }
    }

    assistant.stop_speaking();
    info!(fallbacks = transport.fallback_count(), "muse-chat exiting");
    Ok(())
}

async fn run_generate(config: MuseConfig, feature: FeatureId, prompt: String) -> anyhow::Result<()> {
    let provider = Arc::new(HttpGenerationProvider::from_config(&config.generation)?);
    let transport = Arc::new(StreamTransport::from_config(&config));
    let assistant = Assistant::new(&config, transport).with_generation(provider);

    let handle = assistant.generate(
        feature,
        &prompt,
        |status, pct| eprintln!("[{pct:>3}%] {status}"),
        |_| {},
    )?;
    let outcome = tokio::select! {
        result = handle.wait() => result,
        _ = tokio::signal::ctrl_c() => None,
    };
    match outcome {
        Some(Ok(artifact)) => println!("{}", artifact.url),
        Some(Err(e)) => anyhow::bail!("generation failed: {e}"),
        None => eprintln!("generation canceled"),
    }
    Ok(())
}

async fn list_voices(config: MuseConfig) -> anyhow::Result<()> {
    let backend = CommandSpeechBackend::from_config(&config.voice);
    for voice in backend.voices().await? {
        println!("{:<24} {}", voice.name, voice.language);
    }
    Ok(())
}
