//! Hestia CLI - Command-line interface for the Hestia dispatcher
//!
//! Provides subcommands for writing a configuration file, chatting with the
//! dispatcher, and inspecting prompts and classifications.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hestia::backend::{ModelBackend, OpenAiBackend, ScriptedBackend};
use hestia::classifier::IntentClassifier;
use hestia::config::{self, HestiaConfig};
use hestia::conversation::ConversationId;
use hestia::dispatcher::{Dispatcher, TurnRequest};
use hestia::intent::Intent;
use hestia::prompt::PromptAssembler;
use hestia::registry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "hestia")]
#[command(about = "Conversational intent dispatcher for the smart home", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "hestia.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Chat with the dispatcher on stdin
    Chat {
        /// Use a canned backend instead of the configured endpoint
        #[arg(long)]
        dry_run: bool,

        /// Intent the dry-run classifier reports
        #[arg(long, default_value = "answer")]
        intent: String,

        /// Reply the dry-run backend returns
        #[arg(long, default_value = r#"{"action": "answer", "answer": "This is a dry run."}"#)]
        reply: String,
    },

    /// Print the system prompt assembled for an intent
    RenderPrompt {
        /// Intent label
        #[arg(long, default_value = "command")]
        intent: String,
    },

    /// Classify an utterance
    Classify {
        /// Utterance to classify
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!("{:?} already exists; pass --force to overwrite", cli.config);
            }
            config::write_config(&cli.config, &HestiaConfig::default())?;
            println!("Wrote default configuration to {:?}", cli.config);
        }

        Commands::Chat {
            dry_run,
            intent,
            reply,
        } => {
            let config = load(&cli.config)?;
            let dispatcher = if dry_run {
                let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend::always(reply));
                let classifier: Arc<dyn ModelBackend> = Arc::new(ScriptedBackend::always(intent));
                Dispatcher::new(&config, backend, registry::from_config(&config)?)
                    .with_classifier_backend(classifier)
            } else {
                Dispatcher::from_config(&config)?
            };
            chat(dispatcher).await?;
        }

        Commands::RenderPrompt { intent } => {
            let config = load(&cli.config)?;
            let assembler = PromptAssembler::new(registry::from_config(&config)?, config.prompt);
            let prompt = assembler
                .assemble(Intent::from_label(&intent))
                .await
                .context("Failed to render prompt")?;
            println!("{prompt}");
        }

        Commands::Classify { text } => {
            let config = load(&cli.config)?;
            let backend = OpenAiBackend::new(config.openai_settings())?;
            let classifier = IntentClassifier::new(Arc::new(backend), config.classifier_params());
            let intent = classifier
                .classify(&text, ConversationId::new().as_str())
                .await
                .context("Classification failed")?;
            println!("{intent}");
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<HestiaConfig> {
    let mut config = if path.exists() {
        config::load_config(path)?
    } else {
        HestiaConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

async fn chat(dispatcher: Dispatcher) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation: Option<ConversationId> = None;

    println!("Type a request, or /new to start over. Ctrl-D exits.");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/new" {
            conversation = None;
            continue;
        }

        let request = TurnRequest {
            conversation_id: conversation.clone(),
            utterance: line.to_string(),
            language: None,
        };
        let response = dispatcher.process_turn(request).await;
        match response.error_code() {
            Some(code) => println!("[{code}] {}", response.text()),
            None => println!("{}", response.text()),
        }
        conversation = Some(response.conversation_id);
    }

    Ok(())
}
