#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hitl_agent::{thread_title, ExecutionEngine, Message, OpenAiCompatibleClient};
use hitl_checkpoint::{CheckpointStore, SqliteCheckpointStore};
use hitl_common::logging::init_logging;
use hitl_common::Config;
use hitl_tools::ToolRegistry;

mod chat;
mod render;

/// `hitl` - chat with a tool-using agent that asks before doing anything irreversible.
#[derive(Parser, Debug)]
#[command(name = "hitl")]
#[command(version)]
#[command(about = "Human-in-the-loop agent: dangerous tool calls wait for your approval.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.hitl-agent/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat; resumes a suspended thread first
    Chat {
        /// Thread to continue (a new one is created when omitted)
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// List threads, oldest first, with their titles
    Threads,

    /// Print the stored messages of a thread
    History {
        /// Thread id
        thread: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_env(cli.config.as_deref()).context("Failed to load config")?;
    init_logging(
        cli.log_level
            .as_deref()
            .unwrap_or(&config.observability.log_level),
        &config.observability.log_format,
    );

    let store = Arc::new(
        SqliteCheckpointStore::open(&config.storage.db_path).with_context(|| {
            format!(
                "Failed to open checkpoint database {}",
                config.storage.db_path.display()
            )
        })?,
    );
    tracing::debug!(db = %config.storage.db_path.display(), "Checkpoint store opened");

    match cli.command {
        Commands::Chat { thread } => {
            if config.model.api_key.is_none() {
                tracing::warn!("No model API key configured (set GROQ_API_KEY); requests may be rejected");
            }
            let model = OpenAiCompatibleClient::from_config(&config.model)
                .with_system_prompt(config.agent.system_prompt.clone());
            let tools = Arc::new(ToolRegistry::from_config(&config));
            let engine = ExecutionEngine::from_config(&config.agent, Arc::new(model), tools, store);

            let thread_id = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat::run(&engine, &thread_id).await
        }

        Commands::Threads => list_threads(store.as_ref()).await,

        Commands::History { thread } => print_history(store.as_ref(), &thread).await,
    }
}

async fn list_threads(store: &dyn CheckpointStore) -> Result<()> {
    let ids = store.list_thread_ids().await?;
    if ids.is_empty() {
        println!("No threads yet.");
        return Ok(());
    }

    for id in ids {
        let latest = store.load_latest(&id).await?;
        let (title, marker) = match &latest {
            Some(cp) => (
                thread_title(&cp.messages),
                if cp.is_suspended() { "  [awaiting confirmation]" } else { "" },
            ),
            None => (thread_title(&[]), ""),
        };
        println!("{id}  {title}{marker}");
    }
    Ok(())
}

async fn print_history(store: &dyn CheckpointStore, thread_id: &str) -> Result<()> {
    let messages: Vec<Message> = store.list_messages(thread_id).await?;
    if messages.is_empty() {
        println!("Thread '{thread_id}' has no messages.");
        return Ok(());
    }

    for message in &messages {
        println!("{}", render::format_message(message));
    }
    Ok(())
}
