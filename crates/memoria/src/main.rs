// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memoria - durable character and session memory.
//!
//! This is the binary entry point: an operator front end over the memory
//! engine. It holds no engine logic of its own.

mod books;
mod doctor;
mod output;
mod retrieve;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use memoria_config::MemoriaConfig;
use memoria_core::MemoriaError;
use memoria_memory::MemoryManager;

use crate::books::{AddArgs, BookCommand, UpdateArgs};
use crate::output::Output;
use crate::retrieve::{ContextArgs, ExtractArgs, RetrieveArgs};

/// Memoria - durable character and session memory.
#[derive(Parser, Debug)]
#[command(name = "memoria", version, about, long_about = None)]
struct Cli {
    /// Config file to load instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output JSON for scripting.
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage memory books.
    Book {
        #[command(subcommand)]
        action: BookCommand,
    },
    /// Add a memory to a book.
    Add(AddArgs),
    /// Edit a memory.
    Update(UpdateArgs),
    /// Delete a memory and its vector.
    Delete { book: String, entry: String },
    /// Retrieve memories relevant to some text.
    Retrieve(RetrieveArgs),
    /// Print the memory fragment a runtime would inject for an identity.
    Context(ContextArgs),
    /// Store messages that contain a trigger phrase.
    Extract(ExtractArgs),
    /// Embed missing entries and prune orphaned index rows.
    Sync { book: String },
    /// Show how far a book's index has caught up.
    Status { book: String },
    /// Diagnose the data directory and embedding backend.
    Doctor {
        /// Also compare every index with its book file.
        #[arg(long)]
        deep: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            memoria_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.agent.log_level);
    tracing::debug!(
        data_dir = %config.storage.data_dir,
        backend = %config.embedding.backend,
        "configuration loaded"
    );

    let out = Output::new(cli.json, cli.plain);
    let manager = Arc::new(MemoryManager::new(&config));
    let result = run(cli.command, Arc::clone(&manager), &config, &out).await;
    manager.close().await;

    if let Err(e) = result {
        eprintln!("{}", output::render_error(&e, out.color));
        std::process::exit(1);
    }
}

fn load_config(
    path: Option<&std::path::Path>,
) -> Result<MemoriaConfig, Vec<memoria_config::ConfigError>> {
    match path {
        Some(path) => memoria_config::load_and_validate_path(path),
        None => memoria_config::load_and_validate(),
    }
}

async fn run(
    command: Commands,
    manager: Arc<MemoryManager>,
    config: &MemoriaConfig,
    out: &Output,
) -> Result<(), MemoriaError> {
    match command {
        Commands::Book { action } => books::run_book(&manager, out, action).await,
        Commands::Add(args) => books::run_add(&manager, out, args).await.map(drop),
        Commands::Update(args) => books::run_update(&manager, out, args).await.map(drop),
        Commands::Delete { book, entry } => books::run_delete(&manager, out, &book, &entry).await,
        Commands::Retrieve(args) => retrieve::run_retrieve(manager, out, args).await.map(drop),
        Commands::Context(args) => retrieve::run_context(manager, out, args).await.map(drop),
        Commands::Extract(args) => retrieve::run_extract(&manager, out, args).await.map(drop),
        Commands::Sync { book } => status::run_sync(&manager, out, &book).await.map(drop),
        Commands::Status { book } => status::run_status(&manager, out, &book).await.map(drop),
        Commands::Doctor { deep } => {
            doctor::run_doctor(&manager, config, deep, out.color).await.map(drop)
        }
    }
}

/// Initializes the tracing subscriber with the given log level. Logs go to
/// stderr so `--json` output stays parseable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("memoria={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
