//! # Lab Agent CLI (`lab-agent`)
//!
//! ## Usage
//!
//! ```bash
//! lab-agent --config ./config/agent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lab-agent serve` | Start the HTTP chat service |
//! | `lab-agent index` | Build the knowledge index once and print statistics |
//! | `lab-agent ask "<message>"` | Answer one message through the full reply cascade |
//! | `lab-agent extract-pdf <file.pdf>` | Convert a PDF into a Markdown content file |
//!
//! ## Examples
//!
//! ```bash
//! # Check what would be indexed, without calling the embedding API
//! lab-agent index --dry-run
//!
//! # Turn a proposal PDF into indexable Markdown
//! lab-agent extract-pdf proposal.pdf --output content/proposal.md --title "Project Proposal"
//!
//! # Serve on the configured address
//! lab-agent serve
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lab_agent::config;
use lab_agent::embedding;
use lab_agent::extract;
use lab_agent::index::{self, KnowledgeIndex};
use lab_agent::server;
use lab_agent::startup;

/// Lab Agent: a retrieval-augmented chat service for a lab website.
#[derive(Parser)]
#[command(
    name = "lab-agent",
    about = "Lab Agent: a retrieval-augmented chat service for a lab website",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/agent.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP chat service.
    ///
    /// Binds `[server].bind` immediately and initializes the model backend
    /// and knowledge index in the background.
    Serve,

    /// Build the knowledge index and print statistics.
    Index {
        /// Only scan and chunk; do not call the embedding provider.
        #[arg(long)]
        dry_run: bool,
    },

    /// Answer a single message and exit.
    Ask {
        /// The message to answer.
        message: String,
    },

    /// Extract a PDF's text into a Markdown document, one section per page.
    ExtractPdf {
        /// Path to the PDF file.
        input: PathBuf,

        /// Output Markdown path. Prints to stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Document title. Defaults to the file stem.
        #[arg(long)]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Commands that don't need a config file
    if let Commands::ExtractPdf {
        input,
        output,
        title,
    } = &cli.command
    {
        let markdown = extract::pdf_file_to_markdown(input, title.as_deref())?;
        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, markdown)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Saved extracted text to {}", path.display());
            }
            None => print!("{}", markdown),
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Index { dry_run } => {
            if dry_run {
                let (items, chunks, skipped) = index::prepare_chunks(&cfg)?;
                println!("index {} (dry-run)", cfg.content.root.display());
                println!("  documents: {}", items.len());
                println!("  chunks: {}", chunks.len());
                println!("  duplicate chunks skipped: {}", skipped);
                return Ok(());
            }

            let Some(embedder) = embedding::create_provider(&cfg.embedding)? else {
                bail!("Indexing requires embeddings. Set [embedding] provider in config.");
            };
            let index = KnowledgeIndex::build(&cfg, embedder.as_ref()).await?;
            let stats = index.stats();
            println!("index {}", cfg.content.root.display());
            println!("  documents: {}", stats.documents);
            println!("  chunks embedded: {}", stats.chunks);
            println!("  duplicate chunks skipped: {}", stats.skipped_duplicates);
            println!("  model: {}", embedder.model_name());
            println!("  built at: {}", stats.built_at.to_rfc3339());
            println!("ok");
        }
        Commands::Ask { message } => {
            let Some(orchestrator) = startup::initialize(&cfg).await else {
                bail!("No backend configured. Set [model] provider in config.");
            };
            let reply = orchestrator.respond(&message, &[]).await;
            println!("{}", reply.reply);
            if !reply.sources.is_empty() {
                println!();
                println!("sources:");
                for source in &reply.sources {
                    println!("  {}", source);
                }
            }
        }
        Commands::ExtractPdf { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
