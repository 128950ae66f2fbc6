//! Claimcache CLI: compile capsules, inspect working memory, manage caches.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "claimcache",
    about = "🧠 Claimcache: working memory and caching for LLM tool pipelines",
    version,
    long_about = "Turns raw tool outputs into small, deduplicated claim capsules and\n\
                  keeps tool results in a cascading cache so repeated calls stay cheap."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file to ~/.claimcache
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show store and cache status
    Status,

    /// Compile a raw output bundle into a capsule
    Compile {
        /// Session the claims belong to
        #[arg(short, long)]
        session: String,

        /// Ticket goal used for relevance scoring
        #[arg(short, long)]
        goal: String,

        /// JSON file holding the raw output bundle
        #[arg(short, long)]
        bundle: String,

        /// JSON file holding tool records (args/response pairs)
        #[arg(short, long)]
        records: Option<String>,

        /// Ticket id (random when omitted)
        #[arg(short, long)]
        ticket: Option<String>,

        /// Print the full capsule instead of the envelope
        #[arg(long)]
        full: bool,
    },

    /// Inspect and prune session claims
    Claims {
        #[command(subcommand)]
        action: ClaimsAction,
    },

    /// Purge expired claims and cache entries
    Sweep,

    /// Cache layer management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum ClaimsAction {
    /// List active claims for a session
    List {
        #[arg(short, long)]
        session: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Prune a session down to the working-memory cap
    Prune {
        #[arg(short, long)]
        session: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show per-layer statistics
    Stats,
    /// Remove keys matching a glob pattern
    Invalidate {
        /// Glob over cache keys (`*` and `?`)
        pattern: String,

        /// Restrict to these layers (repeatable)
        #[arg(short, long)]
        layer: Vec<String>,
    },
    /// Drop every cached output of one tool
    Forget {
        tool: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Compile {
            session,
            goal,
            bundle,
            records,
            ticket,
            full,
        } => {
            commands::compile::run(commands::compile::CompileArgs {
                session,
                goal,
                bundle,
                records,
                ticket,
                full,
            })
            .await?
        }
        Commands::Claims { action } => match action {
            ClaimsAction::List { session, json } => commands::claims::list(&session, json).await?,
            ClaimsAction::Prune { session } => commands::claims::prune(&session).await?,
        },
        Commands::Sweep => commands::sweep::run().await?,
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cache::stats().await?,
            CacheAction::Invalidate { pattern, layer } => {
                commands::cache::invalidate(&pattern, &layer).await?
            }
            CacheAction::Forget { tool } => commands::cache::forget(&tool).await?,
        },
    }

    Ok(())
}
