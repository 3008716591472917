//! # folheto CLI
//!
//! The `folheto` binary is the interface to the flyer pipeline. It provides
//! commands for database initialization, image ingestion, product lookup,
//! duplicate review, merging, alias management, statistics, and CSV export.
//!
//! ## Usage
//!
//! ```bash
//! folheto --config ./config/folheto.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folheto init` | Create the SQLite database and run schema migrations |
//! | `folheto ingest <path>` | Extract and persist one image or a folder |
//! | `folheto resolve "<name>"` | Look a product name up through the resolver |
//! | `folheto duplicates` | List near-duplicate product candidates |
//! | `folheto merge <keep> <discard>` | Merge one product into another |
//! | `folheto merge --auto` | Batch-merge very-high-similarity candidates |
//! | `folheto aliases list\|add\|check` | Inspect and manage aliases |
//! | `folheto categories` | Audit extractor category suggestions |
//! | `folheto stats` | Database overview |
//! | `folheto export` | CSV export of prices |

mod aliases;
mod categories;
mod config;
mod db;
mod dedup;
mod error;
mod expand;
mod export;
mod extract;
mod ingest;
mod merge;
mod migrate;
mod models;
mod normalize;
mod progress;
mod resolver;
mod stats;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// folheto — supermarket flyer ingestion with LLM extraction and product
/// de-duplication.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/folheto.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "folheto",
    about = "folheto — supermarket flyer ingestion with LLM extraction and product de-duplication",
    version,
    long_about = "folheto ingests photographs of supermarket flyers, extracts structured \
    product and price data through a vision-capable LLM, and persists normalized records \
    into SQLite while resolving duplicate product entities through a layered matcher, an \
    alias store, and a transactional merge engine."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/folheto.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, all tables (products, aliases,
    /// merchants, prices, images, categories), and seeds the canonical
    /// category list. Idempotent — running it multiple times is safe.
    Init,

    /// Ingest one flyer image or a folder of them.
    ///
    /// Each image is extracted by the configured provider, validated,
    /// expanded ("A ou B" lines become two products), resolved against
    /// known products and aliases, and persisted with its prices.
    Ingest {
        /// Image file or folder to process.
        path: PathBuf,

        /// Maximum number of images to process.
        #[arg(long)]
        limit: Option<usize>,

        /// List the images that would be processed without extracting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve a product name through the layered matcher.
    ///
    /// Reports the matched product, the strategy that found it (exact,
    /// alias-exact, alias-fuzzy, product-fuzzy), and the similarity score
    /// for fuzzy hits. Read-only.
    Resolve {
        /// The product name to look up.
        name: String,

        /// Override the configured similarity threshold.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// List near-duplicate product candidates.
    ///
    /// Pairs are reported only when both products share a brand (or both
    /// have none) and their names fall inside the configured edit-distance
    /// band. Advisory: nothing is modified.
    Duplicates {
        /// Override the configured similarity floor.
        #[arg(long)]
        min_similarity: Option<f64>,

        /// Maximum number of candidates to report.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Merge a duplicate product into a surviving one.
    ///
    /// Re-points all prices, collapses aliases, back-fills empty fields,
    /// and deletes the discarded product — atomically. With `--auto`,
    /// batch-merges detector candidates at very high similarity instead.
    Merge {
        /// Product id to keep.
        #[arg(required_unless_present = "auto")]
        keep: Option<String>,

        /// Product id to discard.
        #[arg(required_unless_present = "auto")]
        discard: Option<String>,

        /// Batch mode: merge all candidates above the auto threshold.
        #[arg(long)]
        auto: bool,

        /// Similarity floor for --auto (clamped to the configured minimum).
        #[arg(long)]
        min_similarity: Option<f64>,

        /// Maximum number of candidate pairs to process in --auto mode.
        #[arg(long)]
        limit: Option<usize>,

        /// Skip the confirmation prompt in --auto mode.
        #[arg(long)]
        yes: bool,
    },

    /// Inspect and manage product aliases.
    Aliases {
        #[command(subcommand)]
        action: AliasAction,
    },

    /// Audit extractor category suggestions.
    ///
    /// Shows how suggestions map onto the canonical category set and lists
    /// the most frequent unmapped ones (stored as the fallback category).
    Categories {
        /// Maximum number of unmapped suggestions to list.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show database statistics.
    Stats,

    /// Export price observations as CSV.
    Export {
        /// Output file. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Alias management subcommands.
#[derive(Subcommand)]
enum AliasAction {
    /// List aliases, optionally for a single product.
    List {
        /// Product id to filter by.
        product_id: Option<String>,
    },

    /// Attach an alias to a product (origin `manual`).
    Add {
        /// Owning product id.
        product_id: String,
        /// Alias text.
        alias: String,
    },

    /// Detect bidirectional aliases (two products aliased to each other).
    ///
    /// These indicate a merge that never happened. They are reported, not
    /// fixed: deciding which product survives needs a human.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            limit,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, &path, limit, dry_run).await?;
        }
        Commands::Resolve { name, threshold } => {
            resolver::run_resolve(&cfg, &name, threshold).await?;
        }
        Commands::Duplicates {
            min_similarity,
            limit,
        } => {
            dedup::run_duplicates(&cfg, min_similarity, limit).await?;
        }
        Commands::Merge {
            keep,
            discard,
            auto,
            min_similarity,
            limit,
            yes,
        } => {
            if auto {
                merge::run_merge_auto(&cfg, min_similarity, limit, yes).await?;
            } else {
                // clap guarantees both ids are present when --auto is absent
                let keep = keep.expect("keep id required");
                let discard = discard.expect("discard id required");
                merge::run_merge(&cfg, &keep, &discard).await?;
            }
        }
        Commands::Aliases { action } => match action {
            AliasAction::List { product_id } => {
                aliases::run_list(&cfg, product_id.as_deref()).await?;
            }
            AliasAction::Add { product_id, alias } => {
                aliases::run_add(&cfg, &product_id, &alias).await?;
            }
            AliasAction::Check => {
                aliases::run_check(&cfg).await?;
            }
        },
        Commands::Categories { limit } => {
            categories::run_categories(&cfg, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
    }

    Ok(())
}
