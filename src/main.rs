//! Crawlstore CLI - offline reporting over a crawler store

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use crawlstore::config::{self, StoreConfig};
use crawlstore::report::StoreStats;
use crawlstore::CrawlStore;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "crawlstore")]
#[command(version)]
#[command(about = "Inspect and reset the SQLite store written by crawler workers")]
#[command(long_about = r#"
Crawlstore owns the SQLite file crawler workers record peer observations and
peer errors into. This binary is the offline side: reset before a crawl,
inspect during or after one.

Example usage:
  crawlstore reset --database crawler.db
  crawlstore stats
  crawlstore list --limit 20
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML config file (defaults to crawlstore.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discard the store and recreate empty tables
    Reset,

    /// Show row counts
    Stats,

    /// Print one observation as JSON
    Peek,

    /// Print observations as JSON lines
    List {
        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print error rows as JSON lines
    Errors {
        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Write the effective settings to a TOML config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut store_config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    if let Some(database) = cli.database {
        store_config.database = database;
    }
    tracing::debug!("Using store at {:?}", store_config.database);

    match cli.command {
        Commands::InitConfig { force } => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
            store_config.save(&path, force)?;
            println!("Wrote {}", path.display());
        }
        Commands::Reset => {
            store_config.create_database_dir()?;
            let store = CrawlStore::new(store_config)?;
            store.reset_store()?;
            println!("Store reset: {}", store.path().display());
        }
        Commands::Stats => {
            let reader = reader_for(store_config)?;
            let stats = StoreStats::collect(&reader)?;
            println!("{}", stats.table());
        }
        Commands::Peek => {
            let reader = reader_for(store_config)?;
            if let Some(observation) = reader.peek_observation()? {
                println!("{}", serde_json::to_string_pretty(&observation)?);
            }
        }
        Commands::List { limit } => {
            let reader = reader_for(store_config)?;
            let observations = reader.list_observations()?;
            for observation in observations.iter().take(limit.unwrap_or(usize::MAX)) {
                println!("{}", serde_json::to_string(observation)?);
            }
        }
        Commands::Errors { limit } => {
            let reader = reader_for(store_config)?;
            let errors = reader.list_errors()?;
            for error in errors.iter().take(limit.unwrap_or(usize::MAX)) {
                println!("{}", serde_json::to_string(error)?);
            }
        }
    }

    Ok(())
}

fn reader_for(store_config: StoreConfig) -> anyhow::Result<crawlstore::Reader> {
    if !store_config.database.exists() {
        anyhow::bail!(
            "no store at {} (run `crawlstore reset` first)",
            store_config.database.display()
        );
    }
    Ok(CrawlStore::new(store_config)?.reader())
}
