use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schemars::schema_for;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use parltrack::{DirectoryClient, retrieve_xz_json};
use votes_core::cache::ReconCache;
use votes_core::config::ImportConfig;
use votes_core::import::{self, Importer};
use votes_core::{db, schema};

#[derive(Parser)]
#[command(name = "epvotes")]
#[command(about = "European Parliament vote dump importer", long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    /// TOML config file; defaults apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a vote dump, downloading it when no file is given
    Import {
        /// Pre-downloaded dump file (JSON array of proposal records)
        file: Option<PathBuf>,

        /// Resume from the cache checkpoint
        #[arg(long = "continue")]
        resume: bool,

        /// Wipe all dossiers before importing
        #[arg(long)]
        purge: bool,

        /// Database path (overrides the config)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Delete every dossier with its proposals and votes
    Purge {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Re-run reconciliation for votes stored without a representative
    Remap {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Export canonical JSON Schemas to a directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for the dump record types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log)
        .with_context(|| format!("invalid log level {:?}", cli.log))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => ImportConfig::load(path)?,
        None => ImportConfig::default(),
    };

    match cli.command {
        Commands::Import { file, resume, purge, db } => {
            run_import(&config, file, resume, purge, db)
        }
        Commands::Purge { db } => run_purge(&config, db),
        Commands::Remap { db } => run_remap(&config, db),
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

fn database_path(config: &ImportConfig, db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| config.db_path.clone())
}

fn run_import(
    config: &ImportConfig,
    file: Option<PathBuf>,
    resume: bool,
    purge: bool,
    db: Option<PathBuf>,
) -> Result<()> {
    let mut conn = db::open(&database_path(config, db))?;

    if purge {
        let purged = db::purge_dossiers(&conn)?;
        info!("purged {purged} dossiers before import");
    }

    let dump_path = match file {
        Some(path) => path,
        None => retrieve_xz_json(&config.dump_url, &config.dump_destination())?,
    };
    let records = read_dump(&dump_path)?;
    info!("read {} records from {}", records.len(), dump_path.display());

    let cache_path = config.cache_path();
    let cache = ReconCache::load(&cache_path)?;
    let client = DirectoryClient::new(&config.directory_base)?;
    let mut importer = Importer::new(&conn, cache, &client)?;

    // The cache goes to disk on the error path too.
    let result = import::import_dump(&mut conn, &records, &mut importer, resume);
    importer.cache.flush(&cache_path)?;
    let stats = result?;

    info!(
        "import done: {} created, {} updated, {} unchanged, {} skipped, {} failed, \
         {} votes created, {} votes updated, {} unresolved",
        stats.proposals_created,
        stats.proposals_updated,
        stats.proposals_unchanged,
        stats.records_skipped,
        stats.records_failed,
        stats.votes_created,
        stats.votes_updated,
        stats.votes_unresolved,
    );
    Ok(())
}

fn read_dump(path: &Path) -> Result<Vec<serde_json::Value>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read dump file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("dump file {} is not a JSON array", path.display()))
}

fn run_purge(config: &ImportConfig, db: Option<PathBuf>) -> Result<()> {
    let conn = db::open(&database_path(config, db))?;
    let purged = db::purge_dossiers(&conn)?;
    info!("purged {purged} dossiers");
    Ok(())
}

fn run_remap(config: &ImportConfig, db: Option<PathBuf>) -> Result<()> {
    let mut conn = db::open(&database_path(config, db))?;

    let cache_path = config.cache_path();
    let cache = ReconCache::load(&cache_path)?;
    let client = DirectoryClient::new(&config.directory_base)?;
    let mut importer = Importer::new(&conn, cache, &client)?;

    let result = importer.remap_unresolved(&mut conn);
    importer.cache.flush(&cache_path)?;
    let remapped = result?;

    info!("remapped {remapped} votes");
    Ok(())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let record_schema = schema_for!(schema::ProposalRecord);
    let record_json = serde_json::to_string_pretty(&record_schema)?;
    fs::write(out_dir.join("ProposalRecord.schema.json"), record_json)?;

    let position_schema = schema_for!(schema::Position);
    let position_json = serde_json::to_string_pretty(&position_schema)?;
    fs::write(out_dir.join("Position.schema.json"), position_json)?;

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
