//! cellar-pipeline - Catalog ingest command line
//!
//! **Commands:**
//! - `run`: normalize, enrich, find images and commit a source in resumable batches
//! - `normalize`: reconcile names with stored fields (dry run by default)
//! - `consolidate`: merge provenance sources into one record list
//! - `status` / `reset`: inspect or clear a source's checkpoint

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cellar_common::config::{resolve_config_path, write_json_atomic, LoggingConfig, CONFIG_ENV_VAR};
use cellar_common::CatalogRecord;
use cellar_pipeline::config::{StoreKind, TomlConfig};
use cellar_pipeline::services::consolidator::{load_records, load_source, SourceConsolidator};
use cellar_pipeline::services::{
    HttpEnrichmentClient, HttpImageLookup, HttpRecordStore, Normalizer, OfflineSink, RecordStore,
    SqliteRecordStore,
};
use cellar_pipeline::workflow::batch_runner::validate_options;
use cellar_pipeline::workflow::{
    BatchRunner, CheckpointFile, CheckpointState, CommitTarget, EnrichmentProcessor, NormalizeProcessor,
    RunReport, RunnerOptions,
};

/// Command-line arguments for cellar-pipeline
#[derive(Parser, Debug)]
#[command(name = "cellar-pipeline")]
#[command(about = "Spirits catalog ingest pipeline")]
#[command(version)]
struct Args {
    /// Configuration file (default: per-user config dir, then ./cellar.toml)
    #[arg(short, long, global = true, env = "CELLAR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the next batches of a source dataset
    Run(RunArgs),
    /// Extract name fields and reconcile them with stored values
    Normalize(NormalizeArgs),
    /// Merge configured sources into one record list
    Consolidate {
        /// Output file (overrides [consolidation] output)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show checkpoint progress for a source
    Status(CheckpointArgs),
    /// Delete the checkpoint for a source
    Reset(CheckpointArgs),
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Source dataset (overrides [pipeline] source_path)
    #[arg(short, long)]
    source: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Maximum items in this run
    #[arg(long)]
    limit: Option<usize>,

    /// Write batches to the processed directory instead of the store
    #[arg(long)]
    offline: bool,
}

#[derive(ClapArgs, Debug)]
struct NormalizeArgs {
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Only print changesets (default)
    #[arg(long, conflicts_with = "execute")]
    dry_run: bool,

    /// Patch the record store
    #[arg(long)]
    execute: bool,

    /// Rewrite a JSON dataset file with every record normalized
    #[arg(long, value_name = "FILE", conflicts_with_all = ["source", "execute"])]
    in_place: Option<PathBuf>,

    /// Write the run report and change log as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct CheckpointArgs {
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Pipeline step owning the checkpoint
    #[arg(long, default_value = "run", value_parser = ["run", "normalize"])]
    step: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = TomlConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.logging)?;
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    match args.command {
        Command::Run(run_args) => run(&config, run_args).await,
        Command::Normalize(normalize_args) => normalize(&config, normalize_args).await,
        Command::Consolidate { output } => consolidate(&config, output),
        Command::Status(cp_args) => status(&config, cp_args),
        Command::Reset(cp_args) => reset(&config, cp_args),
    }
}

/// RUST_LOG first, then `[logging] level`; `[logging] file` replaces stderr
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn source_path(cli: Option<PathBuf>, config: &TomlConfig) -> Result<PathBuf> {
    cli.or_else(|| config.pipeline.source_path.clone())
        .context("No source dataset: pass --source or set [pipeline] source_path")
}

/// Load a source dataset, reporting skipped items
fn load_dataset(path: &Path) -> Result<Vec<CatalogRecord>> {
    let dataset = load_records(path)?;
    if dataset.malformed > 0 {
        warn!(file = %path.display(), malformed = dataset.malformed, "Malformed records skipped");
        println!("Skipped {} malformed records in {}", dataset.malformed, path.display());
    }
    Ok(dataset.records)
}

fn source_identifier(path: &Path) -> String {
    path.display().to_string()
}

async fn build_store(config: &TomlConfig) -> Result<Arc<dyn RecordStore>> {
    match config.store.kind {
        StoreKind::Sqlite => {
            let db_path = config.store.database_path();
            info!("Database: {}", db_path.display());
            let pool = cellar_pipeline::db::init_database_pool(&db_path)
                .await
                .context("Failed to open record database")?;
            Ok(Arc::new(SqliteRecordStore::new(pool)))
        }
        StoreKind::Http => {
            let base_url = config
                .store
                .base_url
                .clone()
                .context("store.base_url is required for the http store")?;
            info!("Record store: {}", base_url);
            Ok(Arc::new(HttpRecordStore::new(base_url, config.store.timeout())?))
        }
    }
}

async fn run(config: &TomlConfig, args: RunArgs) -> Result<()> {
    let source = source_path(args.source, config)?;
    let records = load_dataset(&source)?;

    let options = RunnerOptions {
        batch_size: args.batch_size.unwrap_or(config.pipeline.batch_size),
        item_limit: args.limit.unwrap_or(config.pipeline.item_limit),
        ..config.pipeline.runner_options()
    };
    validate_options(&options)?;

    let retry = config.pipeline.retry_policy();
    let target = if args.offline || config.pipeline.offline_mode {
        CommitTarget::Offline {
            sink: OfflineSink::new(config.pipeline.processed_dir()),
            source_path: source.clone(),
        }
    } else {
        CommitTarget::Store(build_store(config).await?)
    };
    let mode = target.mode();

    let mut processor = EnrichmentProcessor::new(Normalizer::new(config.normalization.tolerances()), target, retry);
    if let Some(endpoint) = &config.enrichment.endpoint {
        let client = HttpEnrichmentClient::new(
            endpoint.clone(),
            config.enrichment.resolve_api_key(),
            config.enrichment.timeout(),
        )?;
        processor = processor.with_enrichment(Arc::new(client));
    } else {
        info!("No [enrichment] endpoint configured, skipping enrichment");
    }
    if let Some(endpoint) = &config.image_lookup.endpoint {
        let lookup = HttpImageLookup::new(endpoint.clone(), config.image_lookup.timeout())?;
        processor = processor.with_image_lookup(Arc::new(lookup));
    } else {
        info!("No [image_lookup] endpoint configured, skipping image lookup");
    }

    let checkpoint = CheckpointFile::for_source(&config.pipeline.state_dir(), "run", &source);
    let runner = BatchRunner::new(options, Some(checkpoint));
    let source_id = source_identifier(&source);
    let report = runner.run(&records, &source_id, &processor).await?;

    print_summary(&report, mode);
    Ok(())
}

async fn normalize(config: &TomlConfig, args: NormalizeArgs) -> Result<()> {
    let normalizer = Normalizer::new(config.normalization.tolerances());

    if let Some(file) = &args.in_place {
        return normalize_file(&normalizer, file, args.report.as_deref());
    }

    let source = source_path(args.source, config)?;
    let records = load_dataset(&source)?;
    let source_id = source_identifier(&source);
    let options = config.pipeline.runner_options();

    let execute = args.execute && !args.dry_run;
    let (processor, runner) = if execute {
        let store = build_store(config).await?;
        let checkpoint = CheckpointFile::for_source(&config.pipeline.state_dir(), "normalize", &source);
        (
            NormalizeProcessor::execute(normalizer, store, config.pipeline.retry_policy()),
            BatchRunner::new(options, Some(checkpoint)),
        )
    } else {
        // Dry runs always cover the whole dataset without touching checkpoints
        let options = RunnerOptions {
            item_limit: records.len().max(1),
            batch_delay: std::time::Duration::ZERO,
            batch_delay_jitter: std::time::Duration::ZERO,
            ..options
        };
        (NormalizeProcessor::dry_run(normalizer), BatchRunner::new(options, None))
    };

    let report = runner.run(&records, &source_id, &processor).await?;
    let mode = if processor.is_dry_run() { "dry-run" } else { "execute" };
    print_summary(&report, mode);

    if let Some(path) = &args.report {
        let body = serde_json::json!({
            "report": report,
            "changesLog": processor.take_changes(),
        });
        write_json_atomic(path, &body)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

/// Normalize every record of a dataset file and rewrite it
fn normalize_file(normalizer: &Normalizer, file: &Path, report: Option<&Path>) -> Result<()> {
    let dataset = load_records(file)?;
    if dataset.malformed > 0 {
        bail!(
            "{} has {} malformed records; refusing to rewrite it in place",
            file.display(),
            dataset.malformed
        );
    }
    let mut records = dataset.records;
    let mut changes = Vec::new();

    for record in records.iter_mut() {
        let Some(normalization) = normalizer.normalize(record) else {
            continue;
        };
        if normalization.changeset.requires_update() {
            normalization.changeset.apply(record);
            changes.push(normalization.changeset);
        }
    }

    write_json_atomic(file, &records)?;
    println!("Normalized {} of {} records in {}", changes.len(), records.len(), file.display());

    if let Some(path) = report {
        let body = serde_json::json!({
            "report": {
                "processed": records.len(),
                "updated": changes.len(),
                "skipped": records.len() - changes.len(),
                "errors": 0,
            },
            "changesLog": changes,
        });
        write_json_atomic(path, &body)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn consolidate(config: &TomlConfig, output: Option<PathBuf>) -> Result<()> {
    let sources = &config.consolidation.sources;
    if sources.is_empty() {
        bail!("No [[consolidation.sources]] configured");
    }
    let output = output
        .or_else(|| config.consolidation.output.clone())
        .context("No output file: pass --output or set [consolidation] output")?;

    let batches = sources.iter().map(|s| load_source(&s.name, &s.paths)).collect();
    let (map, report) = SourceConsolidator::consolidate(batches);

    let records = map.into_records();
    write_json_atomic(&output, &records)?;

    println!("{}", report.display_string());
    println!("Wrote {} records to {}", records.len(), output.display());
    Ok(())
}

fn checkpoint_for(config: &TomlConfig, args: &CheckpointArgs, source: &Path) -> CheckpointFile {
    CheckpointFile::for_source(&config.pipeline.state_dir(), &args.step, source)
}

fn status(config: &TomlConfig, args: CheckpointArgs) -> Result<()> {
    let source = source_path(args.source.clone(), config)?;
    let total = load_dataset(&source)?.len();
    let file = checkpoint_for(config, &args, &source);
    let checkpoint = file.load_for(&source_identifier(&source));
    let state = CheckpointState::classify(checkpoint.as_ref(), total);
    let next = state.start_index(total);
    let percent = if total == 0 { 100 } else { next * 100 / total };

    println!("Source:     {}", source.display());
    println!("Checkpoint: {}", file.path().display());
    println!("State:      {}", state);
    println!("Progress:   {} / {} ({}%)", next, total, percent);
    Ok(())
}

fn reset(config: &TomlConfig, args: CheckpointArgs) -> Result<()> {
    let source = source_path(args.source.clone(), config)?;
    let file = checkpoint_for(config, &args, &source);
    if file.reset()? {
        println!("Checkpoint removed: {}", file.path().display());
    } else {
        println!("No checkpoint at {}", file.path().display());
    }
    Ok(())
}

fn print_summary(report: &RunReport, mode: &str) {
    let next = if report.is_complete() {
        "DONE".to_string()
    } else {
        report.next_index.to_string()
    };

    println!();
    println!("Run {}", report.run_id);
    println!("  Source:     {}", report.source_identifier);
    println!("  Mode:       {}", mode);
    println!(
        "  Processed:  {} (updated {}, skipped {}, errors {})",
        report.processed, report.updated, report.skipped, report.errors
    );
    println!("  Next start: {}", next);
    println!(
        "  Progress:   {} / {} ({}%)",
        report.next_index.min(report.total_items),
        report.total_items,
        report.progress_percent()
    );
}
