mod api;
mod database;
mod error;
mod ingest;
mod report;
mod utils;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::client::CatalogClient;
use crate::api::pager::{collect_batch, CollectedBatch, ThreadSleeper};
use crate::database::query::{find_canned, run_query, AccessMode, CATALOG};
use crate::database::repo::{store_records, InsertReport};
use crate::error::ConfigError;
use crate::report::render;
use crate::utils::config::{self, FetchSettings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect museum artifact records into SQLite and explore them", long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(short, long, env = config::DB_PATH_VAR, default_value = config::DEFAULT_DB_PATH, global = true)]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct ApiOptions {
    #[arg(long, env = config::API_KEY_VAR, hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = config::DEFAULT_BASE_URL)]
    base_url: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the API key with a single request
    CheckKey {
        #[command(flatten)]
        api: ApiOptions,

        /// Remember a working key in .env
        #[arg(long)]
        save: bool,
    },
    /// Page through the catalog and store the records
    Collect {
        #[command(flatten)]
        api: ApiOptions,

        /// Classification filter, e.g. Paintings, Coins, Drawings
        #[arg(short, long)]
        classification: String,

        /// Number of records to collect
        #[arg(short = 'n', long, default_value_t = 500)]
        rows: usize,

        /// Records to show after collecting
        #[arg(long, default_value_t = 10)]
        preview: usize,

        /// Also write the collected batch to a JSON file
        #[arg(long)]
        save: Option<PathBuf>,

        /// Collect and preview only
        #[arg(long)]
        no_store: bool,

        /// Attempts per page while the API answers 429
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
    },
    /// Store a batch previously written with `collect --save`
    Insert { file: PathBuf },
    /// List the stored queries
    Queries,
    /// Run a stored query by name
    Run { name: String },
    /// Run a free-form SQL statement
    Sql {
        statement: String,

        /// Allow statements that modify the database
        #[arg(long)]
        write: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    match args.command {
        Command::CheckKey { api, save } => check_key(&api, save),
        Command::Collect {
            api,
            classification,
            rows,
            preview,
            save,
            no_store,
            max_attempts,
        } => {
            let settings = FetchSettings {
                max_attempts: max_attempts.max(1),
                ..FetchSettings::default()
            };
            let client = connect(&api, &settings)?;
            collect(&client, &settings, &classification, rows, preview, save.as_deref(), (!no_store).then_some(args.db_path.as_path()))
        }
        Command::Insert { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let batch: CollectedBatch = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a saved batch", file.display()))?;
            let report = store_records(&args.db_path, &batch.records)?;
            println!(
                "Inserted {} artifacts for {} ({} colors, {} skipped)",
                report.stored, batch.classification, report.colors, report.skipped
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Queries => {
            for canned in CATALOG {
                println!("{:<26} {}", canned.slug, canned.title);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { name } => {
            let canned = find_canned(&name)?;
            println!("{}\n", canned.title);
            Ok(show_query(&args.db_path, canned.sql, AccessMode::ReadOnly, canned.chartable))
        }
        Command::Sql { statement, write } => {
            let mode = if write { AccessMode::ReadWrite } else { AccessMode::ReadOnly };
            Ok(show_query(&args.db_path, &statement, mode, false))
        }
    }
}

/// Resolves the key and makes sure the endpoint accepts it before any data work.
fn connect(api: &ApiOptions, settings: &FetchSettings) -> Result<CatalogClient> {
    let key = config::resolve_api_key(api.api_key.as_deref(), Path::new(config::ENV_FILE))?;
    let client = CatalogClient::new(&api.base_url, &key, settings.request_timeout)?;
    if !client.probe() {
        return Err(ConfigError::InvalidApiKey.into());
    }
    Ok(client)
}

fn check_key(api: &ApiOptions, save: bool) -> Result<ExitCode> {
    let key = config::resolve_api_key(api.api_key.as_deref(), Path::new(config::ENV_FILE))?;
    let client = CatalogClient::new(&api.base_url, &key, FetchSettings::default().request_timeout)?;

    if !client.probe() {
        println!("API key rejected");
        return Ok(ExitCode::FAILURE);
    }

    println!("API key OK");
    if save {
        config::save_api_key(Path::new(config::ENV_FILE), &key)?;
        println!("Saved to {}", config::ENV_FILE);
    }
    Ok(ExitCode::SUCCESS)
}

/// What happened to a collected batch after the fetch finished.
#[derive(Debug)]
struct CollectOutcome {
    stored: Option<InsertReport>,
    /// The fetch ran to its target or to the end of the source.
    complete: bool,
}

fn collect(
    client: &CatalogClient,
    settings: &FetchSettings,
    classification: &str,
    rows: usize,
    preview: usize,
    save: Option<&Path>,
    db_path: Option<&Path>,
) -> Result<ExitCode> {
    info!("Collecting {} records for {}", rows, classification);

    // 1. Page through the catalog
    let bar = render::progress_bar();
    let batch = collect_batch(client, &ThreadSleeper, &bar, settings, classification, rows);
    bar.finish_and_clear();

    // 2. Preview, save and store whatever came back, even after a failed page
    let outcome = finish_batch(&batch, preview, save, db_path)?;

    Ok(if outcome.complete { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn finish_batch(
    batch: &CollectedBatch,
    preview: usize,
    save: Option<&Path>,
    db_path: Option<&Path>,
) -> Result<CollectOutcome> {
    println!(
        "Collected {} records for {} ({} pages)",
        batch.len(),
        batch.classification,
        batch.pages_fetched
    );
    if let Some(e) = &batch.error {
        warn!("Fetch ended early: {}", e);
        eprintln!("Fetch stopped early: {}", e);
    }

    if preview > 0 && !batch.is_empty() {
        println!("\n{}", render::render_preview(batch, preview));
    }

    if let Some(path) = save {
        let json = serde_json::to_string_pretty(batch).context("Failed to serialize batch")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved batch to {}", path.display());
    }

    let stored = match db_path {
        Some(db_path) => {
            let report = store_records(db_path, &batch.records)?;
            println!(
                "Inserted {} artifacts into {} ({} colors, {} skipped)",
                report.stored,
                db_path.display(),
                report.colors,
                report.skipped
            );
            Some(report)
        }
        None => None,
    };

    Ok(CollectOutcome {
        stored,
        complete: batch.error.is_none(),
    })
}

/// Prints a query result, or the query error verbatim.
fn show_query(db_path: &Path, sql: &str, mode: AccessMode, chartable: bool) -> ExitCode {
    match run_query(db_path, sql, mode) {
        Ok(result) => {
            print!("{}", render::render_table(&result));
            if chartable {
                if let Some(chart) = render::render_bar_chart(&result) {
                    println!("\n{}", chart);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            warn!("Query failed: {}", e);
            eprintln!("Query failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
