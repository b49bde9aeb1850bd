use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vaxwatch::config::{Config, ConfigOverrides};
use vaxwatch::directory::{fetch_feed, DirectoryImporter};
use vaxwatch::output::csv::report_to_csv;
use vaxwatch::output::json::render_json;
use vaxwatch::output::table::render_report_table;
use vaxwatch::providers::http::{HttpClient, JsonFetcher};
use vaxwatch::providers::HarvesterRegistry;
use vaxwatch::snapshot::{RunSummary, SnapshotRecorder};
use vaxwatch::store::Store;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "vaxwatch",
    about = "Daily availability snapshots of vaccination centres"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite database path, overrides `[storage] db_path`.
    #[arg(long)]
    db: Option<String>,
    #[arg(long = "feed-url")]
    feed_url: Option<String>,
    /// Debug logging unless RUST_LOG is set.
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import the centre directory, then record today's availability.
    Fetch,
    /// Import the centre directory only.
    Import,
    /// Record today's availability for already imported centres.
    Snapshot,
    /// Summarize the latest snapshot day by area.
    Report {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        feed_url: cli.feed_url.clone(),
    });

    if let Commands::Config { init, show } = &cli.command {
        return handle_config_command(*init, *show, &config, &config_path);
    }

    let db_path = config.resolved_db_path();
    let store = Store::open(&db_path)
        .with_context(|| format!("failed opening store: {}", db_path.display()))?;

    if let Commands::Report { output } = &cli.command {
        let report = store.department_summary()?;
        match output {
            OutputFormat::Table => println!("{}", render_report_table(&report)),
            OutputFormat::Json => println!("{}", render_json(&report)?),
            OutputFormat::Csv => print!("{}", report_to_csv(&report)?),
        }
        return Ok(());
    }

    let fetcher: Arc<dyn JsonFetcher> = Arc::new(HttpClient::from_config(&config.http)?);
    let mut summary = RunSummary::default();

    if matches!(cli.command, Commands::Fetch | Commands::Import) {
        let feed = fetch_feed(fetcher.as_ref(), &config.feed.url).await?;
        let importer = DirectoryImporter::new(&store, config.feed.property_prefix.clone());
        summary.centres_imported = importer.import(&feed)?;
        info!(centres = summary.centres_imported, "centre directory imported");
    }

    if matches!(cli.command, Commands::Fetch | Commands::Snapshot) {
        let registry = HarvesterRegistry::with_defaults(fetcher, config.doctolib_settings());
        let recorder = SnapshotRecorder::new(&store, &registry, config.harvest.batch_size);
        let today = Local::now().date_naive();
        let recorded = recorder.record(today).await?;
        summary = RunSummary {
            centres_imported: summary.centres_imported,
            ..recorded
        };
    }

    println!("{}", render_json(&summary)?);
    Ok(())
}

fn handle_config_command(
    init: bool,
    show: bool,
    config: &Config,
    config_path: &Path,
) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}
