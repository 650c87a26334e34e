//! geoimport CLI
//!
//! Local execution entry point for the tile download and the map imports.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use geoimport::{
    error::{AppError, Result},
    models::{Config, ImportSummary, Manifest},
    pipeline::{self, Import, TileOptions},
    storage::{MemoryStore, RecordStore},
    utils::http::FetchClient,
};

/// geoimport - Elevation tile and railway map importer
#[derive(Parser, Debug)]
#[command(
    name = "geoimport",
    version,
    about = "Downloads elevation tiles and imports railway map data into PostGIS"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Run every database import in sequence (same as the `all` command).
    /// Cannot be combined with a command.
    #[arg(short, long)]
    all: bool,

    /// Without a command, an interactive menu picks the database import
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate the tile registry and download every missing tile
    Tiles {
        /// Start downloading without asking for confirmation
        #[arg(short = 'y', long)]
        yes: bool,

        /// Output directory (default: atom.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Fragment file (default: atom.manifest_file)
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Import catalogued railway routes
    Rails {
        /// Run against an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Import individual rail ways
    Ways {
        /// Run against an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Import stations, halts and stops
    Stations {
        /// Run against an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Run rails, ways and stations in sequence
    All {
        /// Run against an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show tile download progress
    Info {
        /// Output directory (default: atom.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Fragment file (default: atom.manifest_file)
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

impl Cli {
    /// The command to run. `None` means the interactive menu.
    fn selected(&mut self) -> std::result::Result<Option<Command>, clap::Error> {
        match (self.command.take(), self.all) {
            (Some(_), true) => Err(Cli::command().error(
                ErrorKind::ArgumentConflict,
                "-a/--all cannot be combined with a command",
            )),
            (Some(command), false) => Ok(Some(command)),
            (None, true) => Ok(Some(Command::All { dry_run: false })),
            (None, false) => Ok(None),
        }
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let selected = cli.selected().unwrap_or_else(|e| e.exit());
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    log::debug!("Loaded configuration from {}", cli.config.display());
    let show_progress = !cli.quiet;

    let command = match selected {
        Some(command) => command,
        None => match choose_import()? {
            Some(import) => return run_import(&config, import, false, show_progress).await,
            None => {
                log::info!("Nothing selected");
                return Ok(());
            }
        },
    };

    match command {
        Command::Tiles {
            yes,
            output,
            manifest,
        } => {
            let client = FetchClient::new(&config.http)?;
            let options = TileOptions {
                assume_yes: yes,
                show_progress,
                output_dir: output,
                manifest_file: manifest,
            };

            match pipeline::run_tiles(&config, &client, &options, confirm_download).await? {
                Some(report) => log::info!(
                    "Tiles complete: {} downloaded, {} already present",
                    report.fetched,
                    report.skipped
                ),
                None => return Ok(()),
            }
        }

        Command::Rails { dry_run } => {
            run_import(&config, Import::Rails, dry_run, show_progress).await?
        }
        Command::Ways { dry_run } => run_import(&config, Import::Ways, dry_run, show_progress).await?,
        Command::Stations { dry_run } => {
            run_import(&config, Import::Stations, dry_run, show_progress).await?
        }

        Command::All { dry_run } => {
            let store = open_store(&config, dry_run).await?;
            let client = FetchClient::new(&config.http)?;
            let summaries = pipeline::run_all(&config, &client, store.as_ref(), show_progress).await?;
            for (import, summary) in &summaries {
                report_summary(*import, summary);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            if config.overpass.rail_network_relation.is_none() {
                log::warn!("overpass.rail_network_relation is not set; the rails import will fail");
            }

            log::info!("All validations passed!");
        }

        Command::Info { output, manifest } => {
            let options = TileOptions {
                output_dir: output,
                manifest_file: manifest,
                ..TileOptions::default()
            };
            let status = pipeline::tile_status(&config, &options).await?;
            log::info!("Config file: {}", cli.config.display());
            log::info!(
                "Registry index: {}",
                if status.registry_cached {
                    "cached"
                } else {
                    "not cached"
                }
            );
            if status.manifest_present {
                log::info!(
                    "Fragment file {}: {} tiles, {} downloaded, {} remaining",
                    status.manifest_file.display(),
                    status.entries,
                    status.present,
                    status.entries - status.present
                );
            } else {
                log::info!("Fragment file {} not built yet.", status.manifest_file.display());
            }
        }
    }

    log::info!("Done!");

    Ok(())
}

/// Numbered menu of the database imports. `None` when dismissed.
fn choose_import() -> Result<Option<Import>> {
    let items: Vec<String> = Import::ALL
        .iter()
        .enumerate()
        .map(|(i, import)| format!("{}. {}", i + 1, import.describe()))
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What do you want to import?")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(AppError::prompt)?;

    Ok(selection.map(|i| Import::ALL[i]))
}

fn confirm_download(manifest: &Manifest) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Download {} tiles?", manifest.len()))
        .default(true)
        .interact()
        .map_err(AppError::prompt)
}

async fn run_import(
    config: &Config,
    import: Import,
    dry_run: bool,
    show_progress: bool,
) -> Result<()> {
    let store = open_store(config, dry_run).await?;
    let client = FetchClient::new(&config.http)?;
    let summary = import
        .run(config, &client, store.as_ref(), show_progress)
        .await?;
    report_summary(import, &summary);
    Ok(())
}

async fn open_store(config: &Config, dry_run: bool) -> Result<Box<dyn RecordStore>> {
    if dry_run {
        log::info!("Dry run: records go to an in-memory store");
        return Ok(Box::new(MemoryStore::new()));
    }
    connect(config).await
}

#[cfg(feature = "postgres")]
async fn connect(config: &Config) -> Result<Box<dyn RecordStore>> {
    let store = geoimport::storage::PgStore::connect(&config.database).await?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn connect(_config: &Config) -> Result<Box<dyn RecordStore>> {
    Err(AppError::config(
        "built without the postgres feature; use --dry-run",
    ))
}

fn report_summary(import: Import, summary: &ImportSummary) {
    log::info!(
        "{}: {} received, {} inserted, {} already stored, {} skipped, {} duplicates removed",
        import,
        summary.received,
        summary.inserted,
        summary.existing,
        summary.rejected,
        summary.deduplicated
    );
}
