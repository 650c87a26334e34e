//! Pipeline entry points.
//!
//! - `run_tiles`: Enumerate the elevation tile registry and download tiles
//! - `run_rails`, `run_ways`, `run_stations`: Query the map service and
//!   upsert into a record store

pub mod batch;
pub mod rails;
pub mod stations;
pub mod tiles;
pub mod ways;

use std::fmt;

pub use batch::{BatchFetcher, BatchReport};
pub use rails::run_rails;
pub use stations::run_stations;
pub use tiles::{TileOptions, TileStatus, load_or_build_manifest, run_tiles, tile_status};
pub use ways::run_ways;

use crate::error::Result;
use crate::models::{Config, ImportSummary};
use crate::storage::RecordStore;
use crate::utils::http::FetchClient;

/// The query-and-upsert imports, in the order `all` runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Import {
    Rails,
    Ways,
    Stations,
}

impl Import {
    pub const ALL: [Import; 3] = [Import::Rails, Import::Ways, Import::Stations];

    /// Menu label.
    pub fn describe(&self) -> &'static str {
        match self {
            Import::Rails => "All railway routes (numbered and catalogued)",
            Import::Ways => "All rail ways (individual track pieces with metadata)",
            Import::Stations => "All stations, halts and stops",
        }
    }

    pub async fn run(
        &self,
        config: &Config,
        client: &FetchClient,
        store: &dyn RecordStore,
        show_progress: bool,
    ) -> Result<ImportSummary> {
        match self {
            Import::Rails => run_rails(config, client, store, show_progress).await,
            Import::Ways => run_ways(config, client, store).await,
            Import::Stations => run_stations(config, client, store).await,
        }
    }
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Import::Rails => "rails",
            Import::Ways => "ways",
            Import::Stations => "stations",
        };
        f.write_str(name)
    }
}

/// Run every import in sequence, stopping at the first failure.
pub async fn run_all(
    config: &Config,
    client: &FetchClient,
    store: &dyn RecordStore,
    show_progress: bool,
) -> Result<Vec<(Import, ImportSummary)>> {
    let mut summaries = Vec::with_capacity(Import::ALL.len());
    for import in Import::ALL {
        log::info!("Running {} import", import);
        let summary = import.run(config, client, store, show_progress).await?;
        summaries.push((import, summary));
    }
    Ok(summaries)
}
