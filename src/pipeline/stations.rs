// src/pipeline/stations.rs

//! Stations, halts and stops.

use crate::error::Result;
use crate::models::{Config, ImportSummary, Station};
use crate::services::OverpassClient;
use crate::storage::RecordStore;
use crate::utils::http::FetchClient;

/// Import named station nodes, then remove duplicates.
///
/// Existing ids are left untouched. After the insert, every station with
/// a lower-id twin (same name, or within `dedup_tolerance_deg`) is deleted.
pub async fn run_stations(
    config: &Config,
    client: &FetchClient,
    store: &dyn RecordStore,
) -> Result<ImportSummary> {
    store.ensure_schema().await?;

    log::info!(
        "Downloading {} in {} (this may take a while)",
        config.overpass.station_kinds.join("/"),
        config.overpass.country_iso
    );
    let nodes = OverpassClient::new(client, &config.overpass)
        .stations()
        .await?;

    let stations: Vec<Station> = nodes.iter().filter_map(Station::from_node).collect();
    let mut summary = ImportSummary {
        received: nodes.len(),
        rejected: nodes.len() - stations.len(),
        ..ImportSummary::default()
    };
    if summary.rejected > 0 {
        log::debug!("{} nodes without a name skipped", summary.rejected);
    }

    log::info!("Inserting {} stations", stations.len());
    summary.inserted = store.upsert_stations(&stations).await?;
    summary.existing = stations.len().saturating_sub(summary.inserted as usize);
    summary.deduplicated = store
        .delete_duplicate_stations(config.overpass.dedup_tolerance_deg)
        .await?;

    log::info!(
        "Stations: {} inserted, {} already stored, {} duplicates removed",
        summary.inserted,
        summary.existing,
        summary.deduplicated
    );
    Ok(summary)
}
