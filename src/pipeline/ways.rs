// src/pipeline/ways.rs

//! Individual rail track ways with their operational attributes.

use crate::error::Result;
use crate::models::{Config, ImportSummary, RailWay};
use crate::services::OverpassClient;
use crate::storage::RecordStore;
use crate::utils::http::FetchClient;

/// Import every `railway=rail` way of the configured country whose id is
/// not stored yet.
pub async fn run_ways(
    config: &Config,
    client: &FetchClient,
    store: &dyn RecordStore,
) -> Result<ImportSummary> {
    store.ensure_schema().await?;

    log::info!(
        "Downloading all rail ways in {} (this may take a while)",
        config.overpass.country_iso
    );
    let ways = OverpassClient::new(client, &config.overpass)
        .rail_ways()
        .await?;
    let existing = store.existing_way_ids().await?;

    let mut summary = ImportSummary {
        received: ways.len(),
        ..ImportSummary::default()
    };

    let mut pending = Vec::new();
    for way in &ways {
        if existing.contains(&way.id) {
            summary.existing += 1;
            continue;
        }
        match RailWay::from_way(way) {
            Some(rail) => pending.push(rail),
            None => summary.rejected += 1,
        }
    }

    if !pending.is_empty() {
        log::info!("Inserting {} ways", pending.len());
        summary.inserted = store.insert_ways(&pending).await?;
    }

    log::info!(
        "Ways: {} inserted, {} already stored, {} skipped",
        summary.inserted,
        summary.existing,
        summary.rejected
    );
    Ok(summary)
}
