// src/pipeline/rails.rs

//! Catalogued railway routes.
//!
//! The country's rail network is one parent relation whose members are the
//! individual routes. Each route not yet indexed is fetched with its member
//! geometry and stored as an index row plus one line row per member way.

use crate::error::{AppError, Result};
use crate::models::{Config, ImportSummary, RailRelation};
use crate::services::OverpassClient;
use crate::storage::{RecordStore, StoreOutcome};
use crate::utils::http::FetchClient;
use crate::utils::progress::item_bar;

/// Import every route of the configured network relation.
pub async fn run_rails(
    config: &Config,
    client: &FetchClient,
    store: &dyn RecordStore,
    show_progress: bool,
) -> Result<ImportSummary> {
    let network_id = config.overpass.rail_network_relation.ok_or_else(|| {
        AppError::config("overpass.rail_network_relation must be set for the rails import")
    })?;

    store.ensure_schema().await?;

    let overpass = OverpassClient::new(client, &config.overpass);
    log::info!("Downloading rail network relation {}", network_id);
    let network = overpass.relation(network_id).await?;

    let mut summary = ImportSummary {
        received: network.members.len(),
        ..ImportSummary::default()
    };

    let progress = item_bar(
        network.members.len() as u64,
        "Importing routes",
        show_progress,
    );

    for member in &network.members {
        progress.inc(1);

        if member.kind != "relation" {
            log::warn!(
                "Network member {} is a {}, not a relation; ignored",
                member.reference,
                member.kind
            );
            summary.rejected += 1;
            continue;
        }

        let route_id = member.reference;
        if store.relation_exists(route_id).await? {
            summary.existing += 1;
            continue;
        }

        let Some(relation) = overpass.relation_with_geometry(route_id).await? else {
            log::warn!("Route {} not returned by the query service", route_id);
            summary.rejected += 1;
            continue;
        };

        if relation.is_abandoned() {
            log::debug!("Route {} is abandoned, skipping", route_id);
            summary.rejected += 1;
            continue;
        }

        let Some(route) = RailRelation::from_relation(&relation) else {
            summary.rejected += 1;
            continue;
        };

        match store.insert_relation(&route).await? {
            StoreOutcome::Written => summary.inserted += 1,
            StoreOutcome::Skipped => summary.existing += 1,
        }
    }

    progress.finish_and_clear();
    log::info!(
        "Routes: {} inserted, {} already indexed, {} skipped",
        summary.inserted,
        summary.existing,
        summary.rejected
    );
    Ok(summary)
}
