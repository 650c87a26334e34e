// src/pipeline/tiles.rs

//! Elevation tile download pipeline.
//!
//! 1. Reuse the manifest checkpoint if present, otherwise enumerate the
//!    registry and write it.
//! 2. Ask for confirmation unless told not to.
//! 3. Download every tile whose file is missing.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::models::{Config, Manifest};
use crate::pipeline::batch::{BatchFetcher, BatchReport};
use crate::services::AtomEnumerator;
use crate::storage::local::{read_optional, write_atomic};
use crate::storage::{FileSink, PayloadSink};
use crate::utils::http::FetchClient;

/// Run-time switches for the tile pipeline.
#[derive(Debug, Clone, Default)]
pub struct TileOptions {
    /// Skip the confirmation gate before downloading
    pub assume_yes: bool,
    pub show_progress: bool,
    /// Overrides `atom.output_dir`
    pub output_dir: Option<PathBuf>,
    /// Overrides `atom.manifest_file`
    pub manifest_file: Option<PathBuf>,
}

impl TileOptions {
    fn output_dir(&self, config: &Config) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| config.atom.output_dir.clone())
    }

    fn manifest_file(&self, config: &Config) -> PathBuf {
        self.manifest_file
            .clone()
            .unwrap_or_else(|| config.atom.manifest_file.clone())
    }
}

/// Resume state of the tile pipeline, as reported by `info`.
#[derive(Debug, Clone, Serialize)]
pub struct TileStatus {
    pub manifest_file: PathBuf,
    pub manifest_present: bool,
    pub registry_cached: bool,
    pub entries: usize,
    pub present: usize,
}

/// Load the manifest checkpoint, or enumerate the registry and write one.
///
/// An existing checkpoint is reused verbatim. A failed enumeration leaves
/// no checkpoint behind.
pub async fn load_or_build_manifest(
    config: &Config,
    client: &FetchClient,
    options: &TileOptions,
) -> Result<Manifest> {
    let manifest_file = options.manifest_file(config);
    if let Some(bytes) = read_optional(&manifest_file).await? {
        let manifest = Manifest::parse(&String::from_utf8_lossy(&bytes))?;
        log::info!(
            "Fragment file {} already exists ({} entries)",
            manifest_file.display(),
            manifest.len()
        );
        return Ok(manifest);
    }

    log::info!("Fragment file not found, enumerating the registry");
    let manifest = AtomEnumerator::new(client, &config.atom)
        .with_progress(options.show_progress)
        .enumerate()
        .await?;
    write_atomic(&manifest_file, manifest.to_text().as_bytes()).await?;
    log::info!("Fragment file {} written", manifest_file.display());
    Ok(manifest)
}

/// Run the whole pipeline. `confirm` is asked before downloading unless
/// `options.assume_yes` is set; returns `None` when it declines.
pub async fn run_tiles<F>(
    config: &Config,
    client: &FetchClient,
    options: &TileOptions,
    confirm: F,
) -> Result<Option<BatchReport>>
where
    F: FnOnce(&Manifest) -> Result<bool>,
{
    let manifest = load_or_build_manifest(config, client, options).await?;

    if !options.assume_yes && !confirm(&manifest)? {
        log::info!("Download cancelled");
        return Ok(None);
    }

    let sink = FileSink::new(options.output_dir(config));
    let report = BatchFetcher::new(client, &sink, config.http.max_concurrent)
        .with_progress(options.show_progress)
        .run(manifest.refs())
        .await?;
    Ok(Some(report))
}

/// Inspect the checkpoint and output directory without touching the network.
pub async fn tile_status(config: &Config, options: &TileOptions) -> Result<TileStatus> {
    let manifest_file = options.manifest_file(config);
    let registry_cached = tokio::fs::try_exists(&config.atom.registry_cache).await?;

    let Some(bytes) = read_optional(&manifest_file).await? else {
        return Ok(TileStatus {
            manifest_file,
            manifest_present: false,
            registry_cached,
            entries: 0,
            present: 0,
        });
    };

    let manifest = Manifest::parse(&String::from_utf8_lossy(&bytes))?;
    let sink = FileSink::new(options.output_dir(config));
    let mut present = 0;
    for r in manifest.refs() {
        if sink.exists(&r.key).await? {
            present += 1;
        }
    }

    Ok(TileStatus {
        manifest_file,
        manifest_present: true,
        registry_cached,
        entries: manifest.len(),
        present,
    })
}
