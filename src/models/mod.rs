// src/models/mod.rs

//! Domain models for the import pipelines.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod osm;
mod resource;

// Re-export all public types
pub use config::{AtomConfig, Config, DatabaseConfig, HttpConfig, OverpassConfig, RetryConfig};
pub use osm::{
    Element, ElementsResponse, LatLon, LineString, Member, Node, RailRelation, RailWay, Relation,
    Station, Tags, Way, normalize_route_ref,
};
pub use resource::{Fetched, Manifest, ResourceRef};

/// Counters reported by a query-and-upsert pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    /// Records returned by the remote query
    pub received: usize,
    /// Records already present in the store
    pub existing: usize,
    /// Records dropped as malformed or out of scope
    pub rejected: usize,
    /// Records written by this run
    pub inserted: u64,
    /// Records removed by a deduplication pass
    pub deduplicated: u64,
}
