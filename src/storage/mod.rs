//! Persistence sinks for fetched payloads and imported records.
//!
//! Two families, both idempotent so that re-running a pipeline converges
//! instead of duplicating:
//!
//! - [`PayloadSink`]: one opaque payload per key (tile files on disk).
//!   A key that already exists is skipped.
//! - [`RecordStore`]: typed map records in relational tables. Keys that
//!   already exist are left untouched; stations additionally go through a
//!   deduplication pass.
//!
//! ## Table layout
//!
//! ```text
//! osm_data_index (relcislo PK, id, nazevtrasy)   one row per railway route
//! osm_rails      (gid, relcislo FK, geom)        line geometries of a route
//! osm_ways       (id PK, attributes…, geom)      individual track ways
//! all_stations   (id PK, name, geom)             stations, halts, stops
//! ```

pub mod local;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{RailRelation, RailWay, Station};

// Re-export for convenience
pub use local::FileSink;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// What a store call did with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Written,
    Skipped,
}

/// Key-addressed destination for fetched payloads.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Whether a destination for `key` already exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Persist `payload` under `key` unless the key already exists.
    async fn store(&self, key: &str, payload: &[u8]) -> Result<StoreOutcome>;
}

/// Relational destination for imported map records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create tables and spatial indexes that do not exist yet.
    async fn ensure_schema(&self) -> Result<()>;

    /// Whether a route index row exists for `relation_id`.
    async fn relation_exists(&self, relation_id: i64) -> Result<bool>;

    /// Insert the route index row and all of its line rows as one unit.
    /// Returns [`StoreOutcome::Skipped`] if the route is already indexed.
    async fn insert_relation(&self, relation: &RailRelation) -> Result<StoreOutcome>;

    /// Ids of every stored track way.
    async fn existing_way_ids(&self) -> Result<HashSet<i64>>;

    /// Insert ways whose id is not stored yet. Returns rows written.
    async fn insert_ways(&self, ways: &[RailWay]) -> Result<u64>;

    /// Insert stations, doing nothing for ids already stored. Returns rows written.
    async fn upsert_stations(&self, stations: &[Station]) -> Result<u64>;

    /// Delete every station that has a lower-id station with the same name
    /// or within `tolerance` degrees. Returns rows removed.
    async fn delete_duplicate_stations(&self, tolerance: f64) -> Result<u64>;
}

/// Ids a deduplication pass removes from `stations`.
///
/// A station is removed when any station with a lower id, taken from the
/// same snapshot, matches it by name or proximity. The lower id is the one
/// kept, and the result does not depend on input order.
pub fn duplicate_station_ids(stations: &[Station], tolerance: f64) -> HashSet<i64> {
    let mut sorted: Vec<&Station> = stations.iter().collect();
    sorted.sort_by_key(|s| s.id);

    let mut doomed = HashSet::new();
    for (i, candidate) in sorted.iter().enumerate() {
        if sorted[..i]
            .iter()
            .any(|lower| lower.id < candidate.id && candidate.is_duplicate_of(lower, tolerance))
        {
            doomed.insert(candidate.id);
        }
    }
    doomed
}
