//! In-process record store.
//!
//! Holds the same tables as the PostgreSQL store in memory. Used for
//! `--dry-run` imports and as the reference behavior in tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{LineString, RailRelation, RailWay, Station};
use crate::storage::{RecordStore, StoreOutcome, duplicate_station_ids};

#[derive(Debug, Default)]
struct Tables {
    route_index: BTreeMap<i64, (Option<String>, String)>,
    route_lines: Vec<(i64, LineString)>,
    ways: BTreeMap<i64, RailWay>,
    stations: BTreeMap<i64, Station>,
}

/// Record store backed by in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        // A poisoned lock still holds consistent tables: every mutation
        // below completes before it can panic.
        let mut guard = match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn route_count(&self) -> usize {
        self.with_tables(|t| t.route_index.len())
    }

    pub fn route_line_count(&self, relation_id: i64) -> usize {
        self.with_tables(|t| {
            t.route_lines
                .iter()
                .filter(|(id, _)| *id == relation_id)
                .count()
        })
    }

    pub fn way_count(&self) -> usize {
        self.with_tables(|t| t.ways.len())
    }

    /// Stored stations ordered by id.
    pub fn stations(&self) -> Vec<Station> {
        self.with_tables(|t| t.stations.values().cloned().collect())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn relation_exists(&self, relation_id: i64) -> Result<bool> {
        Ok(self.with_tables(|t| t.route_index.contains_key(&relation_id)))
    }

    async fn insert_relation(&self, relation: &RailRelation) -> Result<StoreOutcome> {
        Ok(self.with_tables(|t| {
            if t.route_index.contains_key(&relation.relation_id) {
                return StoreOutcome::Skipped;
            }
            t.route_index.insert(
                relation.relation_id,
                (relation.route_ref.clone(), relation.name.clone()),
            );
            t.route_lines.extend(
                relation
                    .lines
                    .iter()
                    .map(|line| (relation.relation_id, line.clone())),
            );
            StoreOutcome::Written
        }))
    }

    async fn existing_way_ids(&self) -> Result<HashSet<i64>> {
        Ok(self.with_tables(|t| t.ways.keys().copied().collect()))
    }

    async fn insert_ways(&self, ways: &[RailWay]) -> Result<u64> {
        Ok(self.with_tables(|t| {
            let mut written = 0;
            for way in ways {
                if !t.ways.contains_key(&way.id) {
                    t.ways.insert(way.id, way.clone());
                    written += 1;
                }
            }
            written
        }))
    }

    async fn upsert_stations(&self, stations: &[Station]) -> Result<u64> {
        Ok(self.with_tables(|t| {
            let mut written = 0;
            for station in stations {
                if !t.stations.contains_key(&station.id) {
                    t.stations.insert(station.id, station.clone());
                    written += 1;
                }
            }
            written
        }))
    }

    async fn delete_duplicate_stations(&self, tolerance: f64) -> Result<u64> {
        Ok(self.with_tables(|t| {
            let snapshot: Vec<Station> = t.stations.values().cloned().collect();
            let doomed = duplicate_station_ids(&snapshot, tolerance);
            t.stations.retain(|id, _| !doomed.contains(id));
            doomed.len() as u64
        }))
    }
}
