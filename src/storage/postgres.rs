//! PostgreSQL/PostGIS record store.
//!
//! All geometries are stored in EPSG:4326. The pool holds a single
//! connection, so at most one statement is in flight per store.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};

use crate::error::Result;
use crate::models::{DatabaseConfig, RailRelation, RailWay, Station};
use crate::storage::{RecordStore, StoreOutcome};

const SCHEMA: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS osm_data_index (
    relcislo   BIGINT PRIMARY KEY,
    id         VARCHAR(16),
    nazevtrasy TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS osm_rails (
    gid      SERIAL PRIMARY KEY,
    relcislo BIGINT NOT NULL REFERENCES osm_data_index (relcislo),
    geom     GEOMETRY(LINESTRING, 4326) NOT NULL
);
CREATE INDEX IF NOT EXISTS osm_rails_geom_idx ON osm_rails USING GIST (geom);

CREATE TABLE IF NOT EXISTS osm_ways (
    id          BIGINT PRIMARY KEY,
    electrified TEXT,
    voltage     INTEGER,
    gauge       TEXT,
    maxspeed    INTEGER,
    tracks      INTEGER,
    usage       TEXT,
    geom        GEOMETRY(LINESTRING, 4326) NOT NULL
);
CREATE INDEX IF NOT EXISTS osm_ways_geom_idx ON osm_ways USING GIST (geom);

CREATE TABLE IF NOT EXISTS all_stations (
    id   BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    geom GEOMETRY(POINT, 4326) NOT NULL
);
CREATE INDEX IF NOT EXISTS all_stations_geom_idx ON all_stations USING GIST (geom);
"#;

/// Record store writing to PostgreSQL with the PostGIS extension.
pub struct PgStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PgStore {
    /// Connect using the configured URL.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&config.url)
            .await?;
        log::info!("Connected to database");
        Ok(Self::from_pool(pool, config.insert_chunk_size))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        log::debug!("Schema ready");
        Ok(())
    }

    async fn relation_exists(&self, relation_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM osm_data_index WHERE relcislo = $1)",
        )
        .bind(relation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_relation(&self, relation: &RailRelation) -> Result<StoreOutcome> {
        let mut tx = self.pool.begin().await?;

        let indexed = sqlx::query(
            r#"
            INSERT INTO osm_data_index (relcislo, id, nazevtrasy)
            VALUES ($1, $2, $3)
            ON CONFLICT (relcislo) DO NOTHING
            "#,
        )
        .bind(relation.relation_id)
        .bind(&relation.route_ref)
        .bind(&relation.name)
        .execute(&mut *tx)
        .await?;

        if indexed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(StoreOutcome::Skipped);
        }

        for chunk in relation.lines.chunks(self.chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO osm_rails (relcislo, geom) ");
            query_builder.push_values(chunk, |mut b, line| {
                b.push_bind(relation.relation_id)
                    .push("ST_GeomFromText(")
                    .push_bind_unseparated(line.to_wkt())
                    .push_unseparated(", 4326)");
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(StoreOutcome::Written)
    }

    async fn existing_way_ids(&self) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM osm_ways")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn insert_ways(&self, ways: &[RailWay]) -> Result<u64> {
        let mut written = 0;
        for chunk in ways.chunks(self.chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO osm_ways (
                    id,
                    electrified,
                    voltage,
                    gauge,
                    maxspeed,
                    tracks,
                    usage,
                    geom
                )
                "#,
            );

            query_builder.push_values(chunk, |mut b, way| {
                b.push_bind(way.id)
                    .push_bind(&way.electrified)
                    .push_bind(way.voltage)
                    .push_bind(&way.gauge)
                    .push_bind(way.maxspeed)
                    .push_bind(way.tracks)
                    .push_bind(&way.usage)
                    .push("ST_GeomFromText(")
                    .push_bind_unseparated(way.line.to_wkt())
                    .push_unseparated(", 4326)");
            });
            query_builder.push(" ON CONFLICT (id) DO NOTHING");

            written += query_builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(written)
    }

    async fn upsert_stations(&self, stations: &[Station]) -> Result<u64> {
        let mut written = 0;
        for chunk in stations.chunks(self.chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO all_stations (id, name, geom) ");

            query_builder.push_values(chunk, |mut b, station| {
                b.push_bind(station.id)
                    .push_bind(&station.name)
                    .push("ST_SetSRID(ST_MakePoint(")
                    .push_bind_unseparated(station.position.lon)
                    .push_unseparated(", ")
                    .push_bind_unseparated(station.position.lat)
                    .push_unseparated("), 4326)");
            });
            query_builder.push(" ON CONFLICT (id) DO NOTHING");

            written += query_builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(written)
    }

    async fn delete_duplicate_stations(&self, tolerance: f64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM all_stations a
            WHERE EXISTS (
                SELECT 1 FROM all_stations b
                WHERE b.id < a.id
                  AND (a.name = b.name OR ST_DWithin(a.geom, b.geom, $1))
            )
            "#,
        )
        .bind(tolerance)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LatLon, LineString};

    // These run against a scratch database created per test from
    // DATABASE_URL; the role needs to be able to create the postgis extension.

    async fn store(pool: PgPool, chunk_size: usize) -> PgStore {
        let store = PgStore::from_pool(pool, chunk_size);
        store.ensure_schema().await.unwrap();
        store
    }

    fn station(id: i64, name: &str, lat: f64, lon: f64) -> Station {
        Station {
            id,
            name: name.to_string(),
            position: LatLon { lat, lon },
        }
    }

    fn line(points: &[(f64, f64)]) -> LineString {
        LineString(points.iter().map(|&(lat, lon)| LatLon { lat, lon }).collect())
    }

    fn relation(id: i64, lines: Vec<LineString>) -> RailRelation {
        RailRelation {
            relation_id: id,
            route_ref: Some("010".into()),
            name: format!("Route {id}"),
            lines,
        }
    }

    async fn station_rows(pool: &PgPool) -> Vec<(i64, String)> {
        sqlx::query_as("SELECT id, name FROM all_stations ORDER BY id")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    async fn line_count(pool: &PgPool, relation_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM osm_rails WHERE relcislo = $1")
            .bind(relation_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = false)]
    #[ignore] // Requires a PostGIS database
    async fn test_schema_is_idempotent(pool: PgPool) {
        let store = store(pool, 10).await;
        store.ensure_schema().await.unwrap();
        assert!(!store.relation_exists(1).await.unwrap());
    }

    #[sqlx::test(migrations = false)]
    #[ignore] // Requires a PostGIS database
    async fn test_upsert_existing_station_is_noop(pool: PgPool) {
        let store = store(pool.clone(), 10).await;

        let first = store
            .upsert_stations(&[station(1, "Beroun", 49.96, 14.07)])
            .await
            .unwrap();
        let again = store
            .upsert_stations(&[station(1, "Renamed", 49.0, 14.0)])
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(again, 0);
        assert_eq!(station_rows(&pool).await, vec![(1, "Beroun".to_string())]);
    }

    #[sqlx::test(migrations = false)]
    #[ignore] // Requires a PostGIS database
    async fn test_dedup_keeps_lower_key_by_name_and_distance(pool: PgPool) {
        // Chunk size 2 spreads the batch over several statements.
        let store = store(pool.clone(), 2).await;
        store
            .upsert_stations(&[
                station(7, "Kolín", 50.0, 15.0),
                station(3, "Kolín", 50.5, 15.5),
                station(4, "Pečky", 50.09, 15.03),
                station(9, "Pečky zastávka", 50.0905, 15.0302),
                station(12, "Velim", 50.06, 15.11),
            ])
            .await
            .unwrap();

        let removed = store.delete_duplicate_stations(0.001).await.unwrap();
        let ids: Vec<i64> = station_rows(&pool).await.into_iter().map(|(id, _)| id).collect();

        assert_eq!(removed, 2);
        assert_eq!(ids, vec![3, 4, 12]);
        assert_eq!(store.delete_duplicate_stations(0.001).await.unwrap(), 0);
    }

    #[sqlx::test(migrations = false)]
    #[ignore] // Requires a PostGIS database
    async fn test_relation_insert_skips_indexed_route(pool: PgPool) {
        let store = store(pool.clone(), 1).await;
        let segment = line(&[(50.0, 14.0), (50.1, 14.1)]);

        let first = store
            .insert_relation(&relation(11, vec![segment.clone(), segment.clone()]))
            .await
            .unwrap();
        let again = store
            .insert_relation(&relation(11, vec![segment.clone(); 4]))
            .await
            .unwrap();

        assert_eq!(first, StoreOutcome::Written);
        assert_eq!(again, StoreOutcome::Skipped);
        assert!(store.relation_exists(11).await.unwrap());
        assert_eq!(line_count(&pool, 11).await, 2);
    }

    #[sqlx::test(migrations = false)]
    #[ignore] // Requires a PostGIS database
    async fn test_failed_line_insert_rolls_back_route(pool: PgPool) {
        let store = store(pool.clone(), 1).await;
        // A single point is not a valid LINESTRING, so the second chunk fails.
        let lines = vec![line(&[(50.0, 14.0), (50.1, 14.1)]), line(&[(50.2, 14.2)])];

        let result = store.insert_relation(&relation(21, lines)).await;

        assert!(result.is_err());
        assert!(!store.relation_exists(21).await.unwrap());
        assert_eq!(line_count(&pool, 21).await, 0);
    }

    #[sqlx::test(migrations = false)]
    #[ignore] // Requires a PostGIS database
    async fn test_insert_ways_skips_known_ids(pool: PgPool) {
        let store = store(pool, 1).await;
        let way = |id| RailWay {
            id,
            electrified: Some("contact_line".into()),
            voltage: Some(3000),
            gauge: Some("1435".into()),
            maxspeed: Some(160),
            tracks: Some(2),
            usage: Some("main".into()),
            line: line(&[(50.0, 14.0), (50.1, 14.1)]),
        };

        assert_eq!(store.insert_ways(&[way(1), way(2)]).await.unwrap(), 2);
        assert_eq!(store.insert_ways(&[way(2), way(3)]).await.unwrap(), 1);
        assert_eq!(
            store.existing_way_ids().await.unwrap(),
            HashSet::from([1, 2, 3])
        );
    }
}
