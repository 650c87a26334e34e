//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
///
/// Built once per process and handed to every pipeline by reference.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP client and retry behavior
    #[serde(default)]
    pub http: HttpConfig,

    /// Elevation tile registry (atom feed) settings
    #[serde(default)]
    pub atom: AtomConfig,

    /// Map query service settings
    #[serde(default)]
    pub overpass: OverpassConfig,

    /// Target database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.database.apply_env();
        Ok(config)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            let mut config = Self::default();
            config.database.apply_env();
            config
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.query_timeout_secs == 0 || self.http.download_timeout_secs == 0 {
            return Err(AppError::validation(
                "http.query_timeout_secs and http.download_timeout_secs must be > 0",
            ));
        }
        if self.http.max_concurrent == 0 {
            return Err(AppError::validation("http.max_concurrent must be > 0"));
        }
        if self.http.retry.max_attempts == 0 {
            return Err(AppError::validation("http.retry.max_attempts must be > 0"));
        }
        if self.http.retry.retry_statuses.is_empty() {
            return Err(AppError::validation("http.retry.retry_statuses is empty"));
        }
        if self.atom.feed_url.trim().is_empty() {
            return Err(AppError::validation("atom.feed_url is empty"));
        }
        if self.overpass.station_kinds.is_empty() {
            return Err(AppError::validation("overpass.station_kinds is empty"));
        }
        if !(self.overpass.dedup_tolerance_deg > 0.0) {
            return Err(AppError::validation(
                "overpass.dedup_tolerance_deg must be > 0",
            ));
        }
        if self.database.insert_chunk_size == 0 {
            return Err(AppError::validation(
                "database.insert_chunk_size must be > 0",
            ));
        }
        Ok(())
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds for registry and relation lookups
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Timeout in seconds for a single map query (country-wide queries are slow)
    #[serde(default = "defaults::query_timeout")]
    pub query_timeout_secs: u64,

    /// Timeout in seconds for a single tile download
    #[serde(default = "defaults::download_timeout")]
    pub download_timeout_secs: u64,

    /// Maximum in-flight downloads in the tile pipeline
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Retry policy shared by every fetch
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            query_timeout_secs: defaults::query_timeout(),
            download_timeout_secs: defaults::download_timeout(),
            max_concurrent: defaults::max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, first try included
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt; doubles after each failure
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,

    /// Response statuses treated as transient
    #[serde(default = "defaults::retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
            retry_statuses: defaults::retry_statuses(),
        }
    }
}

/// Elevation tile registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomConfig {
    /// Root descriptor listing the per-region sub-indexes
    #[serde(default = "defaults::feed_url")]
    pub feed_url: String,

    /// Local copy of the root descriptor
    #[serde(default = "defaults::registry_cache")]
    pub registry_cache: PathBuf,

    /// Newline-delimited list of tile URLs
    #[serde(default = "defaults::manifest_file")]
    pub manifest_file: PathBuf,

    /// Directory receiving the tile files
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,

    /// Attribute name fragment that marks a sub-index URL on `Query` elements
    #[serde(default = "defaults::sub_index_attribute")]
    pub sub_index_attribute: String,
}

impl Default for AtomConfig {
    fn default() -> Self {
        Self {
            feed_url: defaults::feed_url(),
            registry_cache: defaults::registry_cache(),
            manifest_file: defaults::manifest_file(),
            output_dir: defaults::output_dir(),
            sub_index_attribute: defaults::sub_index_attribute(),
        }
    }
}

/// Map query service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverpassConfig {
    /// Query endpoint accepting Overpass QL as POST body
    #[serde(default = "defaults::overpass_endpoint")]
    pub endpoint: String,

    /// Read-only map API used for plain relation lookups
    #[serde(default = "defaults::static_api")]
    pub static_api: String,

    /// ISO 3166-1 code of the country area to query
    #[serde(default = "defaults::country_iso")]
    pub country_iso: String,

    /// Relation grouping every railway route of the country
    #[serde(default)]
    pub rail_network_relation: Option<i64>,

    /// `railway=*` values imported as stations
    #[serde(default = "defaults::station_kinds")]
    pub station_kinds: Vec<String>,

    /// Distance in coordinate degrees under which two stations are one
    #[serde(default = "defaults::dedup_tolerance")]
    pub dedup_tolerance_deg: f64,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::overpass_endpoint(),
            static_api: defaults::static_api(),
            country_iso: defaults::country_iso(),
            rail_network_relation: None,
            station_kinds: defaults::station_kinds(),
            dedup_tolerance_deg: defaults::dedup_tolerance(),
        }
    }
}

/// Target database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; `DATABASE_URL` overrides it
    #[serde(default = "defaults::database_url")]
    pub url: String,

    /// Rows per multi-row INSERT statement
    #[serde(default = "defaults::insert_chunk_size")]
    pub insert_chunk_size: usize,
}

impl DatabaseConfig {
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.url = url;
            }
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::database_url(),
            insert_chunk_size: defaults::insert_chunk_size(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // HTTP defaults
    pub fn user_agent() -> String {
        concat!("geoimport/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        60
    }
    pub fn query_timeout() -> u64 {
        900
    }
    pub fn download_timeout() -> u64 {
        600
    }
    pub fn max_concurrent() -> usize {
        100
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        5
    }
    pub fn backoff_base() -> u64 {
        1_000
    }
    pub fn backoff_max() -> u64 {
        120_000
    }
    pub fn retry_statuses() -> Vec<u16> {
        vec![502, 503, 504]
    }

    // Atom defaults
    pub fn feed_url() -> String {
        "https://atom.cuzk.cz/DMR5G-SJTSK/OSD-DMR5G-SJTSK.xml".into()
    }
    pub fn registry_cache() -> PathBuf {
        std::env::temp_dir().join("dmr5g-atom.xml")
    }
    pub fn manifest_file() -> PathBuf {
        PathBuf::from("dmr5g-fragments.txt")
    }
    pub fn output_dir() -> PathBuf {
        PathBuf::from("output")
    }
    pub fn sub_index_attribute() -> String {
        "spatial_dataset_identifier_code".into()
    }

    // Overpass defaults
    pub fn overpass_endpoint() -> String {
        "https://overpass-api.de/api/interpreter".into()
    }
    pub fn static_api() -> String {
        "https://api.openstreetmap.org/api/0.6".into()
    }
    pub fn country_iso() -> String {
        "CZ".into()
    }
    pub fn station_kinds() -> Vec<String> {
        vec!["station".into(), "halt".into(), "stop".into()]
    }
    pub fn dedup_tolerance() -> f64 {
        0.001
    }

    // Database defaults
    pub fn database_url() -> String {
        "postgres://postgres@localhost/geodata".into()
    }
    pub fn insert_chunk_size() -> usize {
        1_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.http.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.http.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_query_timeout() {
        let mut config = Config::default();
        config.http.query_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_retry_set() {
        let mut config = Config::default();
        config.http.retry.retry_statuses.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_positive_tolerance() {
        let mut config = Config::default();
        config.overpass.dedup_tolerance_deg = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [http]
            max_concurrent = 8

            [overpass]
            rail_network_relation = 1234
            "#,
        )
        .unwrap();

        assert_eq!(config.http.max_concurrent, 8);
        assert_eq!(config.http.timeout_secs, 60);
        assert_eq!(config.http.query_timeout_secs, 900);
        assert_eq!(config.http.download_timeout_secs, 600);
        assert_eq!(config.http.retry.max_attempts, 5);
        assert_eq!(config.http.retry.retry_statuses, vec![502, 503, 504]);
        assert_eq!(config.overpass.rail_network_relation, Some(1234));
        assert_eq!(config.overpass.country_iso, "CZ");
        assert_eq!(config.atom.output_dir, PathBuf::from("output"));
    }
}
