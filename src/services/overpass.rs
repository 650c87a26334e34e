//! Map query service client.
//!
//! Overpass QL queries are POSTed to the configured endpoint and plain
//! relation lookups go to the read-only map API. Both go through the shared
//! [`FetchClient`], so they get the same bounded retry policy as tile
//! downloads.

use std::fmt::Write as _;

use crate::error::{AppError, Result};
use crate::models::{Element, ElementsResponse, Node, OverpassConfig, Relation, Way};
use crate::utils::http::FetchClient;

/// Query for one relation with the geometry of its members inlined.
pub fn relation_query(relation_id: i64) -> String {
    format!("[out:json];\n(\n  relation({relation_id});\n);\nout geom;\n")
}

/// Query for every `railway=rail` way inside a country.
pub fn country_ways_query(country_iso: &str) -> String {
    format!(
        "[out:json];\n\
         area[admin_level=2][\"ISO3166-1\"=\"{country_iso}\"]->.country;\n\
         (\n  way(area.country)[\"railway\"=\"rail\"];\n);\n\
         out geom;\n"
    )
}

/// Query for station-like nodes of the given `railway=*` kinds inside a country.
pub fn country_stations_query(country_iso: &str, kinds: &[String]) -> String {
    let mut query = format!(
        "[out:json];\narea[admin_level=2][\"ISO3166-1\"=\"{country_iso}\"]->.country;\n(\n"
    );
    for kind in kinds {
        let _ = writeln!(query, "  node(area.country)[\"railway\"=\"{kind}\"];");
    }
    query.push_str(");\nout;\n");
    query
}

/// Client for the map query service and the static map API.
pub struct OverpassClient<'a> {
    client: &'a FetchClient,
    config: &'a OverpassConfig,
}

impl<'a> OverpassClient<'a> {
    pub fn new(client: &'a FetchClient, config: &'a OverpassConfig) -> Self {
        Self { client, config }
    }

    /// POST an Overpass QL query and parse the element collection.
    pub async fn query(&self, ql: &str) -> Result<ElementsResponse> {
        log::debug!("Overpass query:\n{}", ql);
        let fetched = self.client.post(&self.config.endpoint, ql).await?;
        parse_elements(&self.config.endpoint, &fetched.bytes)
    }

    /// Fetch a relation from the static API, without member geometry.
    pub async fn relation(&self, relation_id: i64) -> Result<Relation> {
        let url = format!(
            "{}/relation/{}.json",
            self.config.static_api.trim_end_matches('/'),
            relation_id
        );
        let fetched = self.client.get(&url).await?;
        let response = parse_elements(&url, &fetched.bytes)?;

        response
            .elements
            .into_iter()
            .find_map(|e| match e {
                Element::Relation(r) if r.id == relation_id => Some(r),
                _ => None,
            })
            .ok_or_else(|| AppError::payload(url, format!("relation {relation_id} not found")))
    }

    /// Fetch a relation with its member geometry. `None` if the service
    /// does not know the relation.
    pub async fn relation_with_geometry(&self, relation_id: i64) -> Result<Option<Relation>> {
        let response = self.query(&relation_query(relation_id)).await?;
        Ok(response.elements.into_iter().find_map(|e| match e {
            Element::Relation(r) => Some(r),
            _ => None,
        }))
    }

    /// Every rail track way of the configured country.
    pub async fn rail_ways(&self) -> Result<Vec<Way>> {
        let response = self
            .query(&country_ways_query(&self.config.country_iso))
            .await?;
        Ok(only(response, |e| match e {
            Element::Way(w) => Some(w),
            _ => None,
        }))
    }

    /// Every station, halt and stop node of the configured country.
    pub async fn stations(&self) -> Result<Vec<Node>> {
        let response = self
            .query(&country_stations_query(
                &self.config.country_iso,
                &self.config.station_kinds,
            ))
            .await?;
        Ok(only(response, |e| match e {
            Element::Node(n) => Some(n),
            _ => None,
        }))
    }
}

fn parse_elements(source: &str, bytes: &[u8]) -> Result<ElementsResponse> {
    serde_json::from_slice(bytes).map_err(|e| AppError::payload(source, e))
}

fn only<T>(response: ElementsResponse, pick: impl Fn(Element) -> Option<T>) -> Vec<T> {
    let total = response.elements.len();
    let picked: Vec<T> = response.elements.into_iter().filter_map(pick).collect();
    if picked.len() < total {
        log::debug!("Ignored {} elements of another type", total - picked.len());
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http::tests::fast_config;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn overpass_config(server: &MockServer) -> OverpassConfig {
        OverpassConfig {
            endpoint: format!("{}/api/interpreter", server.uri()),
            static_api: format!("{}/api/0.6/", server.uri()),
            rail_network_relation: Some(1000),
            ..OverpassConfig::default()
        }
    }

    #[test]
    fn test_station_query_lists_each_kind() {
        let kinds = vec!["station".to_string(), "halt".to_string()];
        let query = country_stations_query("CZ", &kinds);
        assert!(query.starts_with("[out:json];"));
        assert!(query.contains(r#"["ISO3166-1"="CZ"]"#));
        assert!(query.contains(r#"node(area.country)["railway"="station"];"#));
        assert!(query.contains(r#"node(area.country)["railway"="halt"];"#));
        assert!(!query.contains("stop"));
        assert!(query.trim_end().ends_with("out;"));
    }

    #[test]
    fn test_relation_query() {
        let query = relation_query(42);
        assert!(query.contains("relation(42);"));
        assert!(query.contains("out geom;"));
    }

    #[tokio::test]
    async fn test_static_relation_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0.6/relation/1000.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"version": "0.6", "elements": [{
                    "type": "relation", "id": 1000,
                    "members": [
                        {"type": "relation", "ref": 11, "role": ""},
                        {"type": "relation", "ref": 12, "role": ""}
                    ],
                    "tags": {"name": "Železniční síť"}
                }]}"#,
            ))
            .mount(&server)
            .await;

        let config = overpass_config(&server);
        let fetch = FetchClient::new(&fast_config(2)).unwrap();
        let relation = OverpassClient::new(&fetch, &config)
            .relation(1000)
            .await
            .unwrap();

        let refs: Vec<i64> = relation.members.iter().map(|m| m.reference).collect();
        assert_eq!(refs, vec![11, 12]);
    }

    #[tokio::test]
    async fn test_query_retries_transient_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/interpreter"))
            .respond_with(ResponseTemplate::new(504))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/interpreter"))
            .and(body_string_contains(r#"["railway"="rail"]"#))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"elements": [
                    {"type": "way", "id": 5, "geometry": [{"lat": 50.0, "lon": 14.0}]},
                    {"type": "node", "id": 6, "lat": 50.0, "lon": 14.0}
                ]}"#,
            ))
            .mount(&server)
            .await;

        let config = overpass_config(&server);
        let fetch = FetchClient::new(&fast_config(3)).unwrap();
        let ways = OverpassClient::new(&fetch, &config).rail_ways().await.unwrap();

        assert_eq!(ways.len(), 1);
        assert_eq!(ways[0].id, 5);
    }

    #[tokio::test]
    async fn test_unknown_relation_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"elements": []}"#))
            .mount(&server)
            .await;

        let config = overpass_config(&server);
        let fetch = FetchClient::new(&fast_config(1)).unwrap();
        let relation = OverpassClient::new(&fetch, &config)
            .relation_with_geometry(77)
            .await
            .unwrap();
        assert!(relation.is_none());
    }

    #[tokio::test]
    async fn test_malformed_json_is_payload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .mount(&server)
            .await;

        let config = overpass_config(&server);
        let fetch = FetchClient::new(&fast_config(1)).unwrap();
        let err = OverpassClient::new(&fetch, &config)
            .stations()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Payload { .. }));
    }

    #[tokio::test]
    async fn test_slow_country_query_is_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/interpreter"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"elements": [{"type": "node", "id": 9, "lat": 50.0, "lon": 14.0, "tags": {"name": "Kolín"}}]}"#)
                    .set_delay(std::time::Duration::from_millis(1_500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = overpass_config(&server);
        let http = crate::models::HttpConfig {
            timeout_secs: 1,
            ..fast_config(5)
        };
        let fetch = FetchClient::new(&http).unwrap();
        let stations = OverpassClient::new(&fetch, &config).stations().await.unwrap();

        assert_eq!(stations.len(), 1);
    }
}
