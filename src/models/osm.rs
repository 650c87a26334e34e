// src/models/osm.rs

//! Map query payloads and the records imported from them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Key-value tags attached to a map element.
pub type Tags = BTreeMap<String, String>;

/// Top-level document returned by both the query service and the static API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementsResponse {
    #[serde(default)]
    pub elements: Vec<Element>,
}

/// A map element, discriminated by its `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Node(Node),
    Way(Way),
    Relation(Relation),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub id: i64,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Way {
    pub id: i64,
    #[serde(default)]
    pub geometry: Vec<LatLon>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relation {
    pub id: i64,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub tags: Tags,
}

impl Relation {
    pub fn is_abandoned(&self) -> bool {
        self.tags.get("abandoned").is_some_and(|v| v == "yes")
    }
}

/// Relation member. `geometry` is only present for `out geom` queries.
#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub geometry: Vec<LatLon>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    /// Planar distance in coordinate degrees.
    pub fn distance_deg(&self, other: &LatLon) -> f64 {
        (self.lat - other.lat).hypot(self.lon - other.lon)
    }
}

/// Ordered points of one line geometry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineString(pub Vec<LatLon>);

impl LineString {
    /// A line needs at least two points.
    pub fn is_valid(&self) -> bool {
        self.0.len() >= 2
    }

    /// Well-known text, lon/lat axis order.
    pub fn to_wkt(&self) -> String {
        let mut wkt = String::from("LINESTRING(");
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                wkt.push_str(", ");
            }
            let _ = write!(wkt, "{} {}", p.lon, p.lat);
        }
        wkt.push(')');
        wkt
    }
}

/// A catalogued railway route: one index row plus its line geometries.
#[derive(Debug, Clone, PartialEq)]
pub struct RailRelation {
    pub relation_id: i64,
    pub route_ref: Option<String>,
    pub name: String,
    pub lines: Vec<LineString>,
}

impl RailRelation {
    /// Convert an `out geom` relation. Returns `None` (after a warning)
    /// when the route has no name.
    pub fn from_relation(relation: &Relation) -> Option<Self> {
        let Some(name) = relation.tags.get("name") else {
            log::warn!("Relation {} has no name tag, skipping", relation.id);
            return None;
        };

        let mut lines = Vec::new();
        for member in &relation.members {
            if member.kind != "way" {
                log::warn!(
                    "Relation {} member {} is a {}, not a way; ignored",
                    relation.id,
                    member.reference,
                    member.kind
                );
                continue;
            }
            let line = LineString(member.geometry.clone());
            if !line.is_valid() {
                log::warn!(
                    "Relation {} way {} has {} points; ignored",
                    relation.id,
                    member.reference,
                    line.0.len()
                );
                continue;
            }
            lines.push(line);
        }

        Some(Self {
            relation_id: relation.id,
            route_ref: normalize_route_ref(relation.tags.get("ref").map(String::as_str)),
            name: name.clone(),
            lines,
        })
    }
}

/// Route numbers come as `"-"`, `"0 12"` or absent; store them compact.
pub fn normalize_route_ref(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() || raw == "-" {
        return None;
    }
    Some(raw.chars().filter(|c| !c.is_whitespace()).collect())
}

/// A single rail track way with its operational attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct RailWay {
    pub id: i64,
    pub electrified: Option<String>,
    pub voltage: Option<i32>,
    pub gauge: Option<String>,
    pub maxspeed: Option<i32>,
    pub tracks: Option<i32>,
    pub usage: Option<String>,
    pub line: LineString,
}

impl RailWay {
    /// Convert an `out geom` way. Returns `None` when the geometry is unusable.
    pub fn from_way(way: &Way) -> Option<Self> {
        let line = LineString(way.geometry.clone());
        if !line.is_valid() {
            log::warn!(
                "Way {} has {} points, skipping",
                way.id,
                way.geometry.len()
            );
            return None;
        }

        let text = |key: &str| way.tags.get(key).cloned();
        let number = |key: &str| numeric_tag(way.id, key, way.tags.get(key));

        Some(Self {
            id: way.id,
            electrified: text("electrified"),
            voltage: number("voltage"),
            gauge: text("gauge"),
            maxspeed: number("maxspeed"),
            tracks: number("tracks"),
            usage: text("usage"),
            line,
        })
    }
}

fn numeric_tag(id: i64, key: &str, value: Option<&String>) -> Option<i32> {
    let value = value?;
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            log::warn!("Way {id}: {key}={value:?} is not a number, stored as null");
            None
        }
    }
}

/// A named railway station, halt or stop.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub position: LatLon,
}

impl Station {
    /// Convert a node. Nodes without a name or coordinates are skipped.
    pub fn from_node(node: &Node) -> Option<Self> {
        let name = node.tags.get("name")?;
        let (Some(lat), Some(lon)) = (node.lat, node.lon) else {
            log::warn!("Node {} has no coordinates, skipping", node.id);
            return None;
        };
        Some(Self {
            id: node.id,
            name: name.clone(),
            position: LatLon { lat, lon },
        })
    }

    /// Same name, or positions closer than `tolerance` degrees.
    pub fn is_duplicate_of(&self, other: &Station, tolerance: f64) -> bool {
        self.name == other.name || self.position.distance_deg(&other.position) <= tolerance
    }
}
