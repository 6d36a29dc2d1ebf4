use geo::Geometry;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::geometry::parse_wkt;

/// One building from BBR, as returned by the `BBR_Bygning` GraphQL node.
///
/// Field names on the wire are kept when serializing so persisted rows carry
/// the register's own column names. Every field decodes leniently and fields
/// outside the query land in `extra`, so any node object yields a record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BuildingRecord {
    #[serde(rename = "id_lokalId", default, deserialize_with = "text")]
    pub local_id: Option<String>,
    /// Usually `{"wkt": "POINT(x y)"}`, kept raw because it may be missing or null
    #[serde(rename = "byg404Koordinat", default)]
    pub coordinate: Option<Value>,
    #[serde(rename = "byg021BygningensAnvendelse", default, deserialize_with = "text")]
    pub usage_code: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub status: Option<String>,
    #[serde(rename = "husnummer", default, deserialize_with = "text")]
    pub address_ref: Option<String>,
    #[serde(rename = "byg007Bygningsnummer", default, deserialize_with = "count")]
    pub building_number: Option<i64>,
    #[serde(rename = "byg024AntalLejlighederMedKoekken", default, deserialize_with = "count")]
    pub apartments_with_kitchen: Option<i64>,
    #[serde(rename = "byg025AntalLejlighederUdenKoekken", default, deserialize_with = "count")]
    pub apartments_without_kitchen: Option<i64>,
    #[serde(rename = "byg030Vandforsyning", default, deserialize_with = "text")]
    pub water_supply: Option<String>,
    #[serde(rename = "registreringFra", default, deserialize_with = "text")]
    pub registered_from: Option<String>,
    #[serde(rename = "registreringTil", default, deserialize_with = "text")]
    pub registered_to: Option<String>,
    #[serde(rename = "virkningFra", default, deserialize_with = "text")]
    pub valid_from: Option<String>,
    #[serde(rename = "virkningTil", default, deserialize_with = "text")]
    pub valid_to: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BuildingRecord {
    /// Decode one GraphQL node. A node that is not an object still yields an
    /// empty record so row counts match node counts.
    pub fn from_node(node: Value) -> Self {
        match serde_json::from_value(node) {
            Ok(record) => record,
            Err(e) => {
                warn!("Building node is not an object, keeping an empty row: {}", e);
                Self::default()
            }
        }
    }

    /// The `wkt` member of `byg404Koordinat`, if the field has the expected shape.
    pub fn coordinate_wkt(&self) -> Option<&str> {
        self.coordinate.as_ref()?.as_object()?.get("wkt")?.as_str()
    }
}

/// Codes arrive as strings ("6") but some registers send bare numbers.
fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// A building flattened for export: every record field plus its parsed point.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingRow {
    pub record: BuildingRecord,
    pub wkt: Option<String>,
    /// EPSG:25832, `None` when the coordinate is missing or unreadable
    pub geometry: Option<Geometry<f64>>,
}

impl BuildingRow {
    pub fn from_record(record: BuildingRecord) -> Self {
        let wkt = record.coordinate_wkt().map(str::to_string);
        let geometry = wkt.as_deref().and_then(|text| match parse_wkt(text) {
            Ok(geometry) => Some(geometry),
            Err(e) => {
                debug!(id = ?record.local_id, "Unreadable coordinate WKT: {}", e);
                None
            }
        });
        Self {
            record,
            wkt,
            geometry,
        }
    }

    /// Record fields under their register names, plus `wkt`.
    pub fn properties(&self) -> Map<String, Value> {
        let mut properties = match serde_json::to_value(&self.record) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        properties.insert(
            "wkt".to_string(),
            self.wkt.clone().map(Value::String).unwrap_or(Value::Null),
        );
        properties
    }
}
