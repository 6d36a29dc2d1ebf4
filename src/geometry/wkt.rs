use anyhow::{Context, Result, bail};
use geo::Geometry;
use geozero::wkt::{Wkt, WktWriter};
use geozero::{GeozeroGeometry, ToGeo};
use serde_json::Value;

/// Serialize a geometry to WKT without touching its coordinates.
pub fn to_wkt(geometry: &Geometry<f64>) -> Result<String> {
    let mut buf = Vec::new();
    {
        let mut writer = WktWriter::new(&mut buf);
        geometry
            .process_geom(&mut writer)
            .context("Failed to encode geometry to WKT")?;
    }
    String::from_utf8(buf).context("WKT writer produced invalid UTF-8")
}

pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    Wkt(text)
        .to_geo()
        .with_context(|| format!("Invalid WKT: {}", truncate(text)))
}

/// Plandata ships `geometri` as a GeoJSON geometry encoded in a string.
/// An embedded object is accepted too.
pub fn parse_geojson_geometry(value: &Value) -> Result<Geometry<f64>> {
    let json = match value {
        Value::String(text) => serde_json::from_str(text).context("Invalid GeoJSON geometry")?,
        Value::Object(_) => value.clone(),
        other => bail!("Expected GeoJSON geometry, found {}", other),
    };
    let geometry =
        geojson::Geometry::from_json_value(json).context("Invalid GeoJSON geometry")?;
    Geometry::<f64>::try_from(geometry).context("Unsupported GeoJSON geometry")
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(60) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
