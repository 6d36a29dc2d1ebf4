//! GeoJSON export for plan collections and building tables.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use geo::Geometry;
use geojson::{Feature, FeatureCollection, JsonObject};
use serde_json::json;
use tracing::info;

use super::log::UpdateLog;
use crate::domain::{BuildingRow, PlanFeature};
use crate::geometry::{EPSG_UTM32, EPSG_WGS84, to_wgs84};

fn feature(geometry: Option<&Geometry<f64>>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: geometry.map(|g| geojson::Geometry::new(geojson::Value::from(g))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Wrap features in a collection. Anything but WGS84 gets a named `crs`
/// member so readers do not assume lon/lat.
pub fn feature_collection(features: Vec<Feature>, epsg: u32) -> FeatureCollection {
    let foreign_members = (epsg != EPSG_WGS84).then(|| {
        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            json!({
                "type": "name",
                "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", epsg)}
            }),
        );
        members
    });
    FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    }
}

pub fn write_collection(collection: &FeatureCollection, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).context(format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, collection)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Plan features as GeoJSON, with every geometry passed through `transform`.
pub fn plan_features<F>(plans: &[PlanFeature], transform: F) -> Vec<Feature>
where
    F: Fn(&Geometry<f64>) -> Geometry<f64>,
{
    plans
        .iter()
        .map(|plan| feature(Some(&transform(&plan.geometry)), plan.properties.clone()))
        .collect()
}

/// Building rows as GeoJSON. Rows without a coordinate get `"geometry": null`.
pub fn building_features(rows: &[BuildingRow]) -> Vec<Feature> {
    rows.iter()
        .map(|row| feature(row.geometry.as_ref(), row.properties()))
        .collect()
}

/// The two files written for one plan collection.
#[derive(Debug, Clone)]
pub struct SavedPlans {
    pub utm: PathBuf,
    pub wgs: PathBuf,
    pub features: usize,
}

/// Write `plans` twice, as EPSG:25832 (`_utm`) and EPSG:4326 (`_wgs`), and
/// log both writes.
pub fn save_plan_collection(
    plans: &[PlanFeature],
    stem: &str,
    data_dir: &Path,
    log: &UpdateLog,
) -> Result<SavedPlans> {
    let utm_name = format!("{}_utm.geojson", stem);
    let wgs_name = format!("{}_wgs.geojson", stem);
    let utm = data_dir.join(&utm_name);
    let wgs = data_dir.join(&wgs_name);

    let utm_collection = feature_collection(plan_features(plans, Geometry::clone), EPSG_UTM32);
    write_collection(&utm_collection, &utm)?;
    let wgs_collection = feature_collection(plan_features(plans, to_wgs84), EPSG_WGS84);
    write_collection(&wgs_collection, &wgs)?;

    log.record(&utm_name, plans.len())?;
    log.record(&wgs_name, plans.len())?;

    Ok(SavedPlans {
        utm,
        wgs,
        features: plans.len(),
    })
}

pub fn building_table_filename(plan_id: &str) -> String {
    format!("bygninger_i_plan_{}.geojson", plan_id)
}

/// Write the buildings found inside one plan as a single EPSG:25832 file.
pub fn save_building_table(rows: &[BuildingRow], plan_id: &str, results_dir: &Path) -> Result<PathBuf> {
    let path = results_dir.join(building_table_filename(plan_id));
    let collection = feature_collection(building_features(rows), EPSG_UTM32);
    write_collection(&collection, &path)?;
    info!("Wrote {} buildings to {}", rows.len(), path.display());
    Ok(path)
}
