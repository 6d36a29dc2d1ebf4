//! Plan lookup, building retrieval inside the plan, and persistence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::api::{BuildingClient, PlanClient, Transport};
use crate::domain::{BuildingRow, PlanFeature, PlanQuery, PlanStatus, PlanType, plan_file_stem};
use crate::error::{RetrievalError, SetupError};
use crate::geometry::to_wkt;
use crate::output::{SavedPlans, UpdateLog, save_building_table, save_plan_collection};

/// Buildings found inside one plan.
#[derive(Debug, Clone)]
pub struct BuildingTable {
    pub plan_id: String,
    pub plan: PlanFeature,
    /// The polygon sent to the building register, EPSG:25832
    pub plan_wkt: String,
    pub rows: Vec<BuildingRow>,
    /// Set when building retrieval stopped early; `rows` holds what arrived before
    pub interrupted: Option<RetrievalError>,
}

impl BuildingTable {
    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write `bygninger_i_plan_<planid>.geojson` into `results_dir`.
    pub fn save(&self, results_dir: &Path) -> Result<PathBuf> {
        save_building_table(&self.rows, &self.plan_id, results_dir)
    }
}

/// Look up one plan and fetch every building inside it
///
/// # Arguments
/// * `plans` - Plandata client used for the plan lookup
/// * `buildings` - Datafordeler client used for the building query
/// * `query` - Plan filters; `plan_id` is required
/// * `as_of` - Validity time for the building query (defaults to now)
///
/// # Returns
/// * `BuildingTable` with one row per building node, possibly partial
///
/// # Errors
/// * `SetupError::PlanNotFound` when no plan matches, before any building request
pub fn fetch_buildings_in_plan<P, B>(
    plans: &PlanClient<P>,
    buildings: &BuildingClient<B>,
    query: &PlanQuery,
    as_of: Option<DateTime<Utc>>,
) -> Result<BuildingTable>
where
    P: Transport,
    B: Transport,
{
    let Some(plan_id) = query.plan_id.clone() else {
        bail!("A plan id is required to look up buildings");
    };

    let plan = plans
        .fetch_plans(query)
        .into_iter()
        .next()
        .ok_or_else(|| SetupError::PlanNotFound {
            plan_id: plan_id.clone(),
        })?;
    let plan_wkt = to_wkt(&plan.geometry)
        .with_context(|| format!("Failed to serialise geometry of plan {}", plan_id))?;
    info!(plan_id = %plan_id, "Plan found, querying buildings");

    let harvest = buildings.fetch_buildings(&plan_wkt, as_of);
    if let Some(err) = &harvest.interrupted {
        warn!(
            "Building list for plan {} is partial ({} buildings): {}",
            plan_id,
            harvest.len(),
            err
        );
    }

    let rows = harvest
        .records
        .into_iter()
        .map(BuildingRow::from_record)
        .collect();

    Ok(BuildingTable {
        plan_id,
        plan,
        plan_wkt,
        rows,
        interrupted: harvest.interrupted,
    })
}

/// Fetch plans for the given municipalities and write both collection files.
pub fn fetch_and_save_plans<T: Transport>(
    plans: &PlanClient<T>,
    municipalities: &[u16],
    plan_type: PlanType,
    status: Option<PlanStatus>,
    data_dir: &Path,
    log: &UpdateLog,
) -> Result<SavedPlans> {
    let features = plans.fetch_plans_multi(municipalities, plan_type, status);
    let stem = plan_file_stem(plan_type, status, None);
    save_plan_collection(&features, &stem, data_dir, log)
}

/// Fetch one plan by id and write it as its own collection pair.
pub fn fetch_and_save_plan<T: Transport>(
    plans: &PlanClient<T>,
    query: &PlanQuery,
    data_dir: &Path,
    log: &UpdateLog,
) -> Result<SavedPlans> {
    let features = plans.fetch_plans(query);
    if let Some(plan_id) = &query.plan_id
        && features.is_empty()
    {
        return Err(SetupError::PlanNotFound {
            plan_id: plan_id.clone(),
        }
        .into());
    }
    save_plan_collection(&features, &query.file_stem(), data_dir, log)
}

/// Every plan type in every status for the whole country, one file pair each.
pub fn harvest_all_plan_types<T: Transport>(
    plans: &PlanClient<T>,
    data_dir: &Path,
    log: &UpdateLog,
) -> Result<Vec<SavedPlans>> {
    harvest_plan_types(plans, &[], data_dir, log)
}

fn harvest_plan_types<T: Transport>(
    plans: &PlanClient<T>,
    municipalities: &[u16],
    data_dir: &Path,
    log: &UpdateLog,
) -> Result<Vec<SavedPlans>> {
    let mut saved = Vec::new();
    for plan_type in PlanType::ALL {
        for status in PlanStatus::ALL {
            info!("Harvesting {} / {}", plan_type, status);
            saved.push(fetch_and_save_plans(
                plans,
                municipalities,
                plan_type,
                Some(status),
                data_dir,
                log,
            )?);
        }
    }
    Ok(saved)
}
