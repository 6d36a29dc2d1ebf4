//! Plandata REST client. Pages are numbered from 1 and the envelope of every
//! page reports the total `pageCount`.

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::paging::{Harvest, Page, PageSource, Pages};
use super::transport::{HttpTransport, Transport};
use crate::config::PlandataConfig;
use crate::domain::{ALL_MUNICIPALITIES, PlanFeature, PlanQuery, PlanStatus, PlanType};
use crate::error::RetrievalError;
use crate::geometry::parse_geojson_geometry;

const GEOMETRY_FIELD: &str = "geometri";
const PROJECTION_FIELD: &str = "projection";

#[derive(Debug, Deserialize)]
struct Envelope {
    pagination: Pagination,
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(rename = "pageCount")]
    page_count: u32,
}

pub struct PlanClient<T: Transport = HttpTransport> {
    transport: T,
    config: PlandataConfig,
}

impl PlanClient<HttpTransport> {
    pub fn new(config: PlandataConfig) -> Result<Self, RetrievalError> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> PlanClient<T> {
    pub fn with_transport(config: PlandataConfig, transport: T) -> Self {
        Self { transport, config }
    }

    /// Every page for one municipality, with the error that ended it early, if any.
    pub fn harvest(&self, query: &PlanQuery) -> Harvest<PlanFeature> {
        let mut source = PlanPages {
            transport: &self.transport,
            base_url: &self.config.base_url,
            query,
        };
        Harvest::collect(Pages::new(&mut source, self.config.paging()))
    }

    /// Fetch plans for one municipality from Plandata
    ///
    /// A failed page ends the listing for this municipality; the features
    /// gathered before it are still returned.
    ///
    /// # Arguments
    /// * `query` - Municipality, plan type, optional status and optional plan id
    ///
    /// # Returns
    /// * Every plan with a usable geometry, in page order, geometry in EPSG:25832
    pub fn fetch_plans(&self, query: &PlanQuery) -> Vec<PlanFeature> {
        let harvest = self.harvest(query);
        if let Some(err) = &harvest.interrupted {
            warn!(
                "API error for municipality {} after {} pages: {}",
                query.municipality, harvest.pages, err
            );
        }
        info!(
            "Finished municipality {}: {} features",
            query.municipality,
            harvest.len()
        );
        harvest.records
    }

    /// Plans for several municipalities, concatenated in the order given.
    /// An empty list means every municipality in the country.
    pub fn fetch_plans_multi(
        &self,
        municipalities: &[u16],
        plan_type: PlanType,
        status: Option<PlanStatus>,
    ) -> Vec<PlanFeature> {
        let municipalities = if municipalities.is_empty() {
            &ALL_MUNICIPALITIES[..]
        } else {
            municipalities
        };

        let mut features = Vec::new();
        for &municipality in municipalities {
            let query = PlanQuery::new(municipality, plan_type, status);
            features.extend(self.fetch_plans(&query));
        }
        info!("Total features: {}", features.len());
        features
    }
}

/// Page-number source over one municipality's listing.
struct PlanPages<'a, T> {
    transport: &'a T,
    base_url: &'a str,
    query: &'a PlanQuery,
}

impl<T: Transport> PageSource for PlanPages<'_, T> {
    type Record = PlanFeature;
    type Cursor = u32;

    fn fetch_page(&mut self, cursor: Option<&u32>) -> Result<Page<PlanFeature, u32>, RetrievalError> {
        let page = cursor.copied().unwrap_or(1);
        let url = plans_url(self.base_url, self.query, page)?;
        let response = self.transport.get(&url)?;
        if !response.is_success() {
            return Err(RetrievalError::Status {
                status: response.status,
                url,
            });
        }

        let envelope: Envelope = serde_json::from_str(&response.body)
            .map_err(|e| RetrievalError::Malformed(format!("page {}: {}", page, e)))?;
        let page_count = envelope.pagination.page_count;
        if page_count > 1 {
            info!(
                "Fetched page {} of {} for municipality {}",
                page, page_count, self.query.municipality
            );
        }

        let records = envelope
            .data
            .into_iter()
            .filter_map(|item| feature_from_item(item, self.query.municipality))
            .collect();

        Ok(Page {
            records,
            next: (page < page_count).then_some(page + 1),
        })
    }
}

fn plans_url(base_url: &str, query: &PlanQuery, page: u32) -> Result<String, RetrievalError> {
    let endpoint = format!("{}/hentOffentligePlaner", base_url.trim_end_matches('/'));
    let mut params = vec![
        ("kommunekode", query.municipality.to_string()),
        ("plantype", query.plan_type.to_string()),
    ];
    if let Some(status) = query.status {
        params.push(("planstatus", status.to_string()));
    }
    if let Some(plan_id) = &query.plan_id {
        params.push(("planId", plan_id.clone()));
    }
    params.push(("page", page.to_string()));

    Url::parse_with_params(&endpoint, &params)
        .map(String::from)
        .map_err(|e| RetrievalError::InvalidUrl(format!("{}: {}", endpoint, e)))
}

/// Turn one `data` item into a feature. Items without a usable geometry are skipped.
fn feature_from_item(item: Value, municipality: u16) -> Option<PlanFeature> {
    let Value::Object(mut properties) = item else {
        warn!("Skipping non-object item for municipality {}", municipality);
        return None;
    };

    let raw = properties.remove(GEOMETRY_FIELD)?;
    if is_blank(&raw) {
        debug!("Skipping item without geometry for municipality {}", municipality);
        return None;
    }
    properties.remove(PROJECTION_FIELD);

    match parse_geojson_geometry(&raw) {
        Ok(geometry) => Some(PlanFeature::new(geometry, properties)),
        Err(e) => {
            warn!(
                "Failed to parse geometry for municipality {}: {:#}",
                municipality, e
            );
            None
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
