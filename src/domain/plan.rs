use std::fmt;

use geo::Geometry;
use serde_json::{Map, Value};
use tracing::warn;

/// Plan categories published by Plandata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanType {
    #[default]
    Lokalplan,
    Lokalplandelomraade,
    Byggefelt,
    Kommuneplanramme,
    Landzonetilladelse,
}

impl PlanType {
    pub const ALL: [PlanType; 5] = [
        PlanType::Lokalplan,
        PlanType::Lokalplandelomraade,
        PlanType::Byggefelt,
        PlanType::Kommuneplanramme,
        PlanType::Landzonetilladelse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Lokalplan => "LOKALPLAN",
            PlanType::Lokalplandelomraade => "LOKALPLANDELOMRAADE",
            PlanType::Byggefelt => "BYGGEFELT",
            PlanType::Kommuneplanramme => "KOMMUNEPLANRAMME",
            PlanType::Landzonetilladelse => "LANDZONETILLADELSE",
        }
    }

    pub fn from_name(name: &str) -> Option<PlanType> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Unknown names fall back to [`PlanType::Lokalplan`].
    pub fn parse_or_default(name: &str) -> PlanType {
        Self::from_name(name).unwrap_or_else(|| {
            let fallback = PlanType::default();
            warn!("Unknown plan type {:?}, using {}", name, fallback);
            fallback
        })
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanStatus {
    Forslag,
    #[default]
    Vedtaget,
    Aflyst,
}

impl PlanStatus {
    pub const ALL: [PlanStatus; 3] = [PlanStatus::Forslag, PlanStatus::Vedtaget, PlanStatus::Aflyst];

    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Forslag => "FORSLAG",
            PlanStatus::Vedtaget => "VEDTAGET",
            PlanStatus::Aflyst => "AFLYST",
        }
    }

    pub fn from_name(name: &str) -> Option<PlanStatus> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Unknown names fall back to [`PlanStatus::Vedtaget`].
    pub fn parse_or_default(name: &str) -> PlanStatus {
        Self::from_name(name).unwrap_or_else(|| {
            let fallback = PlanStatus::default();
            warn!("Unknown plan status {:?}, using {}", name, fallback);
            fallback
        })
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filters for one municipality's plan listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanQuery {
    pub municipality: u16,
    pub plan_type: PlanType,
    /// `None` leaves out the status filter
    pub status: Option<PlanStatus>,
    pub plan_id: Option<String>,
}

impl PlanQuery {
    pub fn new(municipality: u16, plan_type: PlanType, status: Option<PlanStatus>) -> Self {
        Self {
            municipality,
            plan_type,
            status,
            plan_id: None,
        }
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn file_stem(&self) -> String {
        plan_file_stem(self.plan_type, self.status, self.plan_id.as_deref())
    }
}

/// Lowercase stem shared by the plan collection files, e.g. `lokalplan_vedtaget`.
pub fn plan_file_stem(plan_type: PlanType, status: Option<PlanStatus>, plan_id: Option<&str>) -> String {
    let status = status.map(|s| s.as_str()).unwrap_or("alle");
    let mut stem = format!("{}_{}", plan_type.as_str(), status).to_lowercase();
    if let Some(id) = plan_id {
        stem.push('_');
        stem.push_str(id);
    }
    stem
}

/// One plan from the planning register. Geometry is in EPSG:25832.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanFeature {
    pub geometry: Geometry<f64>,
    pub properties: Map<String, Value>,
    pub feature_type: &'static str,
}

impl PlanFeature {
    pub fn new(geometry: Geometry<f64>, properties: Map<String, Value>) -> Self {
        Self {
            geometry,
            properties,
            feature_type: "Feature",
        }
    }

    /// `planid` property rendered as text, if present.
    pub fn plan_id(&self) -> Option<String> {
        match self.properties.get("planid")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// All Danish municipality codes, used when no municipality is given.
pub const ALL_MUNICIPALITIES: [u16; 98] = [
    101, 147, 151, 153, 155, 157, 159, 161, 163, 165, 167, 169, 173, 175, 183, 185, 187, 190, 201,
    210, 217, 219, 223, 230, 240, 250, 253, 259, 260, 265, 269, 270, 306, 316, 320, 326, 329, 330,
    336, 340, 350, 360, 370, 376, 390, 400, 410, 420, 430, 440, 450, 461, 479, 480, 482, 492, 510,
    530, 540, 550, 561, 563, 573, 575, 580, 607, 615, 621, 630, 657, 661, 665, 671, 706, 707, 710,
    727, 730, 740, 741, 746, 751, 756, 760, 766, 773, 779, 787, 791, 810, 813, 820, 825, 840, 846,
    849, 851, 860,
];
