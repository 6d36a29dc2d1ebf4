pub mod building;
pub mod plan;

pub use building::{BuildingRecord, BuildingRow};
pub use plan::{ALL_MUNICIPALITIES, PlanFeature, PlanQuery, PlanStatus, PlanType, plan_file_stem};
