pub mod collection;
pub mod log;

pub use collection::{SavedPlans, building_table_filename, save_building_table, save_plan_collection};
pub use log::UpdateLog;
