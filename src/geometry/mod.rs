pub mod projection;
pub mod wkt;

pub use projection::{EPSG_UTM32, EPSG_WGS84, to_wgs84, utm32_to_wgs84};
pub use wkt::{parse_geojson_geometry, parse_wkt, to_wkt};
