use geo::{Coord, Geometry, MapCoords};

/// ETRS89 / UTM zone 32N, the CRS both registers publish in.
pub const EPSG_UTM32: u32 = 25832;
/// WGS84 longitude/latitude.
pub const EPSG_WGS84: u32 = 4326;

/// GRS80 ellipsoid. ETRS89 and WGS84 differ by well under a metre in
/// Denmark, so geographic ETRS89 coordinates are written as WGS84.
mod grs80 {
    pub const A: f64 = 6_378_137.0;
    pub const F: f64 = 1.0 / 298.257_222_101;
    pub const E2: f64 = F * (2.0 - F);
    pub const EP2: f64 = E2 / (1.0 - E2);
}

const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const ZONE: u32 = 32;

/// Inverse transverse Mercator for zone 32N.
///
/// Takes easting/northing in metres and returns (lon, lat) in degrees.
pub fn utm32_to_wgs84(easting: f64, northing: f64) -> (f64, f64) {
    let a = grs80::A;
    let e2 = grs80::E2;
    let ep2 = grs80::EP2;

    let lon0 = ((ZONE as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();
    let x = easting - FALSE_EASTING;

    // Footprint latitude
    let m = northing / K0;
    let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let n1 = a / (1.0 - e2 * sin_phi1.powi(2)).sqrt();
    let t1 = tan_phi1.powi(2);
    let c1 = ep2 * cos_phi1.powi(2);
    let r1 = a * (1.0 - e2) / (1.0 - e2 * sin_phi1.powi(2)).powf(1.5);
    let d = x / (n1 * K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2)
                    - 252.0 * ep2
                    - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);

    let lon = lon0
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Reproject every vertex of an EPSG:25832 geometry to EPSG:4326.
pub fn to_wgs84(geometry: &Geometry<f64>) -> Geometry<f64> {
    geometry.map_coords(|Coord { x, y }| {
        let (lon, lat) = utm32_to_wgs84(x, y);
        Coord { x: lon, y: lat }
    })
}
