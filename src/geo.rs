//! Distance approximation on fixed-point coordinates.

/// Fixed-point scale of stored coordinates: micro-degrees.
pub const COORDINATE_PRECISION: f64 = 1_000_000.0;

const EARTH_RADIUS_M: f64 = 6_372_797.560_856;

/// Flat-earth (equirectangular) distance in metres between two fixed-point
/// coordinates. Adequate for edge-length weights, where segments are short and
/// the error against a full great-circle solution is negligible.
pub fn approx_distance(lat1: i32, lon1: i32, lat2: i32, lon2: i32) -> f64 {
    let lat1 = (lat1 as f64 / COORDINATE_PRECISION).to_radians();
    let lon1 = (lon1 as f64 / COORDINATE_PRECISION).to_radians();
    let lat2 = (lat2 as f64 / COORDINATE_PRECISION).to_radians();
    let lon2 = (lon2 as f64 / COORDINATE_PRECISION).to_radians();

    let x = (lon2 - lon1) * ((lat1 + lat2) / 2.0).cos();
    let y = lat2 - lat1;
    (x * x + y * y).sqrt() * EARTH_RADIUS_M
}
