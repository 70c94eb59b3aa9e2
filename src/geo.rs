use crate::types::LonLat;

/// Mean Earth radius in kilometres.
pub const R_EARTH_KM: f64 = 6371.0;

/// Normalise longitudes given in the 0..360 convention to the signed -180..180
/// convention. Values in [0, 180] are kept as east; values in (180, 360] are
/// shifted by -360 and appended after the east values. Negative inputs are
/// already west and stay in the east block so normalised arrays come back
/// unchanged.
///
/// ### Argument
/// * 'lon' - Longitudes in degrees.
///
/// ### Return
///     East values followed by shifted west values.
///
pub fn normalize_longitude(lon: &[f64]) -> Vec<f64> {
    let east = lon.iter().copied().filter(|x| in_range!(-180.0, 180.0, *x));
    let west = lon
        .iter()
        .copied()
        .filter(|x| *x > 180.0 && *x <= 360.0)
        .map(|x| x - 360.0);

    east.chain(west).collect()
}

/// Equirectangular surface distance in km between a query point and a node,
/// scaled by the cosine of the query latitude. Only meaningful for the small
/// radii used by the proximity search.
pub fn equirectangular_km(query: &LonLat, node: &LonLat) -> f64 {
    let d_lat = node.lat - query.lat;
    let d_lon = node.lon - query.lon;

    R_EARTH_KM * std::f64::consts::PI / 180.0 * (d_lat * d_lat + d_lon * d_lon).sqrt()
        * cos_deg!(query.lat)
}

/// Initial great circle bearing from `origin` to `target`.
///
/// ### Return
///     Compass bearing in degrees within [0, 360).
///
pub fn bearing(origin: &LonLat, target: &LonLat) -> f64 {
    let d_lon = target.lon - origin.lon;
    let y = sin_deg!(d_lon) * cos_deg!(target.lat);
    let x = cos_deg!(origin.lat) * sin_deg!(target.lat)
        - sin_deg!(origin.lat) * cos_deg!(target.lat) * cos_deg!(d_lon);

    let b = atan2_deg!(y, x).rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative angles
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

/// New position after a displacement from an origin, great circle approximation.
///
/// ### Argument
/// * 'dx_km' - Eastward displacement in km.
/// * 'dy_km' - Northward displacement in km.
/// * 'origin' - Starting position.
///
pub fn lonlat_from_displacement(dx_km: f64, dy_km: f64, origin: &LonLat) -> LonLat {
    let offset = LonLat::new(dx_km / cos_deg!(origin.lat), dy_km) * (1.0 / R_EARTH_KM).to_degrees();

    origin + offset
}

/// Great circle distance in km (haversine).
pub fn haversine_km(a: &LonLat, b: &LonLat) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + cos_deg!(a.lat) * cos_deg!(b.lat) * (d_lon / 2.0).sin().powi(2);

    2.0 * R_EARTH_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(&[350.0, 10.0]), vec![10.0, -10.0]);
        assert_eq!(normalize_longitude(&[0.0, 180.0, 181.0, 360.0]), vec![0.0, 180.0, -179.0, 0.0]);
    }

    #[test]
    fn test_normalize_longitude_idempotent() {
        let once = normalize_longitude(&[350.0, 10.0, 200.0, 45.0]);
        let twice = normalize_longitude(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = LonLat::new(0.0, 0.0);
        assert!(bearing(&origin, &LonLat::new(0.0, 1.0)).abs() < 1e-9);
        assert!((bearing(&origin, &LonLat::new(1.0, 0.0)) - 90.0).abs() < 1e-9);
        assert!((bearing(&origin, &LonLat::new(0.0, -1.0)) - 180.0).abs() < 1e-9);
        assert!((bearing(&origin, &LonLat::new(-1.0, 0.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_equirectangular_km() {
        let q = LonLat::new(0.0, 0.0);
        let d = equirectangular_km(&q, &LonLat::new(0.0, 1.0));
        assert!((d - 111.19).abs() < 0.01);
        assert_eq!(equirectangular_km(&q, &q), 0.0);
    }

    #[test]
    fn test_displacement_round_trip_distance() {
        let origin = LonLat::new(-20.0, 30.0);
        let moved = lonlat_from_displacement(3.0, 4.0, &origin);
        let d = haversine_km(&origin, &moved);
        assert!((d - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_displacement_scales_with_latitude() {
        let equator = LonLat::new(10.0, 0.0);
        let north = lonlat_from_displacement(0.0, R_EARTH_KM.to_radians(), &equator);
        assert!((north.lat - 1.0).abs() < 1e-12);
        assert_eq!(north.lon, 10.0);

        // one degree of longitude is half as long at 60 N
        let origin = LonLat::new(10.0, 60.0);
        let east = lonlat_from_displacement(R_EARTH_KM.to_radians() / 2.0, 0.0, &origin);
        assert!((east.lon - 11.0).abs() < 1e-9);
        assert_eq!(east.lat, 60.0);
    }
}
