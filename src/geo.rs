//! WGS-84 latitude/longitude to UTM projection and its inverse.
//!
//! Stateless and pure. Implements the closed-form transverse-Mercator series
//! (Snyder, "Map Projections: A Working Manual", 1987) rather than pulling in
//! a geodesy crate, since the projector is the one place this crate needs an
//! ellipsoidal Earth model. Accurate to well under 1 cm within a UTM zone away
//! from the poles.

use crate::error::NavError;

/// WGS-84 semi-major axis (m).
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// UTM scale factor at the central meridian.
const UTM_K0: f64 = 0.999_6;
/// UTM false easting (m).
const FALSE_EASTING: f64 = 500_000.0;
/// UTM false northing (m) applied in the southern hemisphere.
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
/// Latitude beyond which UTM is not considered valid.
const MAX_ABS_LAT_DEG: f64 = 84.0;

/// An integer UTM zone, hemisphere, and planar (easting, northing) pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UtmCoord {
    pub zone: u8,
    pub northern_hemisphere: bool,
    pub easting: f64,
    pub northing: f64,
}

/// Standard 1-60 UTM zone for a longitude in degrees.
pub fn utm_zone(lon_deg: f64) -> u8 {
    (((lon_deg + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8
}

fn central_meridian_rad(zone: u8) -> f64 {
    (-183.0 + 6.0 * zone as f64).to_radians()
}

/// Projects a WGS-84 geodetic (lat°, lon°) to UTM.
///
/// Fails when `|lat| >= 84°` or `lon` is non-finite; UTM is not defined near
/// the poles and both UPS replacements and NaN inputs are rejected the same
/// way.
pub fn lat_lon_to_utm(lat_deg: f64, lon_deg: f64) -> Result<UtmCoord, NavError> {
    if !lon_deg.is_finite() || !lat_deg.is_finite() {
        return Err(NavError::Geodetic("non-finite latitude/longitude".into()));
    }
    if lat_deg.abs() >= MAX_ABS_LAT_DEG {
        return Err(NavError::Geodetic(format!(
            "latitude {lat_deg} out of UTM range (|lat| must be < {MAX_ABS_LAT_DEG})"
        )));
    }

    let zone = utm_zone(lon_deg);
    let lon0 = central_meridian_rad(zone);
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();

    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let (sin_lat, cos_lat) = lat.sin_cos();
    let tan_lat = lat.tan();

    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = ep2 * cos_lat * cos_lat;
    let a = (lon - lon0) * cos_lat;

    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * lat).sin());

    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let easting = UTM_K0
        * n
        * (a + (1.0 - t + c) * a3 / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0)
        + FALSE_EASTING;

    let mut northing = UTM_K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));

    let northern_hemisphere = lat_deg >= 0.0;
    if !northern_hemisphere {
        northing += FALSE_NORTHING_SOUTH;
    }

    Ok(UtmCoord {
        zone,
        northern_hemisphere,
        easting,
        northing,
    })
}

/// Inverse of [`lat_lon_to_utm`]: recovers geodetic (lat°, lon°) from a UTM
/// coordinate.
pub fn utm_to_lat_lon(utm: UtmCoord) -> Result<(f64, f64), NavError> {
    if !utm.easting.is_finite() || !utm.northing.is_finite() {
        return Err(NavError::Geodetic("non-finite easting/northing".into()));
    }

    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let northing = if utm.northern_hemisphere {
        utm.northing
    } else {
        utm.northing - FALSE_NORTHING_SOUTH
    };

    let m = northing / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let tan_phi1 = phi1.tan();

    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = WGS84_A / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = (utm.easting - FALSE_EASTING) / (n1 * UTM_K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = central_meridian_rad(utm.zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d5
                / 120.0)
            / cos_phi1;

    Ok((lat.to_degrees(), lon.to_degrees()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn zone_boundaries() {
        assert_eq!(utm_zone(-180.0), 1);
        assert_eq!(utm_zone(-177.0), 1);
        assert_eq!(utm_zone(0.0), 31);
        assert_eq!(utm_zone(179.999), 60);
    }

    #[test]
    fn round_trip_mid_latitudes() {
        for lat in [-79.0, -45.0, -10.0, 0.0, 10.0, 45.0, 79.0] {
            for lon_offset in [-2.5, -1.0, 0.0, 1.0, 2.5] {
                // stay within a single UTM zone's 6-degree span of its central meridian
                let lon = lon_offset;
                let utm = lat_lon_to_utm(lat, lon).expect("projection should succeed");
                let (lat2, lon2) = utm_to_lat_lon(utm).expect("inverse should succeed");
                assert_abs_diff_eq!(lat, lat2, epsilon = 1e-7);
                assert_abs_diff_eq!(lon, lon2, epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn rejects_poles_and_non_finite() {
        assert!(lat_lon_to_utm(85.0, 0.0).is_err());
        assert!(lat_lon_to_utm(-85.0, 0.0).is_err());
        assert!(lat_lon_to_utm(f64::NAN, 0.0).is_err());
        assert!(lat_lon_to_utm(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn hemisphere_flag_matches_latitude_sign() {
        let north = lat_lon_to_utm(10.0, 10.0).unwrap();
        let south = lat_lon_to_utm(-10.0, 10.0).unwrap();
        assert!(north.northern_hemisphere);
        assert!(!south.northern_hemisphere);
    }

    #[test]
    fn known_point_matches_reference() {
        // 55N 12E zone 32, reference value quoted by PROJ's +proj=utm +zone=32.
        let utm = lat_lon_to_utm(55.0, 12.0).unwrap();
        assert_eq!(utm.zone, 32);
        assert_abs_diff_eq!(utm.easting, 691_875.63, epsilon = 0.5);
        assert_abs_diff_eq!(utm.northing, 6_098_907.83, epsilon = 0.5);
    }
}
