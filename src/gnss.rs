//! GNSS reading types and the preparer that turns a raw fix into a 6-DoF pose
//! prior in the local metric frame.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::NavError;
use crate::geo::{self, UtmCoord};

/// GNSS fix quality, as reported by the receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GnssStatus {
    NoFix,
    SinglePoint,
    PseudoRangeDiff,
    FloatRtk,
    FixedRtk,
}

/// A raw GNSS fix as it arrives off the wire/ingest layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GnssReading {
    pub t: f64,
    pub status: GnssStatus,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    pub heading_deg: f64,
    pub heading_valid: bool,
}

/// A GNSS reading after lever-arm/heading preparation: carries the UTM
/// coordinate and the derived local-frame pose prior alongside the raw fix.
#[derive(Clone, Copy, Debug)]
pub struct PreparedGnss {
    pub raw: GnssReading,
    pub utm: UtmCoord,
    pub utm_valid: bool,
    /// Vehicle-origin position in the local metric frame (origin subtracted,
    /// lever arm removed).
    pub position: Vector3<f64>,
    /// Vehicle attitude, valid only when `raw.heading_valid`.
    pub rotation: UnitQuaternion<f64>,
    pub heading_valid: bool,
}

/// Local-frame origin, latched from the first valid GNSS fix (or configured
/// up front) and thereafter immutable except for `zone`/`northern_hemisphere`,
/// which a fixed origin leaves at the sentinel `(0, true)` until the first
/// fix resolves them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Origin {
    pub zone: u8,
    pub northern_hemisphere: bool,
    pub easting: f64,
    pub northing: f64,
    pub alt: f64,
}

/// Turns raw GNSS fixes into SE(3) pose priors in the local metric frame,
/// compensating for the antenna lever arm and mounting yaw offset.
pub struct GnssPreparer {
    antenna_offset: Vector3<f64>,
    antenna_yaw_offset_rad: f64,
    origin: Option<Origin>,
}

impl GnssPreparer {
    pub fn new(antenna_pos_x: f64, antenna_pos_y: f64, antenna_angle_deg: f64) -> Self {
        GnssPreparer {
            antenna_offset: Vector3::new(antenna_pos_x, antenna_pos_y, 0.0),
            antenna_yaw_offset_rad: antenna_angle_deg.to_radians(),
            origin: None,
        }
    }

    /// Pins the origin explicitly (used when config provides a fixed origin
    /// rather than "latch on first fix"). The caller doesn't know the UTM
    /// zone/hemisphere the fixed offset falls in ahead of time, so `zone` may
    /// be left at the sentinel `0`; [`Self::prepare`] resolves it from the
    /// first fix it sees and never touches it again afterward.
    pub fn set_origin(&mut self, origin: Origin) {
        if self.origin.is_none() {
            self.origin = Some(origin);
        }
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    /// Prepares one raw reading. Fails when the geodetic projection fails or
    /// the fix status is `NoFix`; otherwise always succeeds, setting
    /// `utm_valid` so the caller can decide whether to trust the position.
    pub fn prepare(&mut self, raw: GnssReading) -> Result<PreparedGnss, NavError> {
        if raw.status == GnssStatus::NoFix {
            return Err(NavError::Geodetic("GNSS status is no-fix".into()));
        }

        let utm = geo::lat_lon_to_utm(raw.lat_deg, raw.lon_deg)?;

        match &mut self.origin {
            None => {
                self.origin = Some(Origin {
                    zone: utm.zone,
                    northern_hemisphere: utm.northern_hemisphere,
                    easting: utm.easting,
                    northing: utm.northing,
                    alt: raw.alt_m,
                });
            }
            // A fixed origin configured before any real fix arrived doesn't
            // know its own zone yet (sentinel 0): resolve it from this fix
            // without touching the configured easting/northing/alt.
            Some(origin) if origin.zone == 0 => {
                origin.zone = utm.zone;
                origin.northern_hemisphere = utm.northern_hemisphere;
            }
            Some(_) => {}
        }
        let origin = self.origin.expect("origin set above if absent");

        let utm_valid = utm.zone == origin.zone && utm.northern_hemisphere == origin.northern_hemisphere;

        let antenna_position = Vector3::new(
            utm.easting - origin.easting,
            utm.northing - origin.northing,
            raw.alt_m - origin.alt,
        );

        let heading_valid = raw.heading_valid;
        let yaw = raw.heading_deg.to_radians() - self.antenna_yaw_offset_rad;
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw);

        // Back-project the antenna position through the yaw rotation to
        // recover the vehicle-origin position: p_vehicle = p_antenna - R*lever_arm.
        let position = if heading_valid {
            antenna_position - rotation * self.antenna_offset
        } else {
            antenna_position
        };

        Ok(PreparedGnss {
            raw,
            utm,
            utm_valid,
            position,
            rotation,
            heading_valid,
        })
    }
}
