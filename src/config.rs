//! Filter configuration, loaded from a YAML file.
//!
//! Mirrors the teacher's pattern of a `#[derive(Deserialize)]` struct loaded with
//! `serde_yaml::from_reader`, but collects every option named in the external
//! interface rather than being split per-subsystem.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

use crate::error::NavError;

/// Map-origin handling: either a fixed operator-chosen origin, or "latch onto
/// the first valid GNSS fix seen".
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapOrigin {
    /// Subtract this fixed UTM-frame origin from every GNSS reading.
    Fixed { x: f64, y: f64, z: f64 },
    /// Use the first valid GNSS fix as the origin.
    LatchOnFirstFix,
}

/// Initial-alignment sigma for one of the six error-state blocks.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct InitialSigmas {
    pub position: f64,
    pub velocity: f64,
    pub attitude: f64,
    pub gyro_bias: f64,
    pub accel_bias: f64,
    pub gravity: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub with_odom: bool,
    pub with_zupt: bool,

    pub antenna_pos_x: f64,
    pub antenna_pos_y: f64,
    pub antenna_angle_deg: f64,

    pub map_origin: MapOrigin,

    pub wheel_radius: f64,
    pub pulses_per_rev: f64,
    /// If true, odom samples carry pulses accumulated since the previous
    /// sample; if false, they carry an instantaneous pulse rate (pulses per
    /// second). Resolves the pulse-semantics open question explicitly rather
    /// than guessing.
    pub odom_pulses_are_cumulative: bool,
    /// Reject odom-derived speeds above this magnitude (m/s) as implausible.
    pub odom_speed_cap: f64,

    pub sigma_gyro: f64,
    pub sigma_acc: f64,
    pub sigma_bg: f64,
    pub sigma_ba: f64,
    pub sigma_gnss_pos: f64,
    pub sigma_gnss_heading: f64,
    pub sigma_odom_v: f64,
    pub sigma_zupt: f64,

    pub initial_sigmas: InitialSigmas,

    pub max_imu_dt: f64,
    pub iekf_max_iter: usize,
    pub iekf_eps: f64,

    pub static_window: usize,
    pub static_gyro_thresh: f64,
    pub static_acc_thresh: f64,

    /// Number of static IMU samples to accumulate for initial alignment.
    pub init_static_samples: usize,
    /// Maximum timestamp gap (s) tolerated between a GNSS reading and the
    /// filter's current time before it is dropped as out of order.
    pub gnss_back_tolerance: f64,

    /// The wire format carries no GNSS status column, so every ingested fix
    /// is reported as this status, or [`crate::gnss::GnssStatus::FixedRtk`]
    /// when left unset. Exists so a caller can replicate a receiver known to
    /// run at a lower fix quality without the wire format needing to say so.
    pub gnss_status_override: Option<crate::gnss::GnssStatus>,

    /// Abort if the divergence check (see [`crate::eskf::EskfEngine::is_healthy`])
    /// trips this many consecutive times.
    pub max_consecutive_divergences: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            with_odom: false,
            with_zupt: true,
            antenna_pos_x: 0.0,
            antenna_pos_y: 0.0,
            antenna_angle_deg: 0.0,
            map_origin: MapOrigin::LatchOnFirstFix,
            wheel_radius: 0.3,
            pulses_per_rev: 1000.0,
            odom_pulses_are_cumulative: true,
            odom_speed_cap: 40.0,
            sigma_gyro: 0.01,
            sigma_acc: 0.1,
            sigma_bg: 1e-5,
            sigma_ba: 1e-4,
            sigma_gnss_pos: 1.0,
            sigma_gnss_heading: 0.05,
            sigma_odom_v: 0.1,
            sigma_zupt: 0.01,
            initial_sigmas: InitialSigmas {
                position: 1.0,
                velocity: 1.0,
                attitude: 0.1,
                gyro_bias: 0.01,
                accel_bias: 0.1,
                gravity: 0.01,
            },
            max_imu_dt: 0.1,
            iekf_max_iter: 3,
            iekf_eps: 1e-6,
            static_window: 5,
            static_gyro_thresh: 0.01,
            static_acc_thresh: 0.1,
            init_static_samples: 200,
            gnss_back_tolerance: 0.05,
            gnss_status_override: None,
            max_consecutive_divergences: 1,
        }
    }
}

impl FilterConfig {
    /// Loads and validates a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NavError> {
        let file = File::open(path)?;
        let config: FilterConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects contradictory or out-of-range values before the driver starts,
    /// so a run never gets partway through an invalid configuration.
    pub fn validate(&self) -> Result<(), NavError> {
        let positive = [
            ("wheel_radius", self.wheel_radius),
            ("pulses_per_rev", self.pulses_per_rev),
            ("sigma_gyro", self.sigma_gyro),
            ("sigma_acc", self.sigma_acc),
            ("sigma_bg", self.sigma_bg),
            ("sigma_ba", self.sigma_ba),
            ("sigma_gnss_pos", self.sigma_gnss_pos),
            ("sigma_gnss_heading", self.sigma_gnss_heading),
            ("sigma_odom_v", self.sigma_odom_v),
            ("sigma_zupt", self.sigma_zupt),
            ("max_imu_dt", self.max_imu_dt),
            ("iekf_eps", self.iekf_eps),
            ("static_gyro_thresh", self.static_gyro_thresh),
            ("static_acc_thresh", self.static_acc_thresh),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(NavError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.iekf_max_iter == 0 {
            return Err(NavError::Config("iekf_max_iter must be at least 1".into()));
        }
        if self.static_window == 0 {
            return Err(NavError::Config("static_window must be at least 1".into()));
        }
        if self.init_static_samples == 0 {
            return Err(NavError::Config("init_static_samples must be at least 1".into()));
        }
        Ok(())
    }
}
