//! Loosely-coupled IMU + GNSS (+ wheel-odometry) navigation filter.
//!
//! An error-state Kalman filter over the manifold state `SO(3) x R^15`
//! (attitude, position, velocity, gyro bias, accel bias, gravity), corrected
//! by GNSS pose fixes, optional wheel-odometry speed, and zero-velocity
//! pseudo-measurements. See [`fusion::FusionDriver`] for the entry point that
//! ties sensor ingest, the filter, and an output sink together.

pub mod config;
pub mod error;
pub mod eskf;
pub mod fusion;
pub mod geo;
pub mod gnss;
pub mod ingest;
pub mod sink;
pub mod state;

pub use config::FilterConfig;
pub use error::NavError;
pub use fusion::FusionDriver;
pub use state::NavState;
