//! The nominal navigation state: a manifold element of SO(3) × R^15, plus the
//! fixed 18-dimensional tangent-space layout its error state uses.

use nalgebra::{Matrix3, SVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Dimension of the error state / covariance.
pub const ERROR_STATE_DIM: usize = 18;

/// Index ranges into the 18-dim error state, in the fixed order the spec mandates.
pub mod error_block {
    use std::ops::Range;
    pub const POSITION: Range<usize> = 0..3;
    pub const VELOCITY: Range<usize> = 3..6;
    pub const ATTITUDE: Range<usize> = 6..9;
    pub const GYRO_BIAS: Range<usize> = 9..12;
    pub const ACCEL_BIAS: Range<usize> = 12..15;
    pub const GRAVITY: Range<usize> = 15..18;
}

/// Error-state vector, tangent to the nominal state at its current value.
pub type ErrorState = SVector<f64, ERROR_STATE_DIM>;

/// The manifold-valued nominal state carried by the ESKF engine.
///
/// `rotation` is stored as a `UnitQuaternion`, so it cannot drift off the unit
/// sphere the way a raw rotation matrix or Euler triple could.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NominalState {
    pub t: f64,
    pub rotation: UnitQuaternion<f64>,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub gyro_bias: Vector3<f64>,
    pub accel_bias: Vector3<f64>,
    pub gravity: Vector3<f64>,
}

impl NominalState {
    /// A state at rest at the origin, identity attitude, with the given
    /// navigation-frame gravity vector (normally `(0, 0, -9.81)`).
    pub fn at_rest(gravity: Vector3<f64>) -> Self {
        NominalState {
            t: 0.0,
            rotation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            gyro_bias: Vector3::zeros(),
            accel_bias: Vector3::zeros(),
            gravity,
        }
    }

    /// Injects an error-state correction using the manifold's right-perturbation
    /// convention: `R <- R * Exp(dtheta)`, with every other block composed by
    /// plain vector addition. This is the only mutator on the manifold state;
    /// it is what keeps `rotation` unit-norm to machine precision.
    pub fn compose_right(&self, dx: &ErrorState) -> NominalState {
        let dp = dx.fixed_rows::<3>(error_block::POSITION.start).into_owned();
        let dv = dx.fixed_rows::<3>(error_block::VELOCITY.start).into_owned();
        let dtheta = dx.fixed_rows::<3>(error_block::ATTITUDE.start).into_owned();
        let dbg = dx.fixed_rows::<3>(error_block::GYRO_BIAS.start).into_owned();
        let dba = dx.fixed_rows::<3>(error_block::ACCEL_BIAS.start).into_owned();
        let dg = dx.fixed_rows::<3>(error_block::GRAVITY.start).into_owned();

        NominalState {
            t: self.t,
            rotation: self.rotation * UnitQuaternion::from_scaled_axis(dtheta),
            position: self.position + dp,
            velocity: self.velocity + dv,
            gyro_bias: self.gyro_bias + dbg,
            accel_bias: self.accel_bias + dba,
            gravity: self.gravity + dg,
        }
    }

    /// The SE(3) pose `(R, p)` component of the state.
    pub fn se3(&self) -> (UnitQuaternion<f64>, Vector3<f64>) {
        (self.rotation, self.position)
    }

    /// True if every field is finite; used by the engine's divergence check.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.gyro_bias.iter().all(|v| v.is_finite())
            && self.accel_bias.iter().all(|v| v.is_finite())
            && self.gravity.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
    }
}

/// An immutable snapshot of the filter's belief at one instant, handed to
/// callers and to the sink. Never holds a reference into engine-owned state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct NavState {
    pub t: f64,
    pub orientation: [f64; 4], // (x, y, z, w), matching nalgebra's quaternion layout
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub gyro_bias: [f64; 3],
    pub accel_bias: [f64; 3],
    pub gravity: [f64; 3],
    pub covariance_trace: f64,
}

impl From<&NominalState> for NavState {
    fn from(s: &NominalState) -> Self {
        let q = s.rotation.quaternion();
        NavState {
            t: s.t,
            orientation: [q.i, q.j, q.k, q.w],
            position: s.position.into(),
            velocity: s.velocity.into(),
            gyro_bias: s.gyro_bias.into(),
            accel_bias: s.accel_bias.into(),
            gravity: s.gravity.into(),
            covariance_trace: 0.0,
        }
    }
}

/// Builds the skew-symmetric cross-product matrix `[v]_x` such that
/// `[v]_x * w == v.cross(&w)`.
pub fn skew(v: Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn compose_right_is_additive_for_linear_blocks() {
        let s = NominalState::at_rest(Vector3::new(0.0, 0.0, -9.81));
        let mut dx = ErrorState::zeros();
        dx[0] = 1.0;
        dx[4] = 2.0;
        let s2 = s.compose_right(&dx);
        assert_abs_diff_eq!(s2.position.x, 1.0);
        assert_abs_diff_eq!(s2.velocity.y, 2.0);
    }

    #[test]
    fn compose_right_keeps_rotation_unit_norm() {
        let s = NominalState::at_rest(Vector3::new(0.0, 0.0, -9.81));
        let mut dx = ErrorState::zeros();
        dx[6] = 0.3;
        dx[7] = -0.2;
        dx[8] = 0.1;
        let s2 = s.compose_right(&dx);
        assert_abs_diff_eq!(s2.rotation.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn injection_is_idempotent_with_its_inverse() {
        let s = NominalState::at_rest(Vector3::new(0.0, 0.0, -9.81));
        let mut dx = ErrorState::zeros();
        dx[0] = 0.5;
        dx[6] = 0.05;
        dx[7] = -0.02;
        let forward = s.compose_right(&dx);
        let back = forward.compose_right(&(-dx));
        assert_abs_diff_eq!(back.position, s.position, epsilon = 1e-9);
        assert_abs_diff_eq!(back.rotation.angle_to(&s.rotation), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn skew_matches_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let w = Vector3::new(4.0, -1.0, 0.5);
        assert_abs_diff_eq!(skew(v) * w, v.cross(&w), epsilon = 1e-12);
    }
}
