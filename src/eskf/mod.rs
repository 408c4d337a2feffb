//! The error-state Kalman filter engine: propagates the nominal state and
//! its 18-dim error covariance on IMU input, and corrects both against GNSS
//! pose, wheel-odometry velocity, and zero-velocity observations.
//!
//! State and covariance live on the stack as fixed-size `nalgebra` types;
//! nothing in the predict/update path allocates.

use nalgebra::{Matrix3, SMatrix, SVector, UnitQuaternion, Vector3};

use crate::config::FilterConfig;
use crate::gnss::PreparedGnss;
use crate::state::{error_block, skew, ErrorState, NavState, NominalState, ERROR_STATE_DIM};

type Covariance = SMatrix<f64, ERROR_STATE_DIM, ERROR_STATE_DIM>;

/// Residual norm below which an update is treated as a no-op: no injection,
/// no covariance change. Guards against a measurement that exactly agrees
/// with the prediction nudging the state through floating-point noise alone.
const RESIDUAL_EPS: f64 = 1e-12;

/// Outcome of a single observation update, reported to the fusion driver for
/// logging and testing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpdateOutcome {
    /// The correction was computed and injected.
    Applied { iterations: u32, correction_norm: f64 },
    /// The residual was already within [`RESIDUAL_EPS`]; nothing changed.
    Skipped,
    /// The innovation covariance was singular; the update was abandoned.
    SingularInnovation,
}

/// The filter engine: one nominal state, one error covariance, and the
/// tuning knobs that drive propagation and correction.
pub struct EskfEngine {
    state: NominalState,
    covariance: Covariance,
    sigma_gyro: f64,
    sigma_acc: f64,
    sigma_bg: f64,
    sigma_ba: f64,
    max_imu_dt: f64,
    iekf_max_iter: usize,
    iekf_eps: f64,
    consecutive_divergences: u32,
    max_consecutive_divergences: u32,
}

impl EskfEngine {
    /// Builds an engine from config, with the state initialized at rest and
    /// the covariance diagonal set from `initial_sigmas`. Call [`Self::init`]
    /// afterward once alignment has produced a better starting state.
    pub fn new(config: &FilterConfig, gravity: Vector3<f64>) -> Self {
        let mut covariance = Covariance::zeros();
        let s = &config.initial_sigmas;
        for i in error_block::POSITION {
            covariance[(i, i)] = s.position * s.position;
        }
        for i in error_block::VELOCITY {
            covariance[(i, i)] = s.velocity * s.velocity;
        }
        for i in error_block::ATTITUDE {
            covariance[(i, i)] = s.attitude * s.attitude;
        }
        for i in error_block::GYRO_BIAS {
            covariance[(i, i)] = s.gyro_bias * s.gyro_bias;
        }
        for i in error_block::ACCEL_BIAS {
            covariance[(i, i)] = s.accel_bias * s.accel_bias;
        }
        for i in error_block::GRAVITY {
            covariance[(i, i)] = s.gravity * s.gravity;
        }

        EskfEngine {
            state: NominalState::at_rest(gravity),
            covariance,
            sigma_gyro: config.sigma_gyro,
            sigma_acc: config.sigma_acc,
            sigma_bg: config.sigma_bg,
            sigma_ba: config.sigma_ba,
            max_imu_dt: config.max_imu_dt,
            iekf_max_iter: config.iekf_max_iter,
            iekf_eps: config.iekf_eps,
            consecutive_divergences: 0,
            max_consecutive_divergences: config.max_consecutive_divergences,
        }
    }

    /// Overwrites the nominal state, e.g. once initial alignment has produced
    /// a bias and gravity estimate. Covariance is left untouched.
    pub fn init(&mut self, state: NominalState) {
        self.state = state;
    }

    pub fn nominal(&self) -> &NominalState {
        &self.state
    }

    /// Snapshot of the current belief, suitable for handing to a sink.
    pub fn snapshot(&self) -> NavState {
        let mut snap = NavState::from(&self.state);
        snap.covariance_trace = self.covariance.trace();
        snap
    }

    /// True while the state is finite and the engine hasn't tripped its
    /// consecutive-divergence budget.
    pub fn is_healthy(&self) -> bool {
        self.state.is_finite() && self.consecutive_divergences < self.max_consecutive_divergences
    }

    /// Propagates the state and covariance forward to `t` using one IMU
    /// sample. Samples whose `dt` exceeds `max_imu_dt` are clamped rather
    /// than integrated in one large step, matching the external-interface
    /// contract for a stale or gapped IMU stream.
    pub fn predict(&mut self, t: f64, gyro: Vector3<f64>, accel: Vector3<f64>) {
        let dt = (t - self.state.t).clamp(0.0, self.max_imu_dt);
        if dt <= 0.0 {
            self.state.t = t;
            return;
        }

        let gyro_hat = gyro - self.state.gyro_bias;
        let accel_hat = accel - self.state.accel_bias;
        let rotation = self.state.rotation;

        let accel_world = rotation * accel_hat + self.state.gravity;

        let new_rotation = rotation * UnitQuaternion::from_scaled_axis(gyro_hat * dt);
        let new_position = self.state.position + self.state.velocity * dt + 0.5 * accel_world * dt * dt;
        let new_velocity = self.state.velocity + accel_world * dt;

        self.state = NominalState {
            t,
            rotation: new_rotation,
            position: new_position,
            velocity: new_velocity,
            gyro_bias: self.state.gyro_bias,
            accel_bias: self.state.accel_bias,
            gravity: self.state.gravity,
        };

        let f = Self::transition_matrix(rotation, gyro_hat, accel_hat, dt);
        let q = self.process_noise(rotation, dt);
        self.covariance = f * self.covariance * f.transpose() + q;
        self.symmetrize();

        if !self.state.is_finite() {
            self.consecutive_divergences += 1;
        } else {
            self.consecutive_divergences = 0;
        }
    }

    /// Discrete error-state transition matrix for one IMU step, using the
    /// right-perturbation convention throughout (`R <- R * Exp(dtheta)`).
    fn transition_matrix(
        rotation: UnitQuaternion<f64>,
        gyro_hat: Vector3<f64>,
        accel_hat: Vector3<f64>,
        dt: f64,
    ) -> Covariance {
        let mut f = Covariance::identity();
        let r = rotation.to_rotation_matrix().into_inner();
        let i3 = Matrix3::identity();

        f.fixed_view_mut::<3, 3>(error_block::POSITION.start, error_block::VELOCITY.start)
            .copy_from(&(i3 * dt));

        f.fixed_view_mut::<3, 3>(error_block::VELOCITY.start, error_block::ATTITUDE.start)
            .copy_from(&(-r * skew(accel_hat) * dt));
        f.fixed_view_mut::<3, 3>(error_block::VELOCITY.start, error_block::ACCEL_BIAS.start)
            .copy_from(&(-r * dt));
        f.fixed_view_mut::<3, 3>(error_block::VELOCITY.start, error_block::GRAVITY.start)
            .copy_from(&(i3 * dt));

        let exp_neg_wdt = UnitQuaternion::from_scaled_axis(-gyro_hat * dt)
            .to_rotation_matrix()
            .into_inner();
        f.fixed_view_mut::<3, 3>(error_block::ATTITUDE.start, error_block::ATTITUDE.start)
            .copy_from(&exp_neg_wdt);
        f.fixed_view_mut::<3, 3>(error_block::ATTITUDE.start, error_block::GYRO_BIAS.start)
            .copy_from(&(-i3 * dt));

        f
    }

    fn process_noise(&self, rotation: UnitQuaternion<f64>, dt: f64) -> Covariance {
        let mut q = Covariance::zeros();
        let r = rotation.to_rotation_matrix().into_inner();
        let i3 = Matrix3::<f64>::identity();

        let sigma_acc2 = self.sigma_acc * self.sigma_acc * dt * dt;
        let vel_noise = r * (i3 * sigma_acc2) * r.transpose();
        q.fixed_view_mut::<3, 3>(error_block::VELOCITY.start, error_block::VELOCITY.start)
            .copy_from(&vel_noise);

        let sigma_gyro2 = self.sigma_gyro * self.sigma_gyro * dt * dt;
        q.fixed_view_mut::<3, 3>(error_block::ATTITUDE.start, error_block::ATTITUDE.start)
            .copy_from(&(i3 * sigma_gyro2));

        let sigma_bg2 = self.sigma_bg * self.sigma_bg * dt;
        q.fixed_view_mut::<3, 3>(error_block::GYRO_BIAS.start, error_block::GYRO_BIAS.start)
            .copy_from(&(i3 * sigma_bg2));

        let sigma_ba2 = self.sigma_ba * self.sigma_ba * dt;
        q.fixed_view_mut::<3, 3>(error_block::ACCEL_BIAS.start, error_block::ACCEL_BIAS.start)
            .copy_from(&(i3 * sigma_ba2));

        q
    }

    /// Re-symmetrizes `P` and clamps away any negative eigenvalues that
    /// floating-point drift introduced, so the covariance never leaves the
    /// PSD cone even after many propagate/update cycles.
    fn symmetrize(&mut self) {
        self.covariance = (self.covariance + self.covariance.transpose()) * 0.5;

        let eigen = nalgebra::linalg::SymmetricEigen::new(self.covariance);
        if eigen.eigenvalues.iter().any(|&v| v < 0.0) {
            let clamped = eigen.eigenvalues.map(|v| v.max(0.0));
            self.covariance = eigen.eigenvectors * Covariance::from_diagonal(&clamped) * eigen.eigenvectors.transpose();
            self.covariance = (self.covariance + self.covariance.transpose()) * 0.5;
        }
    }

    /// GNSS pose update: corrects position always, and attitude too when the
    /// fix carries a valid heading. Runs the iterated correction so a large
    /// initial residual re-linearizes at the evolving trial point.
    pub fn update_gnss_pose(&mut self, prepared: &PreparedGnss, sigma_pos: f64, sigma_heading: f64) -> UpdateOutcome {
        if prepared.heading_valid {
            let sigma = SVector::<f64, 6>::from_column_slice(&[
                sigma_pos, sigma_pos, sigma_pos, sigma_heading, sigma_heading, sigma_heading,
            ]);
            let noise = Covariance6::from_diagonal(&sigma.component_mul(&sigma));
            self.update_iterated(|nominal| {
                let r_pos = prepared.position - nominal.position;
                let r_rot = (nominal.rotation.inverse() * prepared.rotation)
                    .scaled_axis();
                let mut residual = SVector::<f64, 6>::zeros();
                residual.fixed_rows_mut::<3>(0).copy_from(&r_pos);
                residual.fixed_rows_mut::<3>(3).copy_from(&r_rot);

                let mut h = SMatrix::<f64, 6, ERROR_STATE_DIM>::zeros();
                h.fixed_view_mut::<3, 3>(0, error_block::POSITION.start)
                    .copy_from(&Matrix3::identity());
                h.fixed_view_mut::<3, 3>(3, error_block::ATTITUDE.start)
                    .copy_from(&Matrix3::identity());

                (residual, h, noise)
            })
        } else {
            let sigma = Vector3::new(sigma_pos, sigma_pos, sigma_pos);
            let noise = Matrix3::from_diagonal(&sigma.component_mul(&sigma));
            self.update_iterated(|nominal| {
                let residual = prepared.position - nominal.position;
                let mut h = SMatrix::<f64, 3, ERROR_STATE_DIM>::zeros();
                h.fixed_view_mut::<3, 3>(0, error_block::POSITION.start)
                    .copy_from(&Matrix3::identity());
                (residual, h, noise)
            })
        }
    }

    /// Wheel-odometry forward-speed update: observes the vehicle-frame
    /// x-velocity `s` against the rotated body velocity.
    pub fn update_odom_velocity(&mut self, speed: f64, sigma_v: f64) -> UpdateOutcome {
        let noise = Matrix3::from_diagonal_element(sigma_v * sigma_v);
        self.update_iterated(|nominal| {
            let body_velocity = Vector3::new(speed, 0.0, 0.0);
            let residual = nominal.rotation * body_velocity - nominal.velocity;
            let mut h = SMatrix::<f64, 3, ERROR_STATE_DIM>::zeros();
            h.fixed_view_mut::<3, 3>(0, error_block::VELOCITY.start)
                .copy_from(&Matrix3::identity());
            let r = nominal.rotation.to_rotation_matrix().into_inner();
            h.fixed_view_mut::<3, 3>(0, error_block::ATTITUDE.start)
                .copy_from(&(-r * skew(body_velocity)));
            (residual, h, noise)
        })
    }

    /// Zero-velocity pseudo-measurement: asserts the body is at rest.
    pub fn update_zupt(&mut self, sigma_z: f64) -> UpdateOutcome {
        let noise = Matrix3::from_diagonal_element(sigma_z * sigma_z);
        self.update_iterated(|nominal| {
            let residual = -nominal.velocity;
            let mut h = SMatrix::<f64, 3, ERROR_STATE_DIM>::zeros();
            h.fixed_view_mut::<3, 3>(0, error_block::VELOCITY.start)
                .copy_from(&Matrix3::identity());
            (residual, h, noise)
        })
    }

    /// Runs the iterated correction loop for a fixed measurement dimension
    /// `M`: re-linearizes `build` at the current trial state each pass,
    /// injects the resulting error state with [`NominalState::compose_right`],
    /// and stops on convergence or `iekf_max_iter`. The covariance update and
    /// the rotation-block re-anchoring reset use the last iteration's
    /// Jacobian and gain.
    fn update_iterated<const M: usize>(
        &mut self,
        mut build: impl FnMut(&NominalState) -> (SVector<f64, M>, SMatrix<f64, M, ERROR_STATE_DIM>, SMatrix<f64, M, M>),
    ) -> UpdateOutcome {
        let mut trial = self.state;
        let mut last: Option<(SMatrix<f64, M, ERROR_STATE_DIM>, SMatrix<f64, ERROR_STATE_DIM, M>, SMatrix<f64, M, M>)> =
            None;
        let mut last_dx = ErrorState::zeros();
        let mut iterations = 0u32;

        for _ in 0..self.iekf_max_iter {
            iterations += 1;
            let (residual, h, noise) = build(&trial);
            if residual.norm() < RESIDUAL_EPS {
                return UpdateOutcome::Skipped;
            }

            let p = self.covariance;
            let s = h * p * h.transpose() + noise;
            let s_inv = match s.try_inverse() {
                Some(inv) => inv,
                None => return UpdateOutcome::SingularInnovation,
            };
            let k = p * h.transpose() * s_inv;
            let dx = k * residual;

            trial = trial.compose_right(&dx);
            last_dx = dx;
            last = Some((h, k, noise));

            if dx.norm() < self.iekf_eps {
                break;
            }
        }

        let (h, k, noise) = match last {
            Some(v) => v,
            None => return UpdateOutcome::Skipped,
        };

        let i = Covariance::identity();
        let i_kh = i - k * h;
        let mut updated = i_kh * self.covariance * i_kh.transpose() + k * noise * k.transpose();

        // Re-anchor the covariance's rotation block to the post-injection
        // tangent space: J = I - 0.5*[dtheta]_x in the attitude rows/cols.
        let mut j = Covariance::identity();
        let dtheta = last_dx.fixed_rows::<3>(error_block::ATTITUDE.start).into_owned();
        j.fixed_view_mut::<3, 3>(error_block::ATTITUDE.start, error_block::ATTITUDE.start)
            .copy_from(&(Matrix3::identity() - 0.5 * skew(dtheta)));
        updated = j * updated * j.transpose();

        self.covariance = updated;
        self.symmetrize();
        self.state = trial;

        UpdateOutcome::Applied {
            iterations,
            correction_norm: last_dx.norm(),
        }
    }
}

type Covariance6 = SMatrix<f64, 6, 6>;
