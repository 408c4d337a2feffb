//! The fusion driver: owns the engine and the GNSS preparer, runs initial
//! static alignment, dispatches incoming records to the right predict/update
//! call, and publishes every result to a [`NavSink`].

use std::collections::VecDeque;

use log::{debug, info, warn};
use nalgebra::{UnitQuaternion, Vector3};

use crate::config::FilterConfig;
use crate::eskf::EskfEngine;
use crate::gnss::{GnssPreparer, GnssReading, Origin};
use crate::ingest::Record;
use crate::sink::NavSink;
use crate::state::NominalState;

/// Alignment state: the driver collects static IMU samples before it has a
/// usable attitude, bias, or gravity estimate to start the engine from.
enum Phase {
    Aligning { samples: Vec<(Vector3<f64>, Vector3<f64>)> },
    Running,
}

/// Drives the filter from a stream of [`Record`]s to a [`NavSink`].
pub struct FusionDriver<S: NavSink> {
    config: FilterConfig,
    engine: EskfEngine,
    preparer: GnssPreparer,
    sink: S,
    phase: Phase,
    recent_gyro: VecDeque<Vector3<f64>>,
    recent_accel: VecDeque<Vector3<f64>>,
    last_gnss_t: Option<f64>,
    last_odom: Option<(f64, f64)>,
}

impl<S: NavSink> FusionDriver<S> {
    pub fn new(config: FilterConfig, sink: S) -> Self {
        let mut preparer = GnssPreparer::new(config.antenna_pos_x, config.antenna_pos_y, config.antenna_angle_deg);
        if let crate::config::MapOrigin::Fixed { x, y, z } = config.map_origin {
            preparer.set_origin(Origin {
                zone: 0,
                northern_hemisphere: true,
                easting: x,
                northing: y,
                alt: z,
            });
        }

        let engine = EskfEngine::new(&config, Vector3::new(0.0, 0.0, -9.81));
        FusionDriver {
            phase: Phase::Aligning {
                samples: Vec::with_capacity(config.init_static_samples),
            },
            engine,
            preparer,
            sink,
            recent_gyro: VecDeque::with_capacity(config.static_window),
            recent_accel: VecDeque::with_capacity(config.static_window),
            last_gnss_t: None,
            last_odom: None,
            config,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_healthy(&self) -> bool {
        self.engine.is_healthy()
    }

    /// Feeds one parsed record to the driver. IMU records drive the clock;
    /// GNSS and odometry records are dropped (with a log line) rather than
    /// propagated as errors, per the external error-handling contract.
    pub fn on_record(&mut self, record: Record) {
        match record {
            Record::Imu { t, gyro, accel } => self.on_imu(t, gyro, accel),
            Record::Odom { t, pulses } => self.on_odom(t, pulses),
            Record::Gnss(reading) => self.on_gnss(reading),
        }
    }

    fn on_imu(&mut self, t: f64, gyro: Vector3<f64>, accel: Vector3<f64>) {
        self.track_static_window(gyro, accel);

        match &mut self.phase {
            Phase::Aligning { samples } => {
                samples.push((gyro, accel));
                if samples.len() >= self.config.init_static_samples {
                    self.finish_alignment(t);
                }
            }
            Phase::Running => {
                self.engine.predict(t, gyro, accel);
                if self.config.with_zupt && self.is_static() {
                    let outcome = self.engine.update_zupt(self.config.sigma_zupt);
                    debug!("zupt update: {outcome:?}");
                }
                self.publish();
            }
        }
    }

    fn finish_alignment(&mut self, t: f64) {
        let samples = match &self.phase {
            Phase::Aligning { samples } => samples.clone(),
            Phase::Running => return,
        };
        let n = samples.len() as f64;
        let mean_gyro = samples.iter().map(|(g, _)| *g).sum::<Vector3<f64>>() / n;
        let mean_accel = samples.iter().map(|(_, a)| *a).sum::<Vector3<f64>>() / n;

        let up = Vector3::z();
        let rotation = UnitQuaternion::rotation_between(&mean_accel, &up).unwrap_or_else(UnitQuaternion::identity);
        let gravity = Vector3::new(0.0, 0.0, -mean_accel.norm());

        info!(
            "initial alignment complete: gyro_bias={mean_gyro:?}, gravity={gravity:?}, samples={}",
            samples.len()
        );

        self.engine.init(NominalState {
            t,
            rotation,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            gyro_bias: mean_gyro,
            accel_bias: Vector3::zeros(),
            gravity,
        });
        self.phase = Phase::Running;
        self.publish();
    }

    fn track_static_window(&mut self, gyro: Vector3<f64>, accel: Vector3<f64>) {
        if self.recent_gyro.len() == self.config.static_window {
            self.recent_gyro.pop_front();
            self.recent_accel.pop_front();
        }
        self.recent_gyro.push_back(gyro);
        self.recent_accel.push_back(accel);
    }

    /// True when every sample in the trailing static window is below both
    /// the gyro and accelerometer-deviation thresholds.
    fn is_static(&self) -> bool {
        if self.recent_gyro.len() < self.config.static_window {
            return false;
        }
        let gravity_mag = self.engine.nominal().gravity.norm();
        let gyro_ok = self
            .recent_gyro
            .iter()
            .all(|g| g.norm() < self.config.static_gyro_thresh);
        let accel_ok = self
            .recent_accel
            .iter()
            .all(|a| (a.norm() - gravity_mag).abs() < self.config.static_acc_thresh);
        gyro_ok && accel_ok
    }

    fn on_gnss(&mut self, raw: GnssReading) {
        if let Phase::Aligning { .. } = self.phase {
            debug!("dropping GNSS fix received before alignment completed");
            return;
        }
        let current_t = self.engine.nominal().t;
        if raw.t + self.config.gnss_back_tolerance < current_t {
            warn!("dropping out-of-order GNSS fix at t={} (filter at t={current_t})", raw.t);
            return;
        }
        if let Some(last) = self.last_gnss_t {
            if raw.t + self.config.gnss_back_tolerance < last {
                warn!("dropping out-of-order GNSS fix at t={} (last accepted t={last})", raw.t);
                return;
            }
        }

        let status = self.config.gnss_status_override.unwrap_or(raw.status);
        let raw = GnssReading { status, ..raw };

        let prepared = match self.preparer.prepare(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("dropping unusable GNSS fix: {e}");
                return;
            }
        };
        if !prepared.utm_valid {
            warn!("dropping GNSS fix outside the latched UTM zone/hemisphere");
            return;
        }

        self.last_gnss_t = Some(raw.t);
        self.sink.update_gnss_pose(&prepared);

        let outcome = self
            .engine
            .update_gnss_pose(&prepared, self.config.sigma_gnss_pos, self.config.sigma_gnss_heading);
        debug!("gnss update: {outcome:?}");
        self.publish();
    }

    fn on_odom(&mut self, t: f64, pulses: f64) {
        if !self.config.with_odom {
            return;
        }
        if let Phase::Aligning { .. } = self.phase {
            return;
        }

        let speed = if self.config.odom_pulses_are_cumulative {
            let (last_t, last_pulses) = match self.last_odom {
                Some(v) => v,
                None => {
                    self.last_odom = Some((t, pulses));
                    return;
                }
            };
            let dt = t - last_t;
            if dt <= 0.0 {
                warn!("dropping odom sample with non-positive dt ({dt})");
                return;
            }
            let delta = pulses - last_pulses;
            (delta / self.config.pulses_per_rev) * std::f64::consts::TAU * self.config.wheel_radius / dt
        } else {
            (pulses / self.config.pulses_per_rev) * std::f64::consts::TAU * self.config.wheel_radius
        };
        self.last_odom = Some((t, pulses));

        if speed.abs() > self.config.odom_speed_cap {
            warn!("dropping implausible odom speed {speed} m/s");
            return;
        }

        let outcome = self.engine.update_odom_velocity(speed, self.config.sigma_odom_v);
        debug!("odom update: {outcome:?}");
        self.publish();
    }

    fn publish(&mut self) {
        if !self.engine.is_healthy() {
            return;
        }
        self.sink.update_nav_state(self.engine.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnss::GnssStatus;
    use crate::sink::SharedSink;

    fn config() -> FilterConfig {
        let mut c = FilterConfig::default();
        c.init_static_samples = 5;
        c.static_window = 3;
        c
    }

    fn feed_static_imu(driver: &mut FusionDriver<SharedSink>, n: usize, start_t: f64) -> f64 {
        let mut t = start_t;
        for _ in 0..n {
            t += 0.01;
            driver.on_record(Record::Imu {
                t,
                gyro: Vector3::zeros(),
                accel: Vector3::new(0.0, 0.0, 9.81),
            });
        }
        t
    }

    #[test]
    fn alignment_completes_after_enough_static_samples() {
        let mut driver = FusionDriver::new(config(), SharedSink::new());
        assert!(driver.sink().latest_nav_state().is_none());
        feed_static_imu(&mut driver, 5, 0.0);
        assert!(driver.sink().latest_nav_state().is_some());
    }

    #[test]
    fn zupt_keeps_velocity_near_zero_while_static() {
        let mut driver = FusionDriver::new(config(), SharedSink::new());
        let t = feed_static_imu(&mut driver, 5, 0.0);
        feed_static_imu(&mut driver, 20, t);
        let state = driver.sink().latest_nav_state().unwrap();
        assert!(Vector3::from(state.velocity).norm() < 0.1);
    }

    #[test]
    fn out_of_order_gnss_is_dropped() {
        let mut driver = FusionDriver::new(config(), SharedSink::new());
        let t = feed_static_imu(&mut driver, 5, 0.0);
        feed_static_imu(&mut driver, 5, t);

        let reading = GnssReading {
            t: 10.0,
            status: GnssStatus::FixedRtk,
            lat_deg: 45.0,
            lon_deg: 9.0,
            alt_m: 10.0,
            heading_deg: 0.0,
            heading_valid: false,
        };
        driver.on_record(Record::Gnss(reading));
        assert!(driver.sink().latest_gnss_pose().is_some());

        // a fix timestamped well before the one just accepted should be dropped
        let stale = GnssReading { t: 1.0, ..reading };
        driver.on_record(Record::Gnss(stale));
        let (last_t, _) = driver.sink().latest_gnss_pose().unwrap();
        assert_eq!(last_t, 10.0);
    }

    #[test]
    fn odom_updates_are_ignored_when_disabled() {
        let mut c = config();
        c.with_odom = false;
        let mut driver = FusionDriver::new(c, SharedSink::new());
        feed_static_imu(&mut driver, 5, 0.0);
        driver.on_record(Record::Odom { t: 1.0, pulses: 10.0 });
        driver.on_record(Record::Odom { t: 2.0, pulses: 20.0 });
        // no panic, and state is unaffected beyond what IMU alone produced
        assert!(driver.is_healthy());
    }
}
