//! End-to-end scenarios driving the full ingest -> fusion -> sink pipeline
//! the same way the CLI does, built from synthesized IMU/GNSS/odometry
//! sequences rather than a recorded log file.

use approx::assert_abs_diff_eq;
use nalgebra::{UnitQuaternion, Vector3};

use eskf_nav::geo::{self, UtmCoord};
use eskf_nav::gnss::{GnssReading, GnssStatus};
use eskf_nav::ingest::Record;
use eskf_nav::sink::SharedSink;
use eskf_nav::{FilterConfig, FusionDriver};

const BASE_LAT: f64 = 45.0;
const BASE_LON: f64 = 9.0;

/// A GNSS fix offset `(east, north)` meters from a fixed base point, built by
/// inverting the crate's own UTM projection so the synthesized sequence is
/// exactly consistent with what `gnss.rs` will recover from it.
fn gnss_at_offset(t: f64, east_offset: f64, north_offset: f64) -> GnssReading {
    let base = geo::lat_lon_to_utm(BASE_LAT, BASE_LON).unwrap();
    let utm = UtmCoord {
        zone: base.zone,
        northern_hemisphere: base.northern_hemisphere,
        easting: base.easting + east_offset,
        northing: base.northing + north_offset,
    };
    let (lat_deg, lon_deg) = geo::utm_to_lat_lon(utm).unwrap();
    GnssReading {
        t,
        status: GnssStatus::FixedRtk,
        lat_deg,
        lon_deg,
        alt_m: 0.0,
        heading_deg: 0.0,
        heading_valid: false,
    }
}

/// Feeds exactly `init_static_samples` stationary, level IMU samples and
/// returns the driver once alignment has completed, along with the
/// timestamp at which that happened.
fn aligned_driver(config: FilterConfig) -> (FusionDriver<SharedSink>, f64) {
    let mut driver = FusionDriver::new(config.clone(), SharedSink::new());
    let mut t = 0.0;
    for _ in 0..config.init_static_samples {
        t += 0.01;
        driver.on_record(Record::Imu {
            t,
            gyro: Vector3::zeros(),
            accel: Vector3::new(0.0, 0.0, 9.81),
        });
    }
    assert!(driver.sink().latest_nav_state().is_some(), "alignment should have completed");
    (driver, t)
}

#[test]
fn s1_static_alignment_recovers_attitude_bias_and_gravity() {
    let config = FilterConfig {
        init_static_samples: 200,
        ..FilterConfig::default()
    };
    let (driver, _t) = aligned_driver(config);
    let state = driver.sink().latest_nav_state().unwrap();

    assert_abs_diff_eq!(Vector3::from(state.velocity).norm(), 0.0, epsilon = 1e-6);

    let q = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
        state.orientation[3],
        state.orientation[0],
        state.orientation[1],
        state.orientation[2],
    ));
    assert_abs_diff_eq!(q.angle_to(&UnitQuaternion::identity()), 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(Vector3::from(state.gyro_bias).norm(), 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(Vector3::from(state.gravity).z, -9.81, epsilon = 1e-3);
}

#[test]
fn s2_constant_velocity_east_is_tracked_via_gnss() {
    let config = FilterConfig {
        init_static_samples: 50,
        ..FilterConfig::default()
    };
    let (mut driver, t_align_end) = aligned_driver(config);

    let mut t = t_align_end;
    let mut next_gnss_t = t_align_end;
    for _ in 0..1000 {
        t += 0.01;
        driver.on_record(Record::Imu {
            t,
            gyro: Vector3::zeros(),
            accel: Vector3::new(0.0, 0.0, 9.81),
        });
        if t + 1e-9 >= next_gnss_t {
            let elapsed = t - t_align_end;
            driver.on_record(Record::Gnss(gnss_at_offset(t, 5.0 * elapsed, 0.0)));
            next_gnss_t += 0.1;
        }
    }

    let state = driver.sink().latest_nav_state().unwrap();
    let velocity = Vector3::from(state.velocity);
    let position = Vector3::from(state.position);

    assert!(
        velocity.x > 1.0,
        "expected the filter to pick up most of the 5 m/s eastward motion from repeated position fixes, got {}",
        velocity.x
    );
    assert_abs_diff_eq!(position.x, 50.0, epsilon = 5.0);
    assert_abs_diff_eq!(position.y, 0.0, epsilon = 1.0);
}

#[test]
fn s3_position_stays_bounded_through_a_gnss_outage_and_recovers() {
    let config = FilterConfig {
        init_static_samples: 50,
        ..FilterConfig::default()
    };
    let (mut driver, t_align_end) = aligned_driver(config);

    let mut t = t_align_end;
    let mut next_gnss_t = t_align_end;
    let outage = 4.0..6.0;
    for _ in 0..1000 {
        t += 0.01;
        driver.on_record(Record::Imu {
            t,
            gyro: Vector3::zeros(),
            accel: Vector3::new(0.0, 0.0, 9.81),
        });
        let elapsed = t - t_align_end;
        if t + 1e-9 >= next_gnss_t {
            if !outage.contains(&elapsed) {
                driver.on_record(Record::Gnss(gnss_at_offset(t, 5.0 * elapsed, 0.0)));
            }
            next_gnss_t += 0.1;
        }
    }

    let state = driver.sink().latest_nav_state().unwrap();
    // dead reckoning through a 2s gap at an already-tracked ~5 m/s shouldn't
    // blow up; a generous bound well short of "diverged" is what matters here.
    assert!(driver.is_healthy());
    assert!(Vector3::from(state.position).x.is_finite());
    assert_abs_diff_eq!(Vector3::from(state.position).x, 50.0, epsilon = 10.0);
}

#[test]
fn s5_out_of_order_gnss_does_not_change_filter_state() {
    let config = FilterConfig {
        init_static_samples: 50,
        ..FilterConfig::default()
    };
    let (mut driver, t_align_end) = aligned_driver(config);

    let mut t = t_align_end;
    for _ in 0..100 {
        t += 0.01;
        driver.on_record(Record::Imu {
            t,
            gyro: Vector3::zeros(),
            accel: Vector3::new(0.0, 0.0, 9.81),
        });
    }
    driver.on_record(Record::Gnss(gnss_at_offset(t, 1.0, 0.0)));
    let before = driver.sink().latest_nav_state().unwrap();

    // a fix timestamped 0.1s behind the last-accepted one should be dropped outright
    let stale = GnssReading {
        t: t - 0.1,
        ..gnss_at_offset(t - 0.1, 2.0, 0.0)
    };
    driver.on_record(Record::Gnss(stale));
    let after = driver.sink().latest_nav_state().unwrap();

    assert_eq!(before, after);
}

#[test]
fn s4_wheel_odometry_reduces_position_error_during_an_outage() {
    fn run(with_odom: bool) -> f64 {
        let config = FilterConfig {
            init_static_samples: 50,
            with_odom,
            ..FilterConfig::default()
        };
        let (mut driver, t_align_end) = aligned_driver(config.clone());

        let mut t = t_align_end;
        let mut next_gnss_t = t_align_end;
        let mut next_odom_t = t_align_end;
        let outage = 4.0..6.0;
        let mut sse = 0.0;
        let mut n = 0u32;

        for _ in 0..1000 {
            t += 0.01;
            driver.on_record(Record::Imu {
                t,
                gyro: Vector3::zeros(),
                accel: Vector3::new(0.0, 0.0, 9.81),
            });
            let elapsed = t - t_align_end;

            if with_odom && t + 1e-9 >= next_odom_t {
                let pulses = 5.0 * elapsed * config.pulses_per_rev / (std::f64::consts::TAU * config.wheel_radius);
                driver.on_record(Record::Odom { t, pulses });
                next_odom_t += 0.02;
            }

            if t + 1e-9 >= next_gnss_t {
                if !outage.contains(&elapsed) {
                    driver.on_record(Record::Gnss(gnss_at_offset(t, 5.0 * elapsed, 0.0)));
                }
                next_gnss_t += 0.1;
            }

            if outage.contains(&elapsed) {
                if let Some(state) = driver.sink().latest_nav_state() {
                    let err = state.position[0] - 5.0 * elapsed;
                    sse += err * err;
                    n += 1;
                }
            }
        }

        (sse / n.max(1) as f64).sqrt()
    }

    let rms_without_odom = run(false);
    let rms_with_odom = run(true);

    assert!(
        rms_with_odom <= rms_without_odom + 1e-9,
        "expected wheel-odometry aiding to not make outage tracking worse: with={rms_with_odom}, without={rms_without_odom}"
    );
}
