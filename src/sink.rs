//! Output surface for the fusion driver: a trait plus a lock-protected
//! latest-value implementation. The driver never blocks on a slow consumer —
//! each update simply overwrites the previous value, there is no queue.

use std::sync::Mutex;

use crate::gnss::PreparedGnss;
use crate::state::NavState;

/// Receives filter output. Implementations must not block the caller for
/// longer than it takes to store a value; there is no delivery guarantee
/// beyond "most recent wins".
pub trait NavSink: Send + Sync {
    fn update_nav_state(&self, state: NavState);
    fn update_gnss_pose(&self, prepared: &PreparedGnss);
}

/// A `NavSink` that discards everything. Useful for headless runs that only
/// care about the final output stream, or for tests.
#[derive(Default)]
pub struct NullSink;

impl NavSink for NullSink {
    fn update_nav_state(&self, _state: NavState) {}
    fn update_gnss_pose(&self, _prepared: &PreparedGnss) {}
}

/// The single-writer/single-reader latest-value slot the rest of the crate
/// is built around: each field is its own `Mutex`, so a reader of GNSS pose
/// never blocks on a concurrent nav-state write.
#[derive(Default)]
pub struct SharedSink {
    nav_state: Mutex<Option<NavState>>,
    gnss_pose: Mutex<Option<(f64, Vector3Snapshot)>>,
}

/// A minimal, `Copy`-able snapshot of a prepared GNSS pose, since
/// [`PreparedGnss`] itself borrows nothing but is not `Send`-friendly to
/// store behind a long-lived lock if its shape grows a borrow later.
#[derive(Clone, Copy, Debug)]
pub struct Vector3Snapshot {
    pub position: [f64; 3],
    pub utm_valid: bool,
}

impl SharedSink {
    pub fn new() -> Self {
        SharedSink {
            nav_state: Mutex::new(None),
            gnss_pose: Mutex::new(None),
        }
    }

    /// The most recently published nav state, if any.
    pub fn latest_nav_state(&self) -> Option<NavState> {
        *self.nav_state.lock().expect("nav_state mutex poisoned")
    }

    /// The most recently published GNSS pose, if any, as `(t, snapshot)`.
    pub fn latest_gnss_pose(&self) -> Option<(f64, Vector3Snapshot)> {
        *self.gnss_pose.lock().expect("gnss_pose mutex poisoned")
    }
}

impl NavSink for SharedSink {
    fn update_nav_state(&self, state: NavState) {
        *self.nav_state.lock().expect("nav_state mutex poisoned") = Some(state);
    }

    fn update_gnss_pose(&self, prepared: &PreparedGnss) {
        let snapshot = Vector3Snapshot {
            position: prepared.position.into(),
            utm_valid: prepared.utm_valid,
        };
        *self.gnss_pose.lock().expect("gnss_pose mutex poisoned") = Some((prepared.raw.t, snapshot));
    }
}

/// A `NavSink` that forwards both updates to a user-supplied closure pair.
/// Grounded on the "latest value, no queue" requirement the same way
/// `SharedSink` is, but for callers that want to drive their own storage
/// (e.g. an in-process viewer) instead of polling.
pub struct CallbackSink<F, G>
where
    F: Fn(NavState) + Send + Sync,
    G: Fn(&PreparedGnss) + Send + Sync,
{
    on_nav_state: F,
    on_gnss_pose: G,
}

impl<F, G> CallbackSink<F, G>
where
    F: Fn(NavState) + Send + Sync,
    G: Fn(&PreparedGnss) + Send + Sync,
{
    pub fn new(on_nav_state: F, on_gnss_pose: G) -> Self {
        CallbackSink {
            on_nav_state,
            on_gnss_pose,
        }
    }
}

impl<F, G> NavSink for CallbackSink<F, G>
where
    F: Fn(NavState) + Send + Sync,
    G: Fn(&PreparedGnss) + Send + Sync,
{
    fn update_nav_state(&self, state: NavState) {
        (self.on_nav_state)(state);
    }

    fn update_gnss_pose(&self, prepared: &PreparedGnss) {
        (self.on_gnss_pose)(prepared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnss::{GnssReading, GnssStatus};
    use crate::geo::UtmCoord;
    use nalgebra::{UnitQuaternion, Vector3};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_prepared() -> PreparedGnss {
        PreparedGnss {
            raw: GnssReading {
                t: 1.0,
                status: GnssStatus::FixedRtk,
                lat_deg: 0.0,
                lon_deg: 0.0,
                alt_m: 0.0,
                heading_deg: 0.0,
                heading_valid: false,
            },
            utm: UtmCoord {
                zone: 31,
                northern_hemisphere: true,
                easting: 0.0,
                northing: 0.0,
            },
            utm_valid: true,
            position: Vector3::new(1.0, 2.0, 3.0),
            rotation: UnitQuaternion::identity(),
            heading_valid: false,
        }
    }

    #[test]
    fn shared_sink_keeps_only_the_latest_value() {
        let sink = SharedSink::new();
        assert!(sink.latest_nav_state().is_none());

        let mut first = NavState::from(&crate::state::NominalState::at_rest(Vector3::new(0.0, 0.0, -9.81)));
        first.t = 1.0;
        let mut second = first;
        second.t = 2.0;

        sink.update_nav_state(first);
        sink.update_nav_state(second);
        assert_eq!(sink.latest_nav_state().unwrap().t, 2.0);
    }

    #[test]
    fn shared_sink_stores_gnss_pose_independently_of_nav_state() {
        let sink = SharedSink::new();
        sink.update_gnss_pose(&sample_prepared());
        let (t, snap) = sink.latest_gnss_pose().unwrap();
        assert_eq!(t, 1.0);
        assert_eq!(snap.position, [1.0, 2.0, 3.0]);
        assert!(sink.latest_nav_state().is_none());
    }

    #[test]
    fn callback_sink_forwards_every_call() {
        let nav_calls = AtomicUsize::new(0);
        let gnss_calls = AtomicUsize::new(0);
        let sink = CallbackSink::new(
            |_state| {
                nav_calls.fetch_add(1, Ordering::SeqCst);
            },
            |_prepared| {
                gnss_calls.fetch_add(1, Ordering::SeqCst);
            },
        );
        sink.update_nav_state(NavState::from(&crate::state::NominalState::at_rest(Vector3::new(
            0.0, 0.0, -9.81,
        ))));
        sink.update_gnss_pose(&sample_prepared());
        assert_eq!(nav_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gnss_calls.load(Ordering::SeqCst), 1);
    }
}
