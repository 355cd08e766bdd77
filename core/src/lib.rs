//! Pathfinder navigation engine
//!
//! This crate provides the navigation aid behind a location-guided treasure hunt: a live arrow and distance
//! readout that points the user back toward a previously saved geographic anchor. The engine fuses noisy,
//! intermittent GNSS fixes and noisy compass (rotation-vector) azimuth readings into a stable distance and
//! relative bearing, and captures a high-confidence anchor point from a short burst of fixes.
//!
//! The crate is built on a small set of dependencies:
//! - [`tokio`](https://crates.io/crates/tokio): Provides the single-consumer session actor, channels, and timers.
//! - [`world_magnetic_model`](https://crates.io/crates/world_magnetic_model): Provides the magnetic declination used
//!   to convert compass readings to true bearings.
//! - [`chrono`](https://crates.io/crates/chrono): Provides the time handling for clocks and model epochs.
//! - [`serde`](https://crates.io/crates/serde), [`csv`](https://crates.io/crates/csv): Configuration and replay I/O.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [earth]: Great-circle distance, initial bearing, and magnetic declination models.
//! - [location]: The [location::LocationFilter] that gates, despikes, and smooths raw position fixes.
//! - [heading]: The [heading::HeadingFilter] that corrects, smooths, and fuses compass azimuth with GNSS course.
//! - [anchor]: The anchor capture protocol ([anchor::CaptureWindow]) and the inverse-variance estimate.
//! - [navigation]: The [navigation::NavigationEngine] state machine and the published [navigation::NavState].
//! - [session]: The [session::Navigator] processing core and the [session::NavigationSession] actor.
//! - [config]: Tunable parameters, loadable from JSON, YAML, or TOML.
//! - [messages]: Input events and event streams used for replaying recorded sessions.
//! - [sim]: Sensor-log records, replay, and synthetic walks.
//!
//! ## Data flow
//!
//! Raw fixes flow through the [location::LocationFilter] to become stabilized samples. Stabilized samples feed
//! both the [navigation::NavigationEngine] (distance, arrival, signal quality) and the [heading::HeadingFilter]
//! (declination position and course of travel). Raw azimuth readings flow through the heading filter to become a
//! fused heading, which the engine turns into the on-screen arrow angle. Anchor capture consumes raw fixes directly
//! so that the inverse-variance weighting sees independent samples rather than EMA-correlated ones.
//!
//! ## Coordinate and angle conventions
//!
//! Positions are WGS84 latitude and longitude in degrees. All bearings, azimuths, and headings are degrees clockwise
//! from true north in the range [0, 360). Distances are meters. Timestamps are milliseconds since the Unix epoch.
pub mod anchor;
pub mod clock;
pub mod config;
pub mod earth;
pub mod error;
pub mod heading;
pub mod location;
pub mod messages;
pub mod navigation;
pub mod session;
pub mod sim;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use config::PathfinderConfig;
pub use error::NavError;
pub use navigation::{NavPhase, NavState, NavigationEngine, PermissionState, SignalQuality};
pub use session::{NavigationSession, Navigator};

/// A WGS84 geographic position in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north
    pub latitude: f64,
    /// Longitude in degrees, positive east
    pub longitude: f64,
}
impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint {
            latitude,
            longitude,
        }
    }
    /// True if both coordinates are finite and within the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}
impl Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6} deg, {:.6} deg)", self.latitude, self.longitude)
    }
}

/// A single raw position report from the platform location provider.
///
/// Fixes are consumed and discarded per sample; nothing in the engine keeps a reference to them
/// beyond the despike buffer (positions only) and an in-flight anchor capture.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub point: GeoPoint,
    /// Reported horizontal accuracy (one-sigma radius) in meters
    pub accuracy_m: f32,
    /// Ground speed in m/s
    pub speed_mps: f32,
    /// Whether the provider reported a course of travel
    pub has_bearing: bool,
    /// Reported course of travel in degrees (only meaningful when `has_bearing`)
    pub bearing_deg: f32,
    /// Reported course accuracy in degrees, if the provider supplies one
    pub bearing_accuracy_deg: Option<f32>,
    /// Fix time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}
impl RawFix {
    /// Create a fix without a reported bearing.
    pub fn new(point: GeoPoint, accuracy_m: f32, speed_mps: f32, timestamp_ms: i64) -> Self {
        RawFix {
            point,
            accuracy_m,
            speed_mps,
            has_bearing: false,
            bearing_deg: 0.0,
            bearing_accuracy_deg: None,
            timestamp_ms,
        }
    }
    /// Attach a provider-reported course of travel to this fix.
    pub fn with_bearing(mut self, bearing_deg: f32, bearing_accuracy_deg: Option<f32>) -> Self {
        self.has_bearing = true;
        self.bearing_deg = bearing_deg;
        self.bearing_accuracy_deg = bearing_accuracy_deg;
        self
    }
    /// Structural sanity of the fix: valid coordinates and a finite, positive accuracy.
    pub fn is_well_formed(&self) -> bool {
        self.point.is_valid() && self.accuracy_m.is_finite() && self.accuracy_m > 0.0
    }
    /// The provider-reported course, if any.
    pub fn reported_course(&self) -> Option<ReportedCourse> {
        if self.has_bearing && self.bearing_deg.is_finite() {
            Some(ReportedCourse {
                bearing_deg: self.bearing_deg,
                accuracy_deg: self.bearing_accuracy_deg,
            })
        } else {
            None
        }
    }
}

/// Course of travel as reported by the location provider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportedCourse {
    pub bearing_deg: f32,
    pub accuracy_deg: Option<f32>,
}

/// A smoothed position sample emitted by the [location::LocationFilter].
///
/// The point is EMA-smoothed; the accuracy, speed, timestamp, and reported course are taken from the
/// most recent raw fix that passed gating.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StabilizedSample {
    pub point: GeoPoint,
    pub accuracy_m: f32,
    pub speed_mps: f32,
    pub timestamp_ms: i64,
    pub reported_course: Option<ReportedCourse>,
}

/// The saved target location the user navigates toward.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub point: GeoPoint,
    /// Estimated accuracy of the anchor position in meters
    pub accuracy_m: f32,
    pub captured_at_ms: i64,
    /// Number of raw fixes that contributed to the estimate
    pub sample_count: usize,
}
impl Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Anchor {{ point: {}, accuracy: {:.2} m, samples: {} }}",
            self.point, self.accuracy_m, self.sample_count
        )
    }
}

/// The fused heading in degrees clockwise from true north, in [0, 360).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadingEstimate {
    pub fused_deg: f32,
}

// --- Miscellaneous functions for wrapping angles ---
/// Wrap an angle to the range [0, 360) degrees
///
/// Uses a floating point remainder rather than repeated subtraction so that arbitrarily large inputs
/// map in constant time. Non-finite inputs map to zero.
///
/// # Example
/// ```rust
/// use pathfinder::wrap_to_360;
/// assert_eq!(wrap_to_360(370.0), 10.0);
/// assert_eq!(wrap_to_360(-90.0), 270.0);
/// ```
pub fn wrap_to_360(angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    let mut wrapped = angle % 360.0;
    if wrapped < 0.0 {
        wrapped += 360.0;
    }
    // -1e-8 % 360 + 360 rounds to exactly 360 in f32
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}
/// Wrap an angle to the range [-180, 180) degrees
///
/// This is the signed shortest-arc representation of an angular difference.
///
/// # Example
/// ```rust
/// use pathfinder::wrap_to_180;
/// assert_eq!(wrap_to_180(190.0), -170.0);
/// assert_eq!(wrap_to_180(-190.0), 170.0);
/// ```
pub fn wrap_to_180(angle: f32) -> f32 {
    let wrapped = wrap_to_360(angle + 180.0) - 180.0;
    if wrapped >= 180.0 { -180.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    #[test]
    fn test_wrap_to_360() {
        assert_eq!(super::wrap_to_360(370.0), 10.0);
        assert_eq!(super::wrap_to_360(-10.0), 350.0);
        assert_eq!(super::wrap_to_360(0.0), 0.0);
        assert_eq!(super::wrap_to_360(360.0), 0.0);
        assert_eq!(super::wrap_to_360(720.0), 0.0);
        assert_eq!(super::wrap_to_360(f32::NAN), 0.0);
        assert_eq!(super::wrap_to_360(-1e-8), 0.0);
    }
    #[test]
    fn wrap_to_360_range_and_period() {
        let mut x = -10_000.0_f32;
        while x < 10_000.0 {
            let w = super::wrap_to_360(x);
            assert!((0.0..360.0).contains(&w), "{} wrapped to {}", x, w);
            for k in [-3.0_f32, -1.0, 1.0, 2.0] {
                let shifted = super::wrap_to_360(x + 360.0 * k);
                let diff = super::wrap_to_180(shifted - w).abs();
                assert!(diff < 1e-2, "{} vs {} for k = {}", shifted, w, k);
            }
            x += 37.3;
        }
    }
    #[test]
    fn test_wrap_to_180() {
        assert_eq!(super::wrap_to_180(190.0), -170.0);
        assert_eq!(super::wrap_to_180(-190.0), 170.0);
        assert_eq!(super::wrap_to_180(0.0), 0.0);
        assert_eq!(super::wrap_to_180(180.0), -180.0);
        assert_approx_eq!(super::wrap_to_180(350.0 - 10.0), -20.0);
    }
    #[test]
    fn geopoint_validity() {
        assert!(GeoPoint::new(45.0, -75.0).is_valid());
        assert!(!GeoPoint::new(95.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
    #[test]
    fn fix_well_formed() {
        let p = GeoPoint::new(10.0, 10.0);
        assert!(RawFix::new(p, 5.0, 0.0, 0).is_well_formed());
        assert!(!RawFix::new(p, 0.0, 0.0, 0).is_well_formed());
        assert!(!RawFix::new(p, -1.0, 0.0, 0).is_well_formed());
        assert!(!RawFix::new(p, f32::NAN, 0.0, 0).is_well_formed());
        assert!(!RawFix::new(GeoPoint::new(f64::NAN, 0.0), 5.0, 0.0, 0).is_well_formed());
    }
    #[test]
    fn reported_course_requires_bearing() {
        let p = GeoPoint::new(10.0, 10.0);
        assert!(RawFix::new(p, 5.0, 0.0, 0).reported_course().is_none());
        let course = RawFix::new(p, 5.0, 0.0, 0)
            .with_bearing(90.0, Some(5.0))
            .reported_course()
            .unwrap();
        assert_eq!(course.bearing_deg, 90.0);
        assert_eq!(course.accuracy_deg, Some(5.0));
    }
}
