//! Navigation state machine
//!
//! The [NavigationEngine] owns the navigation phase and turns the latest stabilized sample, fused
//! heading, and anchor into the [NavState] snapshot shown to the user. It never touches raw sensor data.
//!
//! ```text
//!  NoPermission --granted--> WarmingUp --first sample--> NoAnchor --capture--> Capturing
//!       ^                                                   ^                    |
//!       |                                                   +----failure---------+
//!   denied (any phase)                                      |                    | success
//!                                                          reset               Navigating
//! ```
//!
//! # Arrival
//! The user has arrived when the straight-line distance to the anchor is within the combined one-sigma
//! uncertainty of both positions, but never less than a fixed floor:
//!
//! $$
//! d \le \max\left(6, \sqrt{\sigma_{current}^2 + \sigma_{anchor}^2}\right)
//! $$
//!
//! # Displayed distance
//! The displayed distance is quantized so that it does not flicker with every sample: to the nearest
//! 3 m below 12 m, to the meter up to 50 m, and to the nearest 5 m beyond. Arrival is always judged on
//! the unquantized distance.
use std::fmt::{self, Display};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::PathfinderConfig;
use crate::earth::{bearing_degrees, distance_meters, normalize};
use crate::error::NavError;
use crate::{Anchor, HeadingEstimate, StabilizedSample};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavPhase {
    #[default]
    NoPermission,
    WarmingUp,
    NoAnchor,
    Capturing,
    Navigating,
}
impl Display for NavPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NavPhase::NoPermission => "no permission",
            NavPhase::WarmingUp => "warming up",
            NavPhase::NoAnchor => "no anchor",
            NavPhase::Capturing => "capturing",
            NavPhase::Navigating => "navigating",
        };
        write!(f, "{}", name)
    }
}

/// Coarse GNSS quality indicator derived from the current sample's accuracy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalQuality {
    Good,
    Medium,
    #[default]
    Weak,
}
impl SignalQuality {
    pub fn from_accuracy(accuracy_m: Option<f32>, config: &PathfinderConfig) -> Self {
        match accuracy_m {
            Some(a) if a <= config.good_accuracy_m => SignalQuality::Good,
            Some(a) if a <= config.medium_accuracy_m => SignalQuality::Medium,
            _ => SignalQuality::Weak,
        }
    }
}

/// Snapshot of everything the user interface needs.
///
/// Optional fields are `None` whenever their inputs are missing; the UI renders placeholders for them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NavState {
    pub phase: NavPhase,
    pub permission: PermissionState,
    /// Latest stabilized sample: smoothed position, accuracy, speed, and fix time
    pub current: Option<StabilizedSample>,
    pub anchor: Option<Anchor>,
    pub heading_deg: Option<f32>,
    /// Quantized distance to the anchor for display
    pub distance_m: Option<f32>,
    /// Unquantized distance to the anchor
    pub raw_distance_m: Option<f32>,
    /// Arrow angle relative to the direction the device faces, in [0, 360)
    pub arrow_relative_deg: Option<f32>,
    pub arrived: bool,
    pub signal: SignalQuality,
    /// Accuracy is poor enough that the readout should be dimmed
    pub weak_signal: bool,
    pub capturing: bool,
    pub error_message: Option<String>,
}

/// Quantize a distance in meters for display.
///
/// Ties round down in the 3 m band and to even in the 1 m and 5 m bands.
pub fn quantize_distance(distance_m: f32) -> f32 {
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return 0.0;
    }
    if distance_m < 12.0 {
        let lower = (distance_m / 3.0).floor() * 3.0;
        let upper = lower + 3.0;
        if distance_m - lower <= upper - distance_m {
            lower
        } else {
            upper
        }
    } else if distance_m <= 50.0 {
        distance_m.round_ties_even()
    } else {
        (distance_m / 5.0).round_ties_even() * 5.0
    }
}

/// Arrival radius for the given current and anchor accuracies.
pub fn arrival_radius(current_accuracy_m: f32, anchor_accuracy_m: f32, base_m: f32) -> f32 {
    current_accuracy_m.hypot(anchor_accuracy_m).max(base_m)
}

pub struct NavigationEngine {
    config: PathfinderConfig,
    phase: NavPhase,
    permission: PermissionState,
    current: Option<StabilizedSample>,
    heading: Option<HeadingEstimate>,
    anchor: Option<Anchor>,
    error: Option<NavError>,
    state: NavState,
}

impl NavigationEngine {
    pub fn new(config: PathfinderConfig) -> Self {
        NavigationEngine {
            config,
            phase: NavPhase::NoPermission,
            permission: PermissionState::Unknown,
            current: None,
            heading: None,
            anchor: None,
            error: None,
            state: NavState::default(),
        }
    }
    pub fn phase(&self) -> NavPhase {
        self.phase
    }
    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }
    /// The latest published snapshot.
    pub fn snapshot(&self) -> &NavState {
        &self.state
    }
    /// Record the outcome of a location permission request.
    ///
    /// Denial is terminal for the current anchor: any anchor or capture in progress is discarded and
    /// the samples seen so far are forgotten.
    pub fn set_permission(&mut self, granted: bool) {
        if granted {
            self.permission = PermissionState::Granted;
            if self.phase == NavPhase::NoPermission {
                self.phase = NavPhase::WarmingUp;
            }
            if self.error == Some(NavError::PermissionDenied) {
                self.error = None;
            }
            info!("Location permission granted");
        } else {
            self.permission = PermissionState::Denied;
            self.phase = NavPhase::NoPermission;
            self.current = None;
            self.heading = None;
            self.anchor = None;
            self.error = Some(NavError::PermissionDenied);
            warn!("Location permission denied");
        }
        self.recompute();
    }
    pub fn set_provider_enabled(&mut self, enabled: bool) {
        if !enabled {
            warn!("Location provider disabled");
            self.error = Some(NavError::ProviderDisabled);
        } else if self.error == Some(NavError::ProviderDisabled) {
            self.error = None;
        }
        self.recompute();
    }
    pub fn on_sample(&mut self, sample: StabilizedSample) {
        if self.phase == NavPhase::NoPermission {
            debug!("Ignoring sample without location permission");
            return;
        }
        self.current = Some(sample);
        if self.phase == NavPhase::WarmingUp {
            info!("First stabilized sample, ready to save a location");
            self.phase = NavPhase::NoAnchor;
        }
        self.recompute();
    }
    pub fn on_heading(&mut self, heading: HeadingEstimate) {
        self.heading = Some(heading);
        self.recompute();
    }
    /// Enter the capturing phase.
    ///
    /// Allowed from `NoAnchor` and `Navigating` (re-capture). Returns [NavError::NotReady] before the
    /// first stabilized sample; the error is also shown to the user.
    pub fn begin_capture(&mut self) -> Result<(), NavError> {
        match self.phase {
            NavPhase::NoAnchor | NavPhase::Navigating => {
                self.phase = NavPhase::Capturing;
                self.clear_capture_error();
                self.recompute();
                Ok(())
            }
            NavPhase::Capturing => Ok(()),
            phase @ (NavPhase::NoPermission | NavPhase::WarmingUp) => {
                let e = NavError::NotReady { phase };
                self.error = Some(e.clone());
                self.recompute();
                Err(e)
            }
        }
    }
    /// Apply the result of an anchor capture. Ignored unless a capture is in progress.
    pub fn complete_capture(&mut self, result: Result<Anchor, NavError>) {
        if self.phase != NavPhase::Capturing {
            debug!("Dropping capture result outside of capture ({})", self.phase);
            return;
        }
        match result {
            Ok(anchor) => {
                self.anchor = Some(anchor);
                self.phase = NavPhase::Navigating;
                self.clear_capture_error();
            }
            Err(e) => {
                self.phase = if self.anchor.is_some() {
                    NavPhase::Navigating
                } else {
                    NavPhase::NoAnchor
                };
                // location being off or denied is the cause the user needs to see
                if !matches!(
                    self.error,
                    Some(NavError::ProviderDisabled) | Some(NavError::PermissionDenied)
                ) {
                    self.error = Some(e);
                }
            }
        }
        self.recompute();
    }
    /// Discard the anchor (and any capture in progress). Calling it repeatedly has no further effect.
    pub fn reset(&mut self) {
        self.anchor = None;
        if matches!(self.phase, NavPhase::Capturing | NavPhase::Navigating) {
            self.phase = NavPhase::NoAnchor;
        }
        self.clear_capture_error();
        self.recompute();
    }
    /// Drop an error left by an earlier capture. Permission and provider errors stay until their
    /// condition changes.
    fn clear_capture_error(&mut self) {
        if matches!(
            self.error,
            Some(NavError::NoSamples) | Some(NavError::NotReady { .. })
        ) {
            self.error = None;
        }
    }

    fn recompute(&mut self) {
        let current = self.current;
        let raw_distance_m = match (current, self.anchor) {
            (Some(c), Some(a)) => Some(distance_meters(&c.point, &a.point)),
            _ => None,
        };
        let arrived = match (current, self.anchor, raw_distance_m) {
            (Some(c), Some(a), Some(d)) => {
                d <= arrival_radius(c.accuracy_m, a.accuracy_m, self.config.arrived_base_m)
            }
            _ => false,
        };
        let arrow_relative_deg = match (current, self.anchor, self.heading) {
            (Some(c), Some(a), Some(h)) => {
                Some(normalize(bearing_degrees(&c.point, &a.point) - h.fused_deg))
            }
            _ => None,
        };
        let accuracy = current.map(|c| c.accuracy_m);
        self.state = NavState {
            phase: self.phase,
            permission: self.permission,
            current,
            anchor: self.anchor,
            heading_deg: self.heading.map(|h| h.fused_deg),
            distance_m: raw_distance_m.map(quantize_distance),
            raw_distance_m,
            arrow_relative_deg,
            arrived,
            signal: SignalQuality::from_accuracy(accuracy, &self.config),
            weak_signal: accuracy.is_some_and(|a| a > self.config.weak_signal_accuracy_m),
            capturing: self.phase == NavPhase::Capturing,
            error_message: self.error.as_ref().map(|e| e.to_string()),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;
    use assert_approx_eq::assert_approx_eq;

    fn sample(point: GeoPoint, accuracy: f32) -> StabilizedSample {
        StabilizedSample {
            point,
            accuracy_m: accuracy,
            speed_mps: 0.0,
            timestamp_ms: 0,
            reported_course: None,
        }
    }
    fn anchor_at(point: GeoPoint, accuracy: f32) -> Anchor {
        Anchor {
            point,
            accuracy_m: accuracy,
            captured_at_ms: 0,
            sample_count: 7,
        }
    }
    fn navigating(anchor: Anchor) -> NavigationEngine {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        engine.on_sample(sample(anchor.point, 5.0));
        engine.begin_capture().unwrap();
        engine.complete_capture(Ok(anchor));
        engine
    }

    // === Quantization ===
    #[test]
    fn quantize_small_distances_to_three_meters() {
        assert_eq!(quantize_distance(0.0), 0.0);
        assert_eq!(quantize_distance(1.4), 0.0);
        assert_eq!(quantize_distance(1.5), 0.0);
        assert_eq!(quantize_distance(1.6), 3.0);
        assert_eq!(quantize_distance(7.4), 6.0);
        assert_eq!(quantize_distance(11.12), 12.0);
    }
    #[test]
    fn quantize_mid_distances_to_meter() {
        assert_eq!(quantize_distance(12.0), 12.0);
        assert_eq!(quantize_distance(23.4), 23.0);
        assert_eq!(quantize_distance(24.5), 24.0);
        assert_eq!(quantize_distance(49.9), 50.0);
    }
    #[test]
    fn quantize_far_distances_to_five_meters() {
        assert_eq!(quantize_distance(52.0), 50.0);
        assert_eq!(quantize_distance(53.0), 55.0);
        assert_eq!(quantize_distance(1234.0), 1235.0);
    }
    #[test]
    fn quantize_garbage_is_zero() {
        assert_eq!(quantize_distance(f32::NAN), 0.0);
        assert_eq!(quantize_distance(-3.0), 0.0);
    }

    // === Phases ===
    #[test]
    fn permission_then_first_sample() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        assert_eq!(engine.phase(), NavPhase::NoPermission);
        engine.set_permission(true);
        assert_eq!(engine.phase(), NavPhase::WarmingUp);
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 5.0));
        assert_eq!(engine.phase(), NavPhase::NoAnchor);
        assert_eq!(engine.snapshot().signal, SignalQuality::Good);
    }
    #[test]
    fn capture_refused_while_warming_up() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        let e = engine.begin_capture().unwrap_err();
        assert_eq!(
            e,
            NavError::NotReady {
                phase: NavPhase::WarmingUp
            }
        );
        assert_eq!(engine.phase(), NavPhase::WarmingUp);
        assert!(engine.snapshot().error_message.is_some());
    }
    #[test]
    fn failed_capture_returns_to_no_anchor() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 5.0));
        engine.begin_capture().unwrap();
        assert!(engine.snapshot().capturing);
        engine.complete_capture(Err(NavError::NoSamples));
        assert_eq!(engine.phase(), NavPhase::NoAnchor);
        assert!(!engine.snapshot().capturing);
        assert_eq!(
            engine.snapshot().error_message.as_deref(),
            Some("No usable location samples, try again")
        );
    }
    #[test]
    fn failed_recapture_keeps_previous_anchor() {
        let a = anchor_at(GeoPoint::new(0.0, 0.0), 3.0);
        let mut engine = navigating(a);
        engine.begin_capture().unwrap();
        engine.complete_capture(Err(NavError::NoSamples));
        assert_eq!(engine.phase(), NavPhase::Navigating);
        assert_eq!(engine.anchor(), Some(a));
    }
    #[test]
    fn denial_discards_anchor() {
        let mut engine = navigating(anchor_at(GeoPoint::new(0.0, 0.0), 3.0));
        engine.set_permission(false);
        assert_eq!(engine.phase(), NavPhase::NoPermission);
        assert!(engine.anchor().is_none());
        assert!(engine.snapshot().distance_m.is_none());
        assert_eq!(engine.snapshot().permission, PermissionState::Denied);
        // samples that race the denial are dropped
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 5.0));
        assert!(engine.snapshot().current.is_none());
    }
    #[test]
    fn reset_is_idempotent() {
        let mut engine = navigating(anchor_at(GeoPoint::new(0.0, 0.0), 3.0));
        engine.reset();
        let first = engine.snapshot().clone();
        engine.reset();
        assert_eq!(&first, engine.snapshot());
        assert_eq!(first.phase, NavPhase::NoAnchor);
        assert!(first.anchor.is_none());
    }
    #[test]
    fn late_capture_result_after_reset_is_ignored() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 5.0));
        engine.begin_capture().unwrap();
        engine.reset();
        engine.complete_capture(Ok(anchor_at(GeoPoint::new(0.0, 0.0), 3.0)));
        assert_eq!(engine.phase(), NavPhase::NoAnchor);
        assert!(engine.anchor().is_none());
    }

    // === Arrival, distance, arrow ===
    #[test]
    fn eleven_meters_is_not_arrived() {
        let mut engine = navigating(anchor_at(GeoPoint::new(0.0, 0.0), 5.0));
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0001), 5.0));
        let state = engine.snapshot();
        assert_approx_eq!(state.raw_distance_m.unwrap(), 11.12, 0.01);
        assert_eq!(state.distance_m, Some(12.0));
        assert!(!state.arrived);
    }
    #[test]
    fn at_anchor_is_arrived() {
        let mut engine = navigating(anchor_at(GeoPoint::new(0.0, 0.0), 5.0));
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 5.0));
        let state = engine.snapshot();
        assert!(state.arrived);
        assert_eq!(state.distance_m, Some(0.0));
    }
    #[test]
    fn poor_accuracy_widens_arrival_radius() {
        let mut engine = navigating(anchor_at(GeoPoint::new(0.0, 0.0), 5.0));
        // sqrt(10^2 + 5^2) = 11.18 m covers the 11.12 m offset
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0001), 10.0));
        assert!(engine.snapshot().arrived);
        assert_eq!(engine.snapshot().signal, SignalQuality::Medium);
        assert_eq!(arrival_radius(1.0, 1.0, 6.0), 6.0);
    }
    #[test]
    fn arrow_is_relative_to_heading() {
        let mut engine = navigating(anchor_at(GeoPoint::new(0.0, 0.0), 5.0));
        // user is east of the anchor; the anchor lies due west (270)
        engine.on_sample(sample(GeoPoint::new(0.0, 0.001), 5.0));
        assert!(engine.snapshot().arrow_relative_deg.is_none());
        engine.on_heading(HeadingEstimate { fused_deg: 300.0 });
        assert_approx_eq!(engine.snapshot().arrow_relative_deg.unwrap(), 330.0, 0.01);
        engine.on_heading(HeadingEstimate { fused_deg: 270.0 });
        assert_approx_eq!(engine.snapshot().arrow_relative_deg.unwrap(), 0.0, 0.01);
    }
    #[test]
    fn signal_quality_bands() {
        let cfg = PathfinderConfig::default();
        assert_eq!(SignalQuality::from_accuracy(Some(8.0), &cfg), SignalQuality::Good);
        assert_eq!(SignalQuality::from_accuracy(Some(8.1), &cfg), SignalQuality::Medium);
        assert_eq!(SignalQuality::from_accuracy(Some(20.0), &cfg), SignalQuality::Medium);
        assert_eq!(SignalQuality::from_accuracy(Some(20.1), &cfg), SignalQuality::Weak);
        assert_eq!(SignalQuality::from_accuracy(None, &cfg), SignalQuality::Weak);
    }
    #[test]
    fn snapshot_carries_current_sample() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        let mut s = sample(GeoPoint::new(1.0, 2.0), 7.0);
        s.speed_mps = 1.3;
        s.timestamp_ms = 42;
        engine.on_sample(s);
        let current = engine.snapshot().current.unwrap();
        assert_eq!(current, s);
        assert_eq!(current.speed_mps, 1.3);
        assert_eq!(current.timestamp_ms, 42);
    }
    #[test]
    fn weak_signal_flag_above_dimming_threshold() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        assert!(!engine.snapshot().weak_signal);
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 25.0));
        assert!(!engine.snapshot().weak_signal);
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 25.5));
        assert!(engine.snapshot().weak_signal);
        assert_eq!(engine.snapshot().signal, SignalQuality::Weak);
    }
    #[test]
    fn capture_keeps_location_off_message() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 5.0));
        engine.set_provider_enabled(false);
        engine.begin_capture().unwrap();
        assert_eq!(engine.snapshot().error_message.as_deref(), Some("Location is off"));
        engine.complete_capture(Ok(anchor_at(GeoPoint::new(0.0, 0.0), 3.0)));
        assert_eq!(engine.phase(), NavPhase::Navigating);
        assert_eq!(engine.snapshot().error_message.as_deref(), Some("Location is off"));
        // a failed re-capture does not hide it either
        engine.begin_capture().unwrap();
        engine.complete_capture(Err(NavError::NoSamples));
        assert_eq!(engine.snapshot().error_message.as_deref(), Some("Location is off"));
        engine.set_provider_enabled(true);
        assert!(engine.snapshot().error_message.is_none());
    }
    #[test]
    fn new_capture_clears_previous_failure() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        engine.on_sample(sample(GeoPoint::new(0.0, 0.0), 5.0));
        engine.begin_capture().unwrap();
        engine.complete_capture(Err(NavError::NoSamples));
        assert!(engine.snapshot().error_message.is_some());
        engine.begin_capture().unwrap();
        assert!(engine.snapshot().error_message.is_none());
    }
    #[test]
    fn provider_disabled_message_clears() {
        let mut engine = NavigationEngine::new(PathfinderConfig::default());
        engine.set_permission(true);
        engine.set_provider_enabled(false);
        assert_eq!(engine.snapshot().error_message.as_deref(), Some("Location is off"));
        engine.set_provider_enabled(true);
        assert!(engine.snapshot().error_message.is_none());
    }
}
