//! Position fix gating and smoothing
//!
//! The [LocationFilter] turns the raw, jittery fix stream of a phone's location provider into a stable
//! position for distance and arrival computations. Each fix passes a sequence of gates and is dropped
//! silently at the first one it fails:
//!
//! 1. Structural sanity: finite coordinates inside the WGS84 ranges and a finite, positive accuracy.
//! 2. Accuracy: the reported horizontal accuracy must not exceed the rejection threshold (20 m).
//! 3. Staleness: the fix must be no older than 3 s relative to the injected [Clock].
//! 4. Warm-up: the first few fixes that pass the gates above are consumed to let the provider settle.
//! 5. Despike: a fix farther than 1.5x its own accuracy from the median of the last five accepted
//!    positions is treated as a multipath spike.
//!
//! Accepted fixes are smoothed with an exponential moving average applied to latitude and longitude
//! independently:
//!
//! $$
//! \hat{x}_k = \hat{x}_{k-1} + \alpha \left( x_k - \hat{x}_{k-1} \right)
//! $$
//!
//! The first accepted fix initializes the average directly. With
//! [PathfinderConfig::stationary_speed_mps] set, a user standing still (slow fix, smoothed position moved
//! less than `stationary_hold_m` on the previous step) gets the much smaller `stationary_alpha` so the
//! readout stops wandering.
use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, trace};

use crate::clock::Clock;
use crate::config::PathfinderConfig;
use crate::earth::distance_meters;
use crate::{GeoPoint, RawFix, StabilizedSample};

/// Gating, despiking, and EMA smoothing of raw position fixes.
///
/// One filter exists per navigation session. Rejected fixes leave the previously emitted sample valid.
pub struct LocationFilter {
    config: PathfinderConfig,
    clock: Arc<dyn Clock>,
    warm_up_seen: usize,
    buffer: VecDeque<GeoPoint>,
    latest: Option<StabilizedSample>,
    previous_point: Option<GeoPoint>,
}

impl LocationFilter {
    pub fn new(config: PathfinderConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.despike_window;
        LocationFilter {
            config,
            clock,
            warm_up_seen: 0,
            buffer: VecDeque::with_capacity(capacity + 1),
            latest: None,
            previous_point: None,
        }
    }
    /// Offer a raw fix to the filter.
    ///
    /// # Returns
    /// The updated stabilized sample if the fix was accepted, `None` if it was rejected or consumed by
    /// the warm-up.
    pub fn accept(&mut self, fix: &RawFix) -> Option<StabilizedSample> {
        if !passes_quality_gates(fix, &self.config, self.clock.now_ms()) {
            return None;
        }
        if self.warm_up_seen < self.config.warm_up_count {
            self.warm_up_seen += 1;
            debug!(
                "Warm-up fix {}/{} consumed",
                self.warm_up_seen, self.config.warm_up_count
            );
            return None;
        }
        if let Some(median) = self.median() {
            let offset = distance_meters(&fix.point, &median);
            if offset > self.config.despike_factor * fix.accuracy_m {
                debug!(
                    "Despike: fix {} is {:.1} m from median (limit {:.1} m)",
                    fix.point,
                    offset,
                    self.config.despike_factor * fix.accuracy_m
                );
                return None;
            }
        }
        self.buffer.push_back(fix.point);
        while self.buffer.len() > self.config.despike_window {
            self.buffer.pop_front();
        }

        let point = match self.latest {
            None => fix.point,
            Some(previous) => {
                let alpha = self.position_alpha(fix, &previous.point) as f64;
                GeoPoint::new(
                    previous.point.latitude + alpha * (fix.point.latitude - previous.point.latitude),
                    previous.point.longitude
                        + alpha * (fix.point.longitude - previous.point.longitude),
                )
            }
        };
        let sample = StabilizedSample {
            point,
            accuracy_m: fix.accuracy_m,
            speed_mps: if fix.speed_mps.is_finite() { fix.speed_mps.max(0.0) } else { 0.0 },
            timestamp_ms: fix.timestamp_ms,
            reported_course: fix.reported_course(),
        };
        trace!("Stabilized sample {} ({:.1} m)", sample.point, sample.accuracy_m);
        self.previous_point = self.latest.map(|s| s.point);
        self.latest = Some(sample);
        Some(sample)
    }
    /// The most recently emitted sample, if any.
    pub fn latest(&self) -> Option<StabilizedSample> {
        self.latest
    }
    /// True once the warm-up fixes have been consumed.
    pub fn is_warmed_up(&self) -> bool {
        self.warm_up_seen >= self.config.warm_up_count
    }
    /// Return to the freshly created state.
    pub fn reset(&mut self) {
        self.warm_up_seen = 0;
        self.buffer.clear();
        self.latest = None;
        self.previous_point = None;
    }
    fn position_alpha(&self, fix: &RawFix, smoothed: &GeoPoint) -> f32 {
        let Some(threshold) = self.config.stationary_speed_mps else {
            return self.config.ema_alpha_position;
        };
        let hold = fix.speed_mps.is_finite()
            && fix.speed_mps < threshold
            && self
                .previous_point
                .is_some_and(|p| distance_meters(smoothed, &p) < self.config.stationary_hold_m);
        if hold {
            trace!("Stationary hold at {}", smoothed);
            self.config.stationary_alpha
        } else {
            self.config.ema_alpha_position
        }
    }
    /// Per-axis median of the despike buffer (upper median for even lengths).
    fn median(&self) -> Option<GeoPoint> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut lats: Vec<f64> = self.buffer.iter().map(|p| p.latitude).collect();
        let mut lons: Vec<f64> = self.buffer.iter().map(|p| p.longitude).collect();
        lats.sort_by(f64::total_cmp);
        lons.sort_by(f64::total_cmp);
        let mid = self.buffer.len() / 2;
        Some(GeoPoint::new(lats[mid], lons[mid]))
    }
}

/// Structural, accuracy, and staleness gating shared by the filter and the anchor capture.
pub fn passes_quality_gates(fix: &RawFix, config: &PathfinderConfig, now_ms: i64) -> bool {
    if !fix.is_well_formed() {
        trace!("Dropping malformed fix {:?}", fix);
        return false;
    }
    if fix.accuracy_m > config.accuracy_reject_m {
        trace!("Dropping fix with accuracy {:.1} m", fix.accuracy_m);
        return false;
    }
    if now_ms - fix.timestamp_ms > config.stale_fix_ms {
        trace!("Dropping stale fix ({} ms old)", now_ms - fix.timestamp_ms);
        return false;
    }
    true
}
