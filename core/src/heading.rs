//! Compass and course-of-travel heading fusion
//!
//! A handheld magnetic compass is unreliable indoors, near metal, and while the phone is being waved
//! around, but it is the only heading reference when the user stands still (GNSS course is undefined at
//! zero speed). At walking-plus speeds the GNSS course of travel is far steadier than the compass. The
//! [HeadingFilter] therefore blends the two with a weight that ramps with ground speed:
//!
//! $$
//! w = \mathrm{clamp}\left( \frac{v - 0.5}{1.5}, 0, 1 \right)
//! $$
//!
//! Below 0.5 m/s the smoothed compass azimuth is used as-is; above 2 m/s the course is used as-is.
//!
//! # Device azimuth path
//! Each raw azimuth is corrected from magnetic to true north with the injected [DeclinationModel] at the
//! last known position (no correction before the first position), normalized, and smoothed with an EMA
//! taken along the shortest arc so that readings straddling north (e.g. 359 deg then 1 deg) average to
//! north rather than south. When [PathfinderConfig::azimuth_deadband_deg] is set, a corrected reading
//! within the deadband of the last one that moved the average is ignored, which keeps the arrow from
//! trembling while the phone is held still.
//!
//! # Course path
//! On each stabilized sample the course is derived from the displacement since the previous sample when
//! moving fast enough over a long enough baseline. Otherwise a provider-reported bearing is used when the
//! provider also reports it as accurate.
use std::sync::Arc;

use log::trace;

use crate::config::PathfinderConfig;
use crate::earth::{DeclinationModel, bearing_degrees, distance_meters};
use crate::{HeadingEstimate, StabilizedSample, wrap_to_180, wrap_to_360};

/// Declination correction, azimuth smoothing, and speed-weighted compass/course fusion.
pub struct HeadingFilter {
    config: PathfinderConfig,
    declination: Arc<dyn DeclinationModel>,
    smoothed_azimuth: Option<f32>,
    gps_course: Option<f32>,
    last_sample: Option<StabilizedSample>,
    last_raw_azimuth: Option<f32>,
}

impl HeadingFilter {
    pub fn new(config: PathfinderConfig, declination: Arc<dyn DeclinationModel>) -> Self {
        HeadingFilter {
            config,
            declination,
            smoothed_azimuth: None,
            gps_course: None,
            last_sample: None,
            last_raw_azimuth: None,
        }
    }
    /// Process a raw device azimuth (degrees from magnetic north).
    ///
    /// # Returns
    /// The fused heading, or `None` if the reading was not finite and no azimuth has been seen yet.
    pub fn on_azimuth(&mut self, raw_azimuth_deg: f32, timestamp_ms: i64) -> Option<HeadingEstimate> {
        if !raw_azimuth_deg.is_finite() {
            trace!("Dropping non-finite azimuth");
            return self.fused();
        }
        let mut azimuth = raw_azimuth_deg;
        if let Some(sample) = self.last_sample {
            azimuth += self.declination.declination_deg(&sample.point, timestamp_ms);
        }
        let azimuth = wrap_to_360(azimuth);
        if let Some(deadband) = self.config.azimuth_deadband_deg
            && let Some(last) = self.last_raw_azimuth
            && wrap_to_180(azimuth - last).abs() <= deadband
        {
            return self.fused();
        }
        self.last_raw_azimuth = Some(azimuth);
        self.smoothed_azimuth = Some(match self.smoothed_azimuth {
            None => azimuth,
            Some(previous) => wrap_to_360(
                previous + self.config.ema_alpha_azimuth * wrap_to_180(azimuth - previous),
            ),
        });
        self.fused()
    }
    /// Process a new stabilized position sample (course tracking).
    ///
    /// # Returns
    /// The fused heading, or `None` until the first device azimuth has arrived.
    pub fn on_position_update(&mut self, sample: &StabilizedSample) -> Option<HeadingEstimate> {
        let derived = match self.last_sample {
            Some(previous) if sample.speed_mps >= self.config.gps_course_speed_mps => {
                let baseline = distance_meters(&previous.point, &sample.point);
                if baseline > self.config.course_min_distance_m {
                    Some(bearing_degrees(&previous.point, &sample.point))
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(course) = derived {
            trace!("Course from displacement: {:.1} deg", course);
            self.gps_course = Some(course);
        } else if let Some(reported) = sample.reported_course
            && let Some(accuracy) = reported.accuracy_deg
            && accuracy <= self.config.reported_bearing_max_accuracy_deg
        {
            trace!("Course from provider: {:.1} deg (+/- {:.1})", reported.bearing_deg, accuracy);
            self.gps_course = Some(wrap_to_360(reported.bearing_deg));
        }
        self.last_sample = Some(*sample);
        self.fused()
    }
    /// Weight given to the course of travel at the last sample's speed.
    pub fn course_weight(&self) -> f32 {
        match self.last_sample {
            Some(sample) => ((sample.speed_mps - self.config.course_blend_start_mps)
                / self.config.course_blend_span_mps)
                .clamp(0.0, 1.0),
            None => 0.0,
        }
    }
    /// The current fused heading without feeding a new input.
    pub fn fused(&self) -> Option<HeadingEstimate> {
        let device = self.smoothed_azimuth?;
        let fused_deg = match self.gps_course {
            None => device,
            Some(course) => {
                let w = self.course_weight();
                if w <= 0.0 {
                    device
                } else if w >= 1.0 {
                    course
                } else {
                    wrap_to_360(device + w * wrap_to_180(course - device))
                }
            }
        };
        Some(HeadingEstimate { fused_deg })
    }
    /// The smoothed, declination-corrected device azimuth.
    pub fn device_azimuth(&self) -> Option<f32> {
        self.smoothed_azimuth
    }
    /// The last course of travel, from displacement or the provider.
    pub fn gps_course(&self) -> Option<f32> {
        self.gps_course
    }
    pub fn reset(&mut self) {
        self.smoothed_azimuth = None;
        self.gps_course = None;
        self.last_sample = None;
        self.last_raw_azimuth = None;
    }
}
