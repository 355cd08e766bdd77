//! Tunable parameters of the navigation engine
//!
//! Every threshold, smoothing factor, and timing constant used by the filters, the anchor capture, and the
//! engine lives in [PathfinderConfig]. The defaults are the values the engine was tuned with on handheld
//! phones; a configuration file only needs to name the fields it overrides.
//!
//! ```
//! use pathfinder::config::PathfinderConfig;
//! let cfg: PathfinderConfig = toml::from_str("ema_alpha_position = 0.25").unwrap();
//! assert_eq!(cfg.ema_alpha_position, 0.25);
//! assert_eq!(cfg.warm_up_count, 3);
//! ```
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::error::NavError;

pub const WARM_UP_COUNT: usize = 3;
pub const ACCURACY_REJECT_M: f32 = 20.0;
pub const STALE_FIX_MS: i64 = 3000;
pub const DESPIKE_WINDOW: usize = 5;
pub const DESPIKE_FACTOR: f32 = 1.5;
pub const EMA_ALPHA_POSITION: f32 = 0.15;
pub const EMA_ALPHA_AZIMUTH: f32 = 0.20;
pub const GPS_COURSE_SPEED_MPS: f32 = 2.0;
pub const COURSE_MIN_DISTANCE_M: f32 = 3.0;
pub const REPORTED_BEARING_MAX_ACCURACY_DEG: f32 = 15.0;
pub const COURSE_BLEND_START_MPS: f32 = 0.5;
pub const COURSE_BLEND_SPAN_MPS: f32 = 1.5;
pub const ANCHOR_SAMPLE_MS: i64 = 3000;
pub const ANCHOR_EXTENSION_MS: i64 = 2000;
pub const ANCHOR_MIN_SAMPLES: usize = 7;
pub const ARRIVED_BASE_M: f32 = 6.0;
pub const GOOD_ACCURACY_M: f32 = 8.0;
pub const MEDIUM_ACCURACY_M: f32 = 20.0;
pub const INPUT_QUEUE_CAPACITY: usize = 64;
pub const WEAK_SIGNAL_ACCURACY_M: f32 = 25.0;
/// Suggested speed for [PathfinderConfig::stationary_speed_mps]
pub const STATIONARY_SPEED_MPS: f32 = 0.3;
pub const STATIONARY_ALPHA: f32 = 0.05;
pub const STATIONARY_HOLD_M: f32 = 0.8;
/// Suggested deadband for [PathfinderConfig::azimuth_deadband_deg]
pub const ARROW_MIN_DELTA_DEG: f32 = 2.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfinderConfig {
    /// Number of gated fixes consumed silently before the first sample is emitted
    pub warm_up_count: usize,
    /// Fixes reporting a worse horizontal accuracy (meters) are rejected
    pub accuracy_reject_m: f32,
    /// Fixes older than this (milliseconds) relative to "now" are rejected
    pub stale_fix_ms: i64,
    /// Number of accepted positions kept for the median despike test
    pub despike_window: usize,
    /// A fix farther than this multiple of its accuracy from the median is an outlier
    pub despike_factor: f32,
    /// EMA smoothing factor for latitude/longitude
    pub ema_alpha_position: f32,
    /// EMA smoothing factor for the compass azimuth
    pub ema_alpha_azimuth: f32,
    /// Minimum speed (m/s) for deriving the course from successive samples
    pub gps_course_speed_mps: f32,
    /// Minimum displacement (meters) between samples for deriving the course
    pub course_min_distance_m: f32,
    /// Provider-reported bearings are trusted when their accuracy (degrees) is at most this
    pub reported_bearing_max_accuracy_deg: f32,
    /// Speed (m/s) below which the compass fully dominates the fused heading
    pub course_blend_start_mps: f32,
    /// Speed range (m/s) over which the fused heading ramps from compass to course
    pub course_blend_span_mps: f32,
    /// Base sampling window of the anchor capture (milliseconds)
    pub anchor_sample_ms: i64,
    /// Extension of the capture window while too few samples have arrived (milliseconds)
    pub anchor_extension_ms: i64,
    /// Samples required for the inverse-variance estimate
    pub anchor_min_samples: usize,
    /// Arrival radius floor (meters)
    pub arrived_base_m: f32,
    /// Accuracy (meters) at or below which the signal is good
    pub good_accuracy_m: f32,
    /// Accuracy (meters) at or below which the signal is medium
    pub medium_accuracy_m: f32,
    /// Capacity of the session input queue
    pub input_queue_capacity: usize,
    /// Accuracy (meters) above which the readout is flagged for dimming
    pub weak_signal_accuracy_m: f32,
    /// Stationary hold: below this speed (m/s), and while the smoothed position has moved less than
    /// `stationary_hold_m` since the previous sample, the position EMA uses `stationary_alpha`.
    /// Off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stationary_speed_mps: Option<f32>,
    pub stationary_alpha: f32,
    pub stationary_hold_m: f32,
    /// Raw azimuth changes of at most this many degrees are ignored. Off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azimuth_deadband_deg: Option<f32>,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        PathfinderConfig {
            warm_up_count: WARM_UP_COUNT,
            accuracy_reject_m: ACCURACY_REJECT_M,
            stale_fix_ms: STALE_FIX_MS,
            despike_window: DESPIKE_WINDOW,
            despike_factor: DESPIKE_FACTOR,
            ema_alpha_position: EMA_ALPHA_POSITION,
            ema_alpha_azimuth: EMA_ALPHA_AZIMUTH,
            gps_course_speed_mps: GPS_COURSE_SPEED_MPS,
            course_min_distance_m: COURSE_MIN_DISTANCE_M,
            reported_bearing_max_accuracy_deg: REPORTED_BEARING_MAX_ACCURACY_DEG,
            course_blend_start_mps: COURSE_BLEND_START_MPS,
            course_blend_span_mps: COURSE_BLEND_SPAN_MPS,
            anchor_sample_ms: ANCHOR_SAMPLE_MS,
            anchor_extension_ms: ANCHOR_EXTENSION_MS,
            anchor_min_samples: ANCHOR_MIN_SAMPLES,
            arrived_base_m: ARRIVED_BASE_M,
            good_accuracy_m: GOOD_ACCURACY_M,
            medium_accuracy_m: MEDIUM_ACCURACY_M,
            input_queue_capacity: INPUT_QUEUE_CAPACITY,
            weak_signal_accuracy_m: WEAK_SIGNAL_ACCURACY_M,
            stationary_speed_mps: None,
            stationary_alpha: STATIONARY_ALPHA,
            stationary_hold_m: STATIONARY_HOLD_M,
            azimuth_deadband_deg: None,
        }
    }
}

impl PathfinderConfig {
    /// Check that the parameters describe a usable filter chain.
    pub fn validate(&self) -> Result<(), NavError> {
        let unit = |name: &str, v: f32| {
            if v > 0.0 && v <= 1.0 {
                Ok(())
            } else {
                Err(NavError::Config(format!("{} must be in (0, 1], got {}", name, v)))
            }
        };
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(NavError::Config(format!("{} must be positive, got {}", name, v)))
            }
        };
        unit("ema_alpha_position", self.ema_alpha_position)?;
        unit("ema_alpha_azimuth", self.ema_alpha_azimuth)?;
        unit("stationary_alpha", self.stationary_alpha)?;
        positive("weak_signal_accuracy_m", self.weak_signal_accuracy_m)?;
        positive("stationary_hold_m", self.stationary_hold_m)?;
        if let Some(speed) = self.stationary_speed_mps {
            positive("stationary_speed_mps", speed)?;
        }
        if let Some(deadband) = self.azimuth_deadband_deg
            && !(deadband.is_finite() && deadband >= 0.0)
        {
            return Err(NavError::Config(format!(
                "azimuth_deadband_deg must be non-negative, got {}",
                deadband
            )));
        }
        positive("accuracy_reject_m", self.accuracy_reject_m)?;
        positive("despike_factor", self.despike_factor)?;
        positive("course_blend_span_mps", self.course_blend_span_mps)?;
        positive("arrived_base_m", self.arrived_base_m)?;
        if self.good_accuracy_m > self.medium_accuracy_m {
            return Err(NavError::Config(format!(
                "good_accuracy_m ({}) exceeds medium_accuracy_m ({})",
                self.good_accuracy_m, self.medium_accuracy_m
            )));
        }
        if self.despike_window == 0 {
            return Err(NavError::Config("despike_window must be at least 1".to_string()));
        }
        if self.anchor_min_samples == 0 {
            return Err(NavError::Config("anchor_min_samples must be at least 1".to_string()));
        }
        if self.stale_fix_ms <= 0 || self.anchor_sample_ms <= 0 || self.anchor_extension_ms < 0 {
            return Err(NavError::Config("time windows must be positive".to_string()));
        }
        if self.input_queue_capacity == 0 {
            return Err(NavError::Config("input_queue_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        serde_json::from_str(&fs::read_to_string(path)?).map_err(io::Error::other)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let text = serde_yaml::to_string(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        serde_yaml::from_str(&fs::read_to_string(path)?).map_err(io::Error::other)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let text = toml::to_string(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        toml::from_str(&fs::read_to_string(path)?).map_err(io::Error::other)
    }
    /// Write in the format named by the file extension (`.json`, `.yaml`/`.yml`, `.toml`).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        match ConfigFormat::of(path)? {
            ConfigFormat::Json => self.to_json(path),
            ConfigFormat::Yaml => self.to_yaml(path),
            ConfigFormat::Toml => self.to_toml(path),
        }
    }
    /// Read in the format named by the file extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        match ConfigFormat::of(path)? {
            ConfigFormat::Json => Self::from_json(path),
            ConfigFormat::Yaml => Self::from_yaml(path),
            ConfigFormat::Toml => Self::from_toml(path),
        }
    }
}

enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}
impl ConfigFormat {
    fn of(path: &Path) -> io::Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no configuration format for extension {:?}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample_cfg() -> PathfinderConfig {
        PathfinderConfig {
            ema_alpha_position: 0.3,
            anchor_min_samples: 5,
            stationary_speed_mps: Some(STATIONARY_SPEED_MPS),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = PathfinderConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.warm_up_count, 3);
        assert_eq!(cfg.accuracy_reject_m, 20.0);
        assert_eq!(cfg.anchor_min_samples, 7);
        assert_eq!(cfg.anchor_sample_ms + cfg.anchor_extension_ms, 5000);
        assert_eq!(cfg.weak_signal_accuracy_m, 25.0);
        assert!(cfg.stationary_speed_mps.is_none());
        assert!(cfg.azimuth_deadband_deg.is_none());
    }

    #[test]
    fn tuning_knobs_validated() {
        let cfg = PathfinderConfig {
            stationary_speed_mps: Some(STATIONARY_SPEED_MPS),
            azimuth_deadband_deg: Some(ARROW_MIN_DELTA_DEG),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        let cfg = PathfinderConfig {
            stationary_alpha: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = PathfinderConfig {
            azimuth_deadband_deg: Some(-1.0),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = PathfinderConfig {
            stationary_speed_mps: Some(0.0),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tuning_knobs_read_from_toml() {
        let cfg: PathfinderConfig =
            toml::from_str("stationary_speed_mps = 0.3\nazimuth_deadband_deg = 2.0").unwrap();
        assert_eq!(cfg.stationary_speed_mps, Some(0.3));
        assert_eq!(cfg.azimuth_deadband_deg, Some(2.0));
        assert_eq!(cfg.stationary_alpha, STATIONARY_ALPHA);
    }

    #[test]
    fn invalid_values_rejected() {
        let cfg = PathfinderConfig {
            ema_alpha_azimuth: 0.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(NavError::Config(_))));
        let cfg = PathfinderConfig {
            despike_window: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = PathfinderConfig {
            good_accuracy_m: 30.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("json");
        cfg.to_json(&path).unwrap();
        let loaded = PathfinderConfig::from_json(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn yaml_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("yml");
        cfg.to_file(&path).unwrap();
        let loaded = PathfinderConfig::from_file(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("toml");
        cfg.to_file(&path).unwrap();
        let loaded = PathfinderConfig::from_file(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let cfg: PathfinderConfig = serde_json::from_str(r#"{"arrived_base_m": 4.0}"#).unwrap();
        assert_eq!(cfg.arrived_base_m, 4.0);
        assert_eq!(cfg.ema_alpha_azimuth, EMA_ALPHA_AZIMUTH);
    }

    #[test]
    fn unsupported_extension_error() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("txt");
        let result = cfg.to_file(&path);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::InvalidInput);
        let result = PathfinderConfig::from_file(&path);
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::InvalidInput);
    }
}
