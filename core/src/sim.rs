//! Sensor logs, offline replay, and synthetic walks
//!
//! This module provides:
//! - [SensorRecord] for reading and writing recorded sensor logs (CSV, one row per reading)
//! - [replay] to run a recorded log through the navigation core on a manual clock
//! - [NavigationResult] for storing and exporting the published state over time
//! - [synthetic_walk] to generate a reproducible out-and-back walk with GNSS and compass noise
//!
//! The log format follows what phone sensor-logging apps export: a timestamp column, the location
//! provider's fields, and the compass azimuth. Columns that a given row does not have are left empty.
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::clock::ManualClock;
use crate::config::PathfinderConfig;
use crate::earth::{DeclinationModel, bearing_degrees, offset_point};
use crate::error::NavError;
use crate::messages::EventStream;
use crate::navigation::{NavPhase, NavState, SignalQuality};
use crate::session::Navigator;
use crate::{GeoPoint, RawFix, wrap_to_360};

/// One row of a recorded sensor log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Reading time (RFC 3339)
    pub time: DateTime<Utc>,
    /// Latitude in degrees
    pub latitude: Option<f64>,
    /// Longitude in degrees
    pub longitude: Option<f64>,
    /// Horizontal accuracy (one sigma) in meters
    #[serde(rename = "horizontalAccuracy")]
    pub horizontal_accuracy: Option<f32>,
    /// Ground speed in m/s
    pub speed: Option<f32>,
    /// Course of travel in degrees from true north
    pub bearing: Option<f32>,
    /// Accuracy of the course of travel in degrees
    #[serde(rename = "bearingAccuracy")]
    pub bearing_accuracy: Option<f32>,
    /// Compass azimuth in degrees from magnetic north
    pub azimuth: Option<f32>,
}

impl SensorRecord {
    /// The location fix in this row, if it has coordinates and an accuracy.
    pub fn fix(&self) -> Option<RawFix> {
        let point = GeoPoint::new(self.latitude?, self.longitude?);
        let fix = RawFix::new(
            point,
            self.horizontal_accuracy?,
            self.speed.unwrap_or(0.0),
            self.time.timestamp_millis(),
        );
        Some(match self.bearing {
            Some(bearing) => fix.with_bearing(bearing, self.bearing_accuracy),
            None => fix,
        })
    }
    /// Reads a CSV sensor log.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pathfinder::sim::SensorRecord;
    ///
    /// let records = SensorRecord::from_csv("./data/walk.csv").expect("Failed to read log");
    /// println!("Loaded {} records", records.len());
    /// ```
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, csv::Error> {
        let mut rdr = csv::Reader::from_path(path)?;
        rdr.deserialize().collect()
    }
    /// Writes a CSV sensor log.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// The published state at one instant of a replay, flattened for CSV export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationRecord {
    pub time_ms: i64,
    pub phase: NavPhase,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f32>,
    pub speed_mps: Option<f32>,
    /// Fix time of the current sample
    pub sample_time_ms: Option<i64>,
    pub heading_deg: Option<f32>,
    pub distance_m: Option<f32>,
    pub raw_distance_m: Option<f32>,
    pub arrow_relative_deg: Option<f32>,
    pub arrived: bool,
    pub signal: SignalQuality,
    pub weak_signal: bool,
    pub capturing: bool,
    pub anchor_latitude: Option<f64>,
    pub anchor_longitude: Option<f64>,
    pub anchor_accuracy_m: Option<f32>,
    pub error: Option<String>,
}

impl NavigationRecord {
    pub fn from_state(time_ms: i64, state: &NavState) -> Self {
        NavigationRecord {
            time_ms,
            phase: state.phase,
            latitude: state.current.map(|c| c.point.latitude),
            longitude: state.current.map(|c| c.point.longitude),
            accuracy_m: state.current.map(|c| c.accuracy_m),
            speed_mps: state.current.map(|c| c.speed_mps),
            sample_time_ms: state.current.map(|c| c.timestamp_ms),
            heading_deg: state.heading_deg,
            distance_m: state.distance_m,
            raw_distance_m: state.raw_distance_m,
            arrow_relative_deg: state.arrow_relative_deg,
            arrived: state.arrived,
            signal: state.signal,
            weak_signal: state.weak_signal,
            capturing: state.capturing,
            anchor_latitude: state.anchor.map(|a| a.point.latitude),
            anchor_longitude: state.anchor.map(|a| a.point.longitude),
            anchor_accuracy_m: state.anchor.map(|a| a.accuracy_m),
            error: state.error_message.clone(),
        }
    }
}

/// The sequence of published states produced by a replay.
#[derive(Clone, Debug, Default)]
pub struct NavigationResult {
    pub name: String,
    pub records: Vec<NavigationRecord>,
}

impl NavigationResult {
    pub fn new(name: &str) -> Self {
        NavigationResult {
            name: name.to_string(),
            records: Vec::new(),
        }
    }
    /// Writes the result to a CSV file, one row per published state.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    pub fn from_csv<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, csv::Error> {
        let mut rdr = csv::Reader::from_path(path)?;
        let records = rdr.deserialize().collect::<Result<Vec<_>, _>>()?;
        Ok(NavigationResult {
            name: name.to_string(),
            records,
        })
    }
    pub fn last(&self) -> Option<&NavigationRecord> {
        self.records.last()
    }
    /// Time of the first state that reported arrival.
    pub fn first_arrival_ms(&self) -> Option<i64> {
        self.records.iter().find(|r| r.arrived).map(|r| r.time_ms)
    }
    /// Largest displayed distance over the run.
    pub fn max_distance_m(&self) -> Option<f32> {
        self.records
            .iter()
            .filter_map(|r| r.distance_m)
            .fold(None, |acc, d| Some(acc.map_or(d, |m: f32| m.max(d))))
    }
}

/// Run an event stream through a [Navigator] on a manual clock.
///
/// Capture deadlines that fall between two events are honored at their own time, so the result is the
/// same as a live session receiving the inputs at the recorded instants. One record is produced per
/// event and per capture deadline.
pub fn replay(
    stream: &EventStream,
    config: &PathfinderConfig,
    declination: Arc<dyn DeclinationModel>,
) -> Result<NavigationResult, NavError> {
    let clock = ManualClock::new(stream.start_ms);
    let mut navigator = Navigator::new(config.clone(), Arc::new(clock.clone()), declination)?;
    let mut result = NavigationResult::new("replay");
    result.records.reserve(stream.events.len());

    for timed in &stream.events {
        while let Some(deadline) = navigator.capture_deadline_ms()
            && deadline <= timed.at_ms
        {
            clock.set(deadline);
            navigator.poll_capture();
            result
                .records
                .push(NavigationRecord::from_state(deadline, navigator.state()));
        }
        clock.set(timed.at_ms);
        navigator.handle(timed.event.clone());
        result
            .records
            .push(NavigationRecord::from_state(timed.at_ms, navigator.state()));
    }
    while let Some(deadline) = navigator.capture_deadline_ms() {
        clock.set(deadline);
        navigator.poll_capture();
        result
            .records
            .push(NavigationRecord::from_state(deadline, navigator.state()));
    }
    info!(
        "Replayed {} events into {} states",
        stream.events.len(),
        result.records.len()
    );
    Ok(result)
}

/// Parameters of a synthetic out-and-back walk.
///
/// The walker stands at `start` for `dwell_s`, walks `walk_s` along `heading_deg`, pauses, walks back
/// along the reciprocal heading, and stands at the start again for `dwell_s`. The phone faces the
/// direction of travel throughout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticWalk {
    pub start: GeoPoint,
    pub start_time: DateTime<Utc>,
    pub rate_hz: f64,
    pub dwell_s: f64,
    pub walk_s: f64,
    pub pause_s: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    /// Reported horizontal accuracy in meters
    pub accuracy_m: f32,
    /// Standard deviation of the position noise per axis, as a fraction of the accuracy
    pub position_noise_ratio: f64,
    pub compass_noise_deg: f64,
    pub seed: u64,
}

impl Default for SyntheticWalk {
    fn default() -> Self {
        SyntheticWalk {
            start: GeoPoint::new(39.9526, -75.1652),
            start_time: DateTime::<Utc>::from_timestamp(1_767_225_600, 0).unwrap_or_default(),
            rate_hz: 2.0,
            dwell_s: 15.0,
            walk_s: 60.0,
            pause_s: 5.0,
            speed_mps: 1.4,
            heading_deg: 45.0,
            accuracy_m: 5.0,
            position_noise_ratio: 0.4,
            compass_noise_deg: 4.0,
            seed: 42,
        }
    }
}

impl SyntheticWalk {
    pub fn duration_s(&self) -> f64 {
        2.0 * self.dwell_s + 2.0 * self.walk_s + self.pause_s
    }
    /// True position, true facing direction, and true speed at `t` seconds into the walk.
    pub fn truth(&self, t: f64) -> (GeoPoint, f64, f64) {
        let out_end = self.dwell_s + self.walk_s;
        let back_start = out_end + self.pause_s;
        let back_end = back_start + self.walk_s;
        let (along, facing, speed) = if t < self.dwell_s {
            (0.0, self.heading_deg, 0.0)
        } else if t < out_end {
            ((t - self.dwell_s) * self.speed_mps, self.heading_deg, self.speed_mps)
        } else if t < back_start {
            (self.walk_s * self.speed_mps, self.heading_deg + 180.0, 0.0)
        } else if t < back_end {
            (
                (back_end - t) * self.speed_mps,
                self.heading_deg + 180.0,
                self.speed_mps,
            )
        } else {
            (0.0, self.heading_deg + 180.0, 0.0)
        };
        let rad = self.heading_deg.to_radians();
        let point = offset_point(&self.start, along * rad.cos(), along * rad.sin());
        (point, facing.rem_euclid(360.0), speed)
    }
}

/// Generate a reproducible sensor log for a [SyntheticWalk].
///
/// Compass readings are magnetic: the declination from `declination` is subtracted from the true facing
/// direction before noise is added, so replaying with the same model recovers true headings.
pub fn synthetic_walk(
    walk: &SyntheticWalk,
    declination: &dyn DeclinationModel,
) -> Result<Vec<SensorRecord>, NavError> {
    if walk.rate_hz.is_nan() || walk.rate_hz <= 0.0 {
        return Err(NavError::Config(format!(
            "rate_hz must be positive, got {}",
            walk.rate_hz
        )));
    }
    let noise = |sd: f64| {
        Normal::new(0.0, sd).map_err(|e| NavError::Config(format!("invalid noise level: {}", e)))
    };
    let position_noise = noise(walk.accuracy_m as f64 * walk.position_noise_ratio)?;
    let compass_noise = noise(walk.compass_noise_deg)?;
    let speed_noise = noise(0.1)?;
    let mut rng = StdRng::seed_from_u64(walk.seed);

    let step_ms = (1000.0 / walk.rate_hz).round() as i64;
    let count = (walk.duration_s() * walk.rate_hz).floor() as usize + 1;
    let mut records = Vec::with_capacity(count);
    let mut previous: Option<GeoPoint> = None;
    for i in 0..count {
        let time = walk.start_time + Duration::milliseconds(i as i64 * step_ms);
        let t = (i as i64 * step_ms) as f64 / 1000.0;
        let (truth, facing, speed) = walk.truth(t);
        let measured = offset_point(
            &truth,
            position_noise.sample(&mut rng),
            position_noise.sample(&mut rng),
        );
        let magnetic = facing as f32 - declination.declination_deg(&truth, time.timestamp_millis());
        let azimuth = wrap_to_360(magnetic + compass_noise.sample(&mut rng) as f32);
        let reported_speed = if speed > 0.0 {
            (speed + speed_noise.sample(&mut rng)).max(0.0) as f32
        } else {
            0.0
        };
        let bearing = match previous {
            Some(prev) if speed > 0.0 => Some(bearing_degrees(&prev, &measured)),
            _ => None,
        };
        records.push(SensorRecord {
            time,
            latitude: Some(measured.latitude),
            longitude: Some(measured.longitude),
            horizontal_accuracy: Some(walk.accuracy_m),
            speed: Some(reported_speed),
            bearing,
            bearing_accuracy: bearing.map(|_| 30.0),
            azimuth: Some(azimuth),
        });
        previous = Some(measured);
    }
    Ok(records)
}
