//! Earth-related constants and functions
//!
//! This module contains the geodesy used by the navigation engine: great-circle distance and initial
//! bearing between WGS84 positions, small local offsets, and magnetic declination. The Earth is treated as
//! a sphere of [MEAN_RADIUS] for distance and bearing. Over the tens to hundreds of meters a treasure hunt
//! spans, the spherical error (< 0.5%) is far below the GNSS noise the filters deal with.
//!
//! # Magnetic declination
//! Compass (rotation-vector) azimuths are referenced to magnetic north, whereas bearings computed from
//! coordinates are referenced to true north. The [DeclinationModel] trait is the seam the heading filter
//! uses to convert between the two. Two models are provided:
//! - [WorldMagneticModel]: the NOAA/NGA World Magnetic Model via the
//!   [`world_magnetic_model`](https://crates.io/crates/world_magnetic_model) crate. This is the default.
//! - [DipoleDeclination]: a tilted-dipole approximation using the geomagnetic pole location. It is used as
//!   the fallback when a date falls outside the WMM epoch and is good to a few degrees at mid latitudes.
use chrono::{DateTime, Datelike, Utc};
use log::debug;
use world_magnetic_model::GeomagneticField;
use world_magnetic_model::time::Date;
use world_magnetic_model::uom::si::angle::degree;
use world_magnetic_model::uom::si::f32::{Angle, Length};
use world_magnetic_model::uom::si::length::meter;

use crate::{GeoPoint, wrap_to_180, wrap_to_360};

/// Earth's mean radius in meters
pub const MEAN_RADIUS: f64 = 6371000.0; // meters
/// Earth's magnetic north pole latitude, degrees (2025, International Geomagnetic Reference Field)
pub const MAGNETIC_NORTH_LATITUDE: f64 = 80.8; // degrees, geomagnetic north pole latitude
/// Earth's magnetic north pole longitude, degrees (2025, International Geomagnetic Reference Field)
pub const MAGNETIC_NORTH_LONGITUDE: f64 = -72.8; // degrees, geomagnetic north pole longitude

/// Great-circle distance between two positions using the haversine formula
///
/// # Parameters
/// - `a` - The first WGS84 position in degrees
/// - `b` - The second WGS84 position in degrees
///
/// # Returns
/// The distance in meters. The result is symmetric and exactly zero when `a == b`.
///
/// # Example
/// ```rust
/// use pathfinder::GeoPoint;
/// use pathfinder::earth;
/// let a = GeoPoint::new(0.0, 0.0);
/// let b = GeoPoint::new(0.0, 0.0001);
/// let d = earth::distance_meters(&a, &b);
/// assert!((d - 11.12).abs() < 0.01);
/// ```
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f32 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let half_dlat = (lat2 - lat1) / 2.0;
    let half_dlon = (b.longitude - a.longitude).to_radians() / 2.0;
    let h = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlon.sin().powi(2);
    // rounding can push h marginally past 1 for antipodal points
    let central_angle = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();
    (MEAN_RADIUS * central_angle) as f32
}
/// Initial great-circle bearing from `a` toward `b`
///
/// # Returns
/// The bearing in degrees clockwise from true north, in [0, 360). Returns 0 when the points coincide.
///
/// # Example
/// ```rust
/// use pathfinder::GeoPoint;
/// use pathfinder::earth;
/// let a = GeoPoint::new(0.0, 0.0);
/// let east = GeoPoint::new(0.0, 1.0);
/// assert!((earth::bearing_degrees(&a, &east) - 90.0).abs() < 1e-4);
/// ```
pub fn bearing_degrees(a: &GeoPoint, b: &GeoPoint) -> f32 {
    if a == b {
        return 0.0;
    }
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    wrap_to_360(y.atan2(x).to_degrees() as f32)
}
/// Normalize an angle in degrees to [0, 360)
///
/// Alias of [crate::wrap_to_360] kept next to the other angle helpers of this module.
pub fn normalize(deg: f32) -> f32 {
    wrap_to_360(deg)
}
/// Convert a small north/east displacement in meters to latitude/longitude deltas in degrees
///
/// Uses the spherical mean radius; the longitude delta is scaled by the cosine of the latitude.
///
/// # Example
/// ```rust
/// use pathfinder::earth;
/// let (dlat, dlon) = earth::meters_ned_to_dlat_dlon(0.0, 111.19, 0.0);
/// assert!((dlat - 0.001).abs() < 1e-6);
/// assert_eq!(dlon, 0.0);
/// ```
pub fn meters_ned_to_dlat_dlon(latitude: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let dlat = (north_m / MEAN_RADIUS).to_degrees();
    let cos_lat = latitude.to_radians().cos().max(1e-9);
    let dlon = (east_m / (MEAN_RADIUS * cos_lat)).to_degrees();
    (dlat, dlon)
}
/// Offset a position by a small north/east displacement in meters.
pub fn offset_point(point: &GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let (dlat, dlon) = meters_ned_to_dlat_dlon(point.latitude, north_m, east_m);
    GeoPoint::new(point.latitude + dlat, point.longitude + dlon)
}

// === Magnetic declination ===
/// Lookup of the magnetic declination (degrees, positive east) at a position and time.
///
/// Implemented for any `Fn(&GeoPoint, i64) -> f32` closure, so tests and platform layers can inject a
/// fixed or externally computed value.
pub trait DeclinationModel: Send + Sync {
    fn declination_deg(&self, point: &GeoPoint, timestamp_ms: i64) -> f32;
}
impl<F> DeclinationModel for F
where
    F: Fn(&GeoPoint, i64) -> f32 + Send + Sync,
{
    fn declination_deg(&self, point: &GeoPoint, timestamp_ms: i64) -> f32 {
        self(point, timestamp_ms)
    }
}

/// No correction: compass azimuths are used as if they were true bearings.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDeclination;
impl DeclinationModel for NoDeclination {
    fn declination_deg(&self, _point: &GeoPoint, _timestamp_ms: i64) -> f32 {
        0.0
    }
}

/// Tilted-dipole approximation of the declination
///
/// In a dipole field the horizontal component points along the great circle toward the geomagnetic
/// north pole, so the declination is the initial bearing from the position to the pole, wrapped to
/// [-180, 180).
#[derive(Clone, Copy, Debug, Default)]
pub struct DipoleDeclination;
impl DeclinationModel for DipoleDeclination {
    fn declination_deg(&self, point: &GeoPoint, _timestamp_ms: i64) -> f32 {
        let pole = GeoPoint::new(MAGNETIC_NORTH_LATITUDE, MAGNETIC_NORTH_LONGITUDE);
        wrap_to_180(bearing_degrees(point, &pole))
    }
}

/// Declination from the World Magnetic Model at ground level (altitude 0 m).
#[derive(Clone, Copy, Debug, Default)]
pub struct WorldMagneticModel;
impl DeclinationModel for WorldMagneticModel {
    fn declination_deg(&self, point: &GeoPoint, timestamp_ms: i64) -> f32 {
        let Some(time) = DateTime::<Utc>::from_timestamp_millis(timestamp_ms) else {
            debug!("Timestamp {} out of range, using dipole declination", timestamp_ms);
            return DipoleDeclination.declination_deg(point, timestamp_ms);
        };
        let date = match Date::from_ordinal_date(time.year(), time.ordinal() as u16) {
            Ok(date) => date,
            Err(e) => {
                debug!("Invalid date for magnetic model ({:?}), using dipole declination", e);
                return DipoleDeclination.declination_deg(point, timestamp_ms);
            }
        };
        match GeomagneticField::new(
            Length::new::<meter>(0.0),
            Angle::new::<degree>(point.latitude as f32),
            Angle::new::<degree>(point.longitude as f32),
            date,
        ) {
            Ok(field) => field.declination().get::<degree>(),
            Err(e) => {
                debug!("Magnetic model unavailable at {} ({:?}), using dipole declination", point, e);
                DipoleDeclination.declination_deg(point, timestamp_ms)
            }
        }
    }
}
