use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

/// A "part" of a location
pub type LocationComponent = f64;

/// Mean earth radius in meters, used for great-circle distances
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, specta::Type)]
/// A reading as produced by the platform's geolocation API
pub struct Coordinate {
    /// Latitude in degrees
    pub lat: LocationComponent,
    /// Longitude in degrees
    pub lng: LocationComponent,
    /// Radius of uncertainty in meters, if the platform reported one
    pub accuracy: Option<LocationComponent>,
    /// When the platform captured this reading
    pub timestamp: UtcDT,
    /// Ground speed in meters per second
    pub speed: Option<LocationComponent>,
    /// Direction of travel in degrees clockwise from true north
    pub heading: Option<LocationComponent>,
}

impl Coordinate {
    pub fn new(lat: LocationComponent, lng: LocationComponent, timestamp: UtcDT) -> Self {
        Self {
            lat,
            lng,
            accuracy: None,
            timestamp,
            speed: None,
            heading: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: LocationComponent) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_speed(mut self, speed: LocationComponent) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_heading(mut self, heading: LocationComponent) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Great-circle distance to `other` in meters
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        distance_meters(self, other)
    }
}

/// Haversine distance between two coordinates, in meters
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Absolute difference between reported accuracies, zero if either side didn't report one
pub fn accuracy_delta(a: &Coordinate, b: &Coordinate) -> f64 {
    match (a.accuracy, b.accuracy) {
        (Some(x), Some(y)) => (x - y).abs(),
        _ => 0.0,
    }
}
