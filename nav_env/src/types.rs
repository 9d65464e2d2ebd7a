//! Wire types exchanged with a routing provider.
//!
//! Field names follow the Google Directions JSON payload so a real response
//! deserializes straight into [`DirectionsRoute`]. Other vendors map onto the
//! same shapes in their adapter.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Default deadline for a single provider request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A raw latitude/longitude pair as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Where the route should end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    /// Free text the provider geocodes ("221B Baker Street")
    Address(String),

    /// Explicit coordinates
    Coordinates(LatLng),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Address(text) => f.write_str(text),
            Destination::Coordinates(ll) => write!(f, "{}", ll),
        }
    }
}

impl From<&str> for Destination {
    fn from(text: &str) -> Self {
        Destination::Address(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelMode {
    Driving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficModel {
    BestGuess,
}

/// A single route request.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionsRequest {
    pub origin: LatLng,
    pub destination: Destination,
    pub mode: TravelMode,
    pub departure_time: SystemTime,
    pub traffic_model: TrafficModel,
    pub timeout: Duration,
}

impl DirectionsRequest {
    /// Driving request departing now with best-guess traffic.
    pub fn driving(origin: LatLng, destination: Destination, departure_time: SystemTime) -> Self {
        Self {
            origin,
            destination,
            mode: TravelMode::Driving,
            departure_time,
            traffic_model: TrafficModel::BestGuess,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Distance (meters) or duration (seconds) with its display text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextValue {
    #[serde(default)]
    pub text: String,
    pub value: u64,
}

impl TextValue {
    pub fn new(value: u64, text: impl Into<String>) -> Self {
        Self {
            value,
            text: text.into(),
        }
    }
}

/// Provider-encoded polyline (precision 1e5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedPolyline {
    pub points: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawBounds {
    pub northeast: LatLng,
    pub southwest: LatLng,
}

/// One maneuver as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStep {
    pub distance: TextValue,
    pub duration: TextValue,
    #[serde(default)]
    pub html_instructions: String,
    #[serde(default)]
    pub maneuver: Option<String>,
    pub start_location: LatLng,
    pub end_location: LatLng,
    pub polyline: EncodedPolyline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLeg {
    pub distance: TextValue,
    pub duration: TextValue,
    #[serde(default)]
    pub start_address: String,
    #[serde(default)]
    pub end_address: String,
    pub start_location: LatLng,
    pub end_location: LatLng,
    pub steps: Vec<RawStep>,
}

/// The first route of a successful provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionsRoute {
    pub bounds: RawBounds,
    pub overview_polyline: EncodedPolyline,
    pub legs: Vec<RawLeg>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}
