//! Geo-Position primitive.
//!
//! Distances are great-circle (haversine) on a spherical Earth. Segment
//! projection is done in unprojected lat/lng space, which is accurate enough
//! at the scale of a single route step.

use crate::error::ValidationError;
use nav_env::LatLng;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for all great-circle distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

pub const DEGREES_TO_RADIANS: f64 = std::f64::consts::PI / 180.0;

/// Upper bound on the segments produced by [`Position::interpolate_between`].
pub const MAX_INTERPOLATED_SEGMENTS: usize = 10_000;

/// A point on the Earth's surface.
///
/// Positions are value objects: the engine replaces them wholesale and never
/// mutates one in place. Serialized as `[lat, lng]` or `[lat, lng, elevation]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PositionRepr", into = "PositionRepr")]
pub struct Position {
    latitude: f64,
    longitude: f64,
    elevation: Option<f64>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PositionRepr {
    Flat(f64, f64),
    WithElevation(f64, f64, f64),
}

impl TryFrom<PositionRepr> for Position {
    type Error = ValidationError;

    fn try_from(repr: PositionRepr) -> Result<Self, Self::Error> {
        match repr {
            PositionRepr::Flat(lat, lng) => Position::new(lat, lng),
            PositionRepr::WithElevation(lat, lng, elevation) => {
                Position::new(lat, lng)?.with_elevation(elevation)
            }
        }
    }
}

impl From<Position> for PositionRepr {
    fn from(p: Position) -> Self {
        match p.elevation {
            Some(e) => PositionRepr::WithElevation(p.latitude, p.longitude, e),
            None => PositionRepr::Flat(p.latitude, p.longitude),
        }
    }
}

impl Position {
    /// (0, 0), the default vehicle position before the first fix.
    pub const ORIGIN: Position = Position {
        latitude: 0.0,
        longitude: 0.0,
        elevation: None,
    };

    /// Creates a position, rejecting non-finite coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite() {
            return Err(ValidationError::Latitude(latitude));
        }
        if !longitude.is_finite() {
            return Err(ValidationError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
            elevation: None,
        })
    }

    /// Returns a copy carrying an elevation in meters.
    pub fn with_elevation(self, elevation: f64) -> Result<Self, ValidationError> {
        if !elevation.is_finite() {
            return Err(ValidationError::Elevation(elevation));
        }
        Ok(Self {
            elevation: Some(elevation),
            ..self
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn elevation(&self) -> Option<f64> {
        self.elevation
    }

    /// `[lat, lng]` pair.
    pub fn vec2(&self) -> [f64; 2] {
        [self.latitude, self.longitude]
    }

    pub fn to_lat_lng(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to(&self, other: &Position) -> f64 {
        let lat1 = self.latitude * DEGREES_TO_RADIANS;
        let lat2 = other.latitude * DEGREES_TO_RADIANS;
        let dlat = (other.latitude - self.latitude) * DEGREES_TO_RADIANS;
        let dlng = (other.longitude - self.longitude) * DEGREES_TO_RADIANS;

        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);

        2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
    }

    /// Closest point to `self` on the segment `a`-`b`.
    ///
    /// Projects onto the infinite line through `a` and `b` in lat/lng space
    /// and clamps the projection parameter to `[0, 1]`, so points beyond
    /// either end snap to the nearer endpoint.
    pub fn project_onto_segment(&self, a: &Position, b: &Position) -> Position {
        let ab = [b.latitude - a.latitude, b.longitude - a.longitude];
        let ap = [self.latitude - a.latitude, self.longitude - a.longitude];

        let len_sq = ab[0] * ab[0] + ab[1] * ab[1];
        if len_sq == 0.0 {
            return *a;
        }

        let t = ((ap[0] * ab[0] + ap[1] * ab[1]) / len_sq).clamp(0.0, 1.0);

        Position {
            latitude: a.latitude + ab[0] * t,
            longitude: a.longitude + ab[1] * t,
            elevation: None,
        }
    }

    /// Great-circle distance in meters to the closest point of segment `a`-`b`.
    pub fn distance_to_segment(&self, a: &Position, b: &Position) -> f64 {
        self.distance_to(&self.project_onto_segment(a, b))
    }

    /// Minimum segment distance over consecutive pairs of `points`.
    ///
    /// A single point degenerates to the direct distance; an empty path is
    /// infinitely far away.
    pub fn distance_to_polyline<'a, I>(&self, points: I) -> f64
    where
        I: IntoIterator<Item = &'a Position>,
    {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return f64::INFINITY;
        };

        let mut previous = first;
        let mut best = f64::INFINITY;
        let mut saw_segment = false;

        for point in iter {
            best = best.min(self.distance_to_segment(previous, point));
            previous = point;
            saw_segment = true;
        }

        if saw_segment {
            best
        } else {
            self.distance_to(first)
        }
    }

    /// Straight-line interpolation towards `other`.
    ///
    /// Returns positions spaced roughly `spacing_meters` apart, always
    /// starting with `self` and ending with exactly `other`. At most
    /// [`MAX_INTERPOLATED_SEGMENTS`] segments are produced; past that the
    /// spacing widens.
    pub fn interpolate_between(&self, other: &Position, spacing_meters: f64) -> Vec<Position> {
        let distance = self.distance_to(other);
        let segments = if spacing_meters > 0.0 {
            (distance / spacing_meters)
                .ceil()
                .clamp(1.0, MAX_INTERPOLATED_SEGMENTS as f64) as usize
        } else {
            1
        };

        let mut out = Vec::with_capacity(segments + 1);
        out.push(*self);

        for i in 1..segments {
            let t = i as f64 / segments as f64;
            out.push(Position {
                latitude: self.latitude + (other.latitude - self.latitude) * t,
                longitude: self.longitude + (other.longitude - self.longitude) * t,
                elevation: None,
            });
        }

        out.push(*other);
        out
    }
}

impl TryFrom<LatLng> for Position {
    type Error = ValidationError;

    fn try_from(ll: LatLng) -> Result<Self, Self::Error> {
        Position::new(ll.lat, ll.lng)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Consecutive `(a, b)` pairs of a path.
pub fn segments(points: &[Position]) -> impl Iterator<Item = (&Position, &Position)> {
    points.windows(2).map(|w| (&w[0], &w[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng).unwrap()
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(matches!(Position::new(f64::NAN, 0.0), Err(ValidationError::Latitude(_))));
        assert!(matches!(Position::new(0.0, f64::INFINITY), Err(ValidationError::Longitude(_))));
        assert!(matches!(pos(0.0, 0.0).with_elevation(f64::NAN), Err(ValidationError::Elevation(_))));
    }

    #[test]
    fn test_one_degree_of_longitude_at_equator() {
        let d = pos(0.0, 0.0).distance_to(&pos(0.0, 1.0));
        // 2 * pi * R / 360
        assert_relative_eq!(d, 111_194.93, epsilon = 0.1);
    }

    #[test]
    fn test_segment_clamp_midpoint() {
        let a = pos(0.0, 0.0);
        let b = pos(0.0, 1.0);
        let p = pos(1.0, 0.5);

        let closest = p.project_onto_segment(&a, &b);
        assert_relative_eq!(closest.latitude(), 0.0);
        assert_relative_eq!(closest.longitude(), 0.5);
        assert_relative_eq!(p.distance_to_segment(&a, &b), p.distance_to(&pos(0.0, 0.5)));
    }

    #[test]
    fn test_segment_clamps_to_nearer_endpoint() {
        let a = pos(0.0, 0.0);
        let b = pos(0.0, 1.0);

        let before = pos(0.2, -0.5);
        assert_eq!(before.project_onto_segment(&a, &b), a);

        let after = pos(-0.2, 1.7);
        assert_eq!(after.project_onto_segment(&a, &b), b);
    }

    #[test]
    fn test_degenerate_segment() {
        let a = pos(10.0, 10.0);
        let p = pos(10.001, 10.0);
        assert_relative_eq!(p.distance_to_segment(&a, &a), p.distance_to(&a));
    }

    #[test]
    fn test_polyline_minimum() {
        let path = vec![pos(0.0, 0.0), pos(0.0, 0.001), pos(0.001, 0.001)];
        let p = pos(0.0005, 0.0012);

        // Nearest to the vertical second segment
        let expected = p.distance_to_segment(&path[1], &path[2]);
        assert_relative_eq!(p.distance_to_polyline(&path), expected);

        assert_eq!(p.distance_to_polyline(&[]), f64::INFINITY);
        assert_relative_eq!(p.distance_to_polyline(&path[..1]), p.distance_to(&path[0]));
        assert_eq!(segments(&path).count(), 2);
    }

    #[test]
    fn test_interpolation_endpoints_and_spacing() {
        let a = pos(0.0, 0.0);
        let b = pos(0.0, 0.001); // ~111 m

        let path = a.interpolate_between(&b, 10.0);
        assert_eq!(path.first(), Some(&a));
        assert_eq!(path.last(), Some(&b));
        assert_eq!(path.len(), 13);

        for (p, q) in segments(&path) {
            assert!(p.distance_to(q) <= 10.0 + 1e-6);
        }

        // Coincident points still yield a well-formed two-point path
        assert_eq!(a.interpolate_between(&a, 5.0), vec![a, a]);
    }

    #[test]
    fn test_interpolation_is_bounded() {
        // Null island to a street in Pennsylvania, ~8,900 km
        let a = pos(0.0, 0.0);
        let b = pos(41.11038, -78.69994);

        let path = a.interpolate_between(&b, 5.0);
        assert_eq!(path.len(), MAX_INTERPOLATED_SEGMENTS + 1);
        assert_eq!(path.last(), Some(&b));

        let tiny = pos(0.0, 0.0001).interpolate_between(&a, 1e-12);
        assert_eq!(tiny.len(), MAX_INTERPOLATED_SEGMENTS + 1);

        assert_eq!(a.interpolate_between(&b, f64::NAN).len(), 2);
        assert_eq!(a.interpolate_between(&b, f64::INFINITY).len(), 2);
    }

    #[test]
    fn test_serde_shapes() {
        let flat = pos(41.11038, -78.69994);
        assert_eq!(serde_json::to_string(&flat).unwrap(), "[41.11038,-78.69994]");

        let high = flat.with_elevation(420.0).unwrap();
        let json = serde_json::to_string(&high).unwrap();
        assert_eq!(serde_json::from_str::<Position>(&json).unwrap(), high);

        assert!(serde_json::from_str::<Position>("[1.0]").is_err());
    }

    proptest! {
        #[test]
        fn prop_distance_symmetric(
            lat1 in -89.0f64..89.0, lng1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lng2 in -179.0f64..179.0,
        ) {
            let a = pos(lat1, lng1);
            let b = pos(lat2, lng2);
            let ab = a.distance_to(&b);
            let ba = b.distance_to(&a);
            prop_assert!((ab - ba).abs() <= 1e-6 * ab.max(1.0));
            prop_assert_eq!(a.distance_to(&a), 0.0);
        }

        #[test]
        fn prop_segment_distance_bounded_by_endpoints(
            lat in -1.0f64..1.0, lng in -1.0f64..1.0,
            alat in -1.0f64..1.0, alng in -1.0f64..1.0,
            blat in -1.0f64..1.0, blng in -1.0f64..1.0,
        ) {
            let p = pos(lat, lng);
            let a = pos(alat, alng);
            let b = pos(blat, blng);
            let d = p.distance_to_segment(&a, &b);
            // Projection happens in degree space, so allow a small metric skew
            prop_assert!(d <= p.distance_to(&a) * 1.001 + 1e-6);
            prop_assert!(d <= p.distance_to(&b) * 1.001 + 1e-6);
        }
    }
}
