//! Encoded polyline codec (precision 1e5), backed by the `polyline` crate.
//!
//! The crate works on `geo` coordinates (x = longitude, y = latitude); this
//! module converts at the boundary so the rest of the core only sees
//! validated [`Position`]s.

use crate::error::ValidationError;
use crate::geo::Position;
use ::geo::Coord;

/// Digits of precision used by the Directions API.
const PRECISION: u32 = 5;

/// Decodes a provider polyline into ordered positions.
pub fn decode(encoded: &str) -> Result<Vec<Position>, ValidationError> {
    let line = ::polyline::decode_polyline(encoded, PRECISION)
        .map_err(|e| ValidationError::Polyline(e.to_string()))?;

    line.into_iter()
        .map(|c| Position::new(c.y, c.x))
        .collect()
}

/// Encodes positions as a provider polyline.
pub fn encode<'a, I>(points: I) -> Result<String, ValidationError>
where
    I: IntoIterator<Item = &'a Position>,
{
    let coords = points.into_iter().map(|p| Coord {
        x: p.longitude(),
        y: p.latitude(),
    });
    ::polyline::encode_coordinates(coords, PRECISION).map_err(|e| ValidationError::Polyline(e.to_string()))
}
