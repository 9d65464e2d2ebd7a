//! Route model: ordered Steps, each an ordered sequence of indexed Points.
//!
//! A Route is built once from a provider response and is read-only after
//! that, except for the arrival flag and the start/arrival timestamps.

use crate::error::ValidationError;
use crate::geo::{self, Position};
use crate::polyline;
use nav_env::{DirectionsRoute, RawStep, TextValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Distance (meters) or duration (seconds) with display text.
pub type Measure = TextValue;

/// Unique identifier of a constructed route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteId(pub Uuid);

impl RouteId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RouteId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough to tell routes apart in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One coordinate sample along a step, carrying its order index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub index: usize,
    pub position: Position,
}

/// One maneuver-level leg of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepRepr")]
pub struct Step {
    index: usize,
    distance: Measure,
    duration: Measure,
    instructions: String,
    maneuver: Option<String>,
    start_location: Position,
    end_location: Position,
    points: Vec<NavPoint>,
    longest_point_gap: f64,
}

#[derive(Deserialize)]
struct StepRepr {
    index: usize,
    distance: Measure,
    duration: Measure,
    instructions: String,
    maneuver: Option<String>,
    start_location: Position,
    end_location: Position,
    points: Vec<NavPoint>,
}

impl TryFrom<StepRepr> for Step {
    type Error = ValidationError;

    fn try_from(repr: StepRepr) -> Result<Self, Self::Error> {
        for (position, point) in repr.points.iter().enumerate() {
            if point.index != position {
                return Err(ValidationError::PointIndexMismatch {
                    step: repr.index,
                    position,
                    index: point.index,
                });
            }
        }
        StepBuilder {
            index: Some(repr.index),
            distance: repr.distance,
            duration: repr.duration,
            instructions: repr.instructions,
            maneuver: repr.maneuver,
            start_location: Some(repr.start_location),
            end_location: Some(repr.end_location),
            path: repr.points.into_iter().map(|p| p.position).collect(),
        }
        .build()
    }
}

/// Builder for [`Step`]. The route index is mandatory.
#[derive(Debug, Clone, Default)]
pub struct StepBuilder {
    index: Option<usize>,
    distance: Measure,
    duration: Measure,
    instructions: String,
    maneuver: Option<String>,
    start_location: Option<Position>,
    end_location: Option<Position>,
    path: Vec<Position>,
}

impl StepBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a provider step, decoding its polyline.
    pub fn from_raw(raw: &RawStep) -> Result<Self, ValidationError> {
        Ok(Self {
            index: None,
            distance: raw.distance.clone(),
            duration: raw.duration.clone(),
            instructions: raw.html_instructions.clone(),
            maneuver: raw.maneuver.clone(),
            start_location: Some(Position::try_from(raw.start_location)?),
            end_location: Some(Position::try_from(raw.end_location)?),
            path: polyline::decode(&raw.polyline.points)?,
        })
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn distance(mut self, distance: Measure) -> Self {
        self.distance = distance;
        self
    }

    pub fn duration(mut self, duration: Measure) -> Self {
        self.duration = duration;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = text.into();
        self
    }

    pub fn maneuver(mut self, maneuver: impl Into<String>) -> Self {
        self.maneuver = Some(maneuver.into());
        self
    }

    pub fn path(mut self, path: Vec<Position>) -> Self {
        self.path = path;
        self
    }

    /// Puts `prefix` in front of the current path, dropping a trailing point
    /// of `prefix` that coincides with the current first point.
    pub fn prepend(mut self, mut prefix: Vec<Position>) -> Self {
        if let (Some(last), Some(first)) = (prefix.last(), self.path.first()) {
            if last == first {
                prefix.pop();
            }
        }
        prefix.append(&mut self.path);
        self.path = prefix;
        self
    }

    pub fn first_point(&self) -> Option<&Position> {
        self.path.first()
    }

    pub fn build(self) -> Result<Step, ValidationError> {
        let index = self.index.ok_or(ValidationError::MissingStepIndex)?;
        let (Some(&first), Some(&last)) = (self.path.first(), self.path.last()) else {
            return Err(ValidationError::EmptyStep(index));
        };

        let longest_point_gap = geo::segments(&self.path)
            .map(|(a, b)| a.distance_to(b))
            .fold(0.0, f64::max);

        let points = self
            .path
            .into_iter()
            .enumerate()
            .map(|(index, position)| NavPoint { index, position })
            .collect();

        Ok(Step {
            index,
            distance: self.distance,
            duration: self.duration,
            instructions: self.instructions,
            maneuver: self.maneuver,
            start_location: self.start_location.unwrap_or(first),
            end_location: self.end_location.unwrap_or(last),
            points,
            longest_point_gap,
        })
    }
}

impl Step {
    pub fn builder() -> StepBuilder {
        StepBuilder::new()
    }

    /// Index of this step within its route.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn distance(&self) -> &Measure {
        &self.distance
    }

    pub fn duration(&self) -> &Measure {
        &self.duration
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn maneuver(&self) -> Option<&str> {
        self.maneuver.as_deref()
    }

    pub fn start_location(&self) -> &Position {
        &self.start_location
    }

    pub fn end_location(&self) -> &Position {
        &self.end_location
    }

    pub fn points(&self) -> &[NavPoint] {
        &self.points
    }

    /// Longest great-circle gap between consecutive points, in meters.
    pub fn longest_point_gap(&self) -> f64 {
        self.longest_point_gap
    }

    pub fn last_point_index(&self) -> usize {
        self.points.len() - 1
    }

    pub fn is_last_point(&self, index: usize) -> bool {
        index >= self.last_point_index()
    }

    pub fn last_point(&self) -> &NavPoint {
        &self.points[self.points.len() - 1]
    }

    /// Points not yet reached, starting at `next_point`.
    pub fn remaining_points(&self, next_point: usize) -> &[NavPoint] {
        &self.points[next_point.min(self.points.len())..]
    }

    /// Distance from `position` to this step's path.
    pub fn distance_from(&self, position: &Position) -> f64 {
        position.distance_to_polyline(self.points.iter().map(|p| &p.position))
    }

    /// First point (in order) strictly closer than `range` meters.
    pub fn first_point_within(&self, position: &Position, range: f64) -> Option<&NavPoint> {
        self.points
            .iter()
            .find(|p| p.position.distance_to(position) < range)
    }
}

/// Bounding corners of a route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub northeast: Position,
    pub southwest: Position,
}

/// A planned driving route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RouteRepr")]
pub struct Route {
    id: RouteId,
    bounds: Bounds,
    steps: Vec<Step>,
    distance: Measure,
    duration: Measure,
    start_address: String,
    end_address: String,
    /// Destination exactly as the caller asked for it
    destination: String,
    warnings: Vec<String>,
    overview: Vec<Position>,
    pub arrived: bool,
    pub beginning_timestamp: Option<u64>,
    pub arrival_timestamp: Option<u64>,
}

#[derive(Deserialize)]
struct RouteRepr {
    id: RouteId,
    bounds: Bounds,
    steps: Vec<Step>,
    distance: Measure,
    duration: Measure,
    start_address: String,
    end_address: String,
    destination: String,
    warnings: Vec<String>,
    overview: Vec<Position>,
    arrived: bool,
    beginning_timestamp: Option<u64>,
    arrival_timestamp: Option<u64>,
}

impl TryFrom<RouteRepr> for Route {
    type Error = ValidationError;

    fn try_from(repr: RouteRepr) -> Result<Self, Self::Error> {
        if repr.steps.is_empty() {
            return Err(ValidationError::EmptyRoute);
        }
        for (position, step) in repr.steps.iter().enumerate() {
            if step.index != position {
                return Err(ValidationError::StepIndexMismatch {
                    position,
                    index: step.index,
                });
            }
        }

        Ok(Self {
            id: repr.id,
            bounds: repr.bounds,
            steps: repr.steps,
            distance: repr.distance,
            duration: repr.duration,
            start_address: repr.start_address,
            end_address: repr.end_address,
            destination: repr.destination,
            warnings: repr.warnings,
            overview: repr.overview,
            arrived: repr.arrived,
            beginning_timestamp: repr.beginning_timestamp,
            arrival_timestamp: repr.arrival_timestamp,
        })
    }
}

impl Route {
    /// Builds a route from a provider response.
    ///
    /// All legs are flattened into one step sequence with continuous
    /// indices. When `origin` is given and lies within `splice_range` of the
    /// first decoded point, a straight interpolated path from it to that
    /// point is spliced onto the front of the first step, so the vehicle
    /// starts on a well-formed segment. A farther origin is not spliced.
    ///
    /// # Arguments
    /// * `raw` - First route of a successful provider response
    /// * `origin` - Vehicle position at request time
    /// * `destination` - Destination text as originally requested
    /// * `splice_spacing` - Spacing of the spliced origin path in meters
    /// * `splice_range` - Farthest origin (meters) that is still spliced
    pub fn from_directions(
        raw: &DirectionsRoute,
        origin: Option<Position>,
        destination: &str,
        splice_spacing: f64,
        splice_range: f64,
    ) -> Result<Self, ValidationError> {
        let mut steps = Vec::new();
        let mut distance = 0;
        let mut duration = 0;

        for leg in &raw.legs {
            distance += leg.distance.value;
            duration += leg.duration.value;

            for raw_step in &leg.steps {
                let index = steps.len();
                let mut builder = StepBuilder::from_raw(raw_step)?.index(index);

                if index == 0 {
                    if let (Some(origin), Some(&first)) = (origin, builder.first_point()) {
                        if origin.distance_to(&first) <= splice_range {
                            builder = builder.prepend(origin.interpolate_between(&first, splice_spacing));
                        } else {
                            debug!(
                                "Origin {} is {:.0} m from the route, not spliced",
                                origin,
                                origin.distance_to(&first)
                            );
                        }
                    }
                }

                steps.push(builder.build()?);
            }
        }

        if steps.is_empty() {
            return Err(ValidationError::EmptyRoute);
        }

        let first_leg = &raw.legs[0];
        let last_leg = &raw.legs[raw.legs.len() - 1];

        Ok(Self {
            id: RouteId::new(),
            bounds: Bounds {
                northeast: Position::try_from(raw.bounds.northeast)?,
                southwest: Position::try_from(raw.bounds.southwest)?,
            },
            steps,
            distance: Measure::new(distance, first_leg.distance.text.clone()),
            duration: Measure::new(duration, first_leg.duration.text.clone()),
            start_address: first_leg.start_address.clone(),
            end_address: last_leg.end_address.clone(),
            destination: destination.to_string(),
            warnings: raw.warnings.clone(),
            overview: polyline::decode(&raw.overview_polyline.points)?,
            arrived: false,
            beginning_timestamp: None,
            arrival_timestamp: None,
        })
    }

    /// Builds a route from already-constructed steps.
    pub fn from_steps(steps: Vec<Step>, destination: &str) -> Result<Self, ValidationError> {
        if steps.is_empty() {
            return Err(ValidationError::EmptyRoute);
        }

        let all = || steps.iter().flat_map(|s| s.points.iter().map(|p| p.position));
        let (mut north, mut south) = (f64::MIN, f64::MAX);
        let (mut east, mut west) = (f64::MIN, f64::MAX);
        for p in all() {
            north = north.max(p.latitude());
            south = south.min(p.latitude());
            east = east.max(p.longitude());
            west = west.min(p.longitude());
        }

        let distance = steps.iter().map(|s| s.distance.value).sum();
        let duration = steps.iter().map(|s| s.duration.value).sum();
        let overview = all().collect();

        Ok(Self {
            id: RouteId::new(),
            bounds: Bounds {
                northeast: Position::new(north, east)?,
                southwest: Position::new(south, west)?,
            },
            steps,
            distance: Measure::new(distance, format!("{} m", distance)),
            duration: Measure::new(duration, format!("{} s", duration)),
            start_address: String::new(),
            end_address: destination.to_string(),
            destination: destination.to_string(),
            warnings: Vec::new(),
            overview,
            arrived: false,
            beginning_timestamp: None,
            arrival_timestamp: None,
        })
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn last_step(&self) -> &Step {
        &self.steps[self.steps.len() - 1]
    }

    /// Last point of the last step.
    pub fn final_point(&self) -> &Position {
        &self.last_step().last_point().position
    }

    pub fn distance(&self) -> &Measure {
        &self.distance
    }

    pub fn duration(&self) -> &Measure {
        &self.duration
    }

    pub fn start_address(&self) -> &str {
        &self.start_address
    }

    pub fn end_address(&self) -> &str {
        &self.end_address
    }

    /// Destination text as originally requested.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn overview(&self) -> &[Position] {
        &self.overview
    }

    pub fn is_arrived(&self) -> bool {
        self.arrived
    }

    pub fn distance_to_destination(&self, position: &Position) -> f64 {
        position.distance_to(self.final_point())
    }

    /// Milliseconds between the start of navigation and `now_ms`.
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.beginning_timestamp.map(|t| now_ms.saturating_sub(t))
    }

    pub fn mark_started(&mut self, now_ms: u64) {
        self.beginning_timestamp = Some(now_ms);
    }

    pub fn mark_arrived(&mut self, now_ms: u64) {
        self.arrived = true;
        self.arrival_timestamp = Some(now_ms);
    }

    /// Points already passed given the progress indices.
    pub fn traveled_points(&self, current_step: usize, next_point: usize) -> impl Iterator<Item = &NavPoint> {
        let before = self.steps.iter().take(current_step).flat_map(|s| s.points.iter());
        let current = self
            .steps
            .get(current_step)
            .map(|s| &s.points[..next_point.min(s.points.len())])
            .unwrap_or(&[]);
        before.chain(current.iter())
    }

    /// Leading steps whose first point lies within `range` meters of `position`.
    pub fn steps_beginning_within(&self, position: &Position, range: f64) -> Vec<&Step> {
        self.steps
            .iter()
            .take_while(|s| s.points[0].position.distance_to(position) < range)
            .collect()
    }
}
