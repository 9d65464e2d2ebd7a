//! Scripted routing provider with fault injection.
//!
//! Routes are cut from fixed corridors: a request is answered with the part
//! of the destination's corridor that starts at the corridor point nearest
//! to the origin, split into steps of a fixed number of points.

use crate::context::SimContext;
use async_trait::async_trait;
use nav_core::geo::Position;
use nav_core::polyline;
use nav_env::{
    Destination, DirectionsRequest, DirectionsRoute, EncodedPolyline, LatLng, NavContext, ProviderController,
    ProviderError, RawBounds, RawLeg, RawStep, RoutingProvider, TextValue,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Simulated cruising speed used for step durations (m/s).
const CRUISE_SPEED: f64 = 13.9;

/// Coordinate destinations match a corridor ending within this range (m).
const DESTINATION_MATCH_RANGE: f64 = 50.0;

/// A named road the provider can route along.
#[derive(Debug, Clone)]
pub struct Corridor {
    pub name: String,
    pub path: Vec<Position>,
}

impl Corridor {
    pub fn new(name: impl Into<String>, path: Vec<Position>) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }

    fn matches(&self, destination: &Destination) -> bool {
        match destination {
            Destination::Address(text) => self.name.eq_ignore_ascii_case(text.trim()),
            Destination::Coordinates(ll) => match (Position::try_from(*ll), self.path.last()) {
                (Ok(target), Some(end)) => target.distance_to(end) <= DESTINATION_MATCH_RANGE,
                _ => false,
            },
        }
    }

    /// Index of the corridor point nearest to `origin`.
    fn nearest_index(&self, origin: &Position) -> usize {
        self.path
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.distance_to(origin)))
            .fold((0, f64::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
            .0
    }
}

#[derive(Debug, Default)]
struct Faults {
    pending: VecDeque<ProviderError>,
    latency: Duration,
}

/// Routing provider answering from scripted corridors.
pub struct ScriptedProvider {
    ctx: Arc<SimContext>,
    corridors: Vec<Corridor>,
    points_per_step: usize,
    faults: Mutex<Faults>,
    requests: AtomicU64,
}

impl ScriptedProvider {
    pub fn new(ctx: Arc<SimContext>, corridors: Vec<Corridor>) -> Self {
        Self {
            ctx,
            corridors,
            points_per_step: 4,
            faults: Mutex::new(Faults::default()),
            requests: AtomicU64::new(0),
        }
    }

    /// Sets how many path segments each step spans.
    pub fn with_points_per_step(mut self, points: usize) -> Self {
        self.points_per_step = points.max(1);
        self
    }

    /// Total requests received, failed ones included.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self, corridor: &Corridor, origin: &Position) -> Result<DirectionsRoute, ProviderError> {
        let start = corridor.nearest_index(origin);
        let path = &corridor.path[start..];
        let (Some(first), Some(last)) = (path.first(), path.last()) else {
            return Err(ProviderError::ZeroResults);
        };

        let mut steps = Vec::new();
        let mut from = 0;
        loop {
            let to = (from + self.points_per_step).min(path.len() - 1);
            let chunk = &path[from..=to];
            let is_last = to == path.len() - 1;
            steps.push(raw_step(chunk, &corridor.name, steps.is_empty(), is_last)?);
            if is_last {
                break;
            }
            from = to;
        }

        let meters: u64 = steps.iter().map(|s| s.distance.value).sum();
        let seconds: u64 = steps.iter().map(|s| s.duration.value).sum();

        Ok(DirectionsRoute {
            bounds: bounds(path),
            overview_polyline: EncodedPolyline {
                points: polyline::encode(path).map_err(ProviderError::invalid)?,
            },
            legs: vec![RawLeg {
                distance: distance_text(meters),
                duration: duration_text(seconds),
                start_address: format!("{} #{}", corridor.name, start),
                end_address: corridor.name.clone(),
                start_location: first.to_lat_lng(),
                end_location: last.to_lat_lng(),
                steps,
            }],
            summary: corridor.name.clone(),
            warnings: Vec::new(),
        })
    }
}

fn raw_step(chunk: &[Position], road: &str, is_first: bool, is_last: bool) -> Result<RawStep, ProviderError> {
    let meters = nav_core::geo::segments(chunk)
        .map(|(a, b)| a.distance_to(b))
        .sum::<f64>()
        .round() as u64;
    let seconds = (meters as f64 / CRUISE_SPEED).round() as u64;

    let (html_instructions, maneuver) = match (is_first, is_last) {
        (true, _) => (format!("Head along <b>{}</b>", road), None),
        (_, true) => (format!("Arrive at <b>{}</b>", road), Some("straight".to_string())),
        _ => (format!("Continue on <b>{}</b>", road), Some("straight".to_string())),
    };

    Ok(RawStep {
        distance: distance_text(meters),
        duration: duration_text(seconds),
        html_instructions,
        maneuver,
        start_location: chunk[0].to_lat_lng(),
        end_location: chunk[chunk.len() - 1].to_lat_lng(),
        polyline: EncodedPolyline {
            points: polyline::encode(chunk).map_err(ProviderError::invalid)?,
        },
    })
}

fn bounds(path: &[Position]) -> RawBounds {
    let lats = path.iter().map(|p| p.latitude());
    let lngs = path.iter().map(|p| p.longitude());
    RawBounds {
        northeast: LatLng::new(lats.clone().fold(f64::MIN, f64::max), lngs.clone().fold(f64::MIN, f64::max)),
        southwest: LatLng::new(lats.fold(f64::MAX, f64::min), lngs.fold(f64::MAX, f64::min)),
    }
}

fn distance_text(meters: u64) -> TextValue {
    if meters >= 1000 {
        TextValue::new(meters, format!("{:.1} km", meters as f64 / 1000.0))
    } else {
        TextValue::new(meters, format!("{} m", meters))
    }
}

fn duration_text(seconds: u64) -> TextValue {
    TextValue::new(seconds, format!("{} min", seconds.div_ceil(60).max(1)))
}

#[async_trait]
impl RoutingProvider for ScriptedProvider {
    async fn directions(&self, request: DirectionsRequest) -> Result<DirectionsRoute, ProviderError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let (fault, latency) = {
            let mut faults = self.faults();
            (faults.pending.pop_front(), faults.latency)
        };
        debug!("Provider request #{} to {} (latency {:?})", n, request.destination, latency);

        if !latency.is_zero() {
            self.ctx.wait_until(self.ctx.now() + latency).await;
        }
        if let Some(error) = fault {
            return Err(error);
        }

        let origin = Position::try_from(request.origin).map_err(ProviderError::invalid)?;
        // Among roads to the destination, start from the one closest to the origin
        let corridor = self
            .corridors
            .iter()
            .filter(|c| !c.path.is_empty() && c.matches(&request.destination))
            .map(|c| (c, origin.distance_to(&c.path[c.nearest_index(&origin)])))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c)
            .ok_or(ProviderError::ZeroResults)?;
        self.build(corridor, &origin)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl ProviderController for ScriptedProvider {
    fn fail_next(&self, count: usize, error: ProviderError) {
        let mut faults = self.faults();
        faults.pending.extend(std::iter::repeat(error).take(count));
    }

    fn set_latency(&self, latency: Duration) {
        self.faults().latency = latency;
    }

    fn heal(&self) {
        let mut faults = self.faults();
        faults.pending.clear();
        faults.latency = Duration::ZERO;
    }
}
