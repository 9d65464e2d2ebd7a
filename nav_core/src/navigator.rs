//! Navigator - route tracking state machine.
//!
//! On each activation the Navigator reads the vehicle position and active
//! route from the [`StateStore`], then in order:
//!
//! 1. checks arrival at the final point (terminal),
//! 2. measures the distance to the road over the current and upcoming steps,
//! 3. waits for the vehicle to first reach the route (entry latch),
//! 4. counts off-route activations and recalculates once the grace period
//!    runs out,
//! 5. advances the point index within the current step, or jumps ahead to a
//!    later step.
//!
//! Provider requests (recalculation and route preview) are spawned through
//! the [`NavContext`] and their results are applied on a later tick, so the
//! tick loop never waits on the network.

use crate::error::{NavError, StateError};
use crate::geo::Position;
use crate::route::{Route, RouteId};
use crate::scheduler::{Cadence, Subsystem};
use crate::state::{StateKey, StateStore};
use nav_env::{Destination, DirectionsRequest, NavContext, ProviderError, RoutingProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const SUBSYSTEM: &str = "Navigator";

/// Tunables of the Navigator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    /// Ticks between activations
    pub cadence: u64,

    /// A point counts as reached within this range (m)
    pub point_detection_range: f64,

    /// The destination counts as reached within this range (m)
    pub destination_detection_range: f64,

    /// Distance to road under which the vehicle is considered on the route (m)
    pub route_entry_range: f64,

    /// Distance to road above which the vehicle is considered off the route (m)
    pub recalculation_range: f64,

    /// How long the vehicle may stay off the route before recalculating (ms)
    pub recalculation_grace_ms: u64,

    /// Number of upcoming steps searched for the road and for progress
    pub step_look_ahead: usize,

    /// Bound on a single provider request (ms)
    pub request_timeout_ms: u64,

    /// Spacing of the path spliced from the vehicle onto a new route (m)
    pub origin_splice_spacing: f64,

    /// Farthest vehicle position that is still spliced onto a new route (m)
    pub origin_splice_range: f64,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            cadence: 10,
            point_detection_range: 10.0,
            destination_detection_range: 25.0,
            route_entry_range: 20.0,
            recalculation_range: 50.0,
            recalculation_grace_ms: 5_000,
            step_look_ahead: 5,
            request_timeout_ms: 10_000,
            origin_splice_spacing: 5.0,
            origin_splice_range: 500.0,
        }
    }
}

impl NavigatorConfig {
    pub fn recalculation_grace(&self) -> Duration {
        Duration::from_millis(self.recalculation_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The grace period expressed in Navigator activations (at least one).
    pub fn grace_ticks(&self, tick_period: Duration) -> u64 {
        Cadence::every(self.cadence)
            .activations_in(self.recalculation_grace(), tick_period)
            .max(1)
    }
}

/// Conceptual tracking state of the active route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavPhase {
    NotNavigating,
    ApproachingRoute,
    OnRoute,
    Deviated,
    Recalculating,
    Arrived,
}

/// Outcome of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    NoPreview,
    /// No location fix has been received yet
    NoPosition,
    /// Provider failure code passed through ("TIMEOUT", "ZERO_RESULTS", ...)
    Provider(String),
}

impl CommandStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CommandStatus::Success => "SUCCESS",
            CommandStatus::NoPreview => "NO_PREVIEW",
            CommandStatus::NoPosition => "NO_POSITION",
            CommandStatus::Provider(code) => code,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == CommandStatus::Success
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CommandStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Commands accepted from outside the tick loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum NavRequest {
    RequestRoutePreview { destination: Destination },
    ClearRoutePreview,
    ConfirmRoutePreview,
    EndNavigation,
}

#[derive(Debug)]
struct NavCommand {
    request: NavRequest,
    reply: oneshot::Sender<CommandStatus>,
}

/// Cloneable sender of commands to a running Navigator.
#[derive(Debug, Clone)]
pub struct NavigatorHandle {
    tx: mpsc::UnboundedSender<NavCommand>,
}

impl NavigatorHandle {
    /// Queues a command; the receiver resolves once the Navigator handled it.
    pub fn submit(&self, request: NavRequest) -> Result<oneshot::Receiver<CommandStatus>, NavError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(NavCommand { request, reply })
            .map_err(|_| NavError::EngineStopped)?;
        Ok(rx)
    }

    /// Sends a command and waits for its status.
    pub async fn call(&self, request: NavRequest) -> Result<CommandStatus, NavError> {
        self.submit(request)?.await.map_err(|_| NavError::EngineStopped)
    }

    pub async fn request_route_preview(
        &self,
        destination: impl Into<Destination>,
    ) -> Result<CommandStatus, NavError> {
        self.call(NavRequest::RequestRoutePreview {
            destination: destination.into(),
        })
        .await
    }

    pub async fn clear_route_preview(&self) -> Result<CommandStatus, NavError> {
        self.call(NavRequest::ClearRoutePreview).await
    }

    pub async fn confirm_route_preview(&self) -> Result<CommandStatus, NavError> {
        self.call(NavRequest::ConfirmRoutePreview).await
    }

    pub async fn end_navigation(&self) -> Result<CommandStatus, NavError> {
        self.call(NavRequest::EndNavigation).await
    }
}

/// Result of a spawned provider request.
enum Completion {
    Preview {
        result: Result<Route, ProviderError>,
        reply: oneshot::Sender<CommandStatus>,
    },
    Recalculation {
        replaces: RouteId,
        result: Result<Route, ProviderError>,
    },
}

/// Position of the vehicle along a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub step: usize,
    pub next_point: usize,
}

/// Finds the progress implied by `car`, or `None` when it does not change.
///
/// The first point of the current step within `range` is the hit; it
/// advances `next_point` unless it is the point immediately behind it. Only
/// when the current step has no hit at all are the following `look_ahead`
/// steps scanned, nearest first.
pub fn locate_progress(
    route: &Route,
    car: &Position,
    current: Progress,
    range: f64,
    look_ahead: usize,
) -> Option<Progress> {
    let step = route.step(current.step)?;

    if let Some(hit) = step.first_point_within(car, range) {
        if current.next_point > 0 && hit.index == current.next_point - 1 {
            return None;
        }
        return Some(Progress {
            step: current.step,
            next_point: hit.index + 1,
        });
    }

    route
        .steps()
        .iter()
        .skip(current.step + 1)
        .take(look_ahead)
        .find_map(|s| {
            s.first_point_within(car, range).map(|hit| Progress {
                step: s.index(),
                next_point: hit.index + 1,
            })
        })
}

/// Minimum distance from `car` to the current step and the next `look_ahead` steps.
pub fn distance_to_road(route: &Route, car: &Position, current_step: usize, look_ahead: usize) -> f64 {
    route
        .steps()
        .iter()
        .skip(current_step)
        .take(look_ahead + 1)
        .map(|s| s.distance_from(car))
        .fold(f64::INFINITY, f64::min)
}

/// The route tracking state machine.
pub struct Navigator<C: NavContext> {
    ctx: Arc<C>,
    provider: Arc<dyn RoutingProvider>,
    config: NavigatorConfig,
    tick_period: Duration,
    grace_ticks: u64,

    /// Cleared only when a new route is installed
    has_reached_route: bool,
    deviation_ticks: u64,
    phase: NavPhase,

    in_flight: usize,
    recalculations: u64,

    commands: mpsc::UnboundedReceiver<NavCommand>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl<C: NavContext> Navigator<C> {
    /// Creates a Navigator and the handle used to command it.
    pub fn new(
        ctx: Arc<C>,
        provider: Arc<dyn RoutingProvider>,
        config: NavigatorConfig,
        tick_period: Duration,
    ) -> (Self, NavigatorHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let grace_ticks = config.grace_ticks(tick_period);

        let navigator = Self {
            ctx,
            provider,
            config,
            tick_period,
            grace_ticks,
            has_reached_route: false,
            deviation_ticks: 0,
            phase: NavPhase::NotNavigating,
            in_flight: 0,
            recalculations: 0,
            commands,
            completions_tx,
            completions,
        };
        (navigator, NavigatorHandle { tx })
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    pub fn phase(&self) -> NavPhase {
        self.phase
    }

    pub fn deviation_ticks(&self) -> u64 {
        self.deviation_ticks
    }

    pub fn grace_ticks(&self) -> u64 {
        self.grace_ticks
    }

    pub fn has_reached_route(&self) -> bool {
        self.has_reached_route
    }

    /// Recalculations started so far.
    pub fn recalculations(&self) -> u64 {
        self.recalculations
    }

    /// Provider requests not yet settled.
    pub fn requests_in_flight(&self) -> usize {
        self.in_flight
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    fn track(&mut self, state: &mut StateStore) -> Result<(), NavError> {
        let Some(route) = state.current_route()? else {
            self.phase = NavPhase::NotNavigating;
            return Ok(());
        };
        if route.is_arrived() {
            self.phase = NavPhase::Arrived;
            return Ok(());
        }
        if state.is_calculating()? {
            return Ok(());
        }

        let car = state.car_position()?;
        let current = Progress {
            step: state.current_step()?.ok_or(StateError::Unset(StateKey::CurrentStep))?,
            next_point: state.next_point()?.ok_or(StateError::Unset(StateKey::NextPoint))?,
        };
        if current.step >= route.step_count() {
            return Err(StateError::OutOfRange {
                key: StateKey::CurrentStep,
                index: current.step,
            }
            .into());
        }

        if route.distance_to_destination(&car) <= self.config.destination_detection_range {
            return self.arrive(state, &route);
        }

        let road = distance_to_road(&route, &car, current.step, self.config.step_look_ahead);

        if !self.has_reached_route {
            if road < self.config.route_entry_range {
                self.has_reached_route = true;
                info!(subsystem = SUBSYSTEM, route = %route.id(), "Route reached ({:.1} m from road)", road);
            } else {
                self.phase = NavPhase::ApproachingRoute;
                return Ok(());
            }
        }

        if road > self.config.recalculation_range {
            self.deviation_ticks += 1;
            if self.deviation_ticks >= self.grace_ticks {
                self.deviation_ticks = 0;
                return self.recalculate(state, &route, car);
            }
            self.phase = NavPhase::Deviated;
            self.warn_deviation(road);
            return Ok(());
        }
        self.deviation_ticks = 0;
        self.phase = NavPhase::OnRoute;

        if let Some(progress) = locate_progress(
            &route,
            &car,
            current,
            self.config.point_detection_range,
            self.config.step_look_ahead,
        ) {
            if progress.step != current.step {
                debug!(subsystem = SUBSYSTEM, "Advanced to step {}", progress.step);
                state.set_current_step(Some(progress.step))?;
            }
            state.set_next_point(Some(progress.next_point))?;
        }

        Ok(())
    }

    fn arrive(&mut self, state: &mut StateStore, route: &Route) -> Result<(), NavError> {
        let now = state.now();
        let mut arrived = route.clone();
        arrived.mark_arrived(now);

        match arrived.elapsed_ms(now) {
            Some(elapsed) => info!(
                subsystem = SUBSYSTEM,
                route = %arrived.id(),
                "Arrived at destination after {}ms",
                elapsed
            ),
            None => info!(subsystem = SUBSYSTEM, route = %arrived.id(), "Arrived at destination"),
        }

        self.phase = NavPhase::Arrived;
        state.set_current_route(Some(Arc::new(arrived)))?;
        Ok(())
    }

    /// Warns once per whole second of grace remaining.
    fn warn_deviation(&self, road: f64) {
        let cadence = Cadence::every(self.config.cadence);
        let per_second = cadence
            .activations_in(Duration::from_secs(1), self.tick_period)
            .max(1);
        let remaining = self.grace_ticks - self.deviation_ticks;

        if self.deviation_ticks == 1 || remaining % per_second == 0 {
            warn!(
                subsystem = SUBSYSTEM,
                "Deviated {:.0} m from route, recalculating in {}s",
                road,
                remaining.div_ceil(per_second)
            );
        }
    }

    // ------------------------------------------------------------------
    // Provider requests
    // ------------------------------------------------------------------

    fn recalculate(&mut self, state: &mut StateStore, route: &Route, car: Position) -> Result<(), NavError> {
        self.recalculations += 1;
        self.phase = NavPhase::Recalculating;
        info!(
            subsystem = SUBSYSTEM,
            route = %route.id(),
            "Recalculating route to {}",
            route.destination()
        );

        let replaces = route.id();
        let destination = Destination::Address(route.destination().to_string());
        self.spawn_request(state, "recalculation", car, destination, move |result| {
            Completion::Recalculation { replaces, result }
        })
    }

    fn spawn_request<F>(
        &mut self,
        state: &mut StateStore,
        name: &str,
        origin: Position,
        destination: Destination,
        complete: F,
    ) -> Result<(), NavError>
    where
        F: FnOnce(Result<Route, ProviderError>) -> Completion + Send + 'static,
    {
        let timeout = self.config.request_timeout();
        let spacing = self.config.origin_splice_spacing;
        let splice_range = self.config.origin_splice_range;
        let text = destination.to_string();
        let request = DirectionsRequest::driving(origin.to_lat_lng(), destination, self.ctx.system_time())
            .with_timeout(timeout);
        let provider = Arc::clone(&self.provider);
        let ctx = Arc::clone(&self.ctx);
        let tx = self.completions_tx.clone();

        self.in_flight += 1;
        if self.in_flight == 1 {
            state.set_calculating(true)?;
        }

        self.ctx.spawn(name, async move {
            // Timed on the context clock
            let result = tokio::select! {
                response = provider.directions(request) => response.and_then(|raw| {
                    Route::from_directions(&raw, Some(origin), &text, spacing, splice_range)
                        .map_err(ProviderError::invalid)
                }),
                _ = ctx.sleep(timeout) => Err(ProviderError::Timeout(timeout.as_millis() as u64)),
            };
            let _ = tx.send(complete(result));
        });
        Ok(())
    }

    fn settle(&mut self, state: &mut StateStore, completion: Completion) -> Result<(), NavError> {
        self.in_flight = self.in_flight.saturating_sub(1);

        let outcome = match completion {
            Completion::Preview { result, reply } => self.apply_preview(state, result, reply),
            Completion::Recalculation { replaces, result } => self.apply_recalculation(state, replaces, result),
        };

        if self.in_flight == 0 {
            state.set_calculating(false)?;
        }
        outcome
    }

    fn apply_preview(
        &mut self,
        state: &mut StateStore,
        result: Result<Route, ProviderError>,
        reply: oneshot::Sender<CommandStatus>,
    ) -> Result<(), NavError> {
        let status = match result {
            Ok(route) => {
                info!(
                    subsystem = SUBSYSTEM,
                    route = %route.id(),
                    "Route preview retrieved: {} steps, {}",
                    route.step_count(),
                    route.distance().text
                );
                state.set_preview_route(Some(Arc::new(route)))?;
                CommandStatus::Success
            }
            Err(e) => {
                warn!(subsystem = SUBSYSTEM, "Route preview failed: {}", e);
                CommandStatus::Provider(e.status_code())
            }
        };
        let _ = reply.send(status);
        Ok(())
    }

    fn apply_recalculation(
        &mut self,
        state: &mut StateStore,
        replaces: RouteId,
        result: Result<Route, ProviderError>,
    ) -> Result<(), NavError> {
        let current = state.current_route()?;
        let Some(current) = current.filter(|r| r.id() == replaces && !r.is_arrived()) else {
            debug!(subsystem = SUBSYSTEM, "Discarding recalculation for inactive route {}", replaces);
            return Ok(());
        };

        match result {
            Ok(mut route) => {
                route.beginning_timestamp = current.beginning_timestamp;
                info!(
                    subsystem = SUBSYSTEM,
                    route = %route.id(),
                    "Recalculated route: {} steps, {}",
                    route.step_count(),
                    route.distance().text
                );
                self.reset_tracking(NavPhase::ApproachingRoute);
                state.begin_route(Arc::new(route))?;
            }
            Err(e) => {
                warn!(
                    subsystem = SUBSYSTEM,
                    "Recalculation failed ({}), keeping route {}",
                    e,
                    current.id()
                );
                self.phase = NavPhase::Deviated;
            }
        }
        Ok(())
    }

    fn reset_tracking(&mut self, phase: NavPhase) {
        self.has_reached_route = false;
        self.deviation_ticks = 0;
        self.phase = phase;
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle(&mut self, state: &mut StateStore, command: NavCommand) -> Result<(), NavError> {
        let NavCommand { request, reply } = command;

        let status = match request {
            NavRequest::RequestRoutePreview { destination } => {
                if !state.has_car_fix()? {
                    warn!(subsystem = SUBSYSTEM, "No location fix yet, cannot preview {}", destination);
                    CommandStatus::NoPosition
                } else {
                    info!(subsystem = SUBSYSTEM, "Requesting route preview to {}", destination);
                    let origin = state.car_position()?;
                    return self.spawn_request(state, "preview", origin, destination, move |result| {
                        Completion::Preview { result, reply }
                    });
                }
            }
            NavRequest::ClearRoutePreview => {
                if state.preview_route()?.is_none() {
                    warn!(subsystem = SUBSYSTEM, "No route preview to clear");
                } else {
                    state.set_preview_route(None)?;
                    info!(subsystem = SUBSYSTEM, "Route preview cleared");
                }
                CommandStatus::Success
            }
            NavRequest::ConfirmRoutePreview => match state.preview_route()? {
                None => {
                    warn!(subsystem = SUBSYSTEM, "No route preview to confirm");
                    CommandStatus::NoPreview
                }
                Some(preview) => {
                    let mut route = (*preview).clone();
                    route.mark_started(state.now());
                    info!(subsystem = SUBSYSTEM, route = %route.id(), "Route preview confirmed, navigating");

                    self.reset_tracking(NavPhase::ApproachingRoute);
                    state.begin_route(Arc::new(route))?;
                    state.set_preview_route(None)?;
                    CommandStatus::Success
                }
            },
            NavRequest::EndNavigation => {
                if state.current_route()?.is_none() {
                    warn!(subsystem = SUBSYSTEM, "No navigation to end");
                } else {
                    state.end_route()?;
                    info!(subsystem = SUBSYSTEM, "Navigation ended");
                }
                self.reset_tracking(NavPhase::NotNavigating);
                CommandStatus::Success
            }
        };

        let _ = reply.send(status);
        Ok(())
    }
}

impl<C: NavContext> Subsystem for Navigator<C> {
    fn name(&self) -> &'static str {
        SUBSYSTEM
    }

    fn cadence(&self) -> Cadence {
        Cadence::every(self.config.cadence)
    }

    fn start(&mut self, _state: &mut StateStore) -> Result<(), NavError> {
        info!(
            subsystem = SUBSYSTEM,
            "Tracking every {} ticks, recalculation grace {} activations",
            self.config.cadence,
            self.grace_ticks
        );
        Ok(())
    }

    /// Applies finished provider requests, then queued commands.
    fn poll(&mut self, state: &mut StateStore) -> Result<(), NavError> {
        while let Ok(completion) = self.completions.try_recv() {
            self.settle(state, completion)?;
        }
        while let Ok(command) = self.commands.try_recv() {
            self.handle(state, command)?;
        }
        Ok(())
    }

    fn activate(&mut self, _tick: u64, state: &mut StateStore) -> Result<(), NavError> {
        self.track(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyline;
    use crate::route::Step;
    use async_trait::async_trait;
    use nav_env::{DirectionsRoute, EncodedPolyline, LatLng, RawBounds, RawLeg, RawStep, TextValue, TokioContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns a single-step route along `path`, or a queued failure.
    struct MockProvider {
        path: Vec<Position>,
        calls: AtomicUsize,
        failures: Mutex<Vec<ProviderError>>,
    }

    impl MockProvider {
        fn new(path: Vec<Position>) -> Arc<Self> {
            Arc::new(Self {
                path,
                calls: AtomicUsize::new(0),
                failures: Mutex::new(Vec::new()),
            })
        }

        fn fail_next(&self, error: ProviderError) {
            self.failures.lock().unwrap().push(error);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RoutingProvider for MockProvider {
        async fn directions(&self, _request: DirectionsRequest) -> Result<DirectionsRoute, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.failures.lock().unwrap().pop() {
                return Err(e);
            }

            let first = self.path[0].to_lat_lng();
            let last = self.path[self.path.len() - 1].to_lat_lng();
            Ok(DirectionsRoute {
                bounds: RawBounds {
                    northeast: last,
                    southwest: first,
                },
                overview_polyline: EncodedPolyline {
                    points: polyline::encode(&self.path).unwrap(),
                },
                legs: vec![RawLeg {
                    distance: TextValue::new(500, "0.5 km"),
                    duration: TextValue::new(60, "1 min"),
                    start_address: "Start".into(),
                    end_address: "End".into(),
                    start_location: first,
                    end_location: last,
                    steps: vec![RawStep {
                        distance: TextValue::new(500, "0.5 km"),
                        duration: TextValue::new(60, "1 min"),
                        html_instructions: "Head east".into(),
                        maneuver: None,
                        start_location: first,
                        end_location: last,
                        polyline: EncodedPolyline {
                            points: polyline::encode(&self.path).unwrap(),
                        },
                    }],
                }],
                summary: String::new(),
                warnings: Vec::new(),
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    /// Accepts requests and never answers them.
    struct SilentProvider;

    #[async_trait]
    impl RoutingProvider for SilentProvider {
        async fn directions(&self, _request: DirectionsRequest) -> Result<DirectionsRoute, ProviderError> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng).unwrap()
    }

    /// Points every ~11 m east along the equator.
    fn equator(count: usize) -> Vec<Position> {
        (0..count).map(|i| pos(0.0, i as f64 * 0.0001)).collect()
    }

    fn route_along(paths: Vec<Vec<Position>>) -> Arc<Route> {
        let steps = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| Step::builder().index(i).path(path).build().unwrap())
            .collect();
        Arc::new(Route::from_steps(steps, "End St").unwrap())
    }

    /// Cadence 1 at 1 ms ticks with a 5 ms grace period: five activations.
    fn fast_config() -> NavigatorConfig {
        NavigatorConfig {
            cadence: 1,
            recalculation_grace_ms: 5,
            ..NavigatorConfig::default()
        }
    }

    fn navigator(provider: Arc<MockProvider>) -> (Navigator<TokioContext>, NavigatorHandle, StateStore) {
        let (nav, handle) = Navigator::new(
            TokioContext::shared(),
            provider,
            fast_config(),
            Duration::from_millis(1),
        );
        (nav, handle, StateStore::for_navigation(|| 1_000))
    }

    /// Lets spawned requests finish, then applies their results.
    async fn settle(nav: &mut Navigator<TokioContext>, state: &mut StateStore) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        nav.poll(state).unwrap();
    }

    fn tick(nav: &mut Navigator<TokioContext>, state: &mut StateStore) {
        nav.activate(0, state).unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let config = NavigatorConfig::default();
        assert_eq!(config.cadence, 10);
        assert_eq!(config.grace_ticks(Duration::from_millis(1)), 500);
        assert_eq!(fast_config().grace_ticks(Duration::from_millis(1)), 5);

        let partial: NavigatorConfig = serde_json::from_str(r#"{"cadence": 20}"#).unwrap();
        assert_eq!(partial.cadence, 20);
        assert_eq!(partial.recalculation_range, 50.0);
        assert_eq!(partial.origin_splice_range, 500.0);
    }

    #[test]
    fn test_command_status_strings() {
        assert_eq!(CommandStatus::Success.to_string(), "SUCCESS");
        assert_eq!(CommandStatus::NoPreview.to_string(), "NO_PREVIEW");
        assert_eq!(CommandStatus::NoPosition.to_string(), "NO_POSITION");
        assert_eq!(
            serde_json::to_string(&CommandStatus::Provider("ZERO_RESULTS".into())).unwrap(),
            r#""ZERO_RESULTS""#
        );

        let request: NavRequest =
            serde_json::from_str(r#"{"command":"requestRoutePreview","destination":"Main St"}"#).unwrap();
        assert_eq!(
            request,
            NavRequest::RequestRoutePreview {
                destination: Destination::Address("Main St".into())
            }
        );
    }

    #[test]
    fn test_locate_progress_prefers_current_step() {
        let route = route_along(vec![equator(3), vec![pos(0.0, 0.0002), pos(0.0, 0.0003)]]);
        let start = Progress { step: 0, next_point: 0 };

        let hit = locate_progress(&route, &pos(0.0, 0.0001), start, 10.0, 5).unwrap();
        assert_eq!(hit, Progress { step: 0, next_point: 2 });

        // Point 1 is directly behind next_point 2: nothing changes
        assert_eq!(locate_progress(&route, &pos(0.0, 0.0001), hit, 10.0, 5), None);

        // Off the current step but on the next one
        let ahead = locate_progress(&route, &pos(0.0, 0.0003), start, 10.0, 5).unwrap();
        assert_eq!(ahead, Progress { step: 1, next_point: 2 });

        // Look-ahead disabled
        assert_eq!(locate_progress(&route, &pos(0.0, 0.0003), start, 10.0, 0), None);
    }

    #[test]
    fn test_junction_hit_behind_next_point_holds_step() {
        // Step 0 ends on the vertex step 1 starts from
        let route = route_along(vec![equator(3), vec![pos(0.0, 0.0002), pos(0.0, 0.0003)]]);
        let at_junction = Progress { step: 0, next_point: 3 };

        // ~5.5 m past the junction: step 0's last point is the first hit and
        // sits right behind next_point, so step 1 is not searched
        let car = pos(0.0, 0.00025);
        assert!(route.step(1).unwrap().first_point_within(&car, 10.0).is_some());
        assert_eq!(locate_progress(&route, &car, at_junction, 10.0, 5), None);

        // Once step 0 has no point in range the look-ahead takes over
        let car = pos(0.0, 0.0003);
        assert_eq!(
            locate_progress(&route, &car, at_junction, 10.0, 5),
            Some(Progress { step: 1, next_point: 2 })
        );
    }

    #[tokio::test]
    async fn test_junction_tick_keeps_current_step() {
        let provider = MockProvider::new(equator(3));
        let (mut nav, _handle, mut state) = navigator(provider);
        state
            .begin_route(route_along(vec![equator(3), vec![pos(0.0, 0.0002), pos(0.0, 0.01)]]))
            .unwrap();
        state.set_next_point(Some(3)).unwrap();
        state.set_car_position(pos(0.0, 0.00025)).unwrap();

        let mut rx = state.subscribe_channel();
        for _ in 0..3 {
            tick(&mut nav, &mut state);
        }
        assert_eq!(nav.phase(), NavPhase::OnRoute);
        assert_eq!(state.current_step().unwrap(), Some(0));
        assert_eq!(state.next_point().unwrap(), Some(3));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_point_advancement_is_stable() {
        let provider = MockProvider::new(equator(3));
        let (mut nav, _handle, mut state) = navigator(provider);
        // Destination far away so arrival does not interfere
        state
            .begin_route(route_along(vec![equator(3), vec![pos(0.0, 0.0002), pos(0.0, 0.01)]]))
            .unwrap();
        state.set_car_position(pos(0.0, 0.0001)).unwrap();

        let mut rx = state.subscribe_channel();
        tick(&mut nav, &mut state);
        assert_eq!(state.next_point().unwrap(), Some(2));
        assert_eq!(state.current_step().unwrap(), Some(0));
        assert_eq!(nav.phase(), NavPhase::OnRoute);
        assert!(nav.has_reached_route());

        while rx.try_recv().is_ok() {}
        for _ in 0..5 {
            tick(&mut nav, &mut state);
        }
        assert_eq!(state.next_point().unwrap(), Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_deviation_before_route_is_reached() {
        let provider = MockProvider::new(equator(10));
        let (mut nav, _handle, mut state) = navigator(Arc::clone(&provider));
        state.begin_route(route_along(vec![equator(10)])).unwrap();
        state.set_car_position(pos(0.0009, 0.0)).unwrap(); // ~100 m north

        for _ in 0..20 {
            tick(&mut nav, &mut state);
        }
        assert_eq!(nav.phase(), NavPhase::ApproachingRoute);
        assert_eq!(nav.deviation_ticks(), 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_deviation_triggers_one_recalculation() {
        let provider = MockProvider::new(equator(10));
        let (mut nav, _handle, mut state) = navigator(Arc::clone(&provider));
        state.begin_route(route_along(vec![equator(10)])).unwrap();
        let original = state.current_route().unwrap().unwrap().id();

        // Reach the route, then drift ~100 m north
        state.set_car_position(pos(0.0, 0.0)).unwrap();
        tick(&mut nav, &mut state);
        state.set_car_position(pos(0.0009, 0.0)).unwrap();

        for expected in 1..=4 {
            tick(&mut nav, &mut state);
            assert_eq!(nav.deviation_ticks(), expected);
            assert_eq!(nav.phase(), NavPhase::Deviated);
        }
        tick(&mut nav, &mut state);
        assert_eq!(nav.deviation_ticks(), 0);
        assert_eq!(nav.phase(), NavPhase::Recalculating);
        assert!(state.is_calculating().unwrap());

        // Activations are skipped while the request is in flight
        tick(&mut nav, &mut state);
        assert_eq!(nav.deviation_ticks(), 0);

        settle(&mut nav, &mut state).await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(nav.recalculations(), 1);
        assert!(!state.is_calculating().unwrap());

        let route = state.current_route().unwrap().unwrap();
        assert_ne!(route.id(), original);
        assert_eq!(route.destination(), "End St");
        assert_eq!(state.current_step().unwrap(), Some(0));
        assert_eq!(state.next_point().unwrap(), Some(0));
        assert!(!nav.has_reached_route());

        // The new route starts at the vehicle; drift ~100 m south of it
        tick(&mut nav, &mut state);
        assert!(nav.has_reached_route());
        state.set_car_position(pos(-0.0009, 0.0002)).unwrap();
        for _ in 0..4 {
            tick(&mut nav, &mut state);
        }
        assert_eq!(nav.deviation_ticks(), 4);
        assert_eq!(provider.calls(), 1);

        tick(&mut nav, &mut state);
        settle(&mut nav, &mut state).await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_recalculation_keeps_route() {
        let provider = MockProvider::new(equator(10));
        provider.fail_next(ProviderError::Timeout(10_000));
        let (mut nav, _handle, mut state) = navigator(Arc::clone(&provider));
        state.begin_route(route_along(vec![equator(10)])).unwrap();
        let original = state.current_route().unwrap().unwrap().id();

        state.set_car_position(pos(0.0, 0.0)).unwrap();
        tick(&mut nav, &mut state);
        state.set_car_position(pos(0.0009, 0.0)).unwrap();
        for _ in 0..5 {
            tick(&mut nav, &mut state);
        }
        settle(&mut nav, &mut state).await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(state.current_route().unwrap().unwrap().id(), original);
        assert_eq!(nav.phase(), NavPhase::Deviated);
        assert!(!state.is_calculating().unwrap());

        // Retried once the grace period runs out again
        for _ in 0..5 {
            tick(&mut nav, &mut state);
        }
        settle(&mut nav, &mut state).await;
        assert_eq!(provider.calls(), 2);
        assert_ne!(state.current_route().unwrap().unwrap().id(), original);
    }

    #[tokio::test]
    async fn test_arrival_is_terminal() {
        let provider = MockProvider::new(equator(10));
        let (mut nav, _handle, mut state) = navigator(provider);
        let mut route = (*route_along(vec![equator(10)])).clone();
        route.mark_started(400);
        state.begin_route(Arc::new(route)).unwrap();

        state.set_car_position(pos(0.0, 0.00085)).unwrap(); // ~5 m short of the end
        tick(&mut nav, &mut state);

        let route = state.current_route().unwrap().unwrap();
        assert!(route.is_arrived());
        assert_eq!(route.arrival_timestamp, Some(1_000));
        assert_eq!(nav.phase(), NavPhase::Arrived);

        let next = state.next_point().unwrap();
        state.set_car_position(pos(0.0, 0.0001)).unwrap();
        for _ in 0..3 {
            tick(&mut nav, &mut state);
        }
        assert_eq!(state.next_point().unwrap(), next);
        assert_eq!(nav.phase(), NavPhase::Arrived);
    }

    #[tokio::test]
    async fn test_preview_lifecycle() {
        let provider = MockProvider::new(equator(10));
        let (mut nav, handle, mut state) = navigator(Arc::clone(&provider));
        state.set_car_position(pos(0.0, 0.0)).unwrap();

        let rx = handle
            .submit(NavRequest::RequestRoutePreview {
                destination: "End St".into(),
            })
            .unwrap();
        nav.poll(&mut state).unwrap();
        assert!(state.is_calculating().unwrap());

        settle(&mut nav, &mut state).await;
        assert_eq!(rx.await.unwrap(), CommandStatus::Success);
        assert!(!state.is_calculating().unwrap());
        let preview = state.preview_route().unwrap().unwrap();
        assert_eq!(preview.destination(), "End St");
        assert_eq!(state.current_route().unwrap(), None);

        let rx = handle.submit(NavRequest::ConfirmRoutePreview).unwrap();
        nav.poll(&mut state).unwrap();
        assert_eq!(rx.await.unwrap(), CommandStatus::Success);

        let current = state.current_route().unwrap().unwrap();
        assert_eq!(current.id(), preview.id());
        assert_eq!(current.beginning_timestamp, Some(1_000));
        assert_eq!(state.preview_route().unwrap(), None);
        assert_eq!(state.current_step().unwrap(), Some(0));
        assert_eq!(state.next_point().unwrap(), Some(0));

        let rx = handle.submit(NavRequest::EndNavigation).unwrap();
        nav.poll(&mut state).unwrap();
        assert_eq!(rx.await.unwrap(), CommandStatus::Success);
        assert_eq!(state.current_route().unwrap(), None);
        assert_eq!(state.current_step().unwrap(), None);
        assert_eq!(state.next_point().unwrap(), None);
    }

    #[tokio::test]
    async fn test_preview_requires_location_fix() {
        let provider = MockProvider::new(equator(10));
        let (mut nav, handle, mut state) = navigator(Arc::clone(&provider));
        let mut changes = state.subscribe_channel();

        let rx = handle
            .submit(NavRequest::RequestRoutePreview {
                destination: "End St".into(),
            })
            .unwrap();
        nav.poll(&mut state).unwrap();

        assert_eq!(rx.await.unwrap(), CommandStatus::NoPosition);
        assert_eq!(nav.requests_in_flight(), 0);
        assert!(!state.is_calculating().unwrap());
        assert!(changes.try_recv().is_err());
        settle(&mut nav, &mut state).await;
        assert_eq!(provider.calls(), 0);

        // The same request goes out once a fix arrives
        state.set_car_position(pos(0.0, 0.0)).unwrap();
        let rx = handle
            .submit(NavRequest::RequestRoutePreview {
                destination: "End St".into(),
            })
            .unwrap();
        nav.poll(&mut state).unwrap();
        settle(&mut nav, &mut state).await;
        assert_eq!(rx.await.unwrap(), CommandStatus::Success);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_silent_provider_times_out() {
        let (mut nav, handle) = Navigator::new(
            TokioContext::shared(),
            Arc::new(SilentProvider),
            NavigatorConfig {
                request_timeout_ms: 20,
                ..fast_config()
            },
            Duration::from_millis(1),
        );
        let mut state = StateStore::for_navigation(|| 1_000);
        state.set_car_position(pos(0.0, 0.0)).unwrap();

        let mut rx = handle
            .submit(NavRequest::RequestRoutePreview {
                destination: "End St".into(),
            })
            .unwrap();
        nav.poll(&mut state).unwrap();
        assert!(state.is_calculating().unwrap());

        let mut status = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            nav.poll(&mut state).unwrap();
            if let Ok(s) = rx.try_recv() {
                status = Some(s);
                break;
            }
        }

        assert_eq!(status, Some(CommandStatus::Provider("TIMEOUT".into())));
        assert!(!state.is_calculating().unwrap());
        assert_eq!(state.preview_route().unwrap(), None);
        assert_eq!(nav.requests_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_confirm_without_preview() {
        let provider = MockProvider::new(equator(3));
        let (mut nav, handle, mut state) = navigator(provider);
        let active = route_along(vec![equator(3)]);
        state.begin_route(Arc::clone(&active)).unwrap();

        let rx = handle.submit(NavRequest::ConfirmRoutePreview).unwrap();
        nav.poll(&mut state).unwrap();
        assert_eq!(rx.await.unwrap(), CommandStatus::NoPreview);
        assert_eq!(state.current_route().unwrap(), Some(active));
    }

    #[tokio::test]
    async fn test_clear_preview_is_idempotent() {
        let provider = MockProvider::new(equator(3));
        let (mut nav, handle, mut state) = navigator(provider);
        state.set_preview_route(Some(route_along(vec![equator(3)]))).unwrap();

        for _ in 0..2 {
            let rx = handle.submit(NavRequest::ClearRoutePreview).unwrap();
            nav.poll(&mut state).unwrap();
            assert_eq!(rx.await.unwrap(), CommandStatus::Success);
            assert_eq!(state.preview_route().unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_preview_failure_passes_status_through() {
        let provider = MockProvider::new(equator(3));
        provider.fail_next(ProviderError::ZeroResults);
        let (mut nav, handle, mut state) = navigator(provider);
        let existing = route_along(vec![equator(3)]);
        state.set_preview_route(Some(Arc::clone(&existing))).unwrap();
        state.set_car_position(pos(0.0, 0.0)).unwrap();

        let rx = handle
            .submit(NavRequest::RequestRoutePreview {
                destination: Destination::Coordinates(LatLng::new(1.0, 1.0)),
            })
            .unwrap();
        nav.poll(&mut state).unwrap();
        settle(&mut nav, &mut state).await;

        assert_eq!(rx.await.unwrap(), CommandStatus::Provider("ZERO_RESULTS".into()));
        assert_eq!(state.preview_route().unwrap(), Some(existing));
        assert!(!state.is_calculating().unwrap());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_engine() {
        let provider = MockProvider::new(equator(3));
        let (nav, handle, _state) = navigator(provider);
        drop(nav);
        assert!(matches!(
            handle.clear_route_preview().await,
            Err(NavError::EngineStopped)
        ));
    }
}
