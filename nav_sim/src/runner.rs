//! Scenario runner - drives the navigation engine through simulated trips.

use crate::context::SimContext;
use crate::error::SimError;
use crate::gps::SimulatedGps;
use crate::oracle::DriveOracle;
use crate::provider::ScriptedProvider;
use crate::scenarios::{self, ScenarioId, DESTINATION};

use nav_core::navigator::{CommandStatus, NavRequest, NavigatorHandle};
use nav_core::route::RouteId;
use nav_core::state::{StateKey, StateValue};
use nav_core::{EngineConfig, NavEngine, NavError};
use nav_env::{NavContext, ProviderController, ProviderError};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, info, warn};

/// Vehicle speed in every drive scenario (m/s, ~50 km/h).
const DRIVE_SPEED: f64 = 13.9;

/// Virtual time a command may take before the scenario fails.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// RNG stream for GPS noise.
const GPS_STREAM: u64 = 1;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Requests received by the routing provider
    pub provider_requests: u64,

    /// Distinct routes that became the current route
    pub routes_followed: u64,

    /// Routes installed by recalculation
    pub recalculations: u64,

    /// State change events observed
    pub state_changes: u64,

    /// Whether the current route was ever dropped mid-trip
    pub lost_route: bool,

    pub arrived: bool,

    /// Simulation time of arrival (s)
    pub arrival_time_secs: Option<f64>,

    /// Odometer of the simulated vehicle (m)
    pub distance_travelled: f64,

    /// Command statuses in the order they were returned
    pub statuses: Vec<String>,
}

/// Observations gathered from the state change stream.
#[derive(Debug, Default)]
struct Journal {
    current: Option<RouteId>,
    routes_followed: u64,
    lost_route: bool,
    state_changes: u64,
}

impl Journal {
    fn record(&mut self, key: StateKey, value: &StateValue) {
        self.state_changes += 1;
        if key != StateKey::CurrentRoute {
            return;
        }
        match value {
            StateValue::Route(Some(route)) if self.current != Some(route.id()) => {
                self.current = Some(route.id());
                self.routes_followed += 1;
            }
            StateValue::Route(None) => {
                if self.current.is_some() {
                    self.lost_route = true;
                }
                self.current = None;
            }
            _ => {}
        }
    }
}

/// One simulated vehicle with its engine and the world around it.
struct SimWorld {
    ctx: Arc<SimContext>,
    provider: Arc<ScriptedProvider>,
    oracle: Arc<Mutex<DriveOracle>>,
    engine: NavEngine<SimContext>,
    handle: NavigatorHandle,
    journal: Arc<Mutex<Journal>>,
    period: Duration,
    statuses: Vec<String>,
}

impl SimWorld {
    fn new(seed: u64, scenario: ScenarioId, config: &EngineConfig) -> Result<Self, SimError> {
        let ctx = SimContext::shared(seed);
        let provider = Arc::new(ScriptedProvider::new(Arc::clone(&ctx), scenarios::corridors()?));

        let oracle = DriveOracle::new(scenarios::trajectory(scenario)?, DRIVE_SPEED, ctx.rng(GPS_STREAM))?
            .with_gps_noise(scenario.gps_noise());
        let oracle = Arc::new(Mutex::new(oracle));

        let mut engine = NavEngine::new(Arc::clone(&ctx), provider.clone(), config.clone());
        engine.add_subsystem(Box::new(SimulatedGps::new(Arc::clone(&oracle))));

        let journal = Arc::new(Mutex::new(Journal::default()));
        let sink = Arc::clone(&journal);
        engine.subscribe(move |change| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(change.key, &change.value);
        });

        let handle = engine.handle();
        engine.start()?;

        Ok(Self {
            ctx,
            provider,
            oracle,
            engine,
            handle,
            journal,
            period: config.tick_period(),
            statuses: Vec::new(),
        })
    }

    fn oracle(&self) -> std::sync::MutexGuard<'_, DriveOracle> {
        self.oracle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advances the world by one tick and lets spawned requests make progress.
    async fn tick(&mut self) -> Result<(), SimError> {
        let dt = self.period.as_secs_f64();
        self.oracle().step(dt);
        self.engine.step()?;
        self.ctx.advance_time(self.period);
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Sends a command and ticks until its status comes back.
    async fn command(&mut self, request: NavRequest) -> Result<CommandStatus, SimError> {
        let label = format!("{:?}", request);
        let mut rx = self.handle.submit(request)?;
        let deadline = self.ctx.now() + COMMAND_TIMEOUT;

        loop {
            self.tick().await?;
            match rx.try_recv() {
                Ok(status) => {
                    debug!("{} -> {}", label, status);
                    self.statuses.push(status.to_string());
                    return Ok(status);
                }
                Err(TryRecvError::Closed) => return Err(NavError::EngineStopped.into()),
                Err(TryRecvError::Empty) if self.ctx.now() >= deadline => {
                    return Err(SimError::CommandTimeout(label, COMMAND_TIMEOUT));
                }
                Err(TryRecvError::Empty) => {}
            }
        }
    }

    fn arrived(&self) -> Result<bool, SimError> {
        Ok(self
            .engine
            .state()
            .current_route()?
            .is_some_and(|route| route.is_arrived()))
    }

    fn metrics(&self) -> ScenarioMetrics {
        let journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        let arrival_time_secs = self
            .engine
            .state()
            .current_route()
            .ok()
            .flatten()
            .and_then(|route| route.arrival_timestamp)
            .map(|ms| (ms.saturating_sub(self.epoch_ms())) as f64 / 1000.0);

        ScenarioMetrics {
            provider_requests: self.provider.requests(),
            routes_followed: journal.routes_followed,
            recalculations: journal.routes_followed.saturating_sub(1),
            state_changes: journal.state_changes,
            lost_route: journal.lost_route,
            arrived: arrival_time_secs.is_some(),
            arrival_time_secs,
            distance_travelled: self.oracle().travelled(),
            statuses: self.statuses.clone(),
        }
    }

    /// Wall-clock epoch of virtual time zero.
    fn epoch_ms(&self) -> u64 {
        self.ctx.epoch_millis() - self.ctx.now().as_millis() as u64
    }

    fn result(&self, scenario: ScenarioId, seed: u64, failure: Option<String>) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed,
            passed: failure.is_none(),
            total_ticks: self.engine.current_tick(),
            final_time_secs: self.ctx.now().as_secs_f64(),
            failure_reason: failure,
            metrics: self.metrics(),
        }
    }
}

/// Runs navigation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    config: EngineConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_duration_secs: 300.0,
            config: EngineConfig {
                name: "nav-sim".to_string(),
                ..EngineConfig::default()
            },
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::PreviewLifecycle => self.run_preview_lifecycle().await,
            _ => self.run_drive(scenario).await,
        };

        outcome.unwrap_or_else(|e| {
            warn!("Scenario {} aborted: {}", scenario.name(), e);
            ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                total_ticks: 0,
                final_time_secs: 0.0,
                failure_reason: Some(e.to_string()),
                metrics: ScenarioMetrics::default(),
            }
        })
    }

    /// NAV-001/002/003/005: preview, confirm, then drive until arrival.
    async fn run_drive(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        let mut world = SimWorld::new(self.seed, scenario, &self.config)?;

        let status = world
            .command(NavRequest::RequestRoutePreview {
                destination: DESTINATION.into(),
            })
            .await?;
        if !status.is_success() {
            return Ok(world.result(scenario, self.seed, Some(format!("Preview failed: {}", status))));
        }
        let status = world.command(NavRequest::ConfirmRoutePreview).await?;
        if !status.is_success() {
            return Ok(world.result(scenario, self.seed, Some(format!("Confirm failed: {}", status))));
        }

        if scenario == ScenarioId::ProviderOutage {
            world.provider.set_latency(Duration::from_millis(300));
            world.provider.fail_next(3, ProviderError::Timeout(10_000));
        }

        let limit = Duration::from_secs_f64(self.max_duration_secs);
        let mut last_report = 0;
        while !world.arrived()? && world.ctx.now() < limit {
            world.tick().await?;

            let second = world.ctx.now().as_secs();
            if second >= last_report + 10 {
                last_report = second;
                let step = world.engine.state().current_step()?;
                let oracle = world.oracle();
                debug!(
                    "  t={}s | travelled={:.0}m | waypoint={} | step={:?}",
                    second,
                    oracle.travelled(),
                    oracle.waypoint(),
                    step
                );
            }
        }

        let metrics = world.metrics();
        let expected_recalculations = u64::from(scenario.takes_detour());
        let failure = if !metrics.arrived {
            Some(format!(
                "Did not arrive within {:.0}s ({:.0}m travelled)",
                self.max_duration_secs, metrics.distance_travelled
            ))
        } else if metrics.recalculations != expected_recalculations {
            Some(format!(
                "Expected {} recalculation(s), saw {}",
                expected_recalculations, metrics.recalculations
            ))
        } else if metrics.lost_route {
            Some("Current route was dropped mid-trip".to_string())
        } else if scenario == ScenarioId::ProviderOutage && metrics.provider_requests != 5 {
            Some(format!(
                "Expected 3 failed and 1 successful recalculation request, saw {} requests after the preview",
                metrics.provider_requests.saturating_sub(1)
            ))
        } else {
            None
        };

        info!(
            "✓ {} complete: arrived={} after {:.1}s, {} recalculation(s), {} provider request(s)",
            scenario.name(),
            metrics.arrived,
            metrics.arrival_time_secs.unwrap_or(0.0),
            metrics.recalculations,
            metrics.provider_requests
        );
        Ok(world.result(scenario, self.seed, failure))
    }

    /// NAV-004: every command answers with the documented status.
    async fn run_preview_lifecycle(&self) -> Result<ScenarioResult, SimError> {
        let scenario = ScenarioId::PreviewLifecycle;
        let mut world = SimWorld::new(self.seed, scenario, &self.config)?;
        world.oracle().set_speed(0.0);

        let script = [
            (NavRequest::ClearRoutePreview, "SUCCESS"),
            (NavRequest::ConfirmRoutePreview, "NO_PREVIEW"),
            (
                NavRequest::RequestRoutePreview {
                    destination: "Atlantis".into(),
                },
                "ZERO_RESULTS",
            ),
            (
                NavRequest::RequestRoutePreview {
                    destination: DESTINATION.into(),
                },
                "SUCCESS",
            ),
            (NavRequest::ClearRoutePreview, "SUCCESS"),
            (
                NavRequest::RequestRoutePreview {
                    destination: DESTINATION.into(),
                },
                "SUCCESS",
            ),
            (NavRequest::ConfirmRoutePreview, "SUCCESS"),
            (NavRequest::EndNavigation, "SUCCESS"),
        ];

        let mut failure = None;
        for (request, expected) in script {
            let label = format!("{:?}", request);
            let status = world.command(request).await?;
            if status.as_str() != expected {
                failure = Some(format!("{} returned {}, expected {}", label, status, expected));
                break;
            }
        }

        let state = world.engine.state();
        if failure.is_none() && (state.current_route()?.is_some() || state.preview_route()?.is_some()) {
            failure = Some("Routes left behind after ending navigation".to_string());
        }
        if failure.is_none() && state.is_calculating()? {
            failure = Some("Calculating flag left set".to_string());
        }

        info!("✓ {} complete: {} commands", scenario.name(), world.statuses.len());
        Ok(world.result(scenario, self.seed, failure))
    }
}
