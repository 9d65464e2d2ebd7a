//! Navigation Engine - wires the state store, tick scheduler and Navigator
//! to an environment context.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NavEngine                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              Context: NavContext                      │   │
//! │  │  • epoch_millis() → state change timestamps          │   │
//! │  │  • sleep() → tick period                             │   │
//! │  │  • spawn() → provider requests                       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                               │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ TickScheduler ── owns ── StateStore                  │   │
//! │  │   ├─ location subsystems (cadence 250)               │   │
//! │  │   └─ Navigator (cadence 10)  ◄── NavigatorHandle     │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use nav_core::engine::{EngineConfig, NavEngine};
//! use nav_env::TokioContext;
//!
//! let mut engine = NavEngine::new(TokioContext::shared(), provider, EngineConfig::default());
//! let handle = engine.handle();
//! engine.start()?;
//! engine.run(shutdown_rx).await?;
//! ```

use crate::error::NavError;
use crate::navigator::{Navigator, NavigatorConfig, NavigatorHandle};
use crate::scheduler::{Subsystem, TickReport, TickScheduler};
use crate::state::{StateChange, StateStore};
use nav_env::{NavContext, RoutingProvider};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Configuration for a navigation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine's logical name (for logging)
    pub name: String,

    /// Tick period in milliseconds (default: 1)
    pub tick_period_ms: u64,

    pub navigator: NavigatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "nav-engine".to_string(),
            tick_period_ms: 1,
            navigator: NavigatorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    pub fn from_json_str(json: &str) -> Result<Self, NavError> {
        serde_json::from_str(json).map_err(|e| NavError::Config(e.to_string()))
    }

    /// Loads a config file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, NavError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| NavError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
}

/// A navigation engine that owns all per-tick work.
///
/// Generic over the context, allowing the same engine to run on a vehicle
/// (tokio) or in the simulator (virtual clock).
pub struct NavEngine<C: NavContext> {
    context: Arc<C>,
    config: EngineConfig,
    scheduler: TickScheduler,
    handle: NavigatorHandle,

    /// Registered last, on start, so it sees this tick's position
    navigator: Option<Navigator<C>>,
    started: bool,
}

impl<C: NavContext> NavEngine<C> {
    pub fn new(context: Arc<C>, provider: Arc<dyn RoutingProvider>, config: EngineConfig) -> Self {
        let clock = {
            let context = Arc::clone(&context);
            move || context.epoch_millis()
        };
        let state = StateStore::for_navigation(clock);
        let scheduler = TickScheduler::new(config.tick_period(), state);
        let (navigator, handle) = Navigator::new(
            Arc::clone(&context),
            provider,
            config.navigator.clone(),
            config.tick_period(),
        );

        Self {
            context,
            config,
            scheduler,
            handle,
            navigator: Some(navigator),
            started: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// Handle for external commands (preview, confirm, end).
    pub fn handle(&self) -> NavigatorHandle {
        self.handle.clone()
    }

    /// Adds a subsystem that runs before the Navigator within each tick.
    pub fn add_subsystem(&mut self, subsystem: Box<dyn Subsystem>) {
        self.scheduler.register(subsystem);
    }

    pub fn subscribe(&mut self, subscriber: impl FnMut(&StateChange) + Send + 'static) {
        self.scheduler.state_mut().subscribe(subscriber);
    }

    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<StateChange> {
        self.scheduler.state_mut().subscribe_channel()
    }

    pub fn state(&self) -> &StateStore {
        self.scheduler.state()
    }

    pub fn state_mut(&mut self) -> &mut StateStore {
        self.scheduler.state_mut()
    }

    pub fn current_tick(&self) -> u64 {
        self.scheduler.current_tick()
    }

    /// Registers the Navigator, then initializes and starts every subsystem.
    pub fn start(&mut self) -> Result<(), NavError> {
        if self.started {
            return Ok(());
        }
        if let Some(navigator) = self.navigator.take() {
            self.scheduler.register(Box::new(navigator));
        }
        self.scheduler.init_all()?;
        self.scheduler.start_all()?;
        self.started = true;

        info!(
            "{} started (tick {:?}, seed {})",
            self.config.name,
            self.config.tick_period(),
            self.context.seed()
        );
        Ok(())
    }

    /// Runs one tick; starts the engine first if needed.
    pub fn step(&mut self) -> Result<TickReport, NavError> {
        self.start()?;
        Ok(self.scheduler.step())
    }

    /// Runs every subsystem's stop hook once. A later step restarts the engine.
    pub fn stop(&mut self) -> Result<(), NavError> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        self.scheduler.stop_all()
    }

    /// Ticks until `shutdown` turns true, then stops every subsystem.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), NavError> {
        self.start()?;
        let context = Arc::clone(&self.context);
        self.scheduler.run(context.as_ref(), shutdown).await;
        self.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Position;
    use crate::navigator::CommandStatus;
    use crate::scheduler::Cadence;
    use async_trait::async_trait;
    use nav_env::{DirectionsRequest, DirectionsRoute, ProviderError, TokioContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoRoutes;

    #[async_trait]
    impl RoutingProvider for NoRoutes {
        async fn directions(&self, _request: DirectionsRequest) -> Result<DirectionsRoute, ProviderError> {
            Err(ProviderError::ZeroResults)
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    /// Moves the vehicle one step north on every activation.
    struct Creep {
        lat: f64,
    }

    impl Subsystem for Creep {
        fn name(&self) -> &'static str {
            "Creep"
        }

        fn cadence(&self) -> Cadence {
            Cadence::every(1)
        }

        fn activate(&mut self, _tick: u64, state: &mut StateStore) -> Result<(), NavError> {
            self.lat += 0.001;
            state.set_car_position(Position::new(self.lat, 0.0)?)?;
            Ok(())
        }
    }

    /// Counts stop hook calls.
    struct Lifecycle {
        stops: Arc<AtomicUsize>,
    }

    impl Subsystem for Lifecycle {
        fn name(&self) -> &'static str {
            "Lifecycle"
        }

        fn cadence(&self) -> Cadence {
            Cadence::every(1)
        }

        fn activate(&mut self, _tick: u64, _state: &mut StateStore) -> Result<(), NavError> {
            Ok(())
        }

        fn stop(&mut self, _state: &mut StateStore) -> Result<(), NavError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine() -> NavEngine<TokioContext> {
        NavEngine::new(TokioContext::shared(), Arc::new(NoRoutes), EngineConfig::default())
    }

    #[test]
    fn test_config_defaults_and_partial_json() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_period(), Duration::from_millis(1));
        assert_eq!(config.navigator.step_look_ahead, 5);

        let config = EngineConfig::from_json_str(r#"{"name": "car-7", "navigator": {"cadence": 5}}"#).unwrap();
        assert_eq!(config.name, "car-7");
        assert_eq!(config.tick_period_ms, 1);
        assert_eq!(config.navigator.cadence, 5);
        assert_eq!(config.navigator.point_detection_range, 10.0);

        assert!(matches!(EngineConfig::from_json_str("{"), Err(NavError::Config(_))));
        assert!(matches!(
            EngineConfig::from_json_file("/nonexistent/engine.json"),
            Err(NavError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_subsystems_run_before_navigator() {
        let mut engine = engine();
        engine.add_subsystem(Box::new(Creep { lat: 0.0 }));
        let mut rx = engine.subscribe_channel();

        let report = engine.step().unwrap();
        assert_eq!(report.activated, vec!["Creep", "Navigator"]);

        let change = rx.try_recv().unwrap();
        assert!(change.timestamp > 0);
        assert_eq!(engine.current_tick(), 1);
    }

    #[tokio::test]
    async fn test_commands_flow_through_ticks() {
        let mut engine = engine();
        let handle = engine.handle();

        let rx = handle.submit(crate::navigator::NavRequest::ConfirmRoutePreview).unwrap();
        engine.step().unwrap();
        assert_eq!(rx.await.unwrap(), CommandStatus::NoPreview);

        engine.state_mut().set_car_position(Position::new(41.1, -78.7).unwrap()).unwrap();
        let rx = handle
            .submit(crate::navigator::NavRequest::RequestRoutePreview {
                destination: "Nowhere".into(),
            })
            .unwrap();
        engine.step().unwrap();
        assert!(engine.state().is_calculating().unwrap());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        engine.step().unwrap();
        assert_eq!(rx.await.unwrap(), CommandStatus::Provider("ZERO_RESULTS".into()));
        assert!(!engine.state().is_calculating().unwrap());
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let mut engine = engine();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            let _ = tx.send(true);
        });

        engine.run(rx).await.unwrap();
        assert!(engine.current_tick() > 0);
    }

    #[tokio::test]
    async fn test_stop_runs_stop_hooks_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut engine = engine();
        engine.add_subsystem(Box::new(Lifecycle {
            stops: Arc::clone(&stops),
        }));

        // Never started: nothing to stop
        engine.stop().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        engine.step().unwrap();
        engine.stop().unwrap();
        engine.stop().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        engine.run(rx).await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }
}
