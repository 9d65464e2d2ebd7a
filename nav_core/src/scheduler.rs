//! Tick Scheduler - fixed-rate cooperative activation.
//!
//! One global tick counter drives every subsystem. Each tick the scheduler
//! calls `poll` on every subsystem, then `activate` on those whose cadence
//! fires, in registration order. All work for a tick finishes before the
//! next tick starts; ticks may be late but are never skipped or reordered.

use crate::error::NavError;
use crate::state::StateStore;
use nav_env::NavContext;
use std::num::NonZeroU64;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, trace};

/// Default wall-clock period of one tick.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(1);

/// How often a subsystem activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Never activated by the tick loop
    Tickless,

    /// Activated every N ticks
    Every(NonZeroU64),
}

impl Cadence {
    /// Cadence of `ticks`; zero means tickless.
    pub fn every(ticks: u64) -> Self {
        NonZeroU64::new(ticks).map_or(Cadence::Tickless, Cadence::Every)
    }

    /// Whether a subsystem with this cadence activates on `tick`.
    ///
    /// Tick 0 always fires (warm start); after that the rule is
    /// `(tick + 1) % N == 0`, so cadence 10 fires on 0, 9, 19, 29, ...
    pub fn fires_on(&self, tick: u64) -> bool {
        match self {
            Cadence::Tickless => false,
            Cadence::Every(n) => tick == 0 || (tick + 1) % n.get() == 0,
        }
    }

    /// Activations per wall-clock second at the given tick period.
    pub fn ticks_per_second(&self, tick_period: Duration) -> f64 {
        match self {
            Cadence::Tickless => 0.0,
            Cadence::Every(n) => 1.0 / (n.get() as f64 * tick_period.as_secs_f64()),
        }
    }

    /// Number of this cadence's activations that fit in `duration`.
    pub fn activations_in(&self, duration: Duration, tick_period: Duration) -> u64 {
        match self {
            Cadence::Tickless => 0,
            Cadence::Every(n) => {
                let per_activation = n.get() as u128 * tick_period.as_nanos();
                if per_activation == 0 {
                    return 0;
                }
                (duration.as_nanos() / per_activation) as u64
            }
        }
    }

    /// Wall-clock seconds covered by `activations` of this cadence.
    pub fn activations_to_seconds(&self, activations: u64, tick_period: Duration) -> f64 {
        match self {
            Cadence::Tickless => 0.0,
            Cadence::Every(_) => activations as f64 / self.ticks_per_second(tick_period),
        }
    }
}

/// A unit of work driven by the scheduler.
///
/// Subsystems get the state store by reference on every call; they never
/// hold on to it.
pub trait Subsystem: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn cadence(&self) -> Cadence;

    fn init(&mut self, _state: &mut StateStore) -> Result<(), NavError> {
        Ok(())
    }

    fn start(&mut self, _state: &mut StateStore) -> Result<(), NavError> {
        Ok(())
    }

    /// Runs every tick before activations (command intake, completions).
    fn poll(&mut self, _state: &mut StateStore) -> Result<(), NavError> {
        Ok(())
    }

    /// Runs on ticks where [`Subsystem::cadence`] fires.
    fn activate(&mut self, tick: u64, state: &mut StateStore) -> Result<(), NavError>;

    fn stop(&mut self, _state: &mut StateStore) -> Result<(), NavError> {
        Ok(())
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub activated: Vec<&'static str>,
    /// Activations or polls that ended in an error
    pub failures: usize,
}

/// Owns the tick counter, the state store and every subsystem.
pub struct TickScheduler {
    period: Duration,
    tick: u64,
    state: StateStore,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl TickScheduler {
    pub fn new(period: Duration, state: StateStore) -> Self {
        Self {
            period,
            tick: 0,
            state,
            subsystems: Vec::new(),
        }
    }

    /// Appends a subsystem; activation order is registration order.
    pub fn register(&mut self, subsystem: Box<dyn Subsystem>) {
        self.subsystems.push(subsystem);
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Index of the next tick to run.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateStore {
        &mut self.state
    }

    pub fn init_all(&mut self) -> Result<(), NavError> {
        for subsystem in self.subsystems.iter_mut() {
            info!(subsystem = subsystem.name(), "Initializing");
            subsystem.init(&mut self.state)?;
        }
        Ok(())
    }

    pub fn start_all(&mut self) -> Result<(), NavError> {
        for subsystem in self.subsystems.iter_mut() {
            info!(subsystem = subsystem.name(), "Starting");
            subsystem.start(&mut self.state)?;
        }
        Ok(())
    }

    pub fn stop_all(&mut self) -> Result<(), NavError> {
        for subsystem in self.subsystems.iter_mut() {
            subsystem.stop(&mut self.state)?;
        }
        info!("Stopped after {} ticks", self.tick);
        Ok(())
    }

    /// Runs one tick.
    ///
    /// An error terminates only the offending poll or activation; it is
    /// logged and the remaining subsystems still run.
    pub fn step(&mut self) -> TickReport {
        let tick = self.tick;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        for subsystem in self.subsystems.iter_mut() {
            if let Err(e) = subsystem.poll(&mut self.state) {
                error!(subsystem = subsystem.name(), tick, "Poll failed: {}", e);
                report.failures += 1;
            }

            if !subsystem.cadence().fires_on(tick) {
                continue;
            }

            let started = Instant::now();
            match subsystem.activate(tick, &mut self.state) {
                Ok(()) => report.activated.push(subsystem.name()),
                Err(e) => {
                    error!(subsystem = subsystem.name(), tick, "Activation failed: {}", e);
                    report.failures += 1;
                }
            }
            trace!(
                subsystem = subsystem.name(),
                tick,
                "Activation took {:.2}ms",
                started.elapsed().as_secs_f64() * 1000.0
            );
        }

        self.tick += 1;
        report
    }

    /// Ticks at the fixed period until `shutdown` turns true.
    pub async fn run<C: NavContext>(&mut self, ctx: &C, mut shutdown: watch::Receiver<bool>) {
        info!("Tick loop running every {:?}", self.period);
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.step();

            tokio::select! {
                _ = ctx.sleep(self.period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
