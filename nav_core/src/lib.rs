//! Nav Core - route tracking engine for vehicle navigation
//!
//! This library tracks a moving vehicle along a planned driving route:
//! 1. **Geometry**: great-circle, point-to-segment and polyline distances
//! 2. **Progress**: point, step and route level advancement with look-ahead
//! 3. **Deviation**: route-entry latch, grace period and recalculation
//!
//! Every piece of shared state lives in the [`StateStore`], which publishes
//! each change to subscribers synchronously.

pub mod engine;
pub mod error;
pub mod geo;
pub mod navigator;
pub mod polyline;
pub mod route;
pub mod scheduler;
pub mod state;

// Re-export key types for convenience
pub use engine::{EngineConfig, NavEngine};
pub use error::{NavError, StateError, ValidationError};
pub use geo::Position;
pub use navigator::{CommandStatus, NavPhase, NavRequest, Navigator, NavigatorConfig, NavigatorHandle};
pub use route::{NavPoint, Route, RouteId, Step, StepBuilder};
pub use scheduler::{Cadence, Subsystem, TickReport, TickScheduler};
pub use state::{StateChange, StateKey, StateStore, StateValue};
