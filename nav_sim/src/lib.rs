//! Navigation Deterministic Simulation Harness
//!
//! This crate drives the real navigation engine through scripted trips
//! without a vehicle, a network or a wall clock.
//!
//! # Core Principle: Everything Is Virtual
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advances one tick at a time under the runner
//! - **Routing**: Scripted corridors with injectable failures and latency
//! - **Randomness**: GPS noise derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock + Seeded Streams)          │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼──────────┐        ┌────▼─────────────┐              │
//! │  │   NavEngine   │◄──────►│ ScriptedProvider │              │
//! │  │ (Navigator)   │ spawn  │  (fault inject)  │              │
//! │  └───────────────┘        └──────────────────┘              │
//! │       ▲                                                     │
//! │  ┌────┴──────────────┐                                      │
//! │  │ SimulatedGps      │◄── DriveOracle (ground truth)        │
//! │  └───────────────────┘                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use nav_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Detour).await;
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod gps;
mod oracle;
mod provider;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use gps::SimulatedGps;
pub use oracle::DriveOracle;
pub use provider::{Corridor, ScriptedProvider};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
