//! Simulated location service.

use crate::oracle::DriveOracle;
use nav_core::scheduler::{Cadence, Subsystem};
use nav_core::state::StateStore;
use nav_core::NavError;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Default location cadence in ticks (4 Hz at 1 ms ticks).
pub const LOCATION_CADENCE: u64 = 250;

/// Publishes GPS fixes from the oracle into `carPosition`.
pub struct SimulatedGps {
    oracle: Arc<Mutex<DriveOracle>>,
    cadence: u64,
}

impl SimulatedGps {
    pub fn new(oracle: Arc<Mutex<DriveOracle>>) -> Self {
        Self {
            oracle,
            cadence: LOCATION_CADENCE,
        }
    }

    pub fn with_cadence(mut self, cadence: u64) -> Self {
        self.cadence = cadence;
        self
    }
}

impl Subsystem for SimulatedGps {
    fn name(&self) -> &'static str {
        "Location"
    }

    fn cadence(&self) -> Cadence {
        Cadence::every(self.cadence)
    }

    fn activate(&mut self, tick: u64, state: &mut StateStore) -> Result<(), NavError> {
        let fix = self
            .oracle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gps_reading();
        trace!(subsystem = "Location", tick, "Fix {}", fix);
        state.set_car_position(fix)?;
        Ok(())
    }
}
