//! Simulation harness errors.

use nav_core::{NavError, StateError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Scenario setup failed: {0}")]
    Setup(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] NavError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Command {0} got no reply within {1:?} of virtual time")]
    CommandTimeout(String, std::time::Duration),
}
