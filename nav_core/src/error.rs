//! Error taxonomy for the navigation core.
//!
//! Geometry and state-wiring errors indicate build-time defects and terminate
//! the offending activation. Provider failures never show up here: they are
//! converted to status strings at the Navigator boundary.

use crate::state::StateKey;
use thiserror::Error;

/// Malformed geometry or route construction input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing or malformed latitude: {0}")]
    Latitude(f64),

    #[error("Missing or malformed longitude: {0}")]
    Longitude(f64),

    #[error("Malformed elevation: {0}")]
    Elevation(f64),

    #[error("Step was constructed without reference to its route index")]
    MissingStepIndex,

    #[error("Step {0} has no points")]
    EmptyStep(usize),

    #[error("Route has no steps")]
    EmptyRoute,

    #[error("Step at position {position} carries index {index}")]
    StepIndexMismatch { position: usize, index: usize },

    #[error("Point at position {position} of step {step} carries index {index}")]
    PointIndexMismatch {
        step: usize,
        position: usize,
        index: usize,
    },

    #[error("Malformed encoded polyline: {0}")]
    Polyline(String),
}

/// Misuse of the state store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Tried to access un-initialized state {0}")]
    Unknown(StateKey),

    #[error("State {0} is already registered")]
    AlreadyRegistered(StateKey),

    #[error("Value kind does not match state {key}")]
    TypeMismatch { key: StateKey },

    #[error("State {0} is unset while a route is active")]
    Unset(StateKey),

    #[error("State {key} holds index {index}, out of range for the active route")]
    OutOfRange { key: StateKey, index: usize },
}

/// Umbrella error for engine operations.
#[derive(Debug, Error)]
pub enum NavError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Navigation engine has stopped")]
    EngineStopped,

    #[error("Failed to load config: {0}")]
    Config(String),
}
