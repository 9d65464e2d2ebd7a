//! State Store - keyed value store with synchronous change notification.
//!
//! Slots are declared once with a default, then replaced wholesale through
//! [`StateStore::update_state`]. Every update is fanned out to subscribers
//! in registration order before the call returns, even when the new value
//! equals the old one.

use crate::error::StateError;
use crate::geo::Position;
use crate::route::Route;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Declared state slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StateKey {
    CarPosition,
    CurrentRoute,
    CurrentStep,
    NextPoint,
    Calculating,
    PreviewRoute,
}

impl StateKey {
    pub fn name(&self) -> &'static str {
        match self {
            StateKey::CarPosition => "carPosition",
            StateKey::CurrentRoute => "currentRoute",
            StateKey::CurrentStep => "currentStep",
            StateKey::NextPoint => "nextPoint",
            StateKey::Calculating => "calculating",
            StateKey::PreviewRoute => "previewRoute",
        }
    }

    fn accepts(&self, value: &StateValue) -> bool {
        matches!(
            (self, value),
            (StateKey::CarPosition, StateValue::Position(_))
                | (StateKey::CurrentRoute | StateKey::PreviewRoute, StateValue::Route(_))
                | (StateKey::CurrentStep | StateKey::NextPoint, StateValue::Index(_))
                | (StateKey::Calculating, StateValue::Flag(_))
        )
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value held by a slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Position(Position),
    Route(Option<Arc<Route>>),
    Index(Option<usize>),
    Flag(bool),
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub key: StateKey,
    pub value: StateValue,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

pub type Subscriber = Box<dyn FnMut(&StateChange) + Send>;

type Clock = Box<dyn Fn() -> u64 + Send>;

/// The sole shared mutable resource of the engine.
pub struct StateStore {
    slots: HashMap<StateKey, StateValue>,
    /// Declaration order, used for replay
    order: Vec<StateKey>,
    /// Slots updated at least once since declaration
    written: HashSet<StateKey>,
    subscribers: Vec<Subscriber>,
    clock: Clock,
}

impl StateStore {
    /// Creates an empty store reading timestamps from `clock`.
    pub fn new(clock: impl Fn() -> u64 + Send + 'static) -> Self {
        Self {
            slots: HashMap::new(),
            order: Vec::new(),
            written: HashSet::new(),
            subscribers: Vec::new(),
            clock: Box::new(clock),
        }
    }

    /// Creates a store with every navigation slot declared.
    pub fn for_navigation(clock: impl Fn() -> u64 + Send + 'static) -> Self {
        let mut store = Self::new(clock);
        let defaults = [
            (StateKey::CarPosition, StateValue::Position(Position::ORIGIN)),
            (StateKey::PreviewRoute, StateValue::Route(None)),
            (StateKey::CurrentRoute, StateValue::Route(None)),
            (StateKey::CurrentStep, StateValue::Index(None)),
            (StateKey::NextPoint, StateValue::Index(None)),
            (StateKey::Calculating, StateValue::Flag(false)),
        ];
        for (key, value) in defaults {
            store.slots.insert(key, value);
            store.order.push(key);
        }
        store
    }

    /// Declares a slot. Each key may be declared once.
    pub fn register_state(&mut self, key: StateKey, default: StateValue) -> Result<(), StateError> {
        if self.slots.contains_key(&key) {
            return Err(StateError::AlreadyRegistered(key));
        }
        if !key.accepts(&default) {
            return Err(StateError::TypeMismatch { key });
        }
        self.slots.insert(key, default);
        self.order.push(key);
        Ok(())
    }

    pub fn is_registered(&self, key: StateKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Replaces a slot and notifies subscribers, stamped with the store clock.
    pub fn update_state(&mut self, key: StateKey, value: StateValue) -> Result<(), StateError> {
        let now = (self.clock)();
        self.update_state_at(key, value, now)
    }

    /// Replaces a slot and notifies subscribers with an explicit timestamp.
    pub fn update_state_at(
        &mut self,
        key: StateKey,
        value: StateValue,
        timestamp: u64,
    ) -> Result<(), StateError> {
        let slot = self.slots.get_mut(&key).ok_or(StateError::Unknown(key))?;
        if !key.accepts(&value) {
            return Err(StateError::TypeMismatch { key });
        }
        *slot = value.clone();
        self.written.insert(key);

        let change = StateChange {
            key,
            value,
            timestamp,
        };
        for subscriber in self.subscribers.iter_mut() {
            subscriber(&change);
        }
        Ok(())
    }

    /// Whether `key` still holds its declared default.
    pub fn is_default(&self, key: StateKey) -> Result<bool, StateError> {
        if !self.slots.contains_key(&key) {
            return Err(StateError::Unknown(key));
        }
        Ok(!self.written.contains(&key))
    }

    pub fn get_state(&self, key: StateKey) -> Result<&StateValue, StateError> {
        self.slots.get(&key).ok_or(StateError::Unknown(key))
    }

    /// Adds a subscriber; it sees every later update.
    pub fn subscribe(&mut self, subscriber: impl FnMut(&StateChange) + Send + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// Subscribes through an unbounded channel.
    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(move |change| {
            let _ = tx.send(change.clone());
        });
        rx
    }

    /// Re-emits every slot in declaration order (full refresh for a client).
    pub fn replay(&mut self) {
        let now = (self.clock)();
        for key in &self.order {
            let change = StateChange {
                key: *key,
                value: self.slots[key].clone(),
                timestamp: now,
            };
            for subscriber in self.subscribers.iter_mut() {
                subscriber(&change);
            }
        }
    }

    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    pub fn car_position(&self) -> Result<Position, StateError> {
        match self.get_state(StateKey::CarPosition)? {
            StateValue::Position(p) => Ok(*p),
            _ => Err(StateError::TypeMismatch { key: StateKey::CarPosition }),
        }
    }

    /// Whether a real fix has been published into `carPosition`.
    pub fn has_car_fix(&self) -> Result<bool, StateError> {
        Ok(!self.is_default(StateKey::CarPosition)?)
    }

    pub fn current_route(&self) -> Result<Option<Arc<Route>>, StateError> {
        self.route(StateKey::CurrentRoute)
    }

    pub fn preview_route(&self) -> Result<Option<Arc<Route>>, StateError> {
        self.route(StateKey::PreviewRoute)
    }

    pub fn current_step(&self) -> Result<Option<usize>, StateError> {
        self.index(StateKey::CurrentStep)
    }

    pub fn next_point(&self) -> Result<Option<usize>, StateError> {
        self.index(StateKey::NextPoint)
    }

    pub fn is_calculating(&self) -> Result<bool, StateError> {
        match self.get_state(StateKey::Calculating)? {
            StateValue::Flag(f) => Ok(*f),
            _ => Err(StateError::TypeMismatch { key: StateKey::Calculating }),
        }
    }

    fn route(&self, key: StateKey) -> Result<Option<Arc<Route>>, StateError> {
        match self.get_state(key)? {
            StateValue::Route(r) => Ok(r.clone()),
            _ => Err(StateError::TypeMismatch { key }),
        }
    }

    fn index(&self, key: StateKey) -> Result<Option<usize>, StateError> {
        match self.get_state(key)? {
            StateValue::Index(i) => Ok(*i),
            _ => Err(StateError::TypeMismatch { key }),
        }
    }

    pub fn set_car_position(&mut self, position: Position) -> Result<(), StateError> {
        self.update_state(StateKey::CarPosition, StateValue::Position(position))
    }

    pub fn set_current_route(&mut self, route: Option<Arc<Route>>) -> Result<(), StateError> {
        self.update_state(StateKey::CurrentRoute, StateValue::Route(route))
    }

    pub fn set_preview_route(&mut self, route: Option<Arc<Route>>) -> Result<(), StateError> {
        self.update_state(StateKey::PreviewRoute, StateValue::Route(route))
    }

    pub fn set_current_step(&mut self, step: Option<usize>) -> Result<(), StateError> {
        self.update_state(StateKey::CurrentStep, StateValue::Index(step))
    }

    pub fn set_next_point(&mut self, point: Option<usize>) -> Result<(), StateError> {
        self.update_state(StateKey::NextPoint, StateValue::Index(point))
    }

    pub fn set_calculating(&mut self, calculating: bool) -> Result<(), StateError> {
        self.update_state(StateKey::Calculating, StateValue::Flag(calculating))
    }

    /// Installs a route to track with progress reset to its start.
    ///
    /// Indices are written before the route so no subscriber ever observes
    /// stale indices against the new route.
    pub fn begin_route(&mut self, route: Arc<Route>) -> Result<(), StateError> {
        self.set_current_step(Some(0))?;
        self.set_next_point(Some(0))?;
        self.set_current_route(Some(route))
    }

    /// Stops tracking: the route and both indices are unset together.
    pub fn end_route(&mut self) -> Result<(), StateError> {
        self.set_current_route(None)?;
        self.set_current_step(None)?;
        self.set_next_point(None)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("slots", &self.slots)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
