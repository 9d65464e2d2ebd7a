//! Line-delimited JSON input: location fixes and navigation commands.

use nav_core::geo::Position;
use nav_core::scheduler::{Cadence, Subsystem};
use nav_core::state::StateStore;
use nav_core::{NavError, NavRequest};
use nav_env::LatLng;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Location cadence in ticks (4 Hz at 1 ms ticks).
pub const LOCATION_CADENCE: u64 = 250;

/// One input line.
///
/// ```text
/// {"lat": 41.1, "lng": -78.7}
/// {"command": "requestRoutePreview", "destination": "Harbor Road"}
/// {"command": "confirmRoutePreview"}
/// {"control": "requestStateRefresh"}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FeedLine {
    Command(NavRequest),
    Control(Control),
    Fix(LatLng),
}

/// Requests aimed at the agent rather than the Navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "control", rename_all = "camelCase")]
pub enum Control {
    /// Re-emit every state slot
    RequestStateRefresh,
    Shutdown,
}

impl FeedLine {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Latest fix received, shared between the reader task and the subsystem.
pub type LatestFix = Arc<Mutex<Option<Position>>>;

/// Publishes the most recent fix into `carPosition`.
pub struct PositionFeed {
    latest: LatestFix,
    published: Option<Position>,
}

impl PositionFeed {
    pub fn new(latest: LatestFix) -> Self {
        Self {
            latest,
            published: None,
        }
    }
}

impl Subsystem for PositionFeed {
    fn name(&self) -> &'static str {
        "Location"
    }

    fn cadence(&self) -> Cadence {
        Cadence::every(LOCATION_CADENCE)
    }

    fn activate(&mut self, tick: u64, state: &mut StateStore) -> Result<(), NavError> {
        let fix = *self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(fix) = fix else {
            return Ok(());
        };
        if self.published == Some(fix) {
            return Ok(());
        }

        trace!(subsystem = "Location", tick, "Fix {}", fix);
        state.set_car_position(fix)?;
        self.published = Some(fix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nav_core::scheduler::TickScheduler;
    use std::time::Duration;

    #[test]
    fn test_parse_lines() {
        assert_eq!(
            FeedLine::parse(r#"{"lat": 41.1, "lng": -78.7}"#).unwrap(),
            FeedLine::Fix(LatLng::new(41.1, -78.7))
        );
        assert_eq!(
            FeedLine::parse(r#"{"command": "requestRoutePreview", "destination": "Harbor Road"}"#).unwrap(),
            FeedLine::Command(NavRequest::RequestRoutePreview {
                destination: "Harbor Road".into()
            })
        );
        assert_eq!(
            FeedLine::parse(r#"{"command": "endNavigation"}"#).unwrap(),
            FeedLine::Command(NavRequest::EndNavigation)
        );
        assert_eq!(
            FeedLine::parse(r#"{"control": "requestStateRefresh"}"#).unwrap(),
            FeedLine::Control(Control::RequestStateRefresh)
        );
        assert!(FeedLine::parse(r#"{"command": "selfDestruct"}"#).is_err());
    }

    #[test]
    fn test_feed_publishes_new_fixes_only() {
        let latest: LatestFix = Arc::new(Mutex::new(None));
        let mut sched = TickScheduler::new(Duration::from_millis(1), StateStore::for_navigation(|| 0));
        sched.register(Box::new(PositionFeed::new(Arc::clone(&latest))));

        let changes = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&changes);
        sched.state_mut().subscribe(move |_| *counter.lock().unwrap() += 1);

        // No fix yet
        sched.step();
        assert_eq!(*changes.lock().unwrap(), 0);

        let fix = Position::new(41.1, -78.7).unwrap();
        *latest.lock().unwrap() = Some(fix);
        for _ in 1..500 {
            sched.step();
        }
        assert_eq!(sched.state().car_position().unwrap(), fix);
        // Ticks 249 and 499 both fire, the second fix is unchanged
        assert_eq!(*changes.lock().unwrap(), 1);
    }
}
