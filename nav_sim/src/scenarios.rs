//! Drive scenarios and the simulated road layout they share.

use crate::error::SimError;
use crate::provider::Corridor;
use nav_core::geo::Position;
use nav_core::ValidationError;

/// Name every scenario navigates to.
pub const DESTINATION: &str = "Harbor Road";

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// NAV-001: Follow the route end to end
    CityDrive,

    /// NAV-002: Leave the route for a bypass road
    Detour,

    /// NAV-003: Detour while the routing provider is failing
    ProviderOutage,

    /// NAV-004: Route preview command sequence
    PreviewLifecycle,

    /// NAV-005: Follow the route with a poor GPS fix
    NoisyGps,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::CityDrive,
            ScenarioId::Detour,
            ScenarioId::ProviderOutage,
            ScenarioId::PreviewLifecycle,
            ScenarioId::NoisyGps,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::CityDrive => "city_drive",
            ScenarioId::Detour => "detour",
            ScenarioId::ProviderOutage => "provider_outage",
            ScenarioId::PreviewLifecycle => "preview_lifecycle",
            ScenarioId::NoisyGps => "noisy_gps",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::CityDrive => "Drive the planned route and arrive without recalculating",
            ScenarioId::Detour => "Take a bypass road, recalculate exactly once, arrive",
            ScenarioId::ProviderOutage => "Detour with 3 failing provider requests, keep the old route until one succeeds",
            ScenarioId::PreviewLifecycle => "Clear/confirm without preview, failed and successful previews, confirm, end",
            ScenarioId::NoisyGps => "4 m GPS noise, no spurious recalculation, arrive",
        }
    }

    /// GPS noise standard deviation for the scenario (m).
    pub fn gps_noise(&self) -> f64 {
        match self {
            ScenarioId::NoisyGps => 4.0,
            _ => 1.0,
        }
    }

    /// Whether the vehicle takes the bypass.
    pub fn takes_detour(&self) -> bool {
        matches!(self, ScenarioId::Detour | ScenarioId::ProviderOutage)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "city_drive" | "citydrive" | "nav-001" => Ok(ScenarioId::CityDrive),
            "detour" | "nav-002" => Ok(ScenarioId::Detour),
            "provider_outage" | "provideroutage" | "nav-003" => Ok(ScenarioId::ProviderOutage),
            "preview_lifecycle" | "previewlifecycle" | "nav-004" => Ok(ScenarioId::PreviewLifecycle),
            "noisy_gps" | "noisygps" | "nav-005" => Ok(ScenarioId::NoisyGps),
            _ => Err(SimError::UnknownScenario(s.to_string())),
        }
    }
}

// ----------------------------------------------------------------------
// Road layout
// ----------------------------------------------------------------------

const BASE_LAT: f64 = 37.7700;
const BASE_LNG: f64 = -122.4500;

/// Corridor sampling interval (m).
const ROAD_SPACING: f64 = 10.0;

fn at(north: f64, east: f64) -> Result<Position, ValidationError> {
    Position::new(BASE_LAT + north, BASE_LNG + east)
}

/// Main road, heading east for ~1.8 km.
fn main_road() -> Result<Vec<Position>, ValidationError> {
    Ok(vec![at(0.0, 0.0)?, at(0.0, 0.02)?])
}

/// Leaves the main road, runs ~167 m north of it, and merges back.
fn bypass() -> Result<Vec<Position>, ValidationError> {
    Ok(vec![
        at(0.0, 0.004)?,
        at(0.0015, 0.0045)?,
        at(0.0015, 0.0075)?,
        at(0.0, 0.008)?,
        at(0.0, 0.02)?,
    ])
}

/// Resamples `waypoints` so consecutive points are at most `spacing` apart.
pub fn densify(waypoints: &[Position], spacing: f64) -> Vec<Position> {
    let mut out: Vec<Position> = Vec::new();
    for (a, b) in nav_core::geo::segments(waypoints) {
        let leg = a.interpolate_between(b, spacing);
        let skip = usize::from(!out.is_empty());
        out.extend(leg.into_iter().skip(skip));
    }
    if out.is_empty() {
        out.extend(waypoints.first().copied());
    }
    out
}

/// Roads known to the scripted provider.
pub fn corridors() -> Result<Vec<Corridor>, ValidationError> {
    Ok(vec![
        Corridor::new(DESTINATION, densify(&main_road()?, ROAD_SPACING)),
        Corridor::new(DESTINATION, densify(&bypass()?, ROAD_SPACING)),
    ])
}

/// Waypoints the vehicle actually drives for `scenario`.
pub fn trajectory(scenario: ScenarioId) -> Result<Vec<Position>, ValidationError> {
    if !scenario.takes_detour() {
        return main_road();
    }
    let mut path = vec![at(0.0, 0.0)?];
    path.extend(bypass()?);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
        }
        assert_eq!("NAV-002".parse::<ScenarioId>().unwrap(), ScenarioId::Detour);
        assert!(matches!(
            "split_brain".parse::<ScenarioId>(),
            Err(SimError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_densify_spacing() {
        let road = densify(&bypass().unwrap(), ROAD_SPACING);
        for (a, b) in nav_core::geo::segments(&road) {
            let gap = a.distance_to(b);
            assert!(gap <= ROAD_SPACING * 1.001 && gap > 0.0, "gap {}", gap);
        }
        assert_eq!(road[0], at(0.0, 0.004).unwrap());
        assert_eq!(road[road.len() - 1], at(0.0, 0.02).unwrap());
    }

    #[test]
    fn test_detour_leaves_main_road() {
        let main = densify(&main_road().unwrap(), ROAD_SPACING);
        let farthest = trajectory(ScenarioId::Detour)
            .unwrap()
            .iter()
            .map(|p| p.distance_to_polyline(&main))
            .fold(0.0, f64::max);
        assert!(farthest > 150.0);
    }
}
