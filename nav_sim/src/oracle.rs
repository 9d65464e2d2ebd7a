//! Ground truth oracle for simulation.
//!
//! The DriveOracle maintains the true state of the simulated vehicle:
//! - True position along a scripted trajectory
//! - Kinematics (constant speed along straight legs)
//! - GPS reading generation (with seeded Gaussian noise)

use nav_core::geo::{Position, DEGREES_TO_RADIANS, EARTH_RADIUS_METERS};
use nav_core::ValidationError;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Meters per degree of latitude on the reference sphere.
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * DEGREES_TO_RADIANS;

/// The oracle - drives the vehicle and produces noisy GPS fixes.
pub struct DriveOracle {
    /// Waypoints the vehicle drives through, in order
    trajectory: Vec<Position>,

    /// Index of the waypoint the vehicle last passed
    leg: usize,

    /// Meters travelled along the current leg
    leg_progress: f64,

    /// True position
    position: Position,

    /// Speed in m/s
    speed: f64,

    /// Odometer (meters)
    travelled: f64,

    /// Current simulation time (seconds)
    current_time: f64,

    rng: ChaCha8Rng,

    /// GPS noise per axis, in meters (None when noise-free)
    noise: Option<Normal<f64>>,
}

impl DriveOracle {
    /// Creates an oracle at the first waypoint of `trajectory`.
    pub fn new(trajectory: Vec<Position>, speed: f64, rng: ChaCha8Rng) -> Result<Self, ValidationError> {
        let position = *trajectory.first().ok_or(ValidationError::EmptyRoute)?;
        Ok(Self {
            trajectory,
            leg: 0,
            leg_progress: 0.0,
            position,
            speed,
            travelled: 0.0,
            current_time: 0.0,
            rng,
            noise: None,
        })
    }

    /// Sets the GPS noise standard deviation in meters.
    pub fn with_gps_noise(mut self, std_dev: f64) -> Self {
        self.noise = Normal::new(0.0, std_dev).ok().filter(|_| std_dev > 0.0);
        self
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.max(0.0);
    }

    /// Advances the vehicle by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        let mut budget = self.speed * dt;

        while budget > 0.0 && self.leg + 1 < self.trajectory.len() {
            let from = self.trajectory[self.leg];
            let to = self.trajectory[self.leg + 1];
            let length = from.distance_to(&to);
            let left = length - self.leg_progress;

            if budget < left {
                self.leg_progress += budget;
                self.travelled += budget;
                budget = 0.0;
            } else {
                self.leg += 1;
                self.leg_progress = 0.0;
                self.travelled += left;
                budget -= left;
            }
        }

        self.position = self.interpolated();
    }

    fn interpolated(&self) -> Position {
        let Some(&to) = self.trajectory.get(self.leg + 1) else {
            return self.trajectory[self.trajectory.len() - 1];
        };
        let from = self.trajectory[self.leg];
        let length = from.distance_to(&to);
        if length == 0.0 {
            return to;
        }

        let t = self.leg_progress / length;
        let lat = from.latitude() + (to.latitude() - from.latitude()) * t;
        let lng = from.longitude() + (to.longitude() - from.longitude()) * t;
        Position::new(lat, lng).unwrap_or(from)
    }

    /// True position of the vehicle.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Whether the vehicle reached the last waypoint.
    pub fn finished(&self) -> bool {
        self.leg + 1 >= self.trajectory.len()
    }

    pub fn travelled(&self) -> f64 {
        self.travelled
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// Index of the waypoint the vehicle last passed.
    pub fn waypoint(&self) -> usize {
        self.leg
    }

    /// Generates a GPS fix from the true position.
    pub fn gps_reading(&mut self) -> Position {
        let Some(noise) = self.noise else {
            return self.position;
        };

        let north = noise.sample(&mut self.rng);
        let east = noise.sample(&mut self.rng);
        let lat = self.position.latitude() + north / METERS_PER_DEGREE;
        let lng_scale = METERS_PER_DEGREE * (self.position.latitude() * DEGREES_TO_RADIANS).cos();
        let lng = self.position.longitude() + east / lng_scale.max(1.0);
        Position::new(lat, lng).unwrap_or(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng).unwrap()
    }

    fn oracle(noise: f64) -> DriveOracle {
        let trajectory = vec![pos(0.0, 0.0), pos(0.0, 0.001), pos(0.001, 0.001)];
        DriveOracle::new(trajectory, 10.0, ChaCha8Rng::seed_from_u64(42))
            .unwrap()
            .with_gps_noise(noise)
    }

    #[test]
    fn test_oracle_requires_waypoints() {
        let result = DriveOracle::new(Vec::new(), 10.0, ChaCha8Rng::seed_from_u64(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_oracle_kinematics() {
        let mut oracle = oracle(0.0);
        let leg = pos(0.0, 0.0).distance_to(&pos(0.0, 0.001));

        oracle.step(5.0);
        assert_relative_eq!(oracle.travelled(), 50.0, epsilon = 1e-9);
        assert_relative_eq!(oracle.position().distance_to(&pos(0.0, 0.0)), 50.0, epsilon = 0.01);
        assert_eq!(oracle.waypoint(), 0);

        // Carries the leftover distance around the corner
        oracle.step(10.0);
        assert_eq!(oracle.waypoint(), 1);
        assert_relative_eq!(oracle.travelled(), 150.0, epsilon = 1e-9);
        assert_relative_eq!(
            oracle.position().distance_to(&pos(0.0, 0.001)),
            150.0 - leg,
            epsilon = 0.01
        );

        oracle.step(100.0);
        assert!(oracle.finished());
        assert_eq!(oracle.position(), pos(0.001, 0.001));
        assert_relative_eq!(oracle.time(), 115.0);
    }

    #[test]
    fn test_noise_free_gps_is_exact() {
        let mut oracle = oracle(0.0);
        oracle.step(1.0);
        assert_eq!(oracle.gps_reading(), oracle.position());
    }

    #[test]
    fn test_deterministic_noise() {
        let mut a = oracle(5.0);
        let mut b = oracle(5.0);

        let ra: Vec<Position> = (0..10).map(|_| a.gps_reading()).collect();
        let rb: Vec<Position> = (0..10).map(|_| b.gps_reading()).collect();
        assert_eq!(ra, rb);

        // 5 m noise stays well inside 40 m
        for r in &ra {
            assert!(r.distance_to(&a.position()) < 40.0);
        }
        assert!(ra.iter().any(|r| *r != a.position()));
    }

    proptest! {
        #[test]
        fn prop_odometer_bounded_by_trajectory(steps in proptest::collection::vec(0.0f64..30.0, 1..40)) {
            let mut oracle = oracle(0.0);
            let total = pos(0.0, 0.0).distance_to(&pos(0.0, 0.001)) + pos(0.0, 0.001).distance_to(&pos(0.001, 0.001));
            let mut last = 0.0;
            for dt in steps {
                oracle.step(dt);
                prop_assert!(oracle.travelled() >= last);
                prop_assert!(oracle.travelled() <= total + 1e-6);
                last = oracle.travelled();
            }
        }
    }
}
