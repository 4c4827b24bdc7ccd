//! Local stand-in for the real-time channel: produces the same `ride_update`
//! shapes a live backend would, on randomized delays.

use std::time::Duration;

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use shared::{
    domain::{DriverId, RideId, RideState, MAX_DRIVER_RATING, MIN_DRIVER_RATING},
    protocol::{DriverPayload, RideUpdate},
};

use crate::fare::{estimate_driver_eta_minutes, format_minutes};

const ROSTER: &[(&str, &str)] = &[
    ("Maria Lopez", "Toyota Camry - Silver"),
    ("James Carter", "Honda Accord - Black"),
    ("Aisha Khan", "Tesla Model 3 - White"),
    ("Daniel Kim", "Hyundai Sonata - Blue"),
    ("Sofia Rossi", "Ford Fusion - Gray"),
    ("Kwame Mensah", "Chevrolet Malibu - Red"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const fn from_secs(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationSettings {
    pub match_delay: DelayRange,
    pub arrival_delay: DelayRange,
    pub completion_delay: DelayRange,
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            match_delay: DelayRange::from_secs(3, 8),
            arrival_delay: DelayRange::from_secs(5, 10),
            completion_delay: DelayRange::from_secs(10, 20),
            seed: None,
        }
    }
}

pub struct DriverSimulator {
    rng: StdRng,
    settings: SimulationSettings,
    issued: u64,
}

impl DriverSimulator {
    pub fn new(settings: SimulationSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            settings,
            issued: 0,
        }
    }

    pub fn match_delay(&mut self) -> Duration {
        let range = self.settings.match_delay;
        self.draw(range)
    }

    pub fn arrival_delay(&mut self) -> Duration {
        let range = self.settings.arrival_delay;
        self.draw(range)
    }

    pub fn completion_delay(&mut self) -> Duration {
        let range = self.settings.completion_delay;
        self.draw(range)
    }

    pub fn next_driver(&mut self) -> DriverPayload {
        self.issued += 1;
        let (name, vehicle) = ROSTER
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(ROSTER[0]);
        let tenths = self
            .rng
            .gen_range((MIN_DRIVER_RATING * 10.0) as u32..=(MAX_DRIVER_RATING * 10.0) as u32);
        let approach_miles = self.rng.gen_range(0.2..3.0);
        let eta = estimate_driver_eta_minutes(approach_miles)
            .map(format_minutes)
            .unwrap_or_else(|_| format_minutes(5));
        DriverPayload {
            id: Some(DriverId::new(format!("sim-driver-{}", self.issued))),
            name: name.to_string(),
            rating: Some(tenths as f32 / 10.0),
            vehicle: Some(vehicle.to_string()),
            eta: Some(eta),
        }
    }

    /// A `ride_update` exactly as the live channel would deliver it.
    pub fn ride_update(
        &mut self,
        ride_id: &RideId,
        status: RideState,
    ) -> RideUpdate {
        let driver = (status == RideState::Matched).then(|| self.next_driver());
        let eta = driver.as_ref().and_then(|driver| driver.eta.clone());
        RideUpdate {
            ride_id: ride_id.clone(),
            status,
            driver,
            eta,
            message: None,
        }
    }

    fn draw(&mut self, range: DelayRange) -> Duration {
        if range.max <= range.min {
            return range.min;
        }
        let millis = self
            .rng
            .gen_range(whole_millis(range.min)..=whole_millis(range.max));
        Duration::from_millis(millis)
    }
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> DriverSimulator {
        DriverSimulator::new(SimulationSettings {
            seed: Some(7),
            ..SimulationSettings::default()
        })
    }

    #[test]
    fn drivers_come_from_roster_with_valid_ratings() {
        let mut simulator = seeded();
        for _ in 0..50 {
            let driver = simulator.next_driver();
            assert!(ROSTER.iter().any(|(name, _)| *name == driver.name));
            let rating = driver.rating.expect("rating");
            assert!((MIN_DRIVER_RATING..=MAX_DRIVER_RATING).contains(&rating), "{rating}");
            assert!(driver.eta.expect("eta").ends_with(" min"));
        }
    }

    #[test]
    fn delays_stay_within_configured_ranges() {
        let mut simulator = seeded();
        for _ in 0..50 {
            let delay = simulator.match_delay();
            assert!(delay >= Duration::from_secs(3) && delay <= Duration::from_secs(8));
        }
    }

    #[test]
    fn oversized_delays_saturate_instead_of_wrapping() {
        let mut simulator = DriverSimulator::new(SimulationSettings {
            match_delay: DelayRange {
                min: Duration::from_millis(u64::MAX - 1),
                max: Duration::MAX,
            },
            seed: Some(1),
            ..SimulationSettings::default()
        });
        assert!(simulator.match_delay() >= Duration::from_millis(u64::MAX - 1));
    }

    #[test]
    fn same_seed_replays_same_drivers() {
        let mut first = seeded();
        let mut second = seeded();
        assert_eq!(first.next_driver(), second.next_driver());
        assert_eq!(first.completion_delay(), second.completion_delay());
    }

    #[test]
    fn only_matched_updates_carry_a_driver() {
        let mut simulator = seeded();
        let ride_id = RideId::new("r-1");
        assert!(simulator
            .ride_update(&ride_id, RideState::Matched)
            .driver
            .is_some());
        assert!(simulator
            .ride_update(&ride_id, RideState::EnRoute)
            .driver
            .is_none());
    }
}
