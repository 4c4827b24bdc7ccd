//! Pure fare and time estimates. Distances come from an external routing
//! collaborator; nothing here geocodes.

use shared::domain::RideType;

use crate::error::RideError;

pub const BASE_FARE: f64 = 2.50;
pub const PER_MILE_RATE: f64 = 1.50;

const KM_PER_MILE: f64 = 1.609_344;
const CITY_SPEED_KMH: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FareQuote {
    pub ride_type: RideType,
    pub distance_miles: f64,
    pub base_fare: f64,
    pub per_mile_rate: f64,
    pub multiplier: f64,
    pub total: f64,
}

/// `fare = (BASE_FARE + distance_miles * PER_MILE_RATE) * multiplier`, to the cent.
pub fn estimate_fare(ride_type: RideType, distance_miles: f64) -> Result<f64, RideError> {
    quote(ride_type, distance_miles).map(|quote| quote.total)
}

pub fn quote(ride_type: RideType, distance_miles: f64) -> Result<FareQuote, RideError> {
    validate_distance(distance_miles)?;
    let multiplier = ride_type.multiplier();
    let total = round_cents((BASE_FARE + distance_miles * PER_MILE_RATE) * multiplier);
    Ok(FareQuote {
        ride_type,
        distance_miles,
        base_fare: BASE_FARE,
        per_mile_rate: PER_MILE_RATE,
        multiplier,
        total,
    })
}

/// Door-to-door estimate: two minutes per kilometre plus five.
pub fn estimate_trip_minutes(distance_miles: f64) -> Result<u32, RideError> {
    validate_distance(distance_miles)?;
    let km = distance_miles * KM_PER_MILE;
    Ok((km * 2.0).floor() as u32 + 5)
}

/// Driver approach time at city speed, never below three minutes.
pub fn estimate_driver_eta_minutes(driver_distance_miles: f64) -> Result<u32, RideError> {
    validate_distance(driver_distance_miles)?;
    let km = driver_distance_miles * KM_PER_MILE;
    let minutes = (km / CITY_SPEED_KMH * 60.0).floor() as u32 + 2;
    Ok(minutes.max(3))
}

pub fn format_minutes(minutes: u32) -> String {
    format!("{minutes} min")
}

fn validate_distance(distance_miles: f64) -> Result<(), RideError> {
    if !distance_miles.is_finite() || distance_miles < 0.0 {
        return Err(RideError::validation(
            "distance",
            format!("distance must be a non-negative number of miles, got {distance_miles}"),
        ));
    }
    Ok(())
}

// Half-cents round up; float noise below a micro-cent is dropped first.
fn round_cents(amount: f64) -> f64 {
    let cents = (amount * 100.0 * 1e6).round() / 1e6;
    cents.round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn economy_and_premium_fares_for_two_and_a_half_miles() {
        assert_eq!(estimate_fare(RideType::Economy, 2.5).expect("fare"), 6.25);
        assert_eq!(estimate_fare(RideType::Premium, 2.5).expect("fare"), 11.25);
    }

    #[test]
    fn comfort_fare_is_rounded_to_cents() {
        // (2.50 + 3.3 * 1.50) * 1.3 = 9.685
        assert_eq!(estimate_fare(RideType::Comfort, 3.3).expect("fare"), 9.69);
        // (2.50 + 0.7 * 1.50) * 1.3 = 4.615
        assert_eq!(estimate_fare(RideType::Comfort, 0.7).expect("fare"), 4.62);
        assert_eq!(estimate_fare(RideType::Economy, 1.01).expect("fare"), 4.02);
    }

    #[test]
    fn zero_distance_costs_base_times_multiplier() {
        let quote = quote(RideType::Premium, 0.0).expect("quote");
        assert_eq!(quote.total, 4.5);
        assert_eq!(quote.multiplier, 1.8);
    }

    #[test]
    fn rejects_negative_and_non_finite_distances() {
        for distance in [-1.0, f64::NAN, f64::INFINITY] {
            let err = estimate_fare(RideType::Economy, distance).expect_err("invalid");
            assert!(matches!(err, RideError::Validation { field: "distance", .. }));
        }
    }

    #[test]
    fn time_estimates_follow_city_heuristics() {
        assert_eq!(estimate_trip_minutes(0.0).expect("minutes"), 5);
        // 5 miles = 8.04672 km -> floor(16.09) + 5
        assert_eq!(estimate_trip_minutes(5.0).expect("minutes"), 21);
        assert_eq!(estimate_driver_eta_minutes(0.1).expect("eta"), 3);
        // 3 miles = 4.828 km -> floor(9.65) + 2
        assert_eq!(estimate_driver_eta_minutes(3.0).expect("eta"), 11);
    }
}
