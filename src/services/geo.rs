//! Geographic estimates
//!
//! Straight-line mathematics plus the road-distance heuristics used where a
//! paid matrix lookup would be wasteful: the mock provider and the per-fix
//! drift projection in the ingest worker.

use crate::types::Coordinates;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Road distance coefficient (straight line to road)
const ROAD_COEFFICIENT: f64 = 1.3;

/// Average speed in km/h for travel time estimation
const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Calculate Haversine distance between two points in kilometers.
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Estimate road distance in kilometers from the straight-line distance.
pub fn road_distance_km(from: &Coordinates, to: &Coordinates) -> f64 {
    haversine_distance(from, to) * ROAD_COEFFICIENT
}

/// Estimate road travel time in minutes.
pub fn travel_time_minutes(from: &Coordinates, to: &Coordinates) -> f64 {
    (road_distance_km(from, to) / AVERAGE_SPEED_KMH) * 60.0
}

/// Estimate the remaining route time in minutes from `from` through the
/// given `(coordinate, service_minutes)` legs in order.
pub fn remaining_route_minutes(from: &Coordinates, legs: &[(Coordinates, u32)]) -> f64 {
    let mut total = 0.0;
    let mut prev = *from;
    for (coord, service_minutes) in legs {
        total += travel_time_minutes(&prev, coord);
        total += f64::from(*service_minutes);
        prev = *coord;
    }
    total
}
