//! Route assembly: per-stop ETAs, totals, navigation URL, score
//!
//! The caller pre-orders the stops and supplies matrices whose indices are
//! aligned to that order (index 0 = driver origin, index k = stop k-1).

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, info};

use crate::error::OptimizeError;
use crate::services::matrix::TrafficMatrices;
use crate::services::timeutil::minutes_to_time_str;
use crate::types::{Coordinates, OptimizeRouteResponse, OptimizedStop, Stop};

/// Directions URL from coordinates only. Stop identifiers never appear.
pub fn build_maps_url(driver_location: &Coordinates, ordered_stops: &[Stop]) -> String {
    let mut parts = vec![driver_location.as_param()];
    parts.extend(ordered_stops.iter().map(|s| s.location.as_param()));
    format!("https://www.google.com/maps/dir/{}", parts.join("/"))
}

/// Walk `stops` in order through `time_matrix` (seconds, index-aligned,
/// index 0 = origin) and return the schedule duration in minutes from the
/// given departure anchor, waits included.
///
/// Used for the naive input-order baseline: the window open still clamps
/// the clock (the same accumulation the optimised route gets), but late
/// arrivals never fail the walk, because the baseline is a scalar
/// reference and need not be feasible.
pub fn schedule_duration_minutes(
    time_matrix: &[Vec<u64>],
    stops: &[Stop],
    departure_minutes: i64,
) -> Result<f64, OptimizeError> {
    let mut clock = departure_minutes;
    let mut prev = 0usize;
    for (i, stop) in stops.iter().enumerate() {
        let node = i + 1;
        let (earliest, _) = parsed_window(stop)?;
        let travel = (time_matrix[prev][node] / 60) as i64;
        clock = (clock + travel).max(earliest) + i64::from(stop.service_time_minutes);
        prev = node;
    }
    Ok((clock - departure_minutes) as f64)
}

/// Assemble the final optimised route with per-stop ETAs and summary stats.
pub fn build_final_route(
    driver_id: &str,
    driver_location: &Coordinates,
    ordered_stops: &[Stop],
    matrices: &TrafficMatrices,
    departure_time: DateTime<Utc>,
) -> Result<OptimizeRouteResponse, OptimizeError> {
    let departure_minutes =
        i64::from(departure_time.hour()) * 60 + i64::from(departure_time.minute());

    let mut clock = departure_minutes;
    let mut prev = 0usize;
    let mut total_distance_m: u64 = 0;
    let mut optimized_stops = Vec::with_capacity(ordered_stops.len());

    for (seq, stop) in ordered_stops.iter().enumerate() {
        let node = seq + 1;
        let (earliest, _) = parsed_window(stop)?;

        let travel_minutes = (matrices.travel_seconds(prev, node) / 60) as i64;
        // Early arrivals wait for the window to open
        let arrival = (clock + travel_minutes).max(earliest);
        let departure = arrival + i64::from(stop.service_time_minutes);

        total_distance_m += matrices.distance_meters(prev, node);

        optimized_stops.push(OptimizedStop {
            stop_id: stop.stop_id.clone(),
            sequence: seq as u32 + 1,
            location: stop.location,
            arrival_time: minutes_to_time_str(arrival),
            departure_time: minutes_to_time_str(departure),
        });

        debug!(
            "Stop {} ({}): arrive={} depart={} travel={} min",
            seq + 1,
            stop.stop_id,
            minutes_to_time_str(arrival),
            minutes_to_time_str(departure),
            travel_minutes,
        );

        clock = departure;
        prev = node;
    }

    let total_distance_km = (total_distance_m as f64 / 1000.0 * 100.0).round() / 100.0;
    let total_duration_minutes = (clock - departure_minutes) as f64;

    info!(
        "Route built: {} stops, {:.1} km, {:.0} min",
        ordered_stops.len(),
        total_distance_km,
        total_duration_minutes,
    );

    Ok(OptimizeRouteResponse {
        driver_id: driver_id.to_string(),
        optimized_stops,
        total_distance_km,
        total_duration_minutes,
        google_maps_url: build_maps_url(driver_location, ordered_stops),
        // Computed by the pipeline once the naive baseline is known
        optimization_score: 0.0,
    })
}

/// `1 − total / naive`, clipped to `[0, 1]`. Zero when the baseline is
/// degenerate.
pub fn optimization_score(total_duration: f64, naive_duration: f64) -> f64 {
    if naive_duration <= 0.0 {
        return 0.0;
    }
    (1.0 - total_duration / naive_duration).clamp(0.0, 1.0)
}

fn parsed_window(stop: &Stop) -> Result<(i64, i64), OptimizeError> {
    stop.window_minutes().ok_or_else(|| {
        OptimizeError::Validation(format!(
            "stop {} has an unparseable pickup window",
            stop.stop_id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn origin() -> Coordinates {
        Coordinates::new(40.7128, -74.0060)
    }

    fn stop(id: &str, lat: f64, lng: f64, earliest: &str, latest: &str, service: u32) -> Stop {
        Stop {
            stop_id: id.to_string(),
            location: Coordinates::new(lat, lng),
            earliest_pickup: earliest.to_string(),
            latest_pickup: latest.to_string(),
            service_time_minutes: service,
        }
    }

    fn departure() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap()
    }

    /// Origin plus two stops, 10 and 5 minutes apart down the chain.
    fn two_stop_fixture() -> (Vec<Stop>, TrafficMatrices) {
        let stops = vec![
            stop("stop_001", 40.7282, -73.7949, "07:45", "08:30", 3),
            stop("stop_002", 40.6892, -74.0445, "08:00", "08:45", 5),
        ];
        let matrices = TrafficMatrices {
            time_matrix: vec![
                vec![0, 600, 900],
                vec![600, 0, 300],
                vec![900, 300, 0],
            ],
            distance_matrix: vec![
                vec![0, 8000, 12000],
                vec![8000, 0, 4000],
                vec![12000, 4000, 0],
            ],
        };
        (stops, matrices)
    }

    #[test]
    fn test_walk_accumulates_travel_wait_and_service() {
        let (stops, matrices) = two_stop_fixture();
        let response =
            build_final_route("drv-1", &origin(), &stops, &matrices, departure()).unwrap();

        // 07:30 + 10 min travel = 07:40, clamped to window open 07:45
        assert_eq!(response.optimized_stops[0].arrival_time, "07:45");
        assert_eq!(response.optimized_stops[0].departure_time, "07:48");
        // 07:48 + 5 min travel = 07:53, clamped to 08:00
        assert_eq!(response.optimized_stops[1].arrival_time, "08:00");
        assert_eq!(response.optimized_stops[1].departure_time, "08:05");

        // 07:30 -> 08:05
        assert_eq!(response.total_duration_minutes, 35.0);
        assert_eq!(response.total_distance_km, 12.0);
    }

    #[test]
    fn test_sequences_are_one_based_and_gapless() {
        let (stops, matrices) = two_stop_fixture();
        let response =
            build_final_route("drv-1", &origin(), &stops, &matrices, departure()).unwrap();

        let sequences: Vec<u32> =
            response.optimized_stops.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_maps_url_is_coordinates_only_origin_first() {
        let (stops, matrices) = two_stop_fixture();
        let response =
            build_final_route("drv-1", &origin(), &stops, &matrices, departure()).unwrap();

        assert_eq!(
            response.google_maps_url,
            "https://www.google.com/maps/dir/40.7128,-74.006/40.7282,-73.7949/40.6892,-74.0445"
        );
        assert!(!response.google_maps_url.contains("stop_001"));
        assert!(!response.google_maps_url.contains("stop_002"));
    }

    #[test]
    fn test_departure_equals_arrival_plus_service() {
        let (stops, matrices) = two_stop_fixture();
        let response =
            build_final_route("drv-1", &origin(), &stops, &matrices, departure()).unwrap();

        for (optimized, source) in response.optimized_stops.iter().zip(&stops) {
            let arrival =
                crate::services::timeutil::parse_time_str(&optimized.arrival_time).unwrap();
            let departure =
                crate::services::timeutil::parse_time_str(&optimized.departure_time).unwrap();
            assert_eq!(departure - arrival, i64::from(source.service_time_minutes));
        }
    }

    #[test]
    fn test_schedule_duration_matches_built_route_for_same_order() {
        let (stops, matrices) = two_stop_fixture();
        let naive =
            schedule_duration_minutes(&matrices.time_matrix, &stops, 450).unwrap();
        let response =
            build_final_route("drv-1", &origin(), &stops, &matrices, departure()).unwrap();
        // Same order, same anchor: identical accumulation, waits included
        assert_eq!(naive, response.total_duration_minutes);
        assert_eq!(naive, 35.0);
    }

    #[test]
    fn test_schedule_duration_ignores_missed_windows() {
        let (mut stops, matrices) = two_stop_fixture();
        // Close both windows before the departure: the walk still completes
        stops[0].earliest_pickup = "06:00".to_string();
        stops[0].latest_pickup = "06:30".to_string();
        stops[1].earliest_pickup = "06:00".to_string();
        stops[1].latest_pickup = "06:30".to_string();
        let naive =
            schedule_duration_minutes(&matrices.time_matrix, &stops, 450).unwrap();
        // 10 + 3 + 5 + 5 with no waits
        assert_eq!(naive, 23.0);
    }

    #[test]
    fn test_optimization_score_bounds() {
        assert_eq!(optimization_score(30.0, 60.0), 0.5);
        assert_eq!(optimization_score(60.0, 60.0), 0.0);
        // Worse than the baseline clips to zero rather than going negative
        assert_eq!(optimization_score(90.0, 60.0), 0.0);
        // Degenerate baseline
        assert_eq!(optimization_score(30.0, 0.0), 0.0);
        assert!(optimization_score(1.0, 1000.0) <= 1.0);
    }

    #[test]
    fn test_rejects_unparseable_window() {
        let (mut stops, matrices) = two_stop_fixture();
        stops[0].earliest_pickup = "7:45".to_string();
        let err = build_final_route("drv-1", &origin(), &stops, &matrices, departure())
            .unwrap_err();
        assert!(matches!(err, OptimizeError::Validation(_)));
    }
}
