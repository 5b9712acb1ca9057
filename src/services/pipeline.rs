//! Shared optimisation entry point
//!
//! The synchronous optimise endpoint and the re-routing worker call
//! [`Optimizer::run`] / [`Optimizer::optimize`] identically. Transport
//! concerns (status codes, frame encoding) stay outside; this module is
//! pure business logic over the matrix resolver, solver, and builder.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::info;

use crate::config::Config;
use crate::error::OptimizeError;
use crate::services::matrix::MatrixResolver;
use crate::services::route_builder::{
    build_final_route, optimization_score, schedule_duration_minutes,
};
use crate::services::solver::{SolverStop, VrptwSolver};
use crate::state::SessionStore;
use crate::types::{Coordinates, OptimizeRouteRequest, OptimizeRouteResponse, Stop};

/// Route optimisation pipeline.
pub struct Optimizer {
    resolver: Arc<MatrixResolver>,
    max_stops: usize,
    solver_time_limit: Duration,
}

impl Optimizer {
    pub fn new(resolver: Arc<MatrixResolver>, config: &Config) -> Self {
        Self {
            resolver,
            max_stops: config.max_stops_per_route,
            solver_time_limit: Duration::from_secs(config.max_optimization_seconds),
        }
    }

    /// Validate and run a caller-supplied optimisation request.
    pub async fn run(
        &self,
        request: &OptimizeRouteRequest,
    ) -> Result<OptimizeRouteResponse, OptimizeError> {
        request.validate(self.max_stops, Utc::now())?;
        self.optimize(
            &request.driver_id,
            request.driver_location,
            &request.stops,
            request.departure_time,
        )
        .await
    }

    /// Validate, run, and capture the result into the driver's session as
    /// the shift baseline. Storage trouble never fails the request.
    pub async fn run_and_publish(
        &self,
        request: &OptimizeRouteRequest,
        store: &SessionStore,
    ) -> Result<OptimizeRouteResponse, OptimizeError> {
        let response = self.run(request).await?;
        store.install_published_route(&response, &request.stops).await;
        Ok(response)
    }

    /// The pipeline proper. The re-routing worker calls this directly with
    /// the driver's current GPS as `origin` and `departure_time = now`,
    /// bypassing the shift-start request checks.
    pub async fn optimize(
        &self,
        driver_id: &str,
        origin: Coordinates,
        stops: &[Stop],
        departure_time: DateTime<Utc>,
    ) -> Result<OptimizeRouteResponse, OptimizeError> {
        if stops.is_empty() {
            return Err(OptimizeError::Validation(
                "cannot optimise an empty stop list".to_string(),
            ));
        }

        // 1. Location list: index 0 = origin, 1..=n = stops in input order
        let mut locations = Vec::with_capacity(stops.len() + 1);
        locations.push(origin);
        locations.extend(stops.iter().map(|s| s.location));

        // 2. Traffic matrices (cached)
        let resolved = self.resolver.resolve(&locations, departure_time).await?;

        // 3. Solve on the blocking pool; the search is pure CPU
        let solver_stops = stops
            .iter()
            .map(|s| {
                SolverStop::from_stop(s).ok_or_else(|| {
                    OptimizeError::Validation(format!(
                        "stop {} has an unparseable pickup window",
                        s.stop_id
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let departure_minutes =
            i64::from(departure_time.hour()) * 60 + i64::from(departure_time.minute());

        info!(
            "VRP solve: {} stops, departure={} min, time_limit={}s",
            stops.len(),
            departure_minutes,
            self.solver_time_limit.as_secs()
        );

        let time_matrix = resolved.matrices.time_matrix.clone();
        let time_limit = self.solver_time_limit;
        let solution = tokio::task::spawn_blocking(move || {
            VrptwSolver::new(&time_matrix, solver_stops, departure_minutes, time_limit).solve()
        })
        .await
        .map_err(|e| OptimizeError::Internal(e.into()))?;

        let Some(solution) = solution else {
            return Err(OptimizeError::NoFeasibleRoute(format!(
                "no feasible route for {} stops with the given time windows and travel \
                 times; verify that every stop can be reached within its pickup window \
                 from the {} departure",
                stops.len(),
                departure_time.format("%H:%M"),
            )));
        };

        // 4. Align stops and matrices with the optimised visit order
        let ordered_stops: Vec<Stop> =
            solution.order.iter().map(|&i| stops[i].clone()).collect();
        let mut node_order = Vec::with_capacity(stops.len() + 1);
        node_order.push(0);
        node_order.extend(solution.order.iter().map(|&i| i + 1));
        let reordered = resolved.matrices.reorder(&node_order);

        // 5. Build per-stop ETAs and totals
        let mut response =
            build_final_route(driver_id, &origin, &ordered_stops, &reordered, departure_time)?;

        // 6. Score against the caller's input order through the same matrix
        let naive = schedule_duration_minutes(
            &resolved.matrices.time_matrix,
            stops,
            departure_minutes,
        )?;
        response.optimization_score =
            optimization_score(response.total_duration_minutes, naive);

        info!(
            "Optimisation done: driver={} stops={} {:.1} km {:.0} min score={:.2} cached_matrix={}",
            driver_id,
            stops.len(),
            response.total_distance_km,
            response.total_duration_minutes,
            response.optimization_score,
            resolved.from_cache,
        );
        Ok(response)
    }
}
