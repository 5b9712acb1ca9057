//! Vehicle Routing Problem with Time Windows (VRPTW) solver
//!
//! Single vehicle, hard pickup windows, per-stop service times, bounded
//! early-arrival slack, and a shift-length budget. Works in absolute
//! minutes since midnight so stop windows map directly onto the schedule.
//!
//! Search is a cheapest-feasible-arc construction (with a deadline-bounded
//! backtracking fallback to find any feasible seed), followed by 2-opt and
//! relocation local search. The wall-clock cap is enforced between moves:
//! hitting it with a feasible incumbent returns that incumbent, never an
//! error. Only the absence of any feasible assignment is a failure.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::defaults::{ROUTE_BUDGET_MINUTES, SLACK_MINUTES};
use crate::types::Stop;

/// A stop in solver units: minutes since midnight.
#[derive(Debug, Clone)]
pub struct SolverStop {
    pub earliest_minutes: i64,
    pub latest_minutes: i64,
    pub service_minutes: i64,
}

impl SolverStop {
    /// Convert a validated [`Stop`]. Returns `None` when the window strings
    /// do not parse, which validation has already ruled out upstream.
    pub fn from_stop(stop: &Stop) -> Option<Self> {
        let (earliest_minutes, latest_minutes) = stop.window_minutes()?;
        Some(Self {
            earliest_minutes,
            latest_minutes,
            service_minutes: i64::from(stop.service_time_minutes),
        })
    }
}

/// A feasible visit order and its cost.
#[derive(Debug, Clone)]
pub struct SolverSolution {
    /// 0-based stop indices in visit order (origin excluded).
    pub order: Vec<usize>,
    /// Sum of transit costs (travel plus service-on-departure) in minutes.
    pub total_transit_minutes: i64,
    /// Whether the wall-clock cap cut the search short.
    pub timed_out: bool,
}

/// VRPTW solver over a fixed travel-time matrix.
pub struct VrptwSolver {
    /// Transit cost in minutes: travel i->j plus service at i (zero at the
    /// origin). Index 0 is the origin, 1..=n the stops.
    transit: Vec<Vec<i64>>,
    stops: Vec<SolverStop>,
    departure_minutes: i64,
    time_limit: Duration,
}

impl VrptwSolver {
    /// Build a solver from the raw travel-time matrix in seconds
    /// (index-aligned: 0 = origin, 1..=n = `stops` in order).
    pub fn new(
        time_matrix_seconds: &[Vec<u64>],
        stops: Vec<SolverStop>,
        departure_minutes: i64,
        time_limit: Duration,
    ) -> Self {
        let n_nodes = time_matrix_seconds.len();
        let mut transit = vec![vec![0i64; n_nodes]; n_nodes];
        for i in 0..n_nodes {
            // Service time is incurred when leaving a stop, not at the origin
            let service = if i == 0 { 0 } else { stops[i - 1].service_minutes };
            for j in 0..n_nodes {
                let travel_minutes = (time_matrix_seconds[i][j] / 60) as i64;
                transit[i][j] = travel_minutes + service;
            }
        }

        Self { transit, stops, departure_minutes, time_limit }
    }

    /// Solve the problem. `None` means no feasible assignment exists within
    /// the search budget.
    pub fn solve(&self) -> Option<SolverSolution> {
        let n = self.stops.len();
        if n == 0 {
            return Some(SolverSolution {
                order: vec![],
                total_transit_minutes: 0,
                timed_out: false,
            });
        }

        let deadline = Instant::now() + self.time_limit;

        // Seed: cheapest feasible arc, then exhaustive backtracking if the
        // greedy gets cornered by a window.
        let mut timed_out = false;
        let seed = self.cheapest_feasible_arc().or_else(|| {
            let mut search = BacktrackSearch::new(self, deadline);
            let found = search.run();
            timed_out |= search.hit_deadline;
            found
        })?;

        let mut best = seed;
        // Both constructions verify feasibility end to end before handing
        // the seed over
        let Some(mut best_cost) = self.transit_cost(&best) else {
            return None;
        };

        // Local search: alternate 2-opt reversals and single-stop
        // relocations until neither improves.
        let mut improved = true;
        while improved {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            improved = false;
            if let Some((order, cost)) = self.best_two_opt(&best, best_cost) {
                best = order;
                best_cost = cost;
                improved = true;
                continue;
            }
            if let Some((order, cost)) = self.best_relocation(&best, best_cost) {
                best = order;
                best_cost = cost;
                improved = true;
            }
        }

        if timed_out {
            info!(
                "VRPTW search hit the {}s wall clock, returning incumbent (cost={} min)",
                self.time_limit.as_secs(),
                best_cost
            );
        } else {
            debug!("VRPTW solution: {:?} (cost={} min)", best, best_cost);
        }

        Some(SolverSolution {
            order: best,
            total_transit_minutes: best_cost,
            timed_out,
        })
    }

    /// Walk `order` and return its total transit cost, or `None` if any
    /// window, slack, or budget constraint is violated.
    fn transit_cost(&self, order: &[usize]) -> Option<i64> {
        let mut clock = self.departure_minutes;
        let mut prev = 0usize;
        let mut total = 0i64;

        for &s in order {
            let node = s + 1;
            let (arrival, cost) = self.step(clock, prev, s)?;
            clock = arrival;
            total += cost;
            prev = node;
        }

        // Route end = departure from the last stop
        if let Some(&last) = order.last() {
            let end = clock + self.stops[last].service_minutes;
            if end - self.departure_minutes > ROUTE_BUDGET_MINUTES {
                return None;
            }
        }
        Some(total)
    }

    /// Advance the schedule from `prev` (node index) to stop `s`.
    /// Returns `(arrival_clock, transit_cost)` or `None` if infeasible.
    fn step(&self, clock: i64, prev: usize, s: usize) -> Option<(i64, i64)> {
        let stop = &self.stops[s];
        let cost = self.transit[prev][s + 1];
        let raw = clock + cost;
        if raw > stop.latest_minutes {
            return None;
        }
        let arrival = raw.max(stop.earliest_minutes);
        if arrival - raw > SLACK_MINUTES {
            return None;
        }
        // Even mid-route, serving this stop may not already blow the budget
        if arrival + stop.service_minutes - self.departure_minutes > ROUTE_BUDGET_MINUTES {
            return None;
        }
        Some((arrival, cost))
    }

    /// Greedy construction: always take the cheapest arc that keeps the
    /// partial schedule feasible.
    fn cheapest_feasible_arc(&self) -> Option<Vec<usize>> {
        let n = self.stops.len();
        let mut order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut clock = self.departure_minutes;
        let mut prev = 0usize;

        while order.len() < n {
            let mut best: Option<(usize, i64, i64)> = None;
            for s in 0..n {
                if visited[s] {
                    continue;
                }
                if let Some((arrival, cost)) = self.step(clock, prev, s) {
                    let better = match best {
                        Some((_, _, best_cost)) => cost < best_cost,
                        None => true,
                    };
                    if better {
                        best = Some((s, arrival, cost));
                    }
                }
            }
            let (s, arrival, _) = best?;
            order.push(s);
            visited[s] = true;
            clock = arrival;
            prev = s + 1;
        }

        // The greedy checks the budget incrementally; confirm end to end.
        self.transit_cost(&order).map(|_| order)
    }

    /// Best improving 2-opt move, if any.
    fn best_two_opt(&self, order: &[usize], current_cost: i64) -> Option<(Vec<usize>, i64)> {
        let n = order.len();
        let mut best: Option<(Vec<usize>, i64)> = None;
        for i in 0..n.saturating_sub(1) {
            for j in i + 1..n {
                let mut candidate = order.to_vec();
                candidate[i..=j].reverse();
                if let Some(cost) = self.transit_cost(&candidate) {
                    let bar = best.as_ref().map_or(current_cost, |(_, c)| *c);
                    if cost < bar {
                        best = Some((candidate, cost));
                    }
                }
            }
        }
        best
    }

    /// Best improving single-stop relocation, if any.
    fn best_relocation(&self, order: &[usize], current_cost: i64) -> Option<(Vec<usize>, i64)> {
        let n = order.len();
        let mut best: Option<(Vec<usize>, i64)> = None;
        for from in 0..n {
            for to in 0..n {
                if from == to {
                    continue;
                }
                let mut candidate = order.to_vec();
                let s = candidate.remove(from);
                candidate.insert(to, s);
                if let Some(cost) = self.transit_cost(&candidate) {
                    let bar = best.as_ref().map_or(current_cost, |(_, c)| *c);
                    if cost < bar {
                        best = Some((candidate, cost));
                    }
                }
            }
        }
        best
    }
}

/// Depth-first feasibility search, stops expanded by earliest deadline.
/// Used only when the greedy construction gets stuck; returns the first
/// complete feasible order it reaches.
struct BacktrackSearch<'a> {
    solver: &'a VrptwSolver,
    deadline: Instant,
    hit_deadline: bool,
}

impl<'a> BacktrackSearch<'a> {
    fn new(solver: &'a VrptwSolver, deadline: Instant) -> Self {
        Self { solver, deadline, hit_deadline: false }
    }

    fn run(&mut self) -> Option<Vec<usize>> {
        let n = self.solver.stops.len();
        let mut order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        if self.extend(&mut order, &mut visited, self.solver.departure_minutes, 0) {
            Some(order)
        } else {
            None
        }
    }

    fn extend(
        &mut self,
        order: &mut Vec<usize>,
        visited: &mut [bool],
        clock: i64,
        prev: usize,
    ) -> bool {
        let n = self.solver.stops.len();
        if order.len() == n {
            return self.solver.transit_cost(order).is_some();
        }
        if Instant::now() >= self.deadline {
            self.hit_deadline = true;
            return false;
        }

        // Tight deadlines first keeps the tree shallow on window-bound
        // instances.
        let mut candidates: Vec<usize> = (0..n).filter(|&s| !visited[s]).collect();
        candidates.sort_by_key(|&s| self.solver.stops[s].latest_minutes);

        for s in candidates {
            let Some((arrival, _)) = self.solver.step(clock, prev, s) else {
                continue;
            };
            order.push(s);
            visited[s] = true;
            if self.extend(order, visited, arrival, s + 1) {
                return true;
            }
            order.pop();
            visited[s] = false;
            if self.hit_deadline {
                return false;
            }
        }
        false
    }
}
