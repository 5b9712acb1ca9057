//! Error taxonomy for the optimisation pipeline.

use thiserror::Error;

/// Failure kinds surfaced by [`crate::services::pipeline::Optimizer`].
///
/// The transport layer maps these onto status codes: `Validation` and
/// `NoFeasibleRoute` become 422, `UpstreamUnavailable` becomes 502,
/// `Internal` becomes 500.
#[derive(Debug, Error)]
pub enum OptimizeError {
    /// The request itself is malformed (bad coordinates, bad window,
    /// too many stops, departure in the past).
    #[error("invalid request: {0}")]
    Validation(String),

    /// The solver proved or exhausted its budget without finding any
    /// assignment that satisfies the time windows.
    #[error("no feasible route: {0}")]
    NoFeasibleRoute(String),

    /// The traffic provider errored or returned a structurally invalid
    /// matrix, after one retry.
    #[error("traffic provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Anything else: a bug or an unexpected infrastructure failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OptimizeError {
    /// Stable machine code for log correlation and error frames.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizeError::Validation(_) => "VALIDATION_ERROR",
            OptimizeError::NoFeasibleRoute(_) => "NO_FEASIBLE_ROUTE",
            OptimizeError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            OptimizeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
