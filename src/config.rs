//! Configuration management

use anyhow::{Context, Result};

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL (state backend and pub/sub fabric)
    pub nats_url: String,

    /// Google Distance Matrix API key
    pub google_maps_api_key: String,

    /// Matrix cache bucket TTL in seconds
    pub matrix_cache_ttl_seconds: u64,

    /// Per-request timeout for the traffic provider
    pub matrix_request_timeout_seconds: u64,

    /// Solver wall-clock budget in seconds
    pub max_optimization_seconds: u64,

    /// Upper bound on stops per optimisation request
    pub max_stops_per_route: usize,

    /// Minutes behind schedule before a reroute triggers
    pub delay_threshold_minutes: f64,

    /// Remaining/baseline duration ratio before a reroute triggers
    pub traffic_increase_ratio: f64,

    /// Cooldown between traffic-triggered reroutes, in seconds
    pub min_reroute_interval_seconds: i64,

    /// Driver session bucket TTL in seconds
    pub driver_state_ttl_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let google_maps_api_key = std::env::var("GOOGLE_MAPS_API_KEY")
            .context("GOOGLE_MAPS_API_KEY must be set")?;

        Ok(Self {
            nats_url,
            google_maps_api_key,
            matrix_cache_ttl_seconds: env_parsed("MATRIX_CACHE_TTL_SECONDS", 1800)?,
            matrix_request_timeout_seconds: env_parsed("MATRIX_REQUEST_TIMEOUT_SECONDS", 8)?,
            max_optimization_seconds: env_parsed("MAX_OPTIMIZATION_SECONDS", 10)?,
            max_stops_per_route: env_parsed("MAX_STOPS_PER_ROUTE", 25)?,
            delay_threshold_minutes: env_parsed("DELAY_THRESHOLD_MINUTES", 5.0)?,
            traffic_increase_ratio: env_parsed("TRAFFIC_INCREASE_RATIO", 1.20)?,
            min_reroute_interval_seconds: env_parsed("MIN_REROUTE_INTERVAL_SECONDS", 300)?,
            driver_state_ttl_seconds: env_parsed("DRIVER_STATE_TTL_SECONDS", 43_200)?,
        })
    }
}

/// Read an environment variable and parse it, falling back to `default`
/// when the variable is unset. A set-but-unparseable value is an error,
/// not a silent fallback.
fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} has invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
