//! Google Distance Matrix API client
//!
//! API documentation:
//! https://developers.google.com/maps/documentation/distance-matrix

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::defaults::UNREACHABLE_COST;
use crate::types::Coordinates;

use super::{MatrixProvider, TrafficMatrices};

const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";

/// Google Maps client configuration
#[derive(Debug, Clone)]
pub struct GoogleMapsConfig {
    pub api_key: String,
    /// Endpoint URL, overridable for tests
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl GoogleMapsConfig {
    pub fn new(api_key: impl Into<String>, timeout_seconds: u64) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds,
        }
    }
}

/// Google Distance Matrix client
pub struct GoogleMatrixClient {
    client: Client,
    config: GoogleMapsConfig,
}

impl GoogleMatrixClient {
    pub fn new(config: GoogleMapsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn joined_coords(locations: &[Coordinates]) -> String {
        locations
            .iter()
            .map(Coordinates::as_param)
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[async_trait]
impl MatrixProvider for GoogleMatrixClient {
    async fn fetch(
        &self,
        locations: &[Coordinates],
        departure_time: DateTime<Utc>,
    ) -> Result<TrafficMatrices> {
        let n = locations.len();
        let coords = Self::joined_coords(locations);
        let departure_ts = departure_time.timestamp().to_string();

        debug!("Requesting distance matrix from Google for {} locations", n);

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("origins", coords.as_str()),
                ("destinations", coords.as_str()),
                ("mode", "driving"),
                ("departure_time", departure_ts.as_str()),
                ("traffic_model", "best_guess"),
                ("units", "metric"),
                ("key", self.config.api_key.as_str()),
            ])
            .send()
            .await
            .context("failed to send request to Google Distance Matrix")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Google Distance Matrix returned error {}: {}", status, body);
        }

        let matrix_response: MatrixResponse = response
            .json()
            .await
            .context("failed to parse Google Distance Matrix response")?;

        if matrix_response.status != "OK" {
            anyhow::bail!(
                "Google Distance Matrix request rejected: {}",
                matrix_response.status
            );
        }
        if matrix_response.rows.len() != n
            || matrix_response.rows.iter().any(|r| r.elements.len() != n)
        {
            anyhow::bail!(
                "Google Distance Matrix returned a malformed {}x{} grid",
                matrix_response.rows.len(),
                matrix_response.rows.first().map_or(0, |r| r.elements.len()),
            );
        }

        let mut time_matrix = vec![vec![0u64; n]; n];
        let mut distance_matrix = vec![vec![0u64; n]; n];

        for (i, row) in matrix_response.rows.iter().enumerate() {
            for (j, element) in row.elements.iter().enumerate() {
                if element.status != "OK" {
                    // Unreachable pair: price the arc out of consideration
                    warn!("No route for pair {} -> {}: {}", i, j, element.status);
                    time_matrix[i][j] = UNREACHABLE_COST;
                    distance_matrix[i][j] = UNREACHABLE_COST;
                    continue;
                }

                // Prefer the traffic-adjusted duration when present
                let duration = element
                    .duration_in_traffic
                    .as_ref()
                    .or(element.duration.as_ref());
                time_matrix[i][j] = match duration {
                    Some(d) => d.value,
                    None => {
                        warn!("No duration for pair {} -> {}", i, j);
                        UNREACHABLE_COST
                    }
                };
                distance_matrix[i][j] = match &element.distance {
                    Some(d) => d.value,
                    None => {
                        warn!("No distance for pair {} -> {}", i, j);
                        UNREACHABLE_COST
                    }
                };
            }
        }

        debug!("Received distance matrix from Google: {}x{}", n, n);

        Ok(TrafficMatrices { time_matrix, distance_matrix })
    }

    fn name(&self) -> &str {
        "GoogleDistanceMatrix"
    }
}

// Google API response types

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    duration: Option<ValueField>,
    duration_in_traffic: Option<ValueField>,
    distance: Option<ValueField>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: u64,
}
