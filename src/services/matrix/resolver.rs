//! Matrix resolver: cache in front of the traffic provider

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::OptimizeError;
use crate::types::Coordinates;

use super::{matrix_fingerprint, MatrixCache, MatrixProvider, TrafficMatrices};

/// Backoff before the single provider retry.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// A resolved matrix plus where it came from. Cache degradation is a fact
/// about the result, never an error.
#[derive(Debug, Clone)]
pub struct ResolvedMatrices {
    pub matrices: TrafficMatrices,
    pub from_cache: bool,
}

/// Resolves traffic matrices for an ordered location list, consulting the
/// content-addressed cache first.
pub struct MatrixResolver {
    provider: Arc<dyn MatrixProvider>,
    cache: MatrixCache,
}

impl MatrixResolver {
    pub fn new(provider: Arc<dyn MatrixProvider>, cache: MatrixCache) -> Self {
        Self { provider, cache }
    }

    /// Resolve matrices for `locations` (origin first) departing at
    /// `departure_time`.
    pub async fn resolve(
        &self,
        locations: &[Coordinates],
        departure_time: DateTime<Utc>,
    ) -> Result<ResolvedMatrices, OptimizeError> {
        let key = matrix_fingerprint(locations, departure_time);

        if let Some(matrices) = self.cache.get(&key, locations).await {
            return Ok(ResolvedMatrices { matrices, from_cache: true });
        }

        info!(
            "Distance matrix cache miss, calling {} (n={})",
            self.provider.name(),
            locations.len()
        );

        let matrices = match self.provider.fetch(locations, departure_time).await {
            Ok(matrices) => matrices,
            Err(first_err) => {
                warn!(
                    "{} request failed, retrying once: {first_err:#}",
                    self.provider.name()
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.provider
                    .fetch(locations, departure_time)
                    .await
                    .map_err(|e| OptimizeError::UpstreamUnavailable(format!("{e:#}")))?
            }
        };

        if !matrices.is_square(locations.len()) {
            return Err(OptimizeError::UpstreamUnavailable(format!(
                "{} returned a malformed matrix for {} locations",
                self.provider.name(),
                locations.len()
            )));
        }

        self.cache.put(&key, locations, &matrices).await;

        Ok(ResolvedMatrices { matrices, from_cache: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matrix::MockMatrixProvider;
    use crate::state::{KvBackend, MemoryBackend};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn locations() -> Vec<Coordinates> {
        vec![
            Coordinates { lat: 40.7128, lng: -74.0060 },
            Coordinates { lat: 40.6413, lng: -73.7781 },
            Coordinates { lat: 40.7357, lng: -74.1724 },
        ]
    }

    fn departure() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let provider = Arc::new(MockMatrixProvider::new());
        let resolver = MatrixResolver::new(
            provider.clone(),
            MatrixCache::new(MemoryBackend::shared()),
        );

        let first = resolver.resolve(&locations(), departure()).await.unwrap();
        assert!(!first.from_cache);

        let second = resolver.resolve(&locations(), departure()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            first.matrices.time_matrix,
            second.matrices.time_matrix
        );
    }

    #[tokio::test]
    async fn test_reordered_stops_share_cache_entry() {
        let provider = Arc::new(MockMatrixProvider::new());
        let resolver = MatrixResolver::new(
            provider.clone(),
            MatrixCache::new(MemoryBackend::shared()),
        );

        let locs = locations();
        let first = resolver.resolve(&locs, departure()).await.unwrap();

        let mut shuffled = locs.clone();
        shuffled.swap(1, 2);
        let second = resolver.resolve(&shuffled, departure()).await.unwrap();

        // Same fingerprint, so no second provider call; the cached grids
        // come back remapped to the new caller order.
        assert!(second.from_cache);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            second.matrices.travel_seconds(0, 1),
            first.matrices.travel_seconds(0, 2)
        );
        assert_eq!(
            second.matrices.distance_meters(1, 2),
            first.matrices.distance_meters(2, 1)
        );
    }

    #[tokio::test]
    async fn test_new_hour_bucket_refetches() {
        let provider = Arc::new(MockMatrixProvider::new());
        let resolver = MatrixResolver::new(
            provider.clone(),
            MatrixCache::new(MemoryBackend::shared()),
        );

        resolver.resolve(&locations(), departure()).await.unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        resolver.resolve(&locations(), later).await.unwrap();

        assert_eq!(provider.call_count(), 2);
    }

    struct FailingBackend;

    #[async_trait]
    impl KvBackend for FailingBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            anyhow::bail!("backend down")
        }
        async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<()> {
            anyhow::bail!("backend down")
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            anyhow::bail!("backend down")
        }
        async fn ping(&self) -> Result<()> {
            anyhow::bail!("backend down")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_cache_outage_is_not_fatal() {
        let provider = Arc::new(MockMatrixProvider::new());
        let resolver = MatrixResolver::new(
            provider.clone(),
            MatrixCache::new(Arc::new(FailingBackend)),
        );

        let resolved = resolver.resolve(&locations(), departure()).await.unwrap();
        assert!(!resolved.from_cache);
        assert!(resolved.matrices.is_square(3));

        // Every resolve pays a provider call while the cache is down
        resolver.resolve(&locations(), departure()).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    /// Provider that fails a fixed number of times before succeeding.
    struct FlakyProvider {
        failures_left: AtomicUsize,
        inner: MockMatrixProvider,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                inner: MockMatrixProvider::new(),
            }
        }
    }

    #[async_trait]
    impl MatrixProvider for FlakyProvider {
        async fn fetch(
            &self,
            locations: &[Coordinates],
            departure_time: DateTime<Utc>,
        ) -> Result<TrafficMatrices> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("transient provider error");
            }
            self.inner.fetch(locations, departure_time).await
        }

        fn name(&self) -> &str {
            "FlakyProvider"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_transient_failure_is_retried() {
        let resolver = MatrixResolver::new(
            Arc::new(FlakyProvider::new(1)),
            MatrixCache::new(MemoryBackend::shared()),
        );

        let resolved = resolver.resolve(&locations(), departure()).await.unwrap();
        assert!(!resolved.from_cache);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_surfaces_as_upstream_unavailable() {
        let resolver = MatrixResolver::new(
            Arc::new(FlakyProvider::new(5)),
            MatrixCache::new(MemoryBackend::shared()),
        );

        let err = resolver.resolve(&locations(), departure()).await.unwrap_err();
        assert!(matches!(err, OptimizeError::UpstreamUnavailable(_)));
    }
}
