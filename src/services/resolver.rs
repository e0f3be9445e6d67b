//! Weather resolution across ranked providers.
//!
//! For every forecast point the resolver walks its providers in priority
//! order: unavailable providers are skipped, each call waits for the
//! provider's rate limiter and is bounded by a timeout, and the first
//! validated record wins. Concurrent lookups for the same
//! `(lat, lon, timestamp)` share one provider sequence through an in-flight
//! table; entries are removed as soon as the lookup settles, so nothing is
//! cached beyond the lifetime of a request.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use crate::services::provider::{ProviderError, WeatherProvider};
use crate::services::rate_limiter::RateLimiter;
use crate::services::sampler::ForecastPoint;
use crate::services::weather::WeatherRecord;

/// Coordinate precision of the deduplication key (1e-6° ≈ 0.1 m).
const KEY_SCALE: f64 = 1e6;

/// Why one provider did not produce a record for a point.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    /// `None` when the provider was skipped as unavailable.
    pub error: Option<ProviderError>,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(e) => write!(f, "{}: {}", self.provider, e),
            None => write!(f, "{}: unavailable", self.provider),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("No weather providers configured")]
    NoProviders,
    #[error("No weather provider is currently available")]
    AllProvidersUnavailable,
    #[error("All weather providers failed ({})", format_failures(.failures))]
    Exhausted { failures: Vec<ProviderFailure> },
    #[error("Forecast timestamp {0} is out of range")]
    InvalidTime(i64),
    #[error("Weather lookup aborted: {0}")]
    Aborted(String),
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A provider together with its own rate limiter.
#[derive(Debug)]
pub struct ProviderSlot {
    provider: Arc<dyn WeatherProvider>,
    limiter: RateLimiter,
}

impl ProviderSlot {
    pub fn new(provider: Arc<dyn WeatherProvider>, requests_per_second: f64) -> Self {
        let limiter = RateLimiter::new(requests_per_second);
        tracing::debug!(
            "Provider {} limited to one request every {:?}",
            provider.name(),
            limiter.min_interval()
        );
        Self { provider, limiter }
    }
}

/// Tunables for a [`WeatherResolver`].
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Upper bound for a single provider call.
    pub provider_timeout: Duration,
    /// Points resolved concurrently within one batch.
    pub max_concurrency: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            max_concurrency: 8,
        }
    }
}

/// Availability snapshot of one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatus {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
struct RequestKey {
    lat_e6: i64,
    lon_e6: i64,
    timestamp: i64,
}

impl RequestKey {
    fn new(lat: f64, lon: f64, timestamp: i64) -> Self {
        Self {
            lat_e6: (lat * KEY_SCALE).round() as i64,
            lon_e6: (lon * KEY_SCALE).round() as i64,
            timestamp,
        }
    }
}

type SharedLookup = Shared<BoxFuture<'static, Result<WeatherRecord, ResolveError>>>;

struct ResolverInner {
    providers: Vec<ProviderSlot>,
    in_flight: Mutex<HashMap<RequestKey, SharedLookup>>,
    options: ResolverOptions,
}

/// Resolves weather for forecast points. Cheap to clone; clones share
/// providers, rate limiters and the in-flight table.
#[derive(Clone)]
pub struct WeatherResolver {
    inner: Arc<ResolverInner>,
}

impl WeatherResolver {
    /// `providers` are tried in the given order.
    pub fn new(providers: Vec<ProviderSlot>, options: ResolverOptions) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                providers,
                in_flight: Mutex::new(HashMap::new()),
                options,
            }),
        }
    }

    /// Current availability of every configured provider, in priority order.
    pub async fn provider_statuses(&self) -> Vec<ProviderStatus> {
        let mut statuses = Vec::with_capacity(self.inner.providers.len());
        for slot in &self.inner.providers {
            statuses.push(ProviderStatus {
                name: slot.provider.name().to_string(),
                available: slot.provider.is_available().await,
            });
        }
        statuses
    }

    /// Number of lookups currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_in_flight().len()
    }

    /// Resolve weather for a single point.
    ///
    /// Joins an identical in-flight lookup if there is one. The lookup runs on
    /// its own task, so a caller that stops awaiting does not cancel it for
    /// the other callers, and its table entry is always removed.
    pub async fn resolve_point(&self, point: &ForecastPoint) -> Result<WeatherRecord, ResolveError> {
        let time = point
            .time()
            .ok_or(ResolveError::InvalidTime(point.timestamp))?;
        let key = RequestKey::new(point.lat, point.lon, point.timestamp);

        let lookup = {
            let mut table = self.inner.lock_in_flight();
            if let Some(existing) = table.get(&key) {
                tracing::debug!(
                    "Joining in-flight weather lookup for ({}, {}) at {}",
                    point.lat,
                    point.lon,
                    time
                );
                existing.clone()
            } else {
                let inner = self.inner.clone();
                let (lat, lon, elevation) = (point.lat, point.lon, point.elevation);
                // The table lock is held until the entry is inserted, so the
                // task's own removal can never run before the insert.
                let handle = tokio::spawn(async move {
                    let result = inner.resolve_uncached(lat, lon, elevation, time).await;
                    inner.lock_in_flight().remove(&key);
                    result
                });
                let lookup = async move {
                    handle
                        .await
                        .unwrap_or_else(|e| Err(ResolveError::Aborted(e.to_string())))
                }
                .boxed()
                .shared();
                table.insert(key, lookup.clone());
                lookup
            }
        };

        lookup.await
    }

    /// Resolve a batch of points.
    ///
    /// The result has one entry per input point, in input order; points no
    /// provider could resolve are `None`. Fails as a whole only when no
    /// provider is configured or none is available at all.
    pub async fn resolve_batch(
        &self,
        points: &[ForecastPoint],
    ) -> Result<Vec<Option<WeatherRecord>>, ResolveError> {
        if self.inner.providers.is_empty() {
            return Err(ResolveError::NoProviders);
        }
        if points.is_empty() {
            return Ok(Vec::new());
        }
        if !self.any_provider_available().await {
            return Err(ResolveError::AllProvidersUnavailable);
        }

        let concurrency = self.inner.options.max_concurrency.max(1);
        // Each lookup owns its point and resolver handle so the stream stays Send
        let results: Vec<Option<WeatherRecord>> = stream::iter(points.iter().cloned().enumerate())
            .map(|(i, point)| {
                let resolver = self.clone();
                async move {
                    match resolver.resolve_point(&point).await {
                        Ok(record) => Some(record),
                        Err(e) => {
                            tracing::warn!(
                                "No weather for point #{} ({}, {}): {}",
                                i,
                                point.lat,
                                point.lon,
                                e
                            );
                            None
                        }
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let resolved = results.iter().filter(|r| r.is_some()).count();
        tracing::info!("Resolved weather for {}/{} points", resolved, points.len());

        Ok(results)
    }

    async fn any_provider_available(&self) -> bool {
        for slot in &self.inner.providers {
            if slot.provider.is_available().await {
                return true;
            }
        }
        false
    }
}

impl ResolverInner {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<RequestKey, SharedLookup>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Walk the providers in order until one returns a valid record.
    async fn resolve_uncached(
        &self,
        lat: f64,
        lon: f64,
        elevation: Option<f64>,
        time: DateTime<Utc>,
    ) -> Result<WeatherRecord, ResolveError> {
        let mut failures = Vec::new();

        for slot in &self.providers {
            let name = slot.provider.name();

            if !slot.provider.is_available().await {
                tracing::debug!("Skipping unavailable provider {}", name);
                failures.push(ProviderFailure {
                    provider: name.to_string(),
                    error: None,
                });
                continue;
            }

            slot.limiter.acquire().await;

            let timeout = self.options.provider_timeout;
            let outcome = tokio::time::timeout(
                timeout,
                slot.provider.get_weather(lat, lon, elevation, time),
            )
            .await
            .unwrap_or_else(|_| Err(ProviderError::Timeout(timeout.as_millis() as u64)))
            .and_then(|record| {
                record.validate()?;
                Ok(record)
            });

            match outcome {
                Ok(record) => return Ok(record),
                Err(e) => {
                    tracing::warn!(
                        "Provider {} failed for ({}, {}) at {}: {}",
                        name,
                        lat,
                        lon,
                        time,
                        e
                    );
                    failures.push(ProviderFailure {
                        provider: name.to_string(),
                        error: Some(e),
                    });
                }
            }
        }

        Err(ResolveError::Exhausted { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::weather::tests::sample_record;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone)]
    enum Behavior {
        Succeed,
        Fail(ProviderError),
        FailAtLat(f64),
        Invalid,
        Hang,
    }

    #[derive(Debug)]
    struct MockProvider {
        name: &'static str,
        available: bool,
        behavior: Behavior,
        delay: Duration,
        /// Points further north answer faster, reversing completion order
        stagger: bool,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(name: &'static str, behavior: Behavior) -> Self {
            Self {
                name,
                available: true,
                behavior,
                delay: Duration::ZERO,
                stagger: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn staggered(mut self) -> Self {
            self.stagger = true;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherProvider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn get_weather(
            &self,
            lat: f64,
            _lon: f64,
            _elevation: Option<f64>,
            _time: DateTime<Utc>,
        ) -> Result<WeatherRecord, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = if self.stagger {
                self.delay * (10 - lat as u32)
            } else {
                self.delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut record = sample_record(self.name);
            record.temperature = lat;
            match &self.behavior {
                Behavior::Succeed => Ok(record),
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::FailAtLat(bad) if (lat - bad).abs() < 1e-9 => Err(ProviderError::Http {
                    status: 500,
                    message: "upstream exploded".to_string(),
                }),
                Behavior::FailAtLat(_) => Ok(record),
                Behavior::Invalid => {
                    record.humidity = 150.0;
                    Ok(record)
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(record)
                }
            }
        }
    }

    fn point(index: usize, lat: f64) -> ForecastPoint {
        ForecastPoint {
            lat,
            lon: 7.0,
            elevation: None,
            distance: index as f64,
            timestamp: 1_780_300_800 + index as i64 * 360,
            index,
        }
    }

    fn resolver(providers: &[Arc<MockProvider>]) -> WeatherResolver {
        let slots = providers
            .iter()
            .map(|p| ProviderSlot::new(p.clone() as Arc<dyn WeatherProvider>, 1000.0))
            .collect();
        WeatherResolver::new(
            slots,
            ResolverOptions {
                provider_timeout: Duration::from_secs(2),
                max_concurrency: 4,
            },
        )
    }

    fn rate_limited() -> ProviderError {
        ProviderError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_secondary_on_429() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Fail(rate_limited())));
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::Succeed));
        let resolver = resolver(&[primary.clone(), secondary.clone()]);

        let results = resolver.resolve_batch(&[point(0, 46.0)]).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().provider, "secondary");
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_wins() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Succeed));
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::Succeed));
        let resolver = resolver(&[primary.clone(), secondary.clone()]);

        let record = resolver.resolve_point(&point(0, 46.0)).await.unwrap();

        assert_eq!(record.provider, "primary");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_point_is_null_when_all_providers_fail() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::FailAtLat(2.0)));
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::FailAtLat(2.0)));
        let resolver = resolver(&[primary, secondary]);

        let points = [point(0, 1.0), point(1, 2.0), point(2, 3.0)];
        let results = resolver.resolve_batch(&points).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_lists_failures_in_order() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Succeed).unavailable());
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::Fail(rate_limited())));
        let resolver = resolver(&[primary, secondary]);

        let err = resolver.resolve_point(&point(0, 46.0)).await.unwrap_err();

        match &err {
            ResolveError::Exhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].provider, "primary");
                assert_eq!(failures[0].error, None);
                assert_eq!(failures[1].error, Some(rate_limited()));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert!(err.to_string().contains("primary: unavailable"));
        assert!(err.to_string().contains("secondary: HTTP 429"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_preserves_order_despite_completion_order() {
        let provider = Arc::new(
            MockProvider::new("primary", Behavior::Succeed)
                .with_delay(Duration::from_millis(100))
                .staggered(),
        );
        let resolver = resolver(&[provider]);

        let points: Vec<ForecastPoint> = (0..6).map(|i| point(i, 1.0 + i as f64)).collect();
        let results = resolver.resolve_batch(&points).await.unwrap();

        assert_eq!(results.len(), points.len());
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.as_ref().unwrap().temperature, 1.0 + i as f64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_one_call() {
        let provider = Arc::new(
            MockProvider::new("primary", Behavior::Succeed).with_delay(Duration::from_millis(500)),
        );
        let resolver = resolver(&[provider.clone()]);
        let p = point(0, 46.0);

        let (a, b) = tokio::join!(resolver.resolve_point(&p), resolver.resolve_point(&p));

        assert_eq!(provider.calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_points_in_one_batch_share_one_call() {
        let provider = Arc::new(
            MockProvider::new("primary", Behavior::Succeed).with_delay(Duration::from_millis(500)),
        );
        let resolver = resolver(&[provider.clone()]);
        let p = point(0, 46.0);

        let results = resolver
            .resolve_batch(&[p.clone(), p.clone(), p])
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_some()));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_caching_after_lookup_settles() {
        let provider = Arc::new(MockProvider::new("primary", Behavior::Succeed));
        let resolver = resolver(&[provider.clone()]);
        let p = point(0, 46.0);

        resolver.resolve_point(&p).await.unwrap();
        assert_eq!(resolver.in_flight_count(), 0);
        resolver.resolve_point(&p).await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_cleared_after_failure() {
        let provider = Arc::new(MockProvider::new("primary", Behavior::Fail(rate_limited())));
        let resolver = resolver(&[provider]);

        assert!(resolver.resolve_point(&point(0, 46.0)).await.is_err());
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_provider_is_skipped() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Succeed).unavailable());
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::Succeed));
        let resolver = resolver(&[primary.clone(), secondary]);

        let record = resolver.resolve_point(&point(0, 46.0)).await.unwrap();

        assert_eq!(record.provider, "secondary");
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_record_falls_back() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Invalid));
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::Succeed));
        let resolver = resolver(&[primary.clone(), secondary]);

        let record = resolver.resolve_point(&point(0, 46.0)).await.unwrap();

        assert_eq!(record.provider, "secondary");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Hang));
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::Succeed));
        let resolver = resolver(&[primary, secondary]);

        let start = Instant::now();
        let record = resolver.resolve_point(&point(0, 46.0)).await.unwrap();

        assert_eq!(record.provider, "secondary");
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_batch_runs_on_spawned_task() {
        // tokio::spawn requires the batch future to be Send, as axum handlers do
        let primary = Arc::new(MockProvider::new("primary", Behavior::Succeed));
        let resolver = resolver(&[primary]);
        let points = vec![point(0, 46.0), point(1, 46.1)];

        let results = tokio::spawn(async move { resolver.resolve_batch(&points).await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_some()));
    }

    #[tokio::test]
    async fn test_no_providers_is_systemic_error() {
        let resolver = WeatherResolver::new(Vec::new(), ResolverOptions::default());
        let err = resolver.resolve_batch(&[point(0, 46.0)]).await.unwrap_err();
        assert_eq!(err, ResolveError::NoProviders);
    }

    #[tokio::test]
    async fn test_all_unavailable_is_systemic_error() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Succeed).unavailable());
        let resolver = resolver(&[primary]);
        let err = resolver.resolve_batch(&[point(0, 46.0)]).await.unwrap_err();
        assert_eq!(err, ResolveError::AllProvidersUnavailable);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Succeed));
        let resolver = resolver(&[primary.clone()]);
        let results = resolver.resolve_batch(&[]).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_rate_limit_spaces_calls() {
        let provider = Arc::new(MockProvider::new("primary", Behavior::Succeed));
        let resolver = WeatherResolver::new(
            vec![ProviderSlot::new(provider.clone(), 1.0)],
            ResolverOptions::default(),
        );

        let start = Instant::now();
        let points: Vec<ForecastPoint> = (0..3).map(|i| point(i, 1.0 + i as f64)).collect();
        let results = resolver.resolve_batch(&points).await.unwrap();

        assert!(results.iter().all(|r| r.is_some()));
        assert_eq!(provider.calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_provider_statuses() {
        let primary = Arc::new(MockProvider::new("primary", Behavior::Succeed));
        let secondary = Arc::new(MockProvider::new("secondary", Behavior::Succeed).unavailable());
        let resolver = resolver(&[primary, secondary]);

        let statuses = resolver.provider_statuses().await;
        assert_eq!(
            statuses,
            vec![
                ProviderStatus {
                    name: "primary".to_string(),
                    available: true
                },
                ProviderStatus {
                    name: "secondary".to_string(),
                    available: false
                },
            ]
        );
    }

    #[test]
    fn test_request_key_rounds_coordinates() {
        assert_eq!(
            RequestKey::new(46.1234567, 7.0, 10),
            RequestKey::new(46.12345671, 7.0, 10)
        );
        assert_ne!(RequestKey::new(46.0, 7.0, 10), RequestKey::new(46.0, 7.0, 11));
    }
}
