//! Percentage resolution with bounded retries and cache fallback.
//!
//! Algorithm for one [`ValueResolver::resolve`] call:
//! 1. Call the provider up to `max_attempts` times, stopping at the first value.
//!    Errors, empty answers and per-attempt timeouts all count as failed attempts.
//! 2. On success, write the value to the cache under the resolver's key with the
//!    configured TTL and return [`ResolutionOutcome::Fresh`].
//! 3. On exhaustion, read the cache: a hit is [`ResolutionOutcome::Stale`], a miss
//!    is [`ResolutionOutcome::Unavailable`] carrying the last provider failure.
//!
//! Calls are independent. There is no single-flight: while the provider is down,
//! each concurrent caller runs its own loop and makes up to `max_attempts` calls.
//! Cache failures are logged and never fail the resolution.

use crate::cache::PercentageCache;
use crate::config::{Settings, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_CACHE_TTL};
use crate::provider::{PercentageProvider, ProviderError};
use crate::retry::{BuildError, RetryExhausted, RetryPolicy, RetryPolicyBuilder};
use crate::telemetry::{emit_best_effort, NullSink, PolicyEvent, ResolverEvent, TelemetrySink};
use crate::{Backoff, Jitter, Sleeper};
use rust_decimal::Decimal;
use std::time::Duration;

/// Cache key the resolver reads and writes.
pub const PERCENTAGE_KEY: &str = "percentage";

/// What a single resolution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Obtained from the provider during this call.
    Fresh(Decimal),
    /// Provider exhausted; last cached value.
    Stale(Decimal),
    /// Provider exhausted and nothing cached.
    Unavailable { attempts: usize, cause: ProviderError },
}

impl ResolutionOutcome {
    /// The resolved percentage, fresh or stale.
    pub fn value(&self) -> Option<Decimal> {
        match self {
            ResolutionOutcome::Fresh(v) | ResolutionOutcome::Stale(v) => Some(*v),
            ResolutionOutcome::Unavailable { .. } => None,
        }
    }

    /// True when the provider answered during this call.
    pub fn is_fresh(&self) -> bool {
        matches!(self, ResolutionOutcome::Fresh(_))
    }

    /// True when the answer came from the cache fallback.
    pub fn is_stale(&self) -> bool {
        matches!(self, ResolutionOutcome::Stale(_))
    }
}

/// Resolves the percentage from a flaky provider.
///
/// Each resolution makes up to `max_attempts` provider calls, each bounded by
/// the per-attempt timeout. A fresh value is written through to the cache. When
/// every attempt fails the last cached value is served if it has not expired;
/// otherwise the outcome is [`ResolutionOutcome::Unavailable`].
pub struct ValueResolver<P, C, S = NullSink> {
    provider: P,
    cache: C,
    retry: RetryPolicy,
    cache_key: String,
    ttl: Duration,
    attempt_timeout: Option<Duration>,
    sink: S,
}

impl<P, C, S> std::fmt::Debug for ValueResolver<P, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueResolver")
            .field("retry", &self.retry)
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl<P, C> ValueResolver<P, C, NullSink>
where
    P: PercentageProvider,
    C: PercentageCache,
{
    /// Start a builder with the default retry, timeout and TTL settings.
    pub fn builder(provider: P, cache: C) -> ValueResolverBuilder<P, C, NullSink> {
        ValueResolverBuilder {
            provider,
            cache,
            retry: RetryPolicy::builder(),
            cache_key: PERCENTAGE_KEY.to_string(),
            ttl: DEFAULT_CACHE_TTL,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            sink: NullSink,
        }
    }

    /// Resolver configured from [`Settings`], with the default (immediate) backoff.
    pub fn from_settings(provider: P, cache: C, settings: &Settings) -> Result<Self, BuildError> {
        settings.validate()?;
        Self::builder(provider, cache)
            .max_attempts(settings.max_attempts)
            .cache_ttl(settings.cache_ttl())
            .attempt_timeout(settings.attempt_timeout())
            .build()
    }
}

impl<P, C, S> ValueResolver<P, C, S>
where
    P: PercentageProvider,
    C: PercentageCache,
    S: TelemetrySink,
    S::Future: Send,
{
    /// Resolve the percentage once. Never fails; failure is an outcome.
    pub async fn resolve(&self) -> ResolutionOutcome {
        let fetched = self
            .retry
            .execute_observed(
                move |attempt| self.attempt(attempt),
                |attempt, err| {
                    tracing::warn!(attempt, error = %err, "percentage fetch attempt failed");
                },
            )
            .await;

        match fetched {
            Ok((value, attempt)) => {
                self.store(value).await;
                tracing::info!(%value, attempt, "fresh percentage obtained");
                self.emit(ResolverEvent::Fetched { attempt }).await;
                ResolutionOutcome::Fresh(value)
            }
            Err(RetryExhausted { attempts, last }) => match self.cached().await {
                Some(value) => {
                    tracing::warn!(%value, attempts, "provider exhausted, serving cached percentage");
                    self.emit(ResolverEvent::ServedStale { attempts }).await;
                    ResolutionOutcome::Stale(value)
                }
                None => {
                    tracing::error!(
                        attempts,
                        error = %last,
                        "no percentage available from provider or cache"
                    );
                    self.emit(ResolverEvent::Unavailable { attempts }).await;
                    ResolutionOutcome::Unavailable { attempts, cause: last }
                }
            },
        }
    }

    /// Drop the cached value so the next exhaustion reports `Unavailable`.
    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.evict(&self.cache_key).await {
            tracing::error!(key = %self.cache_key, error = %e, "failed to evict cached percentage");
        }
    }

    /// Provider calls allowed per resolution.
    pub fn max_attempts(&self) -> usize {
        self.retry.max_attempts()
    }

    async fn attempt(&self, attempt: usize) -> Result<(Decimal, usize), ProviderError> {
        let fetched = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.provider.fetch())
                .await
                .unwrap_or(Err(ProviderError::TimedOut(limit))),
            None => self.provider.fetch().await,
        };
        let outcome = match fetched {
            Ok(Some(value)) => Ok((value, attempt)),
            Ok(None) => Err(ProviderError::Empty),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            self.emit(ResolverEvent::AttemptFailed { attempt, error: e.to_string() }).await;
        }
        outcome
    }

    async fn store(&self, value: Decimal) {
        if let Err(e) = self.cache.put(&self.cache_key, value, self.ttl).await {
            tracing::error!(key = %self.cache_key, error = %e, "failed to cache percentage");
        }
    }

    async fn cached(&self) -> Option<Decimal> {
        match self.cache.get(&self.cache_key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %self.cache_key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn emit(&self, event: ResolverEvent) {
        emit_best_effort(self.sink.clone(), PolicyEvent::Resolver(event)).await;
    }
}

/// Builder for [`ValueResolver`].
pub struct ValueResolverBuilder<P, C, S> {
    provider: P,
    cache: C,
    retry: RetryPolicyBuilder,
    cache_key: String,
    ttl: Duration,
    attempt_timeout: Option<Duration>,
    sink: S,
}

impl<P, C, S> ValueResolverBuilder<P, C, S> {
    /// Total provider calls per resolution. Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.retry = self.retry.max_attempts(attempts);
        self
    }

    /// Delay between failed attempts. Defaults to none.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.retry = self.retry.backoff(backoff);
        self
    }

    /// Jitter applied to each backoff delay.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.retry = self.retry.with_jitter(jitter);
        self
    }

    /// Replace the sleeper used between attempts.
    pub fn with_sleeper<T>(mut self, sleeper: T) -> Self
    where
        T: Sleeper + 'static,
    {
        self.retry = self.retry.with_sleeper(sleeper);
        self
    }

    /// Key the value is cached under.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    /// How long a fetched value may be served as a fallback.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Bound each provider call; `None` lets calls run to completion.
    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Send a [`ResolverEvent`](crate::telemetry::ResolverEvent) to `sink` at each step.
    pub fn with_sink<T>(self, sink: T) -> ValueResolverBuilder<P, C, T>
    where
        T: TelemetrySink,
    {
        ValueResolverBuilder {
            provider: self.provider,
            cache: self.cache,
            retry: self.retry,
            cache_key: self.cache_key,
            ttl: self.ttl,
            attempt_timeout: self.attempt_timeout,
            sink,
        }
    }

    /// Validate and build the resolver.
    pub fn build(self) -> Result<ValueResolver<P, C, S>, BuildError> {
        Ok(ValueResolver {
            provider: self.provider,
            cache: self.cache,
            retry: self.retry.build()?,
            cache_key: self.cache_key,
            ttl: self.ttl,
            attempt_timeout: self.attempt_timeout,
            sink: self.sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, InMemoryCache};
    use crate::config::ConfigError;
    use crate::telemetry::MemorySink;
    use crate::InstantSleeper;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays scripted answers, then repeats the last one.
    #[derive(Debug)]
    struct Scripted {
        answers: Mutex<VecDeque<Result<Option<Decimal>, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(answers: Vec<Result<Option<Decimal>, ProviderError>>) -> Arc<Self> {
            Arc::new(Self { answers: Mutex::new(answers.into()), calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PercentageProvider for Scripted {
        async fn fetch(&self) -> Result<Option<Decimal>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                answers.front().cloned().unwrap()
            }
        }
    }

    fn down() -> Result<Option<Decimal>, ProviderError> {
        Err(ProviderError::Failed("503 from upstream".into()))
    }

    struct BrokenCache;

    #[async_trait]
    impl PercentageCache for BrokenCache {
        async fn put(&self, _: &str, _: Decimal, _: Duration) -> Result<(), CacheError> {
            Err(CacheError("connection reset".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<Decimal>, CacheError> {
            Err(CacheError("connection reset".into()))
        }
        async fn evict(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn empty_answer_counts_as_failed_attempt() {
        let provider = Scripted::new(vec![Ok(None), Ok(Some(dec!(12.5)))]);
        let resolver = ValueResolver::builder(provider.clone(), InMemoryCache::new())
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();

        assert_eq!(resolver.resolve().await, ResolutionOutcome::Fresh(dec!(12.5)));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn first_success_stops_the_loop() {
        let provider = Scripted::new(vec![Ok(Some(dec!(10)))]);
        let resolver = ValueResolver::builder(provider.clone(), InMemoryCache::new())
            .max_attempts(5)
            .build()
            .unwrap();

        assert!(resolver.resolve().await.is_fresh());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn broken_cache_does_not_break_resolution() {
        let provider = Scripted::new(vec![Ok(Some(dec!(10)))]);
        let resolver = ValueResolver::builder(provider, BrokenCache).build().unwrap();
        assert_eq!(resolver.resolve().await, ResolutionOutcome::Fresh(dec!(10)));
        resolver.invalidate().await;

        let resolver = ValueResolver::builder(Scripted::new(vec![down()]), BrokenCache)
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();
        assert!(matches!(resolver.resolve().await, ResolutionOutcome::Unavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        struct Hanging;

        #[async_trait]
        impl PercentageProvider for Hanging {
            async fn fetch(&self) -> Result<Option<Decimal>, ProviderError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Some(dec!(1)))
            }
        }

        let resolver = ValueResolver::builder(Hanging, InMemoryCache::new())
            .max_attempts(2)
            .attempt_timeout(Some(Duration::from_millis(200)))
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();

        match resolver.resolve().await {
            ResolutionOutcome::Unavailable { attempts, cause } => {
                assert_eq!(attempts, 2);
                assert_eq!(cause, ProviderError::TimedOut(Duration::from_millis(200)));
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn events_describe_the_resolution() {
        let sink = MemorySink::new();
        let cache = InMemoryCache::new();
        cache.put(PERCENTAGE_KEY, dec!(7), Duration::from_secs(60)).await.unwrap();
        let resolver = ValueResolver::builder(Scripted::new(vec![down()]), cache)
            .max_attempts(2)
            .with_sleeper(InstantSleeper)
            .with_sink(sink.clone())
            .build()
            .unwrap();

        assert_eq!(resolver.resolve().await, ResolutionOutcome::Stale(dec!(7)));

        let error = ProviderError::Failed("503 from upstream".into()).to_string();
        assert_eq!(
            sink.events(),
            vec![
                PolicyEvent::Resolver(ResolverEvent::AttemptFailed { attempt: 1, error: error.clone() }),
                PolicyEvent::Resolver(ResolverEvent::AttemptFailed { attempt: 2, error }),
                PolicyEvent::Resolver(ResolverEvent::ServedStale { attempts: 2 }),
            ]
        );
    }

    #[tokio::test]
    async fn custom_key_and_invalidate() {
        let cache = InMemoryCache::new();
        let provider = Scripted::new(vec![Ok(Some(dec!(3))), down()]);
        let resolver = ValueResolver::builder(provider, cache.clone())
            .cache_key("pct:eu")
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();

        assert!(resolver.resolve().await.is_fresh());
        assert_eq!(cache.get("pct:eu").await.unwrap(), Some(dec!(3)));

        resolver.invalidate().await;
        assert!(resolver.resolve().await.value().is_none());
    }

    #[test]
    fn zero_attempts_fail_to_build() {
        let err = ValueResolver::builder(Scripted::new(vec![down()]), InMemoryCache::new())
            .max_attempts(0)
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::InvalidMaxAttempts(0));
    }

    #[test]
    fn unvalidated_settings_are_rejected() {
        let settings: Settings = serde_json::from_str(r#"{"cache_ttl_minutes": 0}"#).unwrap();
        let err =
            ValueResolver::from_settings(Scripted::new(vec![down()]), InMemoryCache::new(), &settings)
                .unwrap_err();
        assert_eq!(err, BuildError::Settings(ConfigError::Zero("cache_ttl_minutes")));
    }
}
