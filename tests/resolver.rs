mod common;

use common::{down, init_tracing, up, ScriptedProvider};
use rust_decimal_macros::dec;
use std::time::Duration;
use surcharge::cache::PercentageCache;
use surcharge::resolver::PERCENTAGE_KEY;
use surcharge::{
    Backoff, CalcError, Calculator, InMemoryCache, InstantSleeper, ManualClock, PercentageSource,
    ProviderError, ResolutionOutcome, TrackingSleeper, ValueResolver,
};

#[tokio::test]
async fn exhausted_provider_with_empty_cache_is_unavailable() {
    init_tracing();
    let provider = ScriptedProvider::always_down();
    let resolver = ValueResolver::builder(provider.clone(), InMemoryCache::new())
        .max_attempts(3)
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let calculator = Calculator::new(resolver);

    let err = calculator.calculate(dec!(5), dec!(5)).await.unwrap_err();
    match err {
        CalcError::PercentageUnavailable { attempts, source } => {
            assert_eq!(attempts, 3);
            assert_eq!(source, ProviderError::Failed("connection refused".into()));
        }
        other => panic!("expected unavailable, got {other:?}"),
    }
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn success_on_last_attempt_is_fresh_and_cached() {
    init_tracing();
    let provider = ScriptedProvider::new(vec![down(), down(), up(dec!(20))]);
    let cache = InMemoryCache::new();
    let resolver = ValueResolver::builder(provider.clone(), cache.clone())
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();

    assert_eq!(resolver.resolve().await, ResolutionOutcome::Fresh(dec!(20)));
    assert_eq!(provider.calls(), 3);
    assert_eq!(cache.get(PERCENTAGE_KEY).await.unwrap(), Some(dec!(20)));
}

#[tokio::test]
async fn exhausted_provider_falls_back_to_last_value() {
    init_tracing();
    let cache = InMemoryCache::new();
    cache.put(PERCENTAGE_KEY, dec!(15), Duration::from_secs(60)).await.unwrap();
    let resolver = ValueResolver::builder(ScriptedProvider::always_down(), cache)
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let calculator = Calculator::new(resolver);

    let calc = calculator.calculate(dec!(4), dec!(6)).await.unwrap();
    assert_eq!(calc.result.to_string(), "11.50");
    assert_eq!(calc.source, PercentageSource::Cached);
    assert_eq!(calc.details, "(4.0 + 6.0) + 15.0% (using last cached value)");
}

#[tokio::test]
async fn recovered_provider_refreshes_the_cache() {
    let provider = ScriptedProvider::new(vec![up(dec!(10)), down(), down(), down(), up(dec!(12))]);
    let cache = InMemoryCache::new();
    let resolver = ValueResolver::builder(provider.clone(), cache.clone())
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();

    assert_eq!(resolver.resolve().await, ResolutionOutcome::Fresh(dec!(10)));
    assert_eq!(resolver.resolve().await, ResolutionOutcome::Stale(dec!(10)));
    assert_eq!(resolver.resolve().await, ResolutionOutcome::Fresh(dec!(12)));
    assert_eq!(cache.get(PERCENTAGE_KEY).await.unwrap(), Some(dec!(12)));
    assert_eq!(provider.calls(), 5);
}

#[tokio::test]
async fn expired_entry_is_not_served() {
    let clock = ManualClock::new();
    let cache = InMemoryCache::with_clock(clock.clone());
    let resolver = ValueResolver::builder(
        ScriptedProvider::new(vec![up(dec!(10)), down()]),
        cache,
    )
    .cache_ttl(Duration::from_secs(30 * 60))
    .with_sleeper(InstantSleeper)
    .build()
    .unwrap();

    assert!(resolver.resolve().await.is_fresh());

    clock.advance(Duration::from_secs(29 * 60));
    assert_eq!(resolver.resolve().await, ResolutionOutcome::Stale(dec!(10)));

    clock.advance(Duration::from_secs(60));
    assert!(matches!(resolver.resolve().await, ResolutionOutcome::Unavailable { attempts: 3, .. }));
}

#[tokio::test]
async fn backoff_waits_between_attempts_only() {
    let sleeper = TrackingSleeper::new();
    let resolver = ValueResolver::builder(ScriptedProvider::always_down(), InMemoryCache::new())
        .max_attempts(3)
        .backoff(Backoff::exponential(Duration::from_millis(100)))
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap();

    assert_eq!(resolver.resolve().await.value(), None);
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_each_run_their_own_attempts() {
    let provider = ScriptedProvider::always_down();
    let cache = InMemoryCache::new();
    cache.put(PERCENTAGE_KEY, dec!(5), Duration::from_secs(60)).await.unwrap();
    let resolver = ValueResolver::builder(provider.clone(), cache)
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let calculator = Calculator::new(resolver);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let calculator = calculator.clone();
            tokio::spawn(async move { calculator.calculate(dec!(50), dec!(50)).await })
        })
        .collect();
    for handle in handles {
        let calc = handle.await.unwrap().unwrap();
        assert_eq!(calc.result, dec!(105.00));
    }
    assert_eq!(provider.calls(), 8 * 3);
}
