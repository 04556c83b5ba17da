use crate::clock::{Clock, MonotonicClock};
use crate::config::{ConfigError, Settings, DEFAULT_QUOTA, DEFAULT_WINDOW};
use crate::rate_limit::{Decision, RateLimiter};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Request count for one client inside its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientWindow {
    /// Clock reading at the first request of the window.
    pub start_millis: u64,
    /// Requests admitted so far in the window.
    pub count: u32,
}

/// Invalid limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterBuildError {
    #[error("quota must be > 0")]
    ZeroQuota,
    #[error("window must be > 0")]
    ZeroWindow,
    /// The [`Settings`] the limiter was derived from failed validation.
    #[error("invalid settings: {0}")]
    Settings(#[from] ConfigError),
}

/// Fixed-window limiter keyed by client identity.
///
/// Each client has its own mutex-guarded window, so concurrent requests from one
/// client are decided one at a time while different clients only share the map.
#[derive(Debug)]
pub struct FixedWindowLimiter<C = MonotonicClock> {
    windows: DashMap<String, Arc<Mutex<ClientWindow>>>,
    quota: u32,
    window: Duration,
    clock: C,
}

impl FixedWindowLimiter<MonotonicClock> {
    /// Start a builder with the default quota and window on the monotonic clock.
    pub fn builder() -> FixedWindowLimiterBuilder<MonotonicClock> {
        FixedWindowLimiterBuilder {
            quota: DEFAULT_QUOTA,
            window: DEFAULT_WINDOW,
            clock: MonotonicClock::default(),
        }
    }

    /// Build a limiter from validated [`Settings`].
    pub fn from_settings(settings: &Settings) -> Result<Self, LimiterBuildError> {
        settings.validate()?;
        Self::builder()
            .quota(settings.rate_limit_quota)
            .window(settings.rate_limit_window())
            .build()
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    /// Current window of `client_id`, if one exists.
    pub fn window_of(&self, client_id: &str) -> Option<ClientWindow> {
        let slot = self.windows.get(client_id)?.clone();
        let window = *slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(window)
    }

    /// Number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Forget clients whose window has already ended. Their next request would
    /// have reset the window anyway, so admission decisions do not change.
    pub fn prune_expired(&self) {
        let now = self.clock.now_millis();
        let window_ms = self.window_millis();
        self.windows.retain(|_, slot| {
            // Someone outside the map still holds this window; leave it alone.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let w = slot.lock().unwrap_or_else(PoisonError::into_inner);
            now.saturating_sub(w.start_millis) < window_ms
        });
    }

    fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    fn slot(&self, client_id: &str, now: u64) -> Arc<Mutex<ClientWindow>> {
        if let Some(slot) = self.windows.get(client_id) {
            return slot.clone();
        }
        self.windows
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientWindow { start_millis: now, count: 0 })))
            .clone()
    }
}

impl<C: Clock> RateLimiter for FixedWindowLimiter<C> {
    fn check(&self, client_id: &str) -> Decision {
        let now = self.clock.now_millis();
        let window_ms = self.window_millis();
        let slot = self.slot(client_id, now);
        let mut w = slot.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = now.saturating_sub(w.start_millis);
        if elapsed >= window_ms {
            w.start_millis = now;
            w.count = 0;
        }

        if w.count < self.quota {
            w.count += 1;
            Decision::Allowed { remaining: self.quota - w.count }
        } else {
            let elapsed = now.saturating_sub(w.start_millis);
            Decision::Denied { retry_after: Duration::from_millis(window_ms.saturating_sub(elapsed)) }
        }
    }

    fn quota(&self) -> u32 {
        self.quota
    }

    fn window(&self) -> Duration {
        self.window
    }
}

/// Builder for [`FixedWindowLimiter`].
pub struct FixedWindowLimiterBuilder<C> {
    quota: u32,
    window: Duration,
    clock: C,
}

impl<C: Clock> FixedWindowLimiterBuilder<C> {
    /// Requests admitted per client per window. Must be > 0.
    pub fn quota(mut self, quota: u32) -> Self {
        self.quota = quota;
        self
    }

    /// Window length. Must be > 0.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Replace the time source, e.g. with a [`ManualClock`](crate::ManualClock) in tests.
    pub fn clock<T: Clock>(self, clock: T) -> FixedWindowLimiterBuilder<T> {
        FixedWindowLimiterBuilder { quota: self.quota, window: self.window, clock }
    }

    /// Validate and build the limiter.
    pub fn build(self) -> Result<FixedWindowLimiter<C>, LimiterBuildError> {
        if self.quota == 0 {
            return Err(LimiterBuildError::ZeroQuota);
        }
        if self.window.is_zero() {
            return Err(LimiterBuildError::ZeroWindow);
        }
        Ok(FixedWindowLimiter {
            windows: DashMap::new(),
            quota: self.quota,
            window: self.window,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(quota: u32) -> (FixedWindowLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = FixedWindowLimiter::builder()
            .quota(quota)
            .window(Duration::from_secs(60))
            .clock(clock.clone())
            .build()
            .unwrap();
        (limiter, clock)
    }

    #[test]
    fn remaining_counts_down() {
        let (limiter, _) = limiter(3);
        assert_eq!(limiter.check("a"), Decision::Allowed { remaining: 2 });
        assert_eq!(limiter.check("a"), Decision::Allowed { remaining: 1 });
        assert_eq!(limiter.check("a"), Decision::Allowed { remaining: 0 });
    }

    #[test]
    fn denial_reports_time_left_in_window() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.is_allowed("a"));
        clock.advance(Duration::from_secs(45));
        assert_eq!(limiter.check("a"), Decision::Denied { retry_after: Duration::from_secs(15) });
    }

    #[test]
    fn rejected_requests_do_not_grow_the_count() {
        let (limiter, _) = limiter(2);
        for _ in 0..5 {
            limiter.check("a");
        }
        assert_eq!(limiter.window_of("a").unwrap().count, 2);
    }

    #[test]
    fn boundary_burst_is_allowed() {
        let (limiter, clock) = limiter(3);
        clock.advance(Duration::from_millis(59_000));
        for _ in 0..3 {
            assert!(limiter.is_allowed("a"));
        }
        clock.advance(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.is_allowed("a"));
        }
        assert!(!limiter.is_allowed("a"));
    }

    #[test]
    fn prune_drops_only_expired_windows() {
        let (limiter, clock) = limiter(3);
        limiter.check("old");
        clock.advance(Duration::from_secs(30));
        limiter.check("new");
        clock.advance(Duration::from_secs(30));

        limiter.prune_expired();
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.window_of("old").is_none());
        assert!(limiter.window_of("new").is_some());
    }

    #[test]
    fn zero_config_is_rejected() {
        assert_eq!(
            FixedWindowLimiter::builder().quota(0).build().unwrap_err(),
            LimiterBuildError::ZeroQuota
        );
        assert_eq!(
            FixedWindowLimiter::builder().window(Duration::ZERO).build().unwrap_err(),
            LimiterBuildError::ZeroWindow
        );
    }

    #[test]
    fn from_settings_validates_first() {
        let settings: Settings = serde_json::from_str(r#"{"rate_limit_quota": 0}"#).unwrap();
        assert_eq!(
            FixedWindowLimiter::from_settings(&settings).unwrap_err(),
            LimiterBuildError::Settings(ConfigError::Zero("rate_limit_quota"))
        );
    }
}
