use governor::clock::{ Clock, DefaultClock };
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::Quota;
use log::warn;
use std::error::Error;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type KeyedLimiter<C> = governor::RateLimiter<
    String,
    DashMapStateStore<String>,
    C,
    NoOpMiddleware<<C as Clock>::Instant>
>;

/// Per-identity request budget backed by governor's GCRA state.
///
/// Built with [`RateLimiter::per_window`], a caller gets `limit` requests at
/// once and no more inside any span shorter than `window`. Spent budget comes
/// back one request per `window`.
pub struct RateLimiter<C: Clock = DefaultClock> {
    inner: KeyedLimiter<C>,
}

impl RateLimiter {
    pub fn new(quota: Quota) -> Self {
        Self::with_clock(quota, DefaultClock::default())
    }

    pub fn per_window(
        limit: u32,
        window: Duration
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self::new(window_quota(limit, window)?))
    }

    pub fn per_minute(limit: u32) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Self::per_window(limit, Duration::from_secs(60))
    }
}

/// One cell per `window`, `limit` cells of burst. GCRA then admits at most
/// `limit` calls in any span shorter than `window`.
pub fn window_quota(limit: u32, window: Duration) -> Result<Quota, Box<dyn Error + Send + Sync>> {
    let limit = NonZeroU32::new(limit).ok_or("rate limit must be greater than zero")?;
    let quota = Quota::with_period(window).ok_or("rate limit window must be greater than zero")?;
    Ok(quota.allow_burst(limit))
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(quota: Quota, clock: C) -> Self {
        Self { inner: governor::RateLimiter::dashmap_with_clock(quota, clock) }
    }

    /// Consumes one unit of the caller's budget when available. A denied
    /// call leaves the budget untouched.
    pub fn allow(&self, identity: &str) -> bool {
        match self.inner.check_key(&identity.to_string()) {
            Ok(()) => true,
            Err(_) => {
                warn!("Rate limit exceeded for {}", identity);
                false
            }
        }
    }

    /// Drops state for identities whose budget has fully replenished.
    pub fn retain_recent(&self) {
        self.inner.retain_recent();
        self.inner.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub fn spawn_pruner(limiter: Arc<RateLimiter>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            limiter.retain_recent();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn fake_limiter(limit: u32, window_secs: u64) -> (RateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let quota = window_quota(limit, Duration::from_secs(window_secs)).unwrap();
        (RateLimiter::with_clock(quota, clock.clone()), clock)
    }

    #[test]
    fn nth_plus_one_call_in_window_is_denied() {
        let limiter = RateLimiter::per_minute(3).unwrap();
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn budget_holds_for_the_whole_rolling_window() {
        let (limiter, clock) = fake_limiter(3, 60);
        for _ in 0..3 {
            assert!(limiter.allow("10.0.0.1"));
        }

        clock.advance(Duration::from_millis(20_500));
        assert!(!limiter.allow("10.0.0.1"));
        clock.advance(Duration::from_millis(20_500));
        assert!(!limiter.allow("10.0.0.1"));
        clock.advance(Duration::from_millis(18_999));
        assert!(!limiter.allow("10.0.0.1"));

        clock.advance(Duration::from_millis(1));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn spread_out_calls_never_exceed_limit_per_window() {
        let (limiter, clock) = fake_limiter(3, 60);
        let mut admitted_at = Vec::new();
        for second in 0..600u64 {
            if limiter.allow("caller") {
                admitted_at.push(second);
            }
            clock.advance(Duration::from_secs(1));
        }
        for (i, start) in admitted_at.iter().enumerate() {
            let in_window = admitted_at[i..]
                .iter()
                .take_while(|t| **t < start + 60)
                .count();
            assert!(in_window <= 3, "{} admitted in the minute from t={}", in_window, start);
        }
    }

    #[test]
    fn identities_have_separate_budgets() {
        let limiter = RateLimiter::per_minute(1).unwrap();
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(RateLimiter::per_minute(0).is_err());
        assert!(RateLimiter::per_window(3, Duration::ZERO).is_err());
    }

    #[test]
    fn replenished_identities_are_pruned() {
        let (limiter, clock) = fake_limiter(2, 60);
        assert!(limiter.allow("a"));
        assert_eq!(limiter.len(), 1);
        clock.advance(Duration::from_secs(180));
        limiter.retain_recent();
        assert!(limiter.is_empty());
    }

    #[test]
    fn concurrent_callers_never_exceed_the_budget() {
        let limiter = Arc::new(RateLimiter::per_minute(5).unwrap());
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.allow("same"))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
    }
}
