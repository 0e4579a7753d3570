use super::{
    ip::{client_identity, normalize_identity},
    wants_json,
};
use crate::{config::RateLimitConfig, error::AppError, state::AppState};
use axum::{
    extract::{connect_info::ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Seconds advertised in `Retry-After` when a request is denied.
const RETRY_AFTER_SECS: u64 = 1;

/// Token bucket for a single client identity.
///
/// Invariant: `0 <= tokens <= burst`. Only [`TokenBucket::allow`] mutates it.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    rps: f64,
    burst: f64,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(rps: f64, burst: f64, now: Instant) -> Self {
        Self { tokens: burst, last_refill: now, rps, burst }
    }

    /// Refills for the time elapsed since the last refill, then tries to take one token.
    pub fn allow(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        // An instant before the last refill counts as zero elapsed.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rps).min(self.burst);
            self.last_refill = now;
        }
    }

    /// Current allowance without refilling.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Whether a refill at `now` would bring the bucket back to capacity.
    pub fn is_full_at(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * self.rps >= self.burst
    }
}

/// Per-identity token-bucket limiter.
///
/// Cloning is cheap and every clone shares the same bucket registry. Lookups take a shared
/// read lock; the write lock is only taken to insert a bucket for an unseen identity or
/// to sweep. Each bucket has its own mutex, so refill and consume happen atomically.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `requests_per_second` - Sustained refill rate per identity.
    /// * `burst_capacity` - Bucket capacity, i.e. the largest burst admitted at once.
    pub fn new(requests_per_second: u32, burst_capacity: u32) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            rps: f64::from(requests_per_second),
            burst: f64::from(burst_capacity),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.requests_per_second, cfg.burst_capacity)
    }

    /// Decides whether a request from `identity` at `now` is admitted.
    ///
    /// An empty identity is accounted under [`super::ip::UNKNOWN_IDENTITY`].
    pub fn allow(&self, identity: &str, now: Instant) -> bool {
        let bucket = self.bucket(normalize_identity(identity), now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.allow(now)
    }

    /// [`RateLimiter::allow`] against the monotonic clock.
    pub fn check(&self, identity: &str) -> bool {
        self.allow(identity, Instant::now())
    }

    fn bucket(&self, identity: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().unwrap_or_else(PoisonError::into_inner).get(identity) {
            return Arc::clone(bucket);
        }
        // Re-checked under the write lock by the entry API: concurrent first requests
        // for one identity end up sharing a single bucket.
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.rps, self.burst, now))));
        Arc::clone(bucket)
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes buckets that would be back at full capacity by `now` and that no request
    /// holds. A recreated bucket starts full, so removal never changes a decision.
    ///
    /// Returns the number of evicted identities.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            // Holding the write lock, a count of 1 means no request has this bucket in hand.
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let full = bucket.lock().unwrap_or_else(PoisonError::into_inner).is_full_at(now);
            !full
        });
        before - buckets.len()
    }
}

/// Spawns the periodic bucket sweep. The task ends when `cancel` fires.
pub fn spawn_sweeper(limiter: RateLimiter, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = limiter.evict_idle(Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = limiter.len(), "swept idle rate limit buckets");
                    }
                }
            }
        }
        tracing::debug!("rate limit sweeper stopped");
    })
}

/// Response for a denied request.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRejection {
    /// Render the JSON error envelope instead of plain text.
    pub json: bool,
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        if self.json {
            return AppError::RateLimited { retry_after_seconds: RETRY_AFTER_SECS }.into_response();
        }
        (
            StatusCode::TOO_MANY_REQUESTS,
            [
                (header::RETRY_AFTER, RETRY_AFTER_SECS.to_string()),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
            "Too Many Requests",
        )
            .into_response()
    }
}

/// An Axum middleware admitting requests through the shared [`RateLimiter`].
///
/// The client identity is the forwarded or peer address (see [`client_identity`]).
/// Denied requests get `429 Too Many Requests` with `Retry-After` and never reach
/// downstream handlers.
pub async fn rate_limit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let remote_ip = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
    let identity = client_identity(req.headers(), remote_ip, state.config.server.trust_proxy_headers);

    if !state.rate_limiter.check(&identity) {
        state.metrics.inc_rate_limited();
        tracing::debug!(%identity, method = %req.method(), path = %req.uri().path(), "rate limit exceeded");
        return RateLimitRejection { json: wants_json(req.headers()) }.into_response();
    }

    state.metrics.inc_allowed();
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::ip::UNKNOWN_IDENTITY;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_bucket_allow_and_refill() {
        let mut now = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 2.0, now);

        // Consume available burst.
        assert!(bucket.allow(now));
        assert!(bucket.allow(now));
        assert!(!bucket.allow(now));

        // 600ms at 2 rps refills 1.2 tokens: one more request fits.
        now += Duration::from_millis(600);
        assert!(bucket.allow(now));
        assert!(!bucket.allow(now));

        // Long enough to be back at burst.
        now += Duration::from_secs(2);
        assert!(bucket.allow(now));
        assert!(bucket.allow(now));
        assert!(!bucket.allow(now));
    }

    #[test]
    fn test_denial_leaves_fraction_untouched() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 1.0, start);
        assert!(bucket.allow(start));

        let now = start + Duration::from_millis(400);
        assert!(!bucket.allow(now));
        assert!((bucket.tokens() - 0.4).abs() < 1e-9);

        // Fractions accumulate across calls.
        assert!(bucket.allow(now + Duration::from_millis(700)));
    }

    #[test]
    fn test_refill_is_clamped_to_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(100.0, 3.0, start);
        bucket.allow(start);
        bucket.allow(start + Duration::from_secs(3600));
        assert!(bucket.tokens() <= 3.0);
        assert!((bucket.tokens() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_going_backwards_does_not_refill() {
        let later = Instant::now() + Duration::from_secs(10);
        let mut bucket = TokenBucket::new(5.0, 1.0, later);
        assert!(bucket.allow(later));
        // An earlier instant is treated as zero elapsed.
        let earlier = later - Duration::from_secs(5);
        assert!(!bucket.allow(earlier));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_exact_burst_then_deny() {
        for (rps, burst) in [(1, 1), (10, 20), (3, 7), (50, 5)] {
            let limiter = RateLimiter::new(rps, burst);
            let now = Instant::now();
            for i in 0..burst {
                assert!(limiter.allow("198.51.100.4", now), "request {} of burst {} denied", i + 1, burst);
            }
            assert!(!limiter.allow("198.51.100.4", now), "request past burst {} admitted", burst);
        }
    }

    #[test]
    fn test_different_identities() {
        let limiter = RateLimiter::new(1, 1);
        let now = Instant::now();

        // Both identities get their own bucket
        assert!(limiter.allow("127.0.0.1", now));
        assert!(limiter.allow("127.0.0.2", now));

        // Both are limited on the second request
        assert!(!limiter.allow("127.0.0.1", now));
        assert!(!limiter.allow("127.0.0.2", now));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_empty_identity_uses_unknown_bucket() {
        let limiter = RateLimiter::new(1, 1);
        let now = Instant::now();
        assert!(limiter.allow("", now));
        assert!(!limiter.allow(UNKNOWN_IDENTITY, now));
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_concurrent_requests_never_over_admit() {
        let limiter = RateLimiter::new(1, 25);
        let now = Instant::now();
        let threads = 16;
        let per_thread = 10;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..per_thread).filter(|_| limiter.allow("10.1.1.1", now)).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 25);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_evict_only_full_buckets() {
        let limiter = RateLimiter::new(1, 2);
        let now = Instant::now();
        assert!(limiter.allow("idle", now));
        assert!(limiter.allow("busy", now));
        assert!(limiter.allow("busy", now));

        // After one second "idle" is back at 2 tokens, "busy" only has 1.
        let later = now + Duration::from_secs(1);
        assert_eq!(limiter.evict_idle(later), 1);
        assert_eq!(limiter.len(), 1);

        // The surviving bucket keeps its state.
        assert!(limiter.allow("busy", later));
        assert!(!limiter.allow("busy", later));
    }

    #[test]
    fn test_evict_skips_buckets_in_use() {
        let limiter = RateLimiter::new(1, 1);
        let now = Instant::now();
        let held = limiter.bucket("held", now);
        assert_eq!(limiter.evict_idle(now + Duration::from_secs(60)), 0);
        drop(held);
        assert_eq!(limiter.evict_idle(now + Duration::from_secs(60)), 1);
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let limiter = RateLimiter::new(1000, 1);
        assert!(limiter.check("192.0.2.10"));

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(limiter.clone(), Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_plain_rejection_headers() {
        let res = RateLimitRejection { json: false }.into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[header::RETRY_AFTER], "1");
        assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");
    }
}
