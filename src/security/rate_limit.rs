//! Per-key token bucket rate limiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::security::signature::X_APP_KEY;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_access: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now.max(self.last_refill);
        self.last_access = now.max(self.last_access);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Admission control keyed by caller. Capacity equals the per-second rate,
/// but never less than one token.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    rate: f64,
    idle_ttl: Duration,
}

impl RateLimiter {
    pub fn new(rate: f64, idle_ttl: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            rate,
            idle_ttl,
        }
    }

    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    /// The bucket update happens under the map's entry lock, so concurrent
    /// callers on the same key never both take the last token.
    pub fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let capacity = self.rate.max(1.0);
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(capacity, now));
        bucket.try_acquire(capacity, self.rate, now)
    }

    /// Drop buckets not touched within the idle TTL. Returns how many went.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_access) < self.idle_ttl);
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Evict idle buckets every `interval` until shutdown.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_idle(Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "Idle rate limit buckets evicted");
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}

/// `appkey:<X-AppKey>`, else `ip:<peer address>`, else `path:<path>`.
pub fn rate_limit_key(request: &Request<Body>) -> String {
    if let Some(app_key) = request
        .headers()
        .get(X_APP_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return format!("appkey:{}", app_key);
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }
    format!("path:{}", request.uri().path())
}

/// Middleware function for rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = rate_limit_key(&request);
    if limiter.try_acquire(&key) {
        next.run(request).await
    } else {
        tracing::warn!(key = %key, "Rate limit exceeded");
        metrics::record_rate_limited();
        let mut response = Response::new(Body::from("Too Many Requests"));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_refills_at_rate() {
        let limiter = RateLimiter::new(1.0, Duration::from_secs(3600));
        let t0 = Instant::now();

        assert!(limiter.try_acquire_at("appkey:A", t0));
        assert!(!limiter.try_acquire_at("appkey:A", t0 + Duration::from_millis(100)));
        assert!(limiter.try_acquire_at("appkey:A", t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn test_refill_is_capped() {
        let limiter = RateLimiter::new(2.0, Duration::from_secs(3600));
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at("k", t0));

        let later = t0 + Duration::from_secs(60);
        assert!(limiter.try_acquire_at("k", later));
        assert!(limiter.try_acquire_at("k", later));
        assert!(!limiter.try_acquire_at("k", later));
    }

    #[test]
    fn test_fractional_rate_still_admits() {
        let limiter = RateLimiter::new(0.5, Duration::from_secs(3600));
        let t0 = Instant::now();

        assert!(limiter.try_acquire_at("k", t0));
        assert!(!limiter.try_acquire_at("k", t0 + Duration::from_secs(1)));
        assert!(limiter.try_acquire_at("k", t0 + Duration::from_millis(2100)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_token() {
        let limiter = Arc::new(RateLimiter::new(1.0, Duration::from_secs(3600)));
        let t0 = Instant::now();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_acquire_at("appkey:shared", t0) })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1.0, Duration::from_secs(3600));
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at("appkey:A", t0));
        assert!(limiter.try_acquire_at("appkey:B", t0));
        assert!(!limiter.try_acquire_at("appkey:A", t0));
    }

    #[test]
    fn test_evict_idle() {
        let limiter = RateLimiter::new(1.0, Duration::from_secs(10));
        let t0 = Instant::now();
        limiter.try_acquire_at("old", t0);
        limiter.try_acquire_at("fresh", t0 + Duration::from_secs(8));

        assert_eq!(limiter.evict_idle(t0 + Duration::from_secs(11)), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_key_priority() {
        let with_key = Request::builder()
            .uri("/a")
            .header("X-AppKey", "AK1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(rate_limit_key(&with_key), "appkey:AK1");

        let mut with_peer = Request::builder().uri("/a").body(Body::empty()).unwrap();
        with_peer
            .extensions_mut()
            .insert(ConnectInfo("10.1.2.3:5555".parse::<SocketAddr>().unwrap()));
        assert_eq!(rate_limit_key(&with_peer), "ip:10.1.2.3");

        let bare = Request::builder().uri("/a/b?x=1").body(Body::empty()).unwrap();
        assert_eq!(rate_limit_key(&bare), "path:/a/b");
    }
}
