use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Request guard counters for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub requests_allowed: Arc<AtomicU64>,
    pub requests_rate_limited: Arc<AtomicU64>,
    pub csrf_tokens_issued: Arc<AtomicU64>,
    pub csrf_rejections: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_allowed: Arc::new(AtomicU64::new(0)),
            requests_rate_limited: Arc::new(AtomicU64::new(0)),
            csrf_tokens_issued: Arc::new(AtomicU64::new(0)),
            csrf_rejections: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_allowed(&self) {
        self.requests_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_csrf_issued(&self) {
        self.csrf_tokens_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_csrf_rejected(&self) {
        self.csrf_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// `tracked_clients` is the current size of the rate limiter registry.
    pub fn get_snapshot(&self, tracked_clients: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_allowed: self.requests_allowed.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            csrf_tokens_issued: self.csrf_tokens_issued.load(Ordering::Relaxed),
            csrf_rejections: self.csrf_rejections.load(Ordering::Relaxed),
            tracked_clients,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests_allowed: u64,
    pub requests_rate_limited: u64,
    pub csrf_tokens_issued: u64,
    pub csrf_rejections: u64,
    pub tracked_clients: usize,
    pub uptime_seconds: u64,
}
