//! Metrics collection utilities.
//!
//! Counts requests globally and per route template (`/api/v1/whois/{domain}`
//! rather than one bucket per queried domain), keeps a bounded latency window
//! for percentiles, and tracks token refreshes.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_WINDOW: usize = 128;

/// Aggregated metrics across all routes.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub token_refreshes: u64,
    pub token_failures: u64,
    /// Arithmetic mean over every response received.
    pub mean_latency: Option<Duration>,
    /// 95th percentile over the most recent responses.
    pub p95_latency: Option<Duration>,
}

/// Per-route metrics snapshot.
#[derive(Debug, Clone)]
pub struct RouteStats {
    pub route: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub mean_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub routes: Vec<RouteStats>,
}

impl MetricsSnapshot {
    pub fn route(&self, route: &str) -> Option<&RouteStats> {
        self.routes.iter().find(|stats| stats.route == route)
    }
}

/// Running latency totals plus a sliding window of recent samples.
#[derive(Debug)]
struct LatencyTracker {
    total: Duration,
    samples: u64,
    recent: VecDeque<Duration>,
    window: usize,
}

impl LatencyTracker {
    fn new(window: usize) -> Self {
        Self {
            total: Duration::ZERO,
            samples: 0,
            recent: VecDeque::with_capacity(window),
            window,
        }
    }

    fn push(&mut self, latency: Duration) {
        self.total = self.total.saturating_add(latency);
        self.samples += 1;
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
    }

    fn mean(&self) -> Option<Duration> {
        (self.samples > 0)
            .then(|| Duration::from_nanos((self.total.as_nanos() / self.samples as u128) as u64))
    }

    fn p95(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        let mut sorted: Vec<_> = self.recent.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        Some(sorted[idx])
    }
}

#[derive(Debug)]
struct RouteAccumulator {
    total_requests: u64,
    successes: u64,
    failures: u64,
    latency: LatencyTracker,
    consecutive_failures: u32,
    last_status: Option<u16>,
}

impl RouteAccumulator {
    fn new(window: usize) -> Self {
        Self {
            total_requests: 0,
            successes: 0,
            failures: 0,
            latency: LatencyTracker::new(window),
            consecutive_failures: 0,
            last_status: None,
        }
    }

    fn record(&mut self, status: u16, latency: Option<Duration>) {
        self.total_requests += 1;
        self.last_status = Some(status);

        if is_success(status) {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if let Some(latency) = latency {
            self.latency.push(latency);
        }
    }

    fn stats(&self, route: &str) -> RouteStats {
        RouteStats {
            route: route.to_string(),
            total_requests: self.total_requests,
            successes: self.successes,
            failures: self.failures,
            mean_latency: self.latency.mean(),
            p95_latency: self.latency.p95(),
            consecutive_failures: self.consecutive_failures,
            last_status: self.last_status,
        }
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[derive(Debug)]
struct MetricsState {
    started_at: DateTime<Utc>,
    total_requests: u64,
    successes: u64,
    failures: u64,
    token_refreshes: u64,
    token_failures: u64,
    latency: LatencyTracker,
    window: usize,
    routes: HashMap<String, RouteAccumulator>,
}

impl MetricsState {
    fn new(window: usize) -> Self {
        Self {
            started_at: Utc::now(),
            total_requests: 0,
            successes: 0,
            failures: 0,
            token_refreshes: 0,
            token_failures: 0,
            latency: LatencyTracker::new(window),
            window,
            routes: HashMap::new(),
        }
    }

    fn record(&mut self, route: &str, status: u16, latency: Option<Duration>) {
        self.total_requests += 1;
        if is_success(status) {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if let Some(latency) = latency {
            self.latency.push(latency);
        }

        let window = self.window;
        self.routes
            .entry(route.to_string())
            .or_insert_with(|| RouteAccumulator::new(window))
            .record(status, latency);
    }
}

/// Thread-safe metrics collector shared with the event handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Collector whose percentile window holds `window` samples (at least 16).
    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_response(&self, route: &str, status: u16, latency: Duration) {
        self.state().record(route, status, Some(latency));
    }

    /// Record a request that never produced a response (status 0).
    pub fn record_error(&self, route: &str) {
        self.state().record(route, 0, None);
    }

    pub fn record_token_refresh(&self, success: bool) {
        let mut guard = self.state();
        if success {
            guard.token_refreshes += 1;
        } else {
            guard.token_failures += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.state();
        MetricsSnapshot {
            global: GlobalStats {
                started_at: guard.started_at,
                total_requests: guard.total_requests,
                successes: guard.successes,
                failures: guard.failures,
                token_refreshes: guard.token_refreshes,
                token_failures: guard.token_failures,
                mean_latency: guard.latency.mean(),
                p95_latency: guard.latency.p95(),
            },
            routes: guard
                .routes
                .iter()
                .map(|(route, acc)| acc.stats(route))
                .collect(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHOIS: &str = "/api/v1/whois/{domain}";

    #[test]
    fn records_success_and_failure() {
        let metrics = MetricsCollector::new();
        metrics.record_response(WHOIS, 200, Duration::from_millis(150));
        metrics.record_response(WHOIS, 401, Duration::from_millis(40));
        metrics.record_error(WHOIS);

        let snapshot = metrics.snapshot();
        let stats = snapshot.route(WHOIS).unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.consecutive_failures, 2);
        assert_eq!(stats.last_status, Some(0));
        assert_eq!(snapshot.global.total_requests, 3);
    }

    #[test]
    fn mean_is_arithmetic_over_all_samples() {
        let metrics = MetricsCollector::with_window(16);
        for ms in [100, 200, 300, 400] {
            metrics.record_response(WHOIS, 200, Duration::from_millis(ms));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.global.mean_latency, Some(Duration::from_millis(250)));
        assert_eq!(snapshot.route(WHOIS).unwrap().mean_latency, Some(Duration::from_millis(250)));
        assert_eq!(snapshot.global.p95_latency, Some(Duration::from_millis(400)));
    }

    #[test]
    fn percentile_window_is_bounded() {
        let metrics = MetricsCollector::with_window(16);
        for _ in 0..16 {
            metrics.record_response(WHOIS, 200, Duration::from_secs(5));
        }
        for _ in 0..16 {
            metrics.record_response(WHOIS, 200, Duration::from_millis(10));
        }
        let global = metrics.snapshot().global;
        assert_eq!(global.p95_latency, Some(Duration::from_millis(10)));
        assert_eq!(global.total_requests, 32);
    }

    #[test]
    fn counts_token_refreshes() {
        let metrics = MetricsCollector::with_window(4);
        metrics.record_token_refresh(true);
        metrics.record_token_refresh(true);
        metrics.record_token_refresh(false);
        let global = metrics.snapshot().global;
        assert_eq!(global.token_refreshes, 2);
        assert_eq!(global.token_failures, 1);
    }
}
