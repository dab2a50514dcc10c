//! Client event system.
//!
//! Provides hooks for metrics, logging, and custom reactions around requests,
//! token refreshes and retries.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;

/// Emitted before each attempt is sent.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub endpoint: String,
    /// Endpoint template, e.g. `/api/v1/whois/{domain}`.
    pub route: String,
    pub method: Method,
    pub attempt: u32,
    pub signed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once a response (any status) has been received.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub endpoint: String,
    pub route: String,
    pub method: Method,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenRefreshEvent {
    pub success: bool,
    pub expires_at_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub endpoint: String,
    pub route: String,
    pub status: u16,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub endpoint: String,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    TokenRefresh(TokenRefreshEvent),
    Error(ErrorEvent),
    Retry(RetryEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ClientEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ClientEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ClientEvent) {
        match event {
            ClientEvent::Request(req) => {
                log::debug!(
                    "-> {} {} (attempt {}, signed={})",
                    req.method,
                    req.endpoint,
                    req.attempt,
                    req.signed
                );
            }
            ClientEvent::Response(resp) => {
                log::debug!(
                    "<- {} {} -> {} ({:.2}s)",
                    resp.method,
                    resp.endpoint,
                    resp.status,
                    resp.latency.as_secs_f64()
                );
            }
            ClientEvent::TokenRefresh(refresh) => {
                if refresh.success {
                    log::info!("token refreshed, expires at {:?}", refresh.expires_at_ms);
                } else {
                    log::warn!("token refresh failed");
                }
            }
            ClientEvent::Error(error) => {
                log::warn!("{} failed ({}) -> {}", error.endpoint, error.status, error.error);
            }
            ClientEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s: {}",
                    retry.endpoint,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &ClientEvent) {
        match event {
            ClientEvent::Response(resp) => {
                self.metrics
                    .record_response(&resp.route, resp.status, resp.latency);
            }
            ClientEvent::Error(error) if error.status == 0 => {
                self.metrics.record_error(&error.route);
            }
            ClientEvent::TokenRefresh(refresh) => {
                self.metrics.record_token_refresh(refresh.success);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &ClientEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.dispatch(ClientEvent::Error(ErrorEvent {
            endpoint: "/api/v1/dns/example.com".into(),
            route: "/api/v1/dns/{domain}".into(),
            status: 0,
            error: "timeout".into(),
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }

    #[test]
    fn metrics_handler_counts_network_errors_only() {
        let metrics = MetricsCollector::new();
        let handler = MetricsHandler::new(metrics.clone());
        for status in [0, 404] {
            handler.handle(&ClientEvent::Error(ErrorEvent {
                endpoint: "/api/health".into(),
                route: "/api/health".into(),
                status,
                error: "boom".into(),
                timestamp: Utc::now(),
            }));
        }
        assert_eq!(metrics.snapshot().global.failures, 1);
    }

    #[test]
    fn metrics_handler_groups_by_route() {
        let metrics = MetricsCollector::new();
        let handler = MetricsHandler::new(metrics.clone());
        for domain in ["a.com", "b.com", "c.com"] {
            handler.handle(&ClientEvent::Response(ResponseEvent {
                endpoint: format!("/api/v1/whois/{domain}"),
                route: "/api/v1/whois/{domain}".into(),
                method: Method::GET,
                status: 200,
                latency: Duration::from_millis(10),
                timestamp: Utc::now(),
            }));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.routes.len(), 1);
        assert_eq!(snapshot.route("/api/v1/whois/{domain}").unwrap().total_requests, 3);
    }
}
