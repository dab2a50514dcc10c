//! Cross-cutting services module
//!
//! Observes requests, responses, token refreshes and retries through the
//! event dispatcher and aggregates them into metrics.

pub mod events;
pub mod metrics;

// Re-export commonly used types
pub use events::{
    ClientEvent, ErrorEvent, EventDispatcher, EventHandler, LoggingHandler, MetricsHandler,
    RequestEvent, ResponseEvent, RetryEvent, TokenRefreshEvent,
};
pub use metrics::{GlobalStats, MetricsCollector, MetricsSnapshot, RouteStats};
