//! # whosee-client
//!
//! Async client for the Whosee domain intelligence backend.
//!
//! Every call is authenticated with a short-lived bearer token that is cached
//! and refreshed transparently. In secure mode each request additionally
//! carries an HMAC-SHA256 signature over timestamp, nonce, method and path.
//!
//! ## Features
//!
//! - Token cache with a single in-flight refresh and a safety margin
//! - Optional HMAC request signing with replay-resistant nonces
//! - One automatic retry on 401 (bounded backoff in secure mode)
//! - Typed view models for WHOIS/RDAP, DNS, health and screenshots
//! - Concurrent comprehensive query with per-kind failure slots
//! - Event hooks with logging and metrics handlers
//!
//! ## Example
//!
//! ```no_run
//! use whosee_client::WhoseeClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WhoseeClient::builder()
//!         .with_api_url("http://localhost:3900")
//!         .with_api_key("my-key")
//!         .build()?;
//!     let record = client.query_domain_info("example.com").await?;
//!     println!("{} registered with {}", record.domain, record.registrar);
//!     Ok(())
//! }
//! ```

mod client;

pub mod auth;
pub mod config;
pub mod mapper;
pub mod modules;
pub mod requester;
pub mod transport;

pub use crate::client::{
    DomainReport,
    QueryOutcome,
    TOKEN_PATH,
    WhoseeClient,
    WhoseeClientBuilder,
    WhoseeError,
    WhoseeResult,
    normalize_domain,
};

pub use crate::auth::{
    AuthenticationError,
    CachedToken,
    Clock,
    ExpiryPolicy,
    ManualClock,
    RequestSigner,
    SecurityError,
    SignedRequestEnvelope,
    SystemClock,
    TokenCache,
};

pub use crate::config::{ClientConfig, ConfigError};

pub use crate::mapper::{
    ArtifactStatus,
    DnsRecord,
    DnsRecordSet,
    DnsStatus,
    DomainRecord,
    HealthSnapshot,
    HealthStatus,
    LookupProtocol,
    ScreenshotArtifact,
    ScreenshotKind,
    ServiceHealth,
};

pub use crate::modules::{
    ClientEvent,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
};

pub use crate::requester::{
    ApiError,
    ApiPayload,
    AuthenticatedRequester,
    RequestError,
    RetryPolicy,
};

pub use crate::transport::{
    ApiHttpResponse,
    ApiRequest,
    ApiTransport,
    ReqwestTransport,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
