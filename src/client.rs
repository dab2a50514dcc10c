//! High level client orchestration.
//!
//! Wires together configuration, transport, token cache, signer, requester,
//! response mappers and the event/metrics subsystems behind one ergonomic
//! client with a method per query kind.

use std::sync::Arc;

use http::Method;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::auth::clock::{Clock, SystemClock};
use crate::auth::signer::{RequestSigner, SecurityError};
use crate::auth::token::TokenCache;
use crate::config::{ClientConfig, ConfigError};
use crate::mapper::{
	DnsPayload, DnsRecordSet, DomainPayload, DomainRecord, HealthPayload, HealthSnapshot,
	LookupProtocol, ScreenshotArtifact, ScreenshotKind, ScreenshotPayload, map_dns,
	map_domain_record, map_health, map_screenshot,
};
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler, MetricsHandler};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::requester::{ApiPayload, AuthenticatedRequester, RequestError};
use crate::transport::{ApiTransport, ReqwestTransport, TransportError};

pub const TOKEN_PATH: &str = "/api/auth/token";
const MAX_DOMAIN_LEN: usize = 253;

/// Result alias used across the client layer.
pub type WhoseeResult<T> = Result<T, WhoseeError>;

/// High-level error surfaced by the client.
#[derive(Debug, Error)]
pub enum WhoseeError {
	#[error(transparent)]
	Request(#[from] RequestError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Security(#[from] SecurityError),
	#[error("transport initialisation failed: {0}")]
	Transport(#[from] TransportError),
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
}

impl WhoseeError {
	/// HTTP status of an API failure (0 for network errors).
	pub fn status(&self) -> Option<u16> {
		match self {
			WhoseeError::Request(err) => err.status(),
			_ => None,
		}
	}
}

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
		.expect("domain pattern is valid")
});

/// Trim, lower-case and validate a domain name before it reaches a URL.
pub fn normalize_domain(input: &str) -> Result<String, SecurityError> {
	let trimmed = input.trim();
	let domain = trimmed.strip_suffix('.').unwrap_or(trimmed).to_ascii_lowercase();
	if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN || !DOMAIN_RE.is_match(&domain) {
		return Err(SecurityError::InvalidDomain(input.to_string()));
	}
	Ok(domain)
}

/// Per-kind slot of the comprehensive query.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryOutcome<T> {
	Success { data: T },
	Error { error: String, http_status: Option<u16> },
}

impl<T> QueryOutcome<T> {
	fn from_result(result: WhoseeResult<T>) -> Self {
		match result {
			Ok(data) => QueryOutcome::Success { data },
			Err(err) => QueryOutcome::Error {
				http_status: err.status(),
				error: err.to_string(),
			},
		}
	}

	pub fn is_success(&self) -> bool {
		matches!(self, QueryOutcome::Success { .. })
	}

	pub fn data(&self) -> Option<&T> {
		match self {
			QueryOutcome::Success { data } => Some(data),
			QueryOutcome::Error { .. } => None,
		}
	}

	pub fn error(&self) -> Option<&str> {
		match self {
			QueryOutcome::Success { .. } => None,
			QueryOutcome::Error { error, .. } => Some(error),
		}
	}
}

/// Result of [`WhoseeClient::query_all`].
#[derive(Debug, Clone, Serialize)]
pub struct DomainReport {
	pub domain: String,
	pub whois: QueryOutcome<DomainRecord>,
	pub dns: QueryOutcome<DnsRecordSet>,
	pub health: QueryOutcome<HealthSnapshot>,
	pub screenshot: QueryOutcome<ScreenshotArtifact>,
}

impl DomainReport {
	/// `(kind, message)` for every slot that failed.
	pub fn errors(&self) -> Vec<(&'static str, &str)> {
		[
			("whois", self.whois.error()),
			("dns", self.dns.error()),
			("health", self.health.error()),
			("screenshot", self.screenshot.error()),
		]
		.into_iter()
		.filter_map(|(kind, error)| error.map(|e| (kind, e)))
		.collect()
	}
}

/// Fluent builder for [`WhoseeClient`].
pub struct WhoseeClientBuilder {
	config: ClientConfig,
	transport: Option<Arc<dyn ApiTransport>>,
	clock: Option<Arc<dyn Clock>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl WhoseeClientBuilder {
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
			transport: None,
			clock: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
		self.config.api_url = url.into();
		self
	}

	pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
		self.config.api_key = Some(key.into());
		self
	}

	pub fn with_api_secret(mut self, secret: impl Into<String>) -> Self {
		self.config.api_secret = Some(secret.into());
		self
	}

	/// Enable HMAC request signing and the three-attempt retry loop.
	pub fn secure(mut self) -> Self {
		self.config.secure = true;
		self
	}

	pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.config.timeout_ms = timeout_ms;
		self
	}

	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.config.max_attempts = Some(attempts.max(1));
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn ApiTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.config.enable_metrics = false;
		self
	}

	pub fn build(self) -> WhoseeResult<WhoseeClient> {
		WhoseeClient::assemble(self)
	}
}

impl Default for WhoseeClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Authenticated client for the Whosee backend.
pub struct WhoseeClient {
	config: ClientConfig,
	base_url: Url,
	requester: AuthenticatedRequester,
	metrics: Option<MetricsCollector>,
}

impl WhoseeClient {
	/// Construct a client from `WHOSEE_*` environment variables.
	pub fn from_env() -> WhoseeResult<Self> {
		WhoseeClientBuilder::new()
			.with_config(ClientConfig::from_env()?)
			.build()
	}

	/// Obtain a builder to customise the client instance.
	pub fn builder() -> WhoseeClientBuilder {
		WhoseeClientBuilder::new()
	}

	fn assemble(builder: WhoseeClientBuilder) -> WhoseeResult<Self> {
		let WhoseeClientBuilder {
			config,
			transport,
			clock,
			handlers,
		} = builder;

		config.validate()?;
		let base_url = config.base_url()?;
		let token_url = Url::parse(&format!(
			"{}{}",
			base_url.as_str().trim_end_matches('/'),
			TOKEN_PATH
		))?;

		let clock: Arc<dyn Clock> = clock.unwrap_or_else(|| Arc::new(SystemClock));
		let transport: Arc<dyn ApiTransport> = match transport {
			Some(transport) => transport,
			None => Arc::new(ReqwestTransport::new(config.timeout())?),
		};

		let metrics = config.enable_metrics.then(MetricsCollector::new);
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}
		for handler in handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let signer = match (&config.api_secret, config.secure) {
			(Some(secret), true) => Some(RequestSigner::new(secret.clone(), clock.clone())?),
			_ => None,
		};

		let mut tokens = TokenCache::new(transport.clone(), clock, token_url)
			.with_expiry_policy(config.expiry_policy())
			.with_safety_margin(config.safety_margin())
			.with_timeout(config.timeout())
			.with_events(events.clone());
		if let Some(ref key) = config.api_key {
			tokens = tokens.with_api_key(key.clone());
		}
		if let Some(ref signer) = signer {
			tokens = tokens.with_signer(signer.clone());
		}

		let mut requester = AuthenticatedRequester::new(transport, Arc::new(tokens), base_url.clone())
			.with_timeout(config.timeout())
			.with_retry_policy(config.retry_policy())
			.with_events(events);
		if let Some(ref key) = config.api_key {
			requester = requester.with_api_key(key.clone());
		}
		if let Some(signer) = signer {
			requester = requester.with_signer(signer);
		}
		if let Some(ref agent) = config.user_agent {
			requester = requester.with_user_agent(agent.clone());
		}

		log::debug!("whosee client ready for {} (secure={})", base_url, config.secure);

		Ok(Self {
			config,
			base_url,
			requester,
			metrics,
		})
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	pub fn tokens(&self) -> &Arc<TokenCache> {
		self.requester.tokens()
	}

	/// Forget the cached token; the next request fetches a new one.
	pub fn clear_token(&self) {
		self.requester.tokens().clear();
	}

	pub fn metrics(&self) -> Option<MetricsSnapshot> {
		self.metrics.as_ref().map(MetricsCollector::snapshot)
	}

	/// Confirm the signing secret required by the secure variant is present.
	pub fn security_check(&self) -> Result<(), SecurityError> {
		if !self.config.has_secret() {
			log::warn!("security check failed: api secret is not configured");
			return Err(SecurityError::MissingSecret);
		}
		Ok(())
	}

	/// WHOIS lookup.
	pub async fn query_domain_info(&self, domain: &str) -> WhoseeResult<DomainRecord> {
		self.query_registration(domain, LookupProtocol::Whois).await
	}

	/// RDAP lookup.
	pub async fn query_rdap(&self, domain: &str) -> WhoseeResult<DomainRecord> {
		self.query_registration(domain, LookupProtocol::Rdap).await
	}

	async fn query_registration(
		&self,
		domain: &str,
		protocol: LookupProtocol,
	) -> WhoseeResult<DomainRecord> {
		let domain = normalize_domain(domain)?;
		let segment = match protocol {
			LookupProtocol::Whois => "whois",
			LookupProtocol::Rdap => "rdap",
		};
		let (payload, cached) = self
			.fetch::<DomainPayload>(&format!("/api/v1/{segment}/{domain}"))
			.await?;
		let mut record = map_domain_record(&domain, payload, protocol);
		record.cached = cached;
		Ok(record)
	}

	/// DNS lookup across the backend's resolvers.
	pub async fn query_dns(&self, domain: &str) -> WhoseeResult<DnsRecordSet> {
		let domain = normalize_domain(domain)?;
		let (payload, cached) = self
			.fetch::<DnsPayload>(&format!("/api/v1/dns/{domain}"))
			.await?;
		let mut set = map_dns(&domain, payload);
		set.cached |= cached;
		Ok(set)
	}

	/// Backend health, optionally with per-provider detail.
	pub async fn query_health(&self, detailed: bool) -> WhoseeResult<HealthSnapshot> {
		let endpoint = if detailed {
			"/api/health?detailed=true"
		} else {
			"/api/health"
		};
		let (payload, _) = self.fetch::<HealthPayload>(endpoint).await?;
		Ok(map_health(payload))
	}

	/// Website screenshot.
	pub async fn query_screenshot(&self, domain: &str) -> WhoseeResult<ScreenshotArtifact> {
		self.query_capture(domain, ScreenshotKind::Website).await
	}

	/// itdog speed-test screenshot.
	pub async fn query_itdog(&self, domain: &str) -> WhoseeResult<ScreenshotArtifact> {
		self.query_capture(domain, ScreenshotKind::Itdog).await
	}

	async fn query_capture(
		&self,
		domain: &str,
		kind: ScreenshotKind,
	) -> WhoseeResult<ScreenshotArtifact> {
		let domain = normalize_domain(domain)?;
		let segment = match kind {
			ScreenshotKind::Website => "screenshot",
			ScreenshotKind::Itdog => "itdog",
		};
		let (payload, cached) = self
			.fetch::<ScreenshotPayload>(&format!("/api/v1/{segment}/{domain}"))
			.await?;
		let mut artifact = map_screenshot(&domain, kind, payload, &self.base_url);
		artifact.from_cache |= cached;
		Ok(artifact)
	}

	/// Run WHOIS, DNS, health and screenshot queries concurrently. A failing
	/// kind is reported in its own slot and never aborts the others.
	pub async fn query_all(&self, domain: &str) -> WhoseeResult<DomainReport> {
		let domain = normalize_domain(domain)?;

		let (whois, dns, health, screenshot) = tokio::join!(
			self.query_domain_info(&domain),
			self.query_dns(&domain),
			self.query_health(false),
			self.query_screenshot(&domain),
		);

		let report = DomainReport {
			domain,
			whois: QueryOutcome::from_result(whois),
			dns: QueryOutcome::from_result(dns),
			health: QueryOutcome::from_result(health),
			screenshot: QueryOutcome::from_result(screenshot),
		};

		for (kind, error) in report.errors() {
			log::warn!("{} query for {} failed: {}", kind, report.domain, error);
		}

		Ok(report)
	}

	async fn fetch<T: DeserializeOwned>(&self, endpoint: &str) -> WhoseeResult<(T, bool)> {
		let payload: ApiPayload = self.requester.send(Method::GET, endpoint, None).await?;
		let cached = payload.cached;
		let value = payload.decode::<T>().map_err(RequestError::from)?;
		Ok((value, cached))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalizes_valid_domains() {
		assert_eq!(normalize_domain(" Example.COM. ").unwrap(), "example.com");
		assert_eq!(normalize_domain("sub.my-site.co.uk").unwrap(), "sub.my-site.co.uk");
	}

	#[test]
	fn rejects_invalid_domains() {
		for input in ["", "localhost", "-bad.com", "bad-.com", "exa mple.com", "a..com", "evil.com/../x", "example.c"] {
			assert!(
				matches!(normalize_domain(input), Err(SecurityError::InvalidDomain(_))),
				"{input:?} should be rejected"
			);
		}
		assert!(normalize_domain("example.com..").is_err());
		assert!(normalize_domain("example.com...").is_err());
		let long_label = format!("{}.com", "a".repeat(64));
		assert!(normalize_domain(&long_label).is_err());
	}

	#[test]
	fn outcome_serializes_with_status_tag() {
		let failed: QueryOutcome<u8> = QueryOutcome::Error {
			error: "boom".into(),
			http_status: Some(500),
		};
		let value = serde_json::to_value(&failed).unwrap();
		assert_eq!(value["status"], "error");
		assert_eq!(value["error"], "boom");

		let ok = serde_json::to_value(QueryOutcome::Success { data: 7u8 }).unwrap();
		assert_eq!(ok["status"], "success");
		assert_eq!(ok["data"], 7);
	}

	#[test]
	fn secure_builder_requires_secret() {
		let err = WhoseeClient::builder().secure().build().err().unwrap();
		assert!(matches!(err, WhoseeError::Config(ConfigError::MissingSecret)));
	}
}
