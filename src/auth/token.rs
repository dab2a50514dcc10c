//! Bearer token acquisition and caching.
//!
//! The backend issues short-lived tokens from `POST /api/auth/token` without
//! echoing an expiry, so the cache stamps each token with a locally computed
//! deadline and refreshes it shortly before it lapses. Concurrent callers that
//! miss the cache share a single in-flight refresh.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use super::clock::Clock;
use super::signer::{RequestSigner, SecurityError};
use crate::modules::events::{ClientEvent, EventDispatcher, TokenRefreshEvent};
use crate::transport::{ApiRequest, ApiTransport};

pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(30);
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(5);
pub const API_KEY_HEADER: &str = "x-api-key";

/// Failures while obtaining a token. Never retried by the cache itself.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("token request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
    #[error("token expires in {expires_in_ms}ms, inside the {margin_ms}ms safety margin")]
    ExpiresTooSoon { expires_in_ms: i64, margin_ms: i64 },
    #[error("token request could not be signed: {0}")]
    Security(#[from] SecurityError),
}

/// Token value together with its local expiry deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub expires_at_ms: i64,
}

impl CachedToken {
    pub fn is_fresh(&self, now_ms: i64, safety_margin: Duration) -> bool {
        self.expires_at_ms - now_ms > duration_ms(safety_margin)
    }
}

/// How the expiry deadline of a freshly fetched token is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// `now + lifetime`.
    Fixed(Duration),
    /// Read the JWT `exp` claim, falling back to `now + fallback`.
    JwtClaim { fallback: Duration },
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        ExpiryPolicy::Fixed(DEFAULT_TOKEN_LIFETIME)
    }
}

impl ExpiryPolicy {
    fn expires_at(&self, token: &str, now_ms: i64) -> i64 {
        match *self {
            ExpiryPolicy::Fixed(lifetime) => now_ms + duration_ms(lifetime),
            ExpiryPolicy::JwtClaim { fallback } => jwt_expiry_ms(token)
                .unwrap_or_else(|| now_ms + duration_ms(fallback)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Extract `exp` (seconds) from an unverified JWT and convert it to millis.
fn jwt_expiry_ms(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&decoded).ok()?;
    claims.exp.map(|exp| exp.saturating_mul(1000))
}

fn duration_ms(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

/// Process-local token cache, injected into the requester.
pub struct TokenCache {
    transport: Arc<dyn ApiTransport>,
    clock: Arc<dyn Clock>,
    token_url: Url,
    api_key: Option<String>,
    signer: Option<RequestSigner>,
    expiry: ExpiryPolicy,
    safety_margin: Duration,
    timeout: Option<Duration>,
    events: Arc<EventDispatcher>,
    current: RwLock<Option<CachedToken>>,
    refresh_gate: Mutex<()>,
}

impl TokenCache {
    pub fn new(transport: Arc<dyn ApiTransport>, clock: Arc<dyn Clock>, token_url: Url) -> Self {
        Self {
            transport,
            clock,
            token_url,
            api_key: None,
            signer: None,
            expiry: ExpiryPolicy::default(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            timeout: None,
            events: Arc::new(EventDispatcher::new()),
            current: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_expiry_policy(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// Return a token that is not about to expire, refreshing if needed.
    pub async fn get_token(&self) -> Result<String, AuthenticationError> {
        if let Some(token) = self.fresh_cached() {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while we waited on the gate.
        if let Some(token) = self.fresh_cached() {
            return Ok(token);
        }

        self.fetch_and_store().await
    }

    /// Fetch a new token unconditionally and cache it.
    pub async fn refresh(&self) -> Result<String, AuthenticationError> {
        let _gate = self.refresh_gate.lock().await;
        self.fetch_and_store().await
    }

    /// Drop the cached token so the next `get_token` fetches a new one.
    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            log::debug!("cleared cached token");
        }
    }

    /// Snapshot of the cached token, if any.
    pub fn cached(&self) -> Option<CachedToken> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn fresh_cached(&self) -> Option<String> {
        let now = self.clock.now_ms();
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .filter(|token| token.is_fresh(now, self.safety_margin))
            .map(|token| token.value.clone())
    }

    async fn fetch_and_store(&self) -> Result<String, AuthenticationError> {
        let result = self.fetch().await.and_then(|token| {
            let now = self.clock.now_ms();
            let cached = CachedToken {
                expires_at_ms: self.expiry.expires_at(&token, now),
                value: token,
            };
            if cached.is_fresh(now, self.safety_margin) {
                Ok(cached)
            } else {
                Err(AuthenticationError::ExpiresTooSoon {
                    expires_in_ms: cached.expires_at_ms - now,
                    margin_ms: duration_ms(self.safety_margin),
                })
            }
        });
        let cached = match result {
            Ok(cached) => cached,
            Err(err) => {
                self.clear();
                self.events.dispatch(ClientEvent::TokenRefresh(TokenRefreshEvent {
                    success: false,
                    expires_at_ms: None,
                    timestamp: chrono::Utc::now(),
                }));
                return Err(err);
            }
        };

        let token = cached.value.clone();
        let expires_at_ms = cached.expires_at_ms;
        {
            let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Some(cached);
        }

        self.events.dispatch(ClientEvent::TokenRefresh(TokenRefreshEvent {
            success: true,
            expires_at_ms: Some(expires_at_ms),
            timestamp: chrono::Utc::now(),
        }));
        Ok(token)
    }

    async fn fetch(&self) -> Result<String, AuthenticationError> {
        let mut request = ApiRequest::new(Method::POST, self.token_url.clone())
            .with_headers(self.token_headers()?);
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| AuthenticationError::Transport(err.to_string()))?;

        if !response.is_success() {
            let message = response
                .json()
                .as_ref()
                .and_then(|body| {
                    body.get("message")
                        .or_else(|| body.get("error"))
                        .and_then(|value| value.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("authentication failed: {}", response.status));
            return Err(AuthenticationError::Rejected {
                status: response.status,
                message,
            });
        }

        let parsed: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|err| AuthenticationError::MalformedResponse(err.to_string()))?;
        if parsed.token.is_empty() {
            return Err(AuthenticationError::MalformedResponse("empty token".into()));
        }
        Ok(parsed.token)
    }

    fn token_headers(&self) -> Result<HeaderMap, AuthenticationError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref key) = self.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| SecurityError::InvalidHeader(API_KEY_HEADER.into()))?;
            headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        }

        if let Some(ref signer) = self.signer {
            signer
                .envelope(Method::POST.as_str(), self.token_url.path())?
                .apply(&mut headers)?;
        }

        Ok(headers)
    }
}
