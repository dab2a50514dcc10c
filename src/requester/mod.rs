//! Authenticated request execution.
//!
//! Wraps the transport with bearer token injection, optional HMAC signing, a
//! per-attempt deadline, response classification and the 401 retry loop.
//!
//! Classification rules:
//! 1. Transport failures and fired deadlines become `ApiError` with status 0.
//! 2. A 401 clears the token cache; the request is retried while the
//!    [`RetryPolicy`] allows it.
//! 3. Any other non-2xx becomes `ApiError(status, message)` using the body's
//!    `message` or `error` field when present.
//! 4. A 2xx whose envelope carries `success: false` is also an `ApiError`.

mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::auth::signer::{RequestSigner, SecurityError};
use crate::auth::token::{API_KEY_HEADER, AuthenticationError, TokenCache};
use crate::modules::events::{
    ClientEvent, ErrorEvent, EventDispatcher, RequestEvent, ResponseEvent, RetryEvent,
};
use crate::transport::{ApiHttpResponse, ApiRequest, ApiTransport};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure reported by a data endpoint. Status 0 means no response arrived.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("api error ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl std::fmt::Display) -> Self {
        Self::new(0, format!("network error: {message}"))
    }

    pub fn is_network(&self) -> bool {
        self.status == 0
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// Everything that can go wrong while executing an authenticated request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Auth(#[from] AuthenticationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
}

impl RequestError {
    /// HTTP status for API failures, `None` for everything else.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Api(err) => Some(err.status),
            _ => None,
        }
    }
}

/// `meta` block of the response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    #[serde(default)]
    pub cached: Option<bool>,
    #[serde(default)]
    pub cached_at: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
}

/// Successful response with the envelope unwrapped.
#[derive(Debug, Clone)]
pub struct ApiPayload {
    pub status: u16,
    pub data: Value,
    pub meta: Option<EnvelopeMeta>,
    /// Served from the backend cache, per `meta.cached` or `X-Cache: HIT`.
    pub cached: bool,
}

impl ApiPayload {
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let status = self.status;
        serde_json::from_value(self.data)
            .map_err(|err| ApiError::new(status, format!("invalid response body: {err}")))
    }
}

/// Pull a human readable message out of an error body.
fn body_message(body: &Value) -> Option<String> {
    ["message", "error"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            _ => None,
        })
}

fn classify(response: ApiHttpResponse) -> Result<ApiPayload, ApiError> {
    let status = response.status;
    if !response.is_success() {
        let message = response
            .json()
            .as_ref()
            .and_then(body_message)
            .unwrap_or_else(|| format!("request failed: {status}"));
        return Err(ApiError::new(status, message));
    }

    let header_cached = response
        .headers
        .get("x-cache")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("hit"))
        .unwrap_or(false);

    let body: Value = if response.body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&response.body)
            .map_err(|err| ApiError::new(status, format!("invalid response body: {err}")))?
    };

    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body_message(&body).unwrap_or_else(|| "request was not successful".into());
        return Err(ApiError::new(status, message));
    }

    let meta = body
        .get("meta")
        .cloned()
        .and_then(|meta| serde_json::from_value::<EnvelopeMeta>(meta).ok());

    let data = match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) => data,
            None => Value::Object(map),
        },
        other => other,
    };

    let cached = header_cached || meta.as_ref().and_then(|m| m.cached).unwrap_or(false);

    Ok(ApiPayload {
        status,
        data,
        meta,
        cached,
    })
}

/// Metrics label for an endpoint: the query string is dropped and the
/// argument of `/api/v1/{kind}/{domain}` routes becomes a placeholder.
pub fn route_label(endpoint: &str) -> String {
    let path = endpoint.split('?').next().unwrap_or_default().trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        ["api", "v1", kind, _, ..] => format!("/api/v1/{kind}/{{domain}}"),
        _ => format!("/{path}"),
    }
}

/// Executes requests against the backend on behalf of the client.
pub struct AuthenticatedRequester {
    transport: Arc<dyn ApiTransport>,
    tokens: Arc<TokenCache>,
    base_url: Url,
    api_key: Option<String>,
    signer: Option<RequestSigner>,
    timeout: Duration,
    retry: RetryPolicy,
    user_agent: String,
    events: Arc<EventDispatcher>,
}

impl AuthenticatedRequester {
    pub fn new(transport: Arc<dyn ApiTransport>, tokens: Arc<TokenCache>, base_url: Url) -> Self {
        Self {
            transport,
            tokens,
            base_url,
            api_key: None,
            signer: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::standard(),
            user_agent: format!("whosee-client/{}", crate::VERSION),
            events: Arc::new(EventDispatcher::new()),
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Perform a request and deserialize the unwrapped payload into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<T, RequestError> {
        let payload = self.send(method, endpoint, body).await?;
        Ok(payload.decode()?)
    }

    /// Perform a request and return the unwrapped payload with its metadata.
    pub async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<ApiPayload, RequestError> {
        let url = self.endpoint_url(endpoint)?;
        let route = route_label(endpoint);
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| ApiError::new(0, format!("unable to encode request body: {err}")))?
            .map(Bytes::from);

        let template = ApiRequest::new(method.clone(), url)
            .with_body(body)
            .with_timeout(self.timeout);
        let signed_path = template.path_and_query();

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let token = self.tokens.get_token().await?;
            let headers = self.build_headers(&method, &signed_path, &token)?;

            self.events.dispatch(ClientEvent::Request(RequestEvent {
                endpoint: endpoint.to_string(),
                route: route.clone(),
                method: method.clone(),
                attempt,
                signed: self.signer.is_some(),
                timestamp: chrono::Utc::now(),
            }));

            let request = template.clone().with_headers(headers);

            let started = Instant::now();
            let response = match timeout(self.timeout, self.transport.send(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    return Err(self.fail(endpoint, &route, ApiError::network(err)).into());
                }
                Err(_) => {
                    let err = ApiError::network(format!("request timed out after {:?}", self.timeout));
                    return Err(self.fail(endpoint, &route, err).into());
                }
            };
            let latency = started.elapsed();

            self.events.dispatch(ClientEvent::Response(ResponseEvent {
                endpoint: endpoint.to_string(),
                route: route.clone(),
                method: method.clone(),
                status: response.status,
                latency,
                timestamp: chrono::Utc::now(),
            }));

            if response.status == 401 {
                self.tokens.clear();
                if self.retry.allows_retry(attempt) {
                    let wait = self.retry.delay_after(attempt);
                    self.events.dispatch(ClientEvent::Retry(RetryEvent {
                        endpoint: endpoint.to_string(),
                        attempt: attempt + 1,
                        reason: "unauthorized".into(),
                        scheduled_after: wait,
                        timestamp: chrono::Utc::now(),
                    }));
                    if !wait.is_zero() {
                        sleep(wait).await;
                    }
                    continue;
                }
            }

            return classify(response).map_err(|err| self.fail(endpoint, &route, err).into());
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, RequestError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|err| RequestError::InvalidEndpoint(format!("{endpoint}: {err}")))
    }

    fn build_headers(
        &self,
        method: &Method,
        signed_path: &str,
        token: &str,
    ) -> Result<HeaderMap, SecurityError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| SecurityError::InvalidHeader("user-agent".into()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| SecurityError::InvalidHeader("authorization".into()))?,
        );

        if let Some(ref key) = self.api_key {
            headers.insert(
                HeaderName::from_static(API_KEY_HEADER),
                HeaderValue::from_str(key)
                    .map_err(|_| SecurityError::InvalidHeader(API_KEY_HEADER.into()))?,
            );
        }

        if let Some(ref signer) = self.signer {
            signer
                .envelope(method.as_str(), signed_path)?
                .apply(&mut headers)?;
        }

        Ok(headers)
    }

    fn fail(&self, endpoint: &str, route: &str, err: ApiError) -> ApiError {
        self.events.dispatch(ClientEvent::Error(ErrorEvent {
            endpoint: endpoint.to_string(),
            route: route.to_string(),
            status: err.status,
            error: err.message.clone(),
            timestamp: chrono::Utc::now(),
        }));
        err
    }
}
