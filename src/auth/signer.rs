//! HMAC request signing for the secure client variant.
//!
//! The signed message is the literal `"{timestamp}.{nonce}.{method}.{path}"`,
//! authenticated with HMAC-SHA256 and encoded with standard base64.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Default accepted skew between client and server clocks.
pub const DEFAULT_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const NONCE_HEADER: &str = "x-nonce";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Misconfiguration or input rejected on security grounds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("request signing secret is not configured")]
    MissingSecret,
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("invalid domain: {0:?}")]
    InvalidDomain(String),
    #[error("failed to build header '{0}'")]
    InvalidHeader(String),
}

/// Compute the base64 HMAC-SHA256 signature for one request.
pub fn sign(
    method: &str,
    path: &str,
    timestamp_secs: i64,
    nonce: &str,
    secret: &str,
) -> Result<String, SecurityError> {
    if secret.is_empty() {
        return Err(SecurityError::MissingSecret);
    }

    let message = format!("{timestamp_secs}.{nonce}.{method}.{path}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| SecurityError::InvalidKey(err.to_string()))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Whether `timestamp_secs` lies within `tolerance_secs` of `now_secs`.
pub fn is_timestamp_valid(timestamp_secs: i64, now_secs: i64, tolerance_secs: i64) -> bool {
    (now_secs - timestamp_secs).abs() <= tolerance_secs
}

/// Per-request signing material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequestEnvelope {
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
    pub method: String,
    pub path: String,
}

impl SignedRequestEnvelope {
    /// Insert the `X-Timestamp`, `X-Nonce` and `X-Signature` headers.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), SecurityError> {
        insert_header(headers, TIMESTAMP_HEADER, &self.timestamp.to_string())?;
        insert_header(headers, NONCE_HEADER, &self.nonce)?;
        insert_header(headers, SIGNATURE_HEADER, &self.signature)?;
        Ok(())
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), SecurityError> {
    let value =
        HeaderValue::from_str(value).map_err(|_| SecurityError::InvalidHeader(name.to_string()))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// Stateless signer bound to a secret and a clock.
#[derive(Clone)]
pub struct RequestSigner {
    secret: String,
    clock: Arc<dyn Clock>,
    tolerance_secs: i64,
}

impl RequestSigner {
    pub fn new(secret: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self, SecurityError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SecurityError::MissingSecret);
        }
        Ok(Self {
            secret,
            clock,
            tolerance_secs: DEFAULT_TIMESTAMP_TOLERANCE_SECS,
        })
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Build a fresh envelope with the current timestamp and a v4 nonce.
    pub fn envelope(&self, method: &str, path: &str) -> Result<SignedRequestEnvelope, SecurityError> {
        let timestamp = self.clock.now_secs();
        let nonce = Uuid::new_v4().to_string();
        let signature = sign(method, path, timestamp, &nonce, &self.secret)?;
        Ok(SignedRequestEnvelope {
            timestamp,
            nonce,
            signature,
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    pub fn is_timestamp_valid(&self, timestamp_secs: i64) -> bool {
        is_timestamp_valid(timestamp_secs, self.clock.now_secs(), self.tolerance_secs)
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;

    #[test]
    fn signature_is_deterministic() {
        let first = sign("GET", "/api/v1/whois/example.com", 1_700_000_000, "nonce-1", "s3cret").unwrap();
        let second = sign("GET", "/api/v1/whois/example.com", 1_700_000_000, "nonce-1", "s3cret").unwrap();
        assert_eq!(first, second);
        // 32 byte digest -> 44 base64 characters
        assert_eq!(first.len(), 44);

        let other_nonce = sign("GET", "/api/v1/whois/example.com", 1_700_000_000, "nonce-2", "s3cret").unwrap();
        assert_ne!(first, other_nonce);
    }

    #[test]
    fn signature_matches_reference_vector() {
        assert_eq!(
            sign("POST", "/api/auth/token", 1, "n", "Jefe").unwrap(),
            "L9encKeWNHPenoM9XZVZu305ntsr+dGZ8eVZvNU6SeY="
        );
        assert_eq!(
            sign(
                "GET",
                "/api/v1/whois/example.com",
                1_700_000_000,
                "0f8fad5b-d9cb-469f-a165-70867728950e",
                "s3cret",
            )
            .unwrap(),
            "JrZ1/WgKfAmgBu8WTauVVuaQnDd2/nKx5FCR0pHzvYs="
        );
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert_eq!(
            sign("GET", "/", 0, "n", "").unwrap_err(),
            SecurityError::MissingSecret
        );
        let clock = Arc::new(ManualClock::new(0));
        assert!(RequestSigner::new("", clock).is_err());
    }

    #[test]
    fn timestamp_tolerance_is_inclusive() {
        assert!(is_timestamp_valid(1_000, 1_300, 300));
        assert!(is_timestamp_valid(1_600, 1_300, 300));
        assert!(!is_timestamp_valid(999, 1_300, 300));
        assert!(!is_timestamp_valid(1_601, 1_300, 300));
    }

    #[test]
    fn envelope_uses_clock_and_applies_headers() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_999));
        let signer = RequestSigner::new("s3cret", clock).unwrap();
        let envelope = signer.envelope("GET", "/api/health").unwrap();
        assert_eq!(envelope.timestamp, 1_700_000_000);
        assert!(Uuid::parse_str(&envelope.nonce).is_ok());
        assert_eq!(
            envelope.signature,
            sign("GET", "/api/health", envelope.timestamp, &envelope.nonce, "s3cret").unwrap()
        );
        assert!(signer.is_timestamp_valid(envelope.timestamp));

        let mut headers = HeaderMap::new();
        envelope.apply(&mut headers).unwrap();
        assert_eq!(headers.get(TIMESTAMP_HEADER).unwrap(), "1700000000");
        assert_eq!(headers.get(NONCE_HEADER).unwrap().to_str().unwrap(), envelope.nonce);
        assert!(headers.contains_key(SIGNATURE_HEADER));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let signer = RequestSigner::new("s3cret", Arc::new(ManualClock::new(0))).unwrap();
        assert!(!format!("{signer:?}").contains("s3cret"));
    }
}
