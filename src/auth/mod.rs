//! Credentials: token caching, request signing and the clock they share.

pub mod clock;
pub mod signer;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use signer::{
    DEFAULT_TIMESTAMP_TOLERANCE_SECS, RequestSigner, SecurityError, SignedRequestEnvelope,
    is_timestamp_valid, sign,
};
pub use token::{
    AuthenticationError, CachedToken, DEFAULT_SAFETY_MARGIN, DEFAULT_TOKEN_LIFETIME,
    ExpiryPolicy, TokenCache,
};
