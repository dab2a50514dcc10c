//! Translation of backend payloads into view models.
//!
//! Each query kind has its own raw payload type (deserialized permissively,
//! unknown fields ignored) and a pure mapping function.

pub mod dns;
pub mod domain;
pub mod health;
pub mod screenshot;

pub use dns::{
    DEFAULT_DNS_TTL_SECS, DnsPayload, DnsRecord, DnsRecordSet, DnsStatus, ResolverSummary,
    ResolverTest, map_dns,
};
pub use domain::{
    Contact, DomainContacts, DomainPayload, DomainRecord, LookupProtocol, UNKNOWN_REGISTRAR,
    map_domain_record,
};
pub use health::{HealthPayload, HealthSnapshot, HealthStatus, ServiceHealth, map_health};
pub use screenshot::{
    ArtifactStatus, ScreenshotArtifact, ScreenshotKind, ScreenshotPayload, map_screenshot,
    origin_from_url,
};
