//! WHOIS and RDAP registration records.

use serde::{Deserialize, Serialize};

/// Marker used when the backend does not name a registrar.
pub const UNKNOWN_REGISTRAR: &str = "unknown";

/// Which lookup protocol produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupProtocol {
    Whois,
    Rdap,
}

/// Registration contact. Every field is optional upstream and stays optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Contact {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Raw WHOIS/RDAP payload. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainPayload {
    pub domain: Option<String>,
    pub available: Option<bool>,
    pub registrar: Option<String>,
    pub creation_date: Option<String>,
    pub expiry_date: Option<String>,
    pub updated_date: Option<String>,
    status: Option<OneOrMany>,
    #[serde(alias = "nameservers")]
    pub name_servers: Option<Vec<String>>,
    pub registrant: Option<Contact>,
    pub admin: Option<Contact>,
    pub tech: Option<Contact>,
    pub billing: Option<Contact>,
    pub source_provider: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainContacts {
    pub registrant: Option<Contact>,
    pub admin: Option<Contact>,
    pub tech: Option<Contact>,
    pub billing: Option<Contact>,
}

/// Normalized registration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRecord {
    pub domain: String,
    pub available: bool,
    pub registrar: String,
    pub status: Vec<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub expires: Option<String>,
    pub nameservers: Vec<String>,
    pub contacts: DomainContacts,
    pub source_provider: Option<String>,
    pub protocol: LookupProtocol,
    pub cached: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Map a WHOIS or RDAP payload. `requested` fills in a missing `domain`.
pub fn map_domain_record(
    requested: &str,
    payload: DomainPayload,
    protocol: LookupProtocol,
) -> DomainRecord {
    let status = match payload.status {
        Some(OneOrMany::One(single)) => vec![single],
        Some(OneOrMany::Many(many)) => many,
        None => Vec::new(),
    }
    .into_iter()
    .filter(|s| !s.is_empty())
    .collect();

    DomainRecord {
        domain: non_empty(payload.domain).unwrap_or_else(|| requested.to_string()),
        available: payload.available.unwrap_or(false),
        registrar: non_empty(payload.registrar).unwrap_or_else(|| UNKNOWN_REGISTRAR.to_string()),
        status,
        created: non_empty(payload.creation_date),
        updated: non_empty(payload.updated_date),
        expires: non_empty(payload.expiry_date),
        nameservers: payload.name_servers.unwrap_or_default(),
        contacts: DomainContacts {
            registrant: payload.registrant,
            admin: payload.admin,
            tech: payload.tech,
            billing: payload.billing,
        },
        source_provider: non_empty(payload.source_provider),
        protocol,
        cached: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> DomainPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn maps_minimal_registered_domain() {
        let record = map_domain_record(
            "example.com",
            payload(json!({
                "domain": "example.com",
                "available": false,
                "registrar": "ACME",
                "status": ["active"]
            })),
            LookupProtocol::Whois,
        );
        assert_eq!(record.registrar, "ACME");
        assert!(!record.available);
        assert_eq!(record.status, vec!["active"]);
        assert!(record.nameservers.is_empty());
        assert_eq!(record.created, None);
    }

    #[test]
    fn defaults_missing_fields() {
        let record = map_domain_record("fresh.dev", payload(json!({"available": true})), LookupProtocol::Rdap);
        assert_eq!(record.domain, "fresh.dev");
        assert_eq!(record.registrar, UNKNOWN_REGISTRAR);
        assert!(record.status.is_empty());
        assert_eq!(record.protocol, LookupProtocol::Rdap);
    }

    #[test]
    fn accepts_single_status_string_and_contacts() {
        let record = map_domain_record(
            "example.org",
            payload(json!({
                "domain": "example.org",
                "registrar": "",
                "status": "clientTransferProhibited",
                "nameServers": ["a.iana-servers.net", "b.iana-servers.net"],
                "creationDate": "1995-08-14T04:00:00Z",
                "registrant": {"organization": "IANA", "country": "US", "postalCode": "90094"},
                "someFutureField": 42
            })),
            LookupProtocol::Whois,
        );
        assert_eq!(record.registrar, UNKNOWN_REGISTRAR);
        assert_eq!(record.status, vec!["clientTransferProhibited"]);
        assert_eq!(record.nameservers.len(), 2);
        assert_eq!(record.created.as_deref(), Some("1995-08-14T04:00:00Z"));
        let registrant = record.contacts.registrant.unwrap();
        assert_eq!(registrant.organization.as_deref(), Some("IANA"));
        assert_eq!(registrant.postal_code.as_deref(), Some("90094"));
        assert!(record.contacts.admin.is_none());
    }
}
