//! DNS lookups fanned out over several public resolvers.
//!
//! The backend reports one list of test results per resolver. A-record IPs
//! are flattened across resolvers in document order and deduplicated by exact
//! string match. The backend never reports a TTL, so every record gets
//! [`DEFAULT_DNS_TTL_SECS`].

use std::collections::{BTreeMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_DNS_TTL_SECS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsStatus {
    Success,
    Partial,
    Error,
}

/// One query result reported by a resolver. Every field is decoded
/// leniently, so any JSON object yields a test.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverTest {
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub record_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub success: Option<bool>,
    #[serde(alias = "ip", deserialize_with = "string_list")]
    pub ips: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub error: Option<String>,
    /// Milliseconds; the backend sends either a number or a string like `"23ms"`.
    #[serde(deserialize_with = "millis")]
    pub response_time: Option<f64>,
}

/// `None` for `null` or a value of the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// `null` becomes empty, a lone string becomes one entry, non-strings are dropped.
fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(single) => vec![single],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn millis<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().trim_end_matches("ms").trim().parse().ok(),
        _ => None,
    })
}

impl ResolverTest {
    fn succeeded(&self) -> bool {
        self.success.unwrap_or(self.error.is_none())
    }

    fn is_a_query(&self) -> bool {
        self.record_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case("A"))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDnsRecord {
    pub value: Option<String>,
    pub ttl: Option<u32>,
    pub priority: Option<u16>,
    pub exchange: Option<String>,
}

/// Raw DNS payload. `testResults` keeps the backend's resolver order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DnsPayload {
    pub domain: Option<String>,
    pub test_results: Map<String, Value>,
    pub records: BTreeMap<String, Vec<RawDnsRecord>>,
    pub cached: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub record_type: String,
    pub value: String,
    pub ttl: u32,
    pub priority: Option<u16>,
}

impl DnsRecord {
    fn a(value: String) -> Self {
        Self {
            record_type: "A".into(),
            value,
            ttl: DEFAULT_DNS_TTL_SECS,
            priority: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolverSummary {
    pub resolver: String,
    pub succeeded: usize,
    pub failed: usize,
    pub ips: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsRecordSet {
    pub domain: String,
    pub status: DnsStatus,
    pub a_records: Vec<DnsRecord>,
    /// Non-A record types reported directly by the backend, keyed by type.
    pub records: BTreeMap<String, Vec<DnsRecord>>,
    pub resolvers: Vec<ResolverSummary>,
    pub cached: bool,
}

/// A resolver entry is normally a list of tests; a lone object counts as one
/// test. Only entries that are not objects count as unreadable.
fn resolver_tests(value: &Value) -> Vec<Option<ResolverTest>> {
    match value {
        Value::Array(items) => items.iter().map(resolver_test).collect(),
        Value::Object(_) => vec![resolver_test(value)],
        _ => vec![None],
    }
}

fn resolver_test(value: &Value) -> Option<ResolverTest> {
    match value {
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

pub fn map_dns(requested: &str, payload: DnsPayload) -> DnsRecordSet {
    let mut seen = HashSet::new();
    let mut a_records = Vec::new();
    let mut resolvers = Vec::with_capacity(payload.test_results.len());
    let mut succeeded_total = 0usize;
    let mut failed_total = 0usize;

    for (name, value) in &payload.test_results {
        let mut summary = ResolverSummary {
            resolver: name.clone(),
            succeeded: 0,
            failed: 0,
            ips: Vec::new(),
            errors: Vec::new(),
        };

        for test in resolver_tests(value) {
            let Some(test) = test else {
                summary.failed += 1;
                summary.errors.push("unreadable test result".into());
                continue;
            };

            if !test.succeeded() {
                summary.failed += 1;
                if let Some(error) = test.error.clone() {
                    summary.errors.push(error);
                }
                continue;
            }

            summary.succeeded += 1;
            if test.is_a_query() {
                for ip in test.ips {
                    if !summary.ips.contains(&ip) {
                        summary.ips.push(ip.clone());
                    }
                    if seen.insert(ip.clone()) {
                        a_records.push(DnsRecord::a(ip));
                    }
                }
            }
        }

        succeeded_total += summary.succeeded;
        failed_total += summary.failed;
        resolvers.push(summary);
    }

    let mut records = BTreeMap::new();
    for (record_type, raw) in payload.records {
        let record_type = record_type.to_ascii_uppercase();
        let mapped: Vec<DnsRecord> = raw
            .into_iter()
            .filter_map(|record| {
                let value = record
                    .value
                    .filter(|v| !v.is_empty())
                    .or(record.exchange)?;
                Some(DnsRecord {
                    record_type: record_type.clone(),
                    value,
                    ttl: record.ttl.unwrap_or(DEFAULT_DNS_TTL_SECS),
                    priority: record.priority,
                })
            })
            .collect();

        if record_type == "A" {
            for record in mapped {
                if seen.insert(record.value.clone()) {
                    a_records.push(record);
                }
            }
        } else if !mapped.is_empty() {
            records.insert(record_type, mapped);
        }
    }

    let status = if resolvers.is_empty() {
        if a_records.is_empty() && records.is_empty() {
            DnsStatus::Error
        } else {
            DnsStatus::Success
        }
    } else if succeeded_total == 0 {
        DnsStatus::Error
    } else if failed_total > 0 || a_records.is_empty() {
        DnsStatus::Partial
    } else {
        DnsStatus::Success
    };

    if status == DnsStatus::Error {
        a_records.clear();
    }

    DnsRecordSet {
        domain: payload
            .domain
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| requested.to_string()),
        status,
        a_records,
        records,
        resolvers,
        cached: payload.cached.unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> DnsPayload {
        serde_json::from_value(value).unwrap()
    }

    fn ips(set: &DnsRecordSet) -> Vec<&str> {
        set.a_records.iter().map(|r| r.value.as_str()).collect()
    }

    #[test]
    fn flattens_and_dedups_in_first_seen_order() {
        let set = map_dns(
            "example.com",
            payload(json!({
                "domain": "example.com",
                "testResults": {
                    "R1": [{"type": "A", "success": true, "ips": ["10.0.0.1", "10.0.0.2"]}],
                    "R2": [{"type": "A", "success": true, "ips": ["10.0.0.2", "10.0.0.3"]}]
                }
            })),
        );
        assert_eq!(ips(&set), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert!(set.a_records.iter().all(|r| r.ttl == DEFAULT_DNS_TTL_SECS));
        assert_eq!(set.status, DnsStatus::Success);
        assert_eq!(set.resolvers.len(), 2);
    }

    #[test]
    fn keeps_document_order_of_resolvers() {
        let set = map_dns(
            "example.com",
            payload(json!({
                "testResults": {
                    "zeta": [{"success": true, "ips": ["2.2.2.2"]}],
                    "alpha": [{"success": true, "ips": ["1.1.1.1"]}]
                }
            })),
        );
        assert_eq!(ips(&set), vec!["2.2.2.2", "1.1.1.1"]);
        assert_eq!(set.resolvers[0].resolver, "zeta");
    }

    #[test]
    fn no_successful_test_is_an_error() {
        let set = map_dns(
            "example.com",
            payload(json!({
                "testResults": {
                    "R1": [{"success": false, "error": "SERVFAIL"}],
                    "R2": [{"error": "timeout"}]
                }
            })),
        );
        assert_eq!(set.status, DnsStatus::Error);
        assert!(set.a_records.is_empty());
        assert_eq!(set.resolvers[0].errors, vec!["SERVFAIL"]);
    }

    #[test]
    fn some_failures_make_it_partial() {
        let set = map_dns(
            "example.com",
            payload(json!({
                "testResults": {
                    "R1": [{"success": true, "ips": ["10.0.0.1"]}],
                    "R2": [{"success": false, "error": "timeout"}],
                    "R3": "garbage"
                }
            })),
        );
        assert_eq!(set.status, DnsStatus::Partial);
        assert_eq!(ips(&set), vec!["10.0.0.1"]);
        assert_eq!(set.resolvers[2].failed, 1);
    }

    #[test]
    fn null_ips_on_successful_test_is_not_a_failure() {
        let set = map_dns(
            "example.com",
            payload(json!({
                "testResults": {
                    "R1": [{"type": "A", "success": true, "ips": ["1.1.1.1"]}],
                    "R2": [{"type": "AAAA", "success": true, "ips": null}]
                }
            })),
        );
        assert_eq!(set.status, DnsStatus::Success);
        assert_eq!(set.resolvers[1].succeeded, 1);
        assert_eq!(set.resolvers[1].failed, 0);
        assert!(set.resolvers[1].errors.is_empty());
    }

    #[test]
    fn string_response_time_keeps_the_test() {
        let set = map_dns(
            "example.com",
            payload(json!({
                "testResults": {
                    "R1": [{"type": "A", "success": true, "ips": ["1.1.1.1"], "responseTime": "23ms"}]
                }
            })),
        );
        assert_eq!(set.status, DnsStatus::Success);
        assert_eq!(ips(&set), vec!["1.1.1.1"]);

        let test: ResolverTest =
            serde_json::from_value(json!({"responseTime": "23ms", "type": 5})).unwrap();
        assert_eq!(test.response_time, Some(23.0));
        assert!(test.record_type.is_none());
    }

    #[test]
    fn maps_direct_records_with_default_ttl() {
        let set = map_dns(
            "example.com",
            payload(json!({
                "records": {
                    "A": [{"value": "93.184.216.34", "ttl": 60}],
                    "MX": [{"exchange": "mail.example.com", "priority": 10}],
                    "TXT": []
                }
            })),
        );
        assert_eq!(set.status, DnsStatus::Success);
        assert_eq!(set.a_records[0].ttl, 60);
        let mx = &set.records["MX"][0];
        assert_eq!(mx.value, "mail.example.com");
        assert_eq!(mx.ttl, DEFAULT_DNS_TTL_SECS);
        assert_eq!(mx.priority, Some(10));
        assert!(!set.records.contains_key("TXT"));
        assert_eq!(set.domain, "example.com");
    }
}
