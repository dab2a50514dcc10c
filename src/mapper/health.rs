//! Backend health reports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tri-state health used for both services and the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Interpret a backend status string. Unrecognised values are treated as
    /// degraded: the service answered, but not in a way we can vouch for.
    pub fn from_reported(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "up" | "healthy" | "ok" => HealthStatus::Healthy,
            "degraded" => HealthStatus::Degraded,
            "down" | "unhealthy" | "error" => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        }
    }

    /// Healthy only if all are healthy, unhealthy if any is unhealthy.
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        let mut overall = HealthStatus::Healthy;
        for status in statuses {
            match status {
                HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
                HealthStatus::Degraded => overall = HealthStatus::Degraded,
                HealthStatus::Healthy => {}
            }
        }
        overall
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServiceDetail {
    status: Option<String>,
    latency: Option<f64>,
    total: Option<u32>,
    available: Option<u32>,
    last_check: Option<String>,
}

/// Raw health payload. Each service is either a bare status string or an
/// object with a `status` field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthPayload {
    pub status: Option<String>,
    pub version: Option<String>,
    pub timestamp: Option<String>,
    pub services: Map<String, Value>,
    pub last_check: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
    pub reported: Option<String>,
    pub latency_ms: Option<f64>,
    pub total: Option<u32>,
    pub available: Option<u32>,
    pub last_check: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub reported: Option<String>,
    pub version: Option<String>,
    pub timestamp: Option<String>,
    pub services: Vec<ServiceHealth>,
}

fn service_health(name: &str, value: &Value) -> ServiceHealth {
    let detail = match value {
        Value::String(status) => ServiceDetail {
            status: Some(status.clone()),
            ..ServiceDetail::default()
        },
        other => serde_json::from_value(other.clone()).unwrap_or_default(),
    };

    let status = detail
        .status
        .as_deref()
        .map(HealthStatus::from_reported)
        .unwrap_or(HealthStatus::Degraded);

    ServiceHealth {
        name: name.to_string(),
        status,
        reported: detail.status,
        latency_ms: detail.latency,
        total: detail.total,
        available: detail.available,
        last_check: detail.last_check,
    }
}

pub fn map_health(payload: HealthPayload) -> HealthSnapshot {
    let services: Vec<ServiceHealth> = payload
        .services
        .iter()
        .map(|(name, value)| service_health(name, value))
        .collect();

    let status = if services.is_empty() {
        payload
            .status
            .as_deref()
            .map(HealthStatus::from_reported)
            .unwrap_or(HealthStatus::Healthy)
    } else {
        HealthStatus::aggregate(services.iter().map(|s| s.status))
    };

    HealthSnapshot {
        status,
        reported: payload.status,
        version: payload.version,
        timestamp: payload.timestamp.or(payload.last_check),
        services,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> HealthSnapshot {
        map_health(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn one_degraded_service_degrades_aggregate() {
        let health = snapshot(json!({
            "services": {"whois": "up", "dns": "up", "screenshot": "degraded"}
        }));
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.services.len(), 3);
    }

    #[test]
    fn any_down_service_is_unhealthy() {
        let health = snapshot(json!({
            "status": "degraded",
            "version": "1.4.0",
            "services": {
                "redis": {"status": "up", "latency": 1.5},
                "dns": {"status": "degraded", "total": 4, "available": 3},
                "itdog": {"status": "down", "lastCheck": "2025-06-01T00:00:00Z"}
            }
        }));
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.reported.as_deref(), Some("degraded"));
        let dns = health.services.iter().find(|s| s.name == "dns").unwrap();
        assert_eq!(dns.available, Some(3));
        assert_eq!(health.services[0].latency_ms, Some(1.5));
    }

    #[test]
    fn all_up_is_healthy() {
        let health = snapshot(json!({"services": {"whois": {"status": "up"}, "dns": "healthy"}}));
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn without_services_falls_back_to_reported_status() {
        assert_eq!(snapshot(json!({"status": "down"})).status, HealthStatus::Unhealthy);
        assert_eq!(snapshot(json!({})).status, HealthStatus::Healthy);
    }

    #[test]
    fn unknown_strings_are_degraded() {
        assert_eq!(HealthStatus::from_reported("maintenance"), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_reported(" UP "), HealthStatus::Healthy);
    }
}
