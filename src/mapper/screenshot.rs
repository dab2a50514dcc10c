//! Website and itdog speed-test screenshots.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotKind {
    Website,
    Itdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScreenshotPayload {
    pub success: Option<bool>,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
    pub title: Option<String>,
    pub from_cache: Option<bool>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenshotArtifact {
    pub domain: String,
    pub kind: ScreenshotKind,
    pub status: ArtifactStatus,
    pub image_url: Option<String>,
    pub image_data: Option<String>,
    pub title: Option<String>,
    pub from_cache: bool,
    pub error: Option<String>,
    pub captured_at: Option<String>,
}

/// `scheme://host[:port]` of the API base URL.
pub fn origin_from_url(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
    if let Some(port) = url.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    origin
}

/// Map a screenshot payload; root-relative image URLs are resolved against
/// the API origin.
pub fn map_screenshot(
    domain: &str,
    kind: ScreenshotKind,
    payload: ScreenshotPayload,
    api_base: &Url,
) -> ScreenshotArtifact {
    let image_url = payload
        .image_url
        .filter(|u| !u.is_empty())
        .map(|u| {
            if u.starts_with('/') && !u.starts_with("//") {
                format!("{}{}", origin_from_url(api_base), u)
            } else {
                u
            }
        });
    let image_data = payload.image_data.filter(|d| !d.is_empty());

    let has_image = image_url.is_some() || image_data.is_some();
    let status = if payload.success != Some(false) && has_image {
        ArtifactStatus::Success
    } else {
        ArtifactStatus::Error
    };

    let error = match status {
        ArtifactStatus::Success => None,
        ArtifactStatus::Error => Some(
            payload
                .error
                .or(payload.message)
                .unwrap_or_else(|| "screenshot unavailable".to_string()),
        ),
    };

    ScreenshotArtifact {
        domain: domain.to_string(),
        kind,
        status,
        image_url,
        image_data,
        title: payload.title,
        from_cache: payload.from_cache.unwrap_or(false),
        error,
        captured_at: payload.timestamp,
    }
}
