//! HTTP reachability probe for stored URLs.
//!
//! Issues a `HEAD` request (redirects followed) and reports the final
//! status plus the response headers the link checker inspects.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_LOCATION, CONTENT_TYPE, HeaderMap, HeaderName};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::LivenessConfig;
use crate::{AppError, AppResult};

/// Probe client configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// User agent string.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            user_agent: "tagplay/0.1 (link checker)".to_string(),
            timeout_secs: 5,
        }
    }
}

impl From<&LivenessConfig> for ProbeConfig {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout_secs: config.timeout_secs,
        }
    }
}

/// What a probe observed after following redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// Final HTTP status code.
    pub status: u16,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// `Content-Location` header, if any.
    pub content_location: Option<String>,
}

impl ProbeResponse {
    /// A bare response with the given status and no headers.
    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            content_location: None,
        }
    }

    /// 2xx or 3xx.
    #[must_use]
    pub const fn is_reachable(&self) -> bool {
        self.status >= 200 && self.status < 400
    }
}

/// Something that can tell whether a URL answers.
///
/// Transport failures (timeouts, refused connections, TLS errors) come back
/// as `Err`; the caller treats them as an unreachable URL.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    /// Probe `url`.
    async fn probe(&self, url: &str) -> AppResult<ProbeResponse>;
}

/// Shared probe handle.
pub type SharedUrlProbe = Arc<dyn UrlProbe>;

/// Probe backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Build a probe client.
    pub fn new(config: &ProbeConfig) -> AppResult<Self> {
        // Self-signed and expired certificates are common among the image
        // hosts; reachability is all that matters here.
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build probe client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlProbe for HttpProbe {
    async fn probe(&self, url: &str) -> AppResult<ProbeResponse> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL {url}: {e}")))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(AppError::Validation(format!(
                "Unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let response = self
            .client
            .head(parsed)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Probe of {url} failed: {e}")))?;

        let headers = response.headers();
        let probed = ProbeResponse {
            status: response.status().as_u16(),
            content_type: header_value(headers, CONTENT_TYPE),
            content_location: header_value(headers, CONTENT_LOCATION),
        };
        debug!(url, status = probed.status, "Probed URL");
        Ok(probed)
    }
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_statuses() {
        assert!(ProbeResponse::status(200).is_reachable());
        assert!(ProbeResponse::status(302).is_reachable());
        assert!(!ProbeResponse::status(404).is_reachable());
        assert!(!ProbeResponse::status(503).is_reachable());
        assert!(!ProbeResponse::status(199).is_reachable());
    }

    #[test]
    fn test_config_from_liveness() {
        let liveness = LivenessConfig {
            timeout_secs: 9,
            ..LivenessConfig::default()
        };
        let config = ProbeConfig::from(&liveness);
        assert_eq!(config.timeout_secs, 9);
        assert_eq!(config.user_agent, liveness.user_agent);
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let probe = HttpProbe::new(&ProbeConfig::default()).unwrap();
        let err = probe.probe("ftp://example.com/a.png").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let probe = HttpProbe::new(&ProbeConfig::default()).unwrap();
        assert!(probe.probe("not a url").await.is_err());
    }
}
