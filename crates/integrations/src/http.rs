//! `http.get` integration with endpoint allowlisting.
//!
//! Allowlist entries are either URL prefixes (`https://api.example.com/v1`),
//! host patterns (`api.example.com`, `*.example.com`) or `*`. Private,
//! loopback and link-local hosts are refused unless listed explicitly.

use async_trait::async_trait;
use mindloop_core::error::IntegrationError;
use mindloop_core::plan::{ActionData, ActionResult};
use mindloop_core::provider::{CapabilityDescriptor, CostClass};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Integration, required_str};

const MAX_BODY_CHARS: usize = 4000;

pub struct HttpIntegration {
    allowed_endpoints: Vec<String>,
    client: reqwest::Client,
}

impl HttpIntegration {
    pub fn new(allowed_endpoints: Vec<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            allowed_endpoints,
            client,
        }
    }

    pub fn from_config(config: &mindloop_config::HttpIntegrationConfig) -> Self {
        Self::new(
            config.allowed_endpoints.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Check a URL against the allowlist.
    pub fn check_endpoint(&self, url: &str) -> Result<(), IntegrationError> {
        let host = host_of(url).ok_or_else(|| {
            IntegrationError::EndpointDenied(format!("'{url}' is not an http(s) URL"))
        })?;

        let explicitly_listed = self
            .allowed_endpoints
            .iter()
            .any(|e| (e.contains("://") && url.starts_with(e.as_str())) || e == &host);
        if is_private_host(&host) && !explicitly_listed {
            return Err(IntegrationError::EndpointDenied(format!(
                "request to private/internal host '{host}' blocked"
            )));
        }

        let allowed = self.allowed_endpoints.iter().any(|e| {
            if e == "*" {
                true
            } else if e.contains("://") {
                url.starts_with(e.as_str())
            } else if let Some(suffix) = e.strip_prefix("*.") {
                host.ends_with(&format!(".{suffix}"))
            } else {
                e == &host
            }
        });
        if allowed {
            Ok(())
        } else {
            Err(IntegrationError::EndpointDenied(format!(
                "'{url}' not in allowed endpoints ({} configured)",
                self.allowed_endpoints.len()
            )))
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    let lower = url.to_lowercase();
    let rest = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or(bracketed)
    } else {
        authority.split(':').next().unwrap_or(authority)
    };
    (!host.is_empty()).then(|| host.to_string())
}

fn is_private_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".internal") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

#[async_trait]
impl Integration for HttpIntegration {
    fn name(&self) -> &str {
        "http"
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![CapabilityDescriptor {
            name: "http.get".into(),
            description: "Fetch a URL from an allowlisted endpoint".into(),
            keywords: vec!["fetch".into(), "url".into(), "http".into(), "download".into()],
            reversible: true,
            side_effecting: false,
            cost: CostClass::Metered,
        }]
    }

    async fn invoke(
        &self,
        capability: &str,
        args: &serde_json::Value,
    ) -> Result<ActionResult, IntegrationError> {
        if capability != "http.get" {
            return Err(IntegrationError::CapabilityNotFound(capability.to_string()));
        }
        let url = required_str(args, "url", capability)?;
        if let Err(e) = self.check_endpoint(url) {
            warn!(url, error = %e, "http.get denied");
            return Err(e);
        }

        debug!(url, "http.get");
        let response = self.client.get(url).send().await.map_err(|e| {
            IntegrationError::InvocationFailed {
                capability: capability.to_string(),
                reason: e.to_string(),
            }
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();

        if status >= 400 {
            return Err(IntegrationError::InvocationFailed {
                capability: capability.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        Ok(ActionResult::succeeded(
            ActionData::Integration {
                capability: capability.to_string(),
                summary: format!("GET {url} -> {status} ({} bytes)", body.len()),
                payload: serde_json::json!({ "status": status, "body": truncated }),
            },
            true,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(allowed: &[&str]) -> HttpIntegration {
        HttpIntegration::new(
            allowed.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn empty_allowlist_denies() {
        assert!(http(&[]).check_endpoint("https://example.com").is_err());
    }

    #[test]
    fn host_and_wildcard_patterns() {
        let h = http(&["api.example.com", "*.weather.gov"]);
        assert!(h.check_endpoint("https://api.example.com/v1/data").is_ok());
        assert!(h.check_endpoint("https://forecast.weather.gov/x").is_ok());
        assert!(h.check_endpoint("https://weather.gov.evil.com/").is_err());
        assert!(h.check_endpoint("https://evil.com/steal").is_err());
    }

    #[test]
    fn url_prefix_pattern() {
        let h = http(&["https://api.example.com/v1"]);
        assert!(h.check_endpoint("https://api.example.com/v1/items").is_ok());
        assert!(h.check_endpoint("https://api.example.com/v2/items").is_err());
    }

    #[test]
    fn private_hosts_blocked_even_with_wildcard() {
        let h = http(&["*"]);
        assert!(h.check_endpoint("http://127.0.0.1:8080/admin").is_err());
        assert!(h.check_endpoint("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(h.check_endpoint("http://192.168.1.1/").is_err());
        assert!(h.check_endpoint("http://[::1]:3000/").is_err());
        assert!(h.check_endpoint("https://google.com").is_ok());
    }

    #[test]
    fn explicitly_listed_private_host_is_allowed() {
        let h = http(&["localhost"]);
        assert!(h.check_endpoint("http://localhost:11434/api/tags").is_ok());
    }

    #[test]
    fn non_http_urls_rejected() {
        assert!(http(&["*"]).check_endpoint("file:///etc/passwd").is_err());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://user@Example.com:443/a?b").as_deref(), Some("example.com"));
        assert_eq!(host_of("http://[::1]:80/").as_deref(), Some("::1"));
        assert_eq!(host_of("ftp://x"), None);
    }

    #[tokio::test]
    async fn missing_url_is_invalid() {
        assert!(matches!(
            http(&["*"]).invoke("http.get", &serde_json::json!({})).await,
            Err(IntegrationError::InvalidArguments { .. })
        ));
    }
}
