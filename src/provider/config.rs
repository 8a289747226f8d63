//! Generation endpoint configuration owned by the provider domain.

use serde::{Deserialize, Serialize};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "GENTABLE_API_KEY";

/// HTTP generation backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the generation service. `https://` is assumed when the
    /// scheme is omitted.
    pub endpoint: String,

    /// Bearer token; falls back to `GENTABLE_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request path appended to the endpoint.
    #[serde(default = "default_path")]
    pub path: String,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_path() -> String {
    "/v1/generate".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ProviderConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            path: default_path(),
            timeout_ms: default_timeout_ms(),
        }
    }

    fn endpoint_has_scheme(endpoint: &str) -> bool {
        endpoint.starts_with("http://") || endpoint.starts_with("https://")
    }

    fn infer_endpoint_scheme(endpoint: &str) -> String {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if Self::endpoint_has_scheme(endpoint) {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        }
    }

    pub fn normalized_endpoint(&self) -> String {
        Self::infer_endpoint_scheme(&self.endpoint)
    }

    /// Full URL generation requests are posted to.
    pub fn request_url(&self) -> String {
        let path = self.path.trim();
        if path.is_empty() {
            return self.normalized_endpoint();
        }
        format!(
            "{}/{}",
            self.normalized_endpoint(),
            path.trim_start_matches('/')
        )
    }

    pub fn endpoint_url_is_valid(endpoint: &str) -> bool {
        let endpoint = Self::infer_endpoint_scheme(endpoint);
        let Some(rest) = endpoint.split_once("://").map(|(_, rest)| rest) else {
            return false;
        };
        if rest.is_empty() || rest.chars().any(char::is_whitespace) {
            return false;
        }

        let authority = rest.split('/').next().unwrap_or_default();
        let host_port = authority.rsplit('@').next().unwrap_or(authority);
        let host = if host_port.starts_with('[') {
            let Some(end_bracket) = host_port.find(']') else {
                return false;
            };
            &host_port[1..end_bracket]
        } else {
            host_port.split(':').next().unwrap_or_default()
        };
        if host.is_empty() {
            return false;
        }

        host == "localhost" || host.contains('.') || host.parse::<std::net::IpAddr>().is_ok()
    }

    /// API key from config, else from the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("Provider endpoint cannot be empty".to_string());
        }
        if !Self::endpoint_url_is_valid(&self.endpoint) {
            return Err(format!("Invalid endpoint URL: {}", self.endpoint));
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}
