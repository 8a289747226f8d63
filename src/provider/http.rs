//! HTTP generation backend.
//!
//! Posts the resolved generation request as JSON and exposes the response
//! body, server-sent events or a plain JSON document, as a session transport.

use super::config::ProviderConfig;
use crate::error::ApiError;
use crate::session::{GenerationBackend, GenerationRequest, StreamTransport, Transport};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ProviderConfig) -> Result<Self, ApiError> {
        config.validate().map_err(ApiError::ProviderNotConfigured)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                ApiError::ProviderNotConfigured(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            url: config.request_url(),
            api_key: config.resolve_api_key(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn open(&self, request: &GenerationRequest) -> Result<Box<dyn Transport>, ApiError> {
        let accept = if request.stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        let mut builder = self.client.post(&self.url).header(ACCEPT, accept).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(
            session_id = %request.session_id,
            url = %self.url,
            prompts = request.prompts.len(),
            "Posting generation request"
        );
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                session_id = %request.session_id,
                status = status.as_u16(),
                "Generation request rejected"
            );
            return Err(status_error(status, &body));
        }

        Ok(Box::new(StreamTransport::new(response.bytes_stream())))
    }
}

/// Map a non-success status. Rate limits and server errors may be retried.
fn status_error(status: StatusCode, body: &str) -> ApiError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ApiError::ProviderRequestFailed(message)
    } else {
        ApiError::InvalidRequest(message)
    }
}
