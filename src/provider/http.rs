//! HTTP utilities for provisioning API calls

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate and strip control characters from a body before logging it
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut cut = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A non-2xx answer from the provisioning API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("API request failed: {status}{}", detail(.message))]
pub struct ApiError {
    pub status: StatusCode,
    /// Provider's explanation, sanitised
    pub message: Option<String>,
}

impl ApiError {
    /// Build from a response body, preferring `error.message` over the raw text
    pub fn from_body(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| {
                v.pointer("/error/message")
                    .or_else(|| v.get("message"))
                    .or_else(|| v.get("error"))
            })
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| (!body.trim().is_empty()).then(|| body.to_string()))
            .map(|m| sanitize_for_log(m.trim()))
            .filter(|m| !m.is_empty());
        Self { status, message }
    }

    /// Short diagnosis for the status class
    pub fn hint(&self) -> Option<&'static str> {
        match self.status.as_u16() {
            401 => Some("authentication failed"),
            403 => Some("permission denied"),
            404 => Some("not found"),
            409 => Some("conflict, the resource may already exist or be in use"),
            429 => Some("rate limit exceeded"),
            500 | 502 | 503 | 504 => Some("provider temporarily unavailable"),
            _ => None,
        }
    }
}

fn detail(message: &Option<String>) -> String {
    message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default()
}

/// HTTP client wrapper for the provisioning API
#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
}

impl ProviderHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("stackgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GET a JSON document
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);
        self.send(self.client.get(url).bearer_auth(token)).await
    }

    /// PUT a JSON body, returning the JSON response
    pub async fn put(&self, url: &str, token: &str, body: &Value) -> Result<Value> {
        tracing::debug!("PUT {}", url);
        self.send(self.client.put(url).bearer_auth(token).json(body))
            .await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::from_body(status, &body).into());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Turn a provider error into a short message for reports.
///
/// The hint comes from the HTTP status of an [`ApiError`] in the chain, never
/// from the message text.
pub fn format_provider_error(error: &anyhow::Error) -> String {
    let hint = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
        .and_then(ApiError::hint);

    let sanitized: String = format!("{:#}", error)
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(MAX_LOG_BODY_LENGTH + 40)
        .collect();

    match hint {
        Some(hint) => format!("{} ({})", sanitized, hint),
        None => sanitized,
    }
}
