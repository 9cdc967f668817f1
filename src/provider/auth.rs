//! Provider Credentials
//!
//! Bearer tokens for the provisioning API, either a static token (CI, local
//! emulators) or Application Default Credentials via `gcp_auth`, cached until
//! shortly before expiry.

use anyhow::{Context, Result};
use gcp_auth::TokenProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default scopes for provisioning API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Refresh tokens this long before they expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Assumed token lifetime when the provider does not say
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Environment variable holding a static bearer token
pub const TOKEN_ENV: &str = "STACKGRAPH_TOKEN";

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Clone)]
enum Source {
    Static(String),
    Adc {
        provider: Arc<dyn TokenProvider>,
        cache: Arc<RwLock<Option<CachedToken>>>,
    },
}

/// Credentials source for the REST provisioner
#[derive(Clone)]
pub struct Credentials {
    source: Source,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            Source::Static(_) => f.write_str("Credentials::Static(..)"),
            Source::Adc { .. } => f.write_str("Credentials::Adc"),
        }
    }
}

impl Credentials {
    pub fn from_static(token: &str) -> Self {
        Self {
            source: Source::Static(token.to_string()),
        }
    }

    /// Static token from the environment if set, otherwise ADC
    pub async fn discover() -> Result<Self> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                tracing::debug!("Using static token from {}", TOKEN_ENV);
                return Ok(Self::from_static(token.trim()));
            }
        }
        Self::application_default().await
    }

    /// Application Default Credentials
    pub async fn application_default() -> Result<Self> {
        let provider = gcp_auth::provider().await.context(
            "Failed to initialize credentials. Run 'gcloud auth application-default login' or set STACKGRAPH_TOKEN",
        )?;

        Ok(Self {
            source: Source::Adc {
                provider,
                cache: Arc::new(RwLock::new(None)),
            },
        })
    }

    /// Get a bearer token for an API call
    pub async fn token(&self) -> Result<String> {
        let (provider, cache) = match &self.source {
            Source::Static(token) => return Ok(token.clone()),
            Source::Adc { provider, cache } => (provider, cache),
        };

        {
            let cached = cache.read().await;
            if let Some(cached) = cached.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = provider
            .token(DEFAULT_SCOPES)
            .await
            .context("Failed to get access token")?;
        let token = token.as_str().to_string();

        *cache.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER,
        });

        Ok(token)
    }
}
