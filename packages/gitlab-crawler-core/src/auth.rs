//! Auth configuration and the refresh capability.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-job or global auth configuration. `oauth_token` is what handlers hand
/// to the `ApiClient`; `refresh_token`/`client_id`/`client_secret` are only
/// consulted by `AuthRefresher` when the token is near expiry.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub oauth_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,

    /// Invoked with the new access token after a successful refresh. Not
    /// serialized; dropped on export/import (auth holders are reconstructed
    /// by the caller, not replayed from a snapshot).
    #[serde(skip)]
    pub on_refresh: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("oauth_token", &self.oauth_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("token_expires_at", &self.token_expires_at)
            .field("on_refresh", &self.on_refresh.is_some())
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            oauth_token: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            token_expires_at: None,
            on_refresh: None,
        }
    }
}

impl AuthConfig {
    pub fn with_oauth_token(mut self, token: impl Into<String>) -> Self {
        self.oauth_token = Some(token.into());
        self
    }

    pub fn with_refresh(
        mut self,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.token_expires_at = Some(expires_at);
        self
    }

    pub fn with_on_refresh(mut self, cb: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.on_refresh = Some(cb);
        self
    }

    fn has_refresh_capability(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

/// Result of a successful refresh round-trip.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum AuthError {
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("refresh requires refreshToken/clientId/clientSecret, none configured")]
    NotConfigured,
}

/// External refresh capability, implemented by the caller and consumed here
/// as an abstract trait.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn refresh(
        &self,
        gitlab_url: &str,
        auth: &AuthConfig,
    ) -> Result<RefreshedToken, AuthError>;
}

/// Decides per-job whether an auth token is near expiry and invokes the
/// refresh capability.
pub struct AuthRefresher {
    provider: Arc<dyn AuthProvider>,
    buffer: Duration,
}

impl AuthRefresher {
    pub fn new(provider: Arc<dyn AuthProvider>, buffer_minutes: i64) -> Self {
        Self {
            provider,
            buffer: Duration::minutes(buffer_minutes),
        }
    }

    /// Refreshes `auth` in place if it is within the expiry buffer and has
    /// refresh credentials configured. A token with no `token_expires_at` is
    /// treated as not-near-expiry (nothing to refresh against).
    pub async fn ensure_fresh(
        &self,
        gitlab_url: &str,
        auth: &mut AuthConfig,
    ) -> Result<(), AuthError> {
        let Some(expires_at) = auth.token_expires_at else {
            return Ok(());
        };
        if expires_at - Utc::now() > self.buffer {
            return Ok(());
        }
        if !auth.has_refresh_capability() {
            return Ok(());
        }

        tracing::debug!(gitlab_url, "auth token near expiry, refreshing");
        let refreshed = self.provider.refresh(gitlab_url, auth).await?;

        auth.oauth_token = Some(refreshed.access_token.clone());
        if refreshed.refresh_token.is_some() {
            auth.refresh_token = refreshed.refresh_token;
        }
        auth.token_expires_at = refreshed.expires_at;

        if let Some(cb) = &auth.on_refresh {
            cb(&refreshed.access_token);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AuthProvider for StubProvider {
        async fn refresh(
            &self,
            _gitlab_url: &str,
            _auth: &AuthConfig,
        ) -> Result<RefreshedToken, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::RefreshFailed("boom".into()));
            }
            Ok(RefreshedToken {
                access_token: "new-token".into(),
                refresh_token: Some("new-refresh".into()),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            })
        }
    }

    #[tokio::test]
    async fn refreshes_when_within_buffer() {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let refresher = AuthRefresher::new(provider.clone(), 5);
        let mut auth = AuthConfig::default()
            .with_oauth_token("old")
            .with_refresh("rt", "id", "secret")
            .with_expiry(Utc::now() + Duration::minutes(1));

        refresher.ensure_fresh("https://gitlab.example", &mut auth).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.oauth_token.as_deref(), Some("new-token"));
    }

    #[tokio::test]
    async fn does_not_refresh_when_far_from_expiry() {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let refresher = AuthRefresher::new(provider.clone(), 5);
        let mut auth = AuthConfig::default()
            .with_oauth_token("old")
            .with_refresh("rt", "id", "secret")
            .with_expiry(Utc::now() + Duration::hours(1));

        refresher.ensure_fresh("https://gitlab.example", &mut auth).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(auth.oauth_token.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn propagates_refresh_failure() {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let refresher = AuthRefresher::new(provider, 5);
        let mut auth = AuthConfig::default()
            .with_refresh("rt", "id", "secret")
            .with_expiry(Utc::now() - Duration::minutes(1));

        let result = refresher.ensure_fresh("https://gitlab.example", &mut auth).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn without_refresh_credentials_is_a_noop() {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let refresher = AuthRefresher::new(provider.clone(), 5);
        let mut auth = AuthConfig::default()
            .with_oauth_token("old")
            .with_expiry(Utc::now() - Duration::minutes(1));

        refresher.ensure_fresh("https://gitlab.example", &mut auth).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
