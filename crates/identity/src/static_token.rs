//! Fixed bearer token for local development and tests.

use async_trait::async_trait;
use pipeline::{AuthError, AuthenticationScope, CredentialToken, Timestamp, TokenProvider};
use tokio_util::sync::CancellationToken;

/// Lifetime assigned to a static token, counted from each request.
const STATIC_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Hands out the same secret for every scope.
#[derive(Clone)]
pub struct StaticTokenProvider {
    secret: String,
}

impl StaticTokenProvider {
    /// Creates a provider for `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotConfigured`] for an empty secret.
    pub fn new(secret: impl Into<String>) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(AuthError::NotConfigured {
                message: "static token is empty".to_string(),
            });
        }
        Ok(Self { secret })
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(
        &self,
        _scope: &AuthenticationScope,
        _cancel: &CancellationToken,
    ) -> Result<CredentialToken, AuthError> {
        let now = Timestamp::now().as_datetime().timestamp();
        let expires_at = Timestamp::from_unix_seconds(now + STATIC_TOKEN_LIFETIME_SECS).ok_or_else(|| {
            AuthError::InvalidResponse {
                message: "static token expiry out of range".to_string(),
            }
        })?;
        Ok(CredentialToken::new(self.secret.clone(), expires_at))
    }
}
