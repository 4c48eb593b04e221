//! Expiry-aware credential cache.
//!
//! Each scope maps to an immutable `Arc<CredentialToken>` snapshot. Readers
//! clone the `Arc` under a short read lock and never see a token being
//! written; a refresh builds a new token and swaps the snapshot in whole.
//! Refreshes are single-flight so a burst of invocations triggers one fetch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{AuthError, AuthenticationScope, CredentialToken, Timestamp, TokenProvider};

/// Tokens closer than this to expiry are refreshed before use.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);

/// Wraps a [`TokenProvider`] with a per-scope snapshot cache.
pub struct CachedTokenProvider<P> {
    inner: P,
    skew: Duration,
    snapshots: RwLock<HashMap<AuthenticationScope, Arc<CredentialToken>>>,
    refresh: Mutex<()>,
}

impl<P: TokenProvider> CachedTokenProvider<P> {
    /// Wraps `inner` with the default refresh skew.
    pub fn new(inner: P) -> Self {
        Self::with_skew(inner, DEFAULT_REFRESH_SKEW)
    }

    /// Wraps `inner`, refreshing tokens that expire within `skew`.
    pub fn with_skew(inner: P, skew: Duration) -> Self {
        Self {
            inner,
            skew,
            snapshots: RwLock::new(HashMap::new()),
            refresh: Mutex::new(()),
        }
    }

    fn fresh_snapshot(&self, scope: &AuthenticationScope) -> Option<Arc<CredentialToken>> {
        let snapshots = match self.snapshots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        snapshots
            .get(scope)
            .filter(|token| !token.expires_within(Timestamp::now(), self.skew))
            .cloned()
    }

    fn store_snapshot(&self, scope: &AuthenticationScope, token: Arc<CredentialToken>) {
        let mut snapshots = match self.snapshots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        snapshots.insert(scope.clone(), token);
    }
}

#[async_trait]
impl<P: TokenProvider> TokenProvider for CachedTokenProvider<P> {
    async fn get_token(
        &self,
        scope: &AuthenticationScope,
        cancel: &CancellationToken,
    ) -> Result<CredentialToken, AuthError> {
        if let Some(token) = self.fresh_snapshot(scope) {
            return Ok(CredentialToken::clone(&token));
        }

        let _refreshing = self.refresh.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.fresh_snapshot(scope) {
            return Ok(CredentialToken::clone(&token));
        }

        debug!(scope = %scope, "refreshing cached credential");
        let token = self.inner.get_token(scope, cancel).await?;
        self.store_snapshot(scope, Arc::new(token.clone()));
        Ok(token)
    }
}
