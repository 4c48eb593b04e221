//! Callback invoker: one authenticated GET per invocation, advisory only.
//!
//! The invoker acquires a bearer credential for the configured scope, calls
//! the configured endpoint, and classifies the result. Both suspension points
//! race the invocation's cancellation token. A failure here is reported to the
//! caller but never prevents archival.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::{
    CallError, CallbackTransport, CredentialToken, ResponseSummary, Settings, TokenProvider,
};

/// Retry bound for the callback. More than one retry is never attempted
/// within a single invocation.
pub const MAX_CALLBACK_RETRIES: u32 = 1;

/// Timeout and retry options for the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackOptions {
    /// Per-request timeout. Must leave headroom inside the invocation timeout.
    pub timeout: Duration,
    /// Retries after a retryable failure. Clamped to [`MAX_CALLBACK_RETRIES`].
    pub max_retries: u32,
    /// Delay before a retry.
    pub retry_backoff: Duration,
}

impl CallbackOptions {
    /// Longest the request phase can take: every attempt timing out, plus
    /// the backoff before a retry. Token acquisition is not included.
    pub fn worst_case(&self) -> Duration {
        let retries = self.max_retries.min(MAX_CALLBACK_RETRIES);
        self.timeout * (1 + retries) + self.retry_backoff * retries
    }
}

impl Default for CallbackOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Issues the authenticated callback.
pub struct CallbackInvoker {
    tokens: Arc<dyn TokenProvider>,
    transport: Arc<dyn CallbackTransport>,
    options: CallbackOptions,
}

impl CallbackInvoker {
    /// Creates an invoker over the given ports.
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        transport: Arc<dyn CallbackTransport>,
        options: CallbackOptions,
    ) -> Self {
        Self {
            tokens,
            transport,
            options,
        }
    }

    /// Returns the options in force, with the retry count clamped.
    pub fn options(&self) -> CallbackOptions {
        CallbackOptions {
            max_retries: self.options.max_retries.min(MAX_CALLBACK_RETRIES),
            ..self.options
        }
    }

    /// Acquires a credential and performs the callback.
    ///
    /// # Errors
    ///
    /// - [`CallError::Cancelled`] if `cancel` fires during acquisition, the
    ///   request, or the retry backoff.
    /// - [`CallError::Auth`] if the token provider fails (not retried).
    /// - [`CallError::Rejected`], [`CallError::Unreachable`], or
    ///   [`CallError::TimedOut`] for the last failed attempt.
    #[instrument(skip_all, fields(url = %settings.ping_api_url))]
    pub async fn invoke(
        &self,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Result<ResponseSummary, CallError> {
        let options = self.options();
        let token = self.acquire_token(settings, cancel).await?;

        let mut attempt = 1;
        loop {
            match self.call_once(settings, &token, cancel).await {
                Ok(mut summary) => {
                    summary.attempts = attempt;
                    return Ok(summary);
                }
                Err(e) if attempt <= options.max_retries && e.retry_policy().is_retryable() => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = options.max_retries + 1,
                        backoff_ms = options.retry_backoff.as_millis() as u64,
                        error = %e,
                        "retrying callback"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(CallError::Cancelled),
                        _ = tokio::time::sleep(options.retry_backoff) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn acquire_token(
        &self,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> Result<CredentialToken, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            result = self.tokens.get_token(&settings.authentication_scope, cancel) => {
                result.map_err(CallError::Auth)
            }
        }
    }

    async fn call_once(
        &self,
        settings: &Settings,
        token: &CredentialToken,
        cancel: &CancellationToken,
    ) -> Result<ResponseSummary, CallError> {
        let timeout = self.options.timeout;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.transport.get(&settings.ping_api_url, token, timeout),
            ) => match result {
                Ok(response) => response?,
                Err(_) => return Err(CallError::TimedOut { after: timeout }),
            },
        };

        if response.is_success() {
            debug!(status = response.status, "callback response received");
            Ok(ResponseSummary {
                status: response.status,
                body: response.body,
                attempts: 1,
            })
        } else {
            Err(CallError::Rejected {
                status: response.status,
                body: response.body,
            })
        }
    }
}
