//! Error and retry-policy types for the Courier pipeline domain.
//!
//! Each pipeline stage has its own error type so callers can match on exactly
//! the failures that stage produces. [`InvocationError`] covers the conditions
//! that fail a whole invocation and hand the message back to the queue source;
//! everything else is either advisory ([`AuthError`], [`CallError`]) or owned
//! by the runtime after the envelope is handed off ([`SinkWriteError`]).
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MessageId, SinkName};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by error types to let the caller decide whether to re-invoke an
/// operation.
///
/// - `Retryable` errors: transport failures, timeouts, 5xx and 429 responses.
/// - `NonRetryable` errors: authentication failures, client errors,
///   cancellation, invalid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Trigger adapter
// ---------------------------------------------------------------------------

/// The inbound message could not be decoded into an [`crate::Event`].
///
/// Always fatal to the invocation; the queue source applies its own
/// redelivery and dead-letter policy. Never retried locally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The message body was empty.
    #[error("message {message_id} has an empty body")]
    EmptyBody {
        /// Offending message.
        message_id: MessageId,
    },

    /// The declared content type cannot carry a JSON event.
    #[error("message {message_id} has unsupported content type '{content_type}'")]
    UnsupportedContentType {
        /// Offending message.
        message_id: MessageId,
        /// Declared content type.
        content_type: String,
    },

    /// The body is not valid JSON.
    #[error("message {message_id} is not valid JSON: {reason}")]
    Malformed {
        /// Offending message.
        message_id: MessageId,
        /// Parser diagnostic.
        reason: String,
    },

    /// The body is valid JSON but not an object.
    #[error("message {message_id} must be a JSON object, found {found}")]
    NotAnObject {
        /// Offending message.
        message_id: MessageId,
        /// JSON kind that was found instead (e.g. `"array"`).
        found: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Credentials and callback
// ---------------------------------------------------------------------------

/// Credential acquisition failed.
///
/// Advisory: the callback step is abandoned but archival still runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token endpoint could not be reached.
    #[error("token endpoint unreachable: {message}")]
    Unavailable {
        /// Transport diagnostic.
        message: String,
    },

    /// The token endpoint refused to issue a token.
    #[error("token request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status returned by the endpoint.
        status: u16,
        /// Error description returned by the endpoint.
        message: String,
    },

    /// The token endpoint answered with something that is not a token.
    #[error("invalid token response: {message}")]
    InvalidResponse {
        /// Parse diagnostic.
        message: String,
    },

    /// No credential source is configured for this environment.
    #[error("no credential source available: {message}")]
    NotConfigured {
        /// What was missing.
        message: String,
    },
}

impl AuthError {
    /// Returns the retry policy for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            AuthError::Unavailable { .. } => RetryPolicy::Retryable { after: None },
            AuthError::Rejected { status, .. } if *status == 429 || *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }
}

/// Failure reported by a callback transport before any HTTP status was seen.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request timed out after {after:?}")]
    Timeout {
        /// Configured timeout.
        after: Duration,
    },

    /// Connecting, sending, or reading the response failed.
    #[error("transport failure: {message}")]
    Io {
        /// Transport diagnostic.
        message: String,
    },
}

/// The advisory callback did not succeed.
///
/// Logged at error level; never aborts the pipeline or the archive step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The bearer credential could not be acquired.
    #[error("credential acquisition failed: {0}")]
    Auth(#[from] AuthError),

    /// The invocation was cancelled while the callback was in flight.
    #[error("callback cancelled")]
    Cancelled,

    /// The endpoint could not be reached.
    #[error("callback endpoint unreachable: {message}")]
    Unreachable {
        /// Transport diagnostic.
        message: String,
    },

    /// The request exceeded the callback timeout.
    #[error("callback timed out after {after:?}")]
    TimedOut {
        /// Configured timeout.
        after: Duration,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("callback rejected with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },
}

impl CallError {
    /// Returns the retry policy for this error.
    ///
    /// Credential failures and cancellation are never retried by the invoker.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            CallError::Unreachable { .. } | CallError::TimedOut { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            CallError::Rejected { status, .. } if *status == 429 || *status >= 500 => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { after } => CallError::TimedOut { after },
            TransportError::Io { message } => CallError::Unreachable { message },
        }
    }
}

// ---------------------------------------------------------------------------
// Archive fan-out and sinks
// ---------------------------------------------------------------------------

/// The envelope could not be populated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FanoutError {
    /// A slot already held an entry; a sink may receive at most one copy per
    /// invocation.
    #[error("output slot '{slot}' is already populated")]
    SlotOccupied {
        /// Slot name.
        slot: SinkName,
    },

    /// A rendered blob key is empty, absolute, or escapes the archive root.
    #[error("rendered blob key '{key}' is not a safe relative path")]
    UnsafeKey {
        /// Rendered key.
        key: String,
    },

    /// The event payload could not be serialised to derive a document id.
    #[error("could not serialise event payload: {message}")]
    Serialisation {
        /// Serialiser diagnostic.
        message: String,
    },
}

/// A sink rejected a write.
///
/// Owned by the queue-source runtime once the envelope is handed off.
#[derive(Debug, Error)]
pub enum SinkWriteError {
    /// No sink is registered under the slot's name.
    #[error("no sink registered for slot '{slot}'")]
    UnknownSink {
        /// Slot name.
        slot: SinkName,
    },

    /// The key cannot be stored by this sink.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The content could not be serialised.
    #[error("serialisation failed: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// The underlying store failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Queue source
// ---------------------------------------------------------------------------

/// The queue source could not receive or settle a message.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A message id cannot be used by this queue source.
    #[error("invalid message id '{0}'")]
    InvalidMessageId(String),

    /// The receipt does not refer to a message currently held by this consumer.
    #[error("unknown receipt '{0}'")]
    UnknownReceipt(String),

    /// The underlying queue storage failed.
    #[error("queue I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Invocation and startup
// ---------------------------------------------------------------------------

/// Conditions that fail a whole invocation.
///
/// The message is handed back to the queue source, which decides whether to
/// redeliver or dead-letter it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// The message is malformed (poison message).
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Cancellation was requested and the abort policy is in force.
    #[error("invocation cancelled before stage '{stage}'")]
    Cancelled {
        /// Stage at which cancellation was observed.
        stage: &'static str,
    },

    /// The envelope could not be built.
    #[error("archive fan-out failed: {0}")]
    Fanout(#[from] FanoutError),
}

/// The process configuration is missing or invalid.
///
/// Produced at load time; no message processing begins.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartupConfigError {
    /// A required setting is absent or empty.
    #[error("missing required setting '{name}'")]
    Missing {
        /// Setting key.
        name: &'static str,
    },

    /// A setting is present but malformed.
    #[error("invalid setting '{name}': {reason}")]
    Invalid {
        /// Setting key.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_retry_policy() {
        let unreachable = CallError::Unreachable { message: "refused".into() };
        let server = CallError::Rejected { status: 503, body: String::new() };
        let throttled = CallError::Rejected { status: 429, body: String::new() };
        let client = CallError::Rejected { status: 404, body: String::new() };
        let auth = CallError::Auth(AuthError::Unavailable { message: "down".into() });

        assert!(unreachable.retry_policy().is_retryable());
        assert!(server.retry_policy().is_retryable());
        assert!(throttled.retry_policy().is_retryable());
        assert!(!client.retry_policy().is_retryable());
        assert!(!auth.retry_policy().is_retryable());
        assert!(!CallError::Cancelled.retry_policy().is_retryable());
    }

    #[test]
    fn test_transport_error_maps_to_call_error() {
        let timeout = TransportError::Timeout { after: Duration::from_secs(3) };
        assert_eq!(
            CallError::from(timeout),
            CallError::TimedOut { after: Duration::from_secs(3) }
        );
        let io = TransportError::Io { message: "reset".into() };
        assert_eq!(CallError::from(io), CallError::Unreachable { message: "reset".into() });
    }

    #[test]
    fn test_auth_error_retry_policy() {
        let rejected = AuthError::Rejected { status: 400, message: "bad scope".into() };
        assert_eq!(rejected.retry_policy(), RetryPolicy::NonRetryable);
        let busy = AuthError::Rejected { status: 500, message: "busy".into() };
        assert!(busy.retry_policy().is_retryable());
    }
}
