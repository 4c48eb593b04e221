//! Shared value types for the Courier pipeline domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. an [`Event`] payload is always a
//! JSON object, a [`CredentialToken`] never prints its secret) and participate
//! in pipeline computations.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::MessageId;

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

/// A message exactly as the queue source delivered it, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Broker-assigned message identifier.
    pub message_id: MessageId,

    /// MIME content type declared by the sender, if any.
    pub content_type: Option<String>,

    /// Raw body bytes.
    pub body: Vec<u8>,

    /// How many times this message has been delivered, starting at 1.
    pub delivery_count: u32,
}

/// Broker-provided metadata carried alongside a decoded [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Broker-assigned message identifier.
    pub message_id: MessageId,

    /// MIME content type declared by the sender, if any.
    pub content_type: Option<String>,

    /// Length of the raw body in bytes.
    pub body_len: usize,

    /// Delivery attempt number, starting at 1.
    pub delivery_count: u32,
}

/// One decoded unit of work.
///
/// The payload is application-defined and treated as an opaque JSON object by
/// the pipeline. Events are immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    metadata: MessageMetadata,
    payload: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Creates an [`Event`] from metadata and an already-decoded payload object.
    pub fn new(metadata: MessageMetadata, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { metadata, payload }
    }

    /// Returns the broker metadata.
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Returns the broker message id.
    pub fn message_id(&self) -> &MessageId {
        &self.metadata.message_id
    }

    /// Returns the application payload.
    pub fn payload(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.payload
    }

    /// Returns a payload field rendered as a plain string.
    ///
    /// Strings are returned verbatim, numbers and booleans in their JSON
    /// form. Returns `None` for absent, null, array, or object fields, and
    /// for empty strings.
    pub fn field_as_string(&self, field: &str) -> Option<String> {
        match self.payload.get(field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Serialises the payload as it is written to archive sinks.
    pub fn to_archive_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Short-lived bearer token bound to a scope.
///
/// `Debug` and `Display` redact the secret; the raw value is only reachable
/// through [`CredentialToken::secret`] when building the `Authorization`
/// header.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialToken {
    secret: String,
    expires_at: Timestamp,
}

impl CredentialToken {
    /// Creates a token from its secret and expiry.
    pub fn new(secret: impl Into<String>, expires_at: Timestamp) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Returns the bearer secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns when the token stops being valid.
    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Returns `true` if the token expires within `skew` of `now`.
    pub fn expires_within(&self, now: Timestamp, skew: Duration) -> bool {
        match chrono::Duration::from_std(skew) {
            Ok(skew) => self.expires_at.as_datetime() - skew <= now.as_datetime(),
            Err(_) => true,
        }
    }
}

impl std::fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl std::fmt::Display for CredentialToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted token, expires {}>", self.expires_at)
    }
}

// ---------------------------------------------------------------------------
// Callback responses
// ---------------------------------------------------------------------------

/// Status and body of an HTTP response as returned by a callback transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body decoded as text. Treated as opaque.
    pub body: String,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Summary of a successful callback, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSummary {
    /// HTTP status code (always 2xx).
    pub status: u16,
    /// Response body as text.
    pub body: String,
    /// Number of attempts made, including the first.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from seconds since the Unix epoch.
    ///
    /// Returns `None` if the value is out of range.
    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Formats the timestamp with a `chrono` strftime pattern.
    pub fn format(self, pattern: &str) -> String {
        self.0.format(pattern).to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
