//! Port traits implemented by infrastructure crates.
//!
//! The pipeline depends only on these traits, never on a broker, identity,
//! HTTP, or storage SDK. Infrastructure crates supply the implementations and
//! the `worker` binary wires them together.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    AuthError, AuthenticationScope, BlobKey, CallbackUrl, CredentialToken, DocumentId,
    HttpResponse, PartitionKey, QueueError, RawMessage, ReceiptHandle, SinkWriteError,
    TransportError,
};

/// A message held by a consumer until it is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The message as delivered.
    pub message: RawMessage,
    /// Handle used to settle this delivery.
    pub receipt: ReceiptHandle,
}

/// Delivers messages one at a time and accepts their settlement.
///
/// Every delivery returned by [`QueueSource::receive`] must be settled exactly
/// once with [`complete`](QueueSource::complete),
/// [`abandon`](QueueSource::abandon), or
/// [`dead_letter`](QueueSource::dead_letter).
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` once `cancel` fires without a message being claimed.
    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError>;

    /// Removes a successfully processed message.
    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Returns a message for redelivery. The source may dead-letter it instead
    /// once its own delivery limit is reached.
    async fn abandon(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Moves a message to the dead-letter store immediately.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;
}

/// Issues bearer credentials for a scope.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Acquires a token for `scope`.
    ///
    /// Implementations should stop promptly once `cancel` fires; callers also
    /// race the call against the token.
    async fn get_token(
        &self,
        scope: &AuthenticationScope,
        cancel: &CancellationToken,
    ) -> Result<CredentialToken, AuthError>;
}

/// Performs the authenticated GET used by the callback step.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Sends one `GET url` with `Authorization: Bearer <token>`, bounded by
    /// `timeout`. Any status is a successful transport result.
    async fn get(
        &self,
        url: &CallbackUrl,
        token: &CredentialToken,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// Blob-style archive sink.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BlobSink: Send + Sync {
    /// Stores `content` under `key`, replacing any existing object.
    async fn put(&self, key: &BlobKey, content: &[u8]) -> Result<(), SinkWriteError>;
}

/// Document-style archive sink with upsert semantics.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Inserts the document, or overwrites it if `(partition_key, document_id)`
    /// already exists.
    async fn upsert(
        &self,
        partition_key: &PartitionKey,
        document_id: &DocumentId,
        content: &[u8],
    ) -> Result<(), SinkWriteError>;
}
