//! Core message pipeline domain for Courier.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, error type, and port trait used by the queue-triggered archival
//! pipeline. Infrastructure crates implement the traits defined here; they
//! never add pipeline rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`MessageId`, `InvocationId`, `SinkName`, etc.) |
//! | [`types`] | Shared value types (`RawMessage`, `Event`, `CredentialToken`, `Timestamp`, etc.) |
//! | [`errors`] | Per-stage error types and `RetryPolicy` |
//! | [`settings`] | Read-only callback settings |
//! | [`ports`] | Queue, credential, HTTP, and sink traits |
//! | [`context`] | Per-invocation metadata and progress checkpoints |
//! | [`trigger`] | Decoding delivered messages into events |
//! | [`guard`] | Cancellation policy enforcement |
//! | [`token_cache`] | Expiry-aware credential snapshots |
//! | [`callback`] | Authenticated advisory callback |
//! | [`template`] | Blob path templates |
//! | [`envelope`] | Output slots handed to the runtime |
//! | [`fanout`] | Deterministic archive keys, one entry per sink |
//! | [`handler`] | The composed per-message pipeline |

pub mod callback;
pub mod context;
pub mod envelope;
pub mod errors;
pub mod fanout;
pub mod guard;
pub mod handler;
pub mod identifiers;
pub mod ports;
pub mod settings;
pub mod template;
pub mod token_cache;
pub mod trigger;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use callback::{CallbackInvoker, CallbackOptions, MAX_CALLBACK_RETRIES};
pub use context::{Checkpoint, InvocationContext, Stage};
pub use envelope::{ArchiveEntry, OutputEnvelope};
pub use errors::{
    AuthError, CallError, DecodeError, FanoutError, InvocationError, QueueError, RetryPolicy,
    SinkWriteError, StartupConfigError, TransportError,
};
pub use fanout::{ArchiveFanout, ArchiveTargets, BlobTarget, DocumentTarget};
pub use guard::{CancellationGuard, CancellationPolicy, GuardDecision};
pub use handler::{CallbackOutcome, HandledMessage, HandlerOptions, MessageHandler, SkipReason};
pub use identifiers::{
    BlobKey, DocumentId, InvocationId, MessageId, PartitionKey, ReceiptHandle, SinkName,
};
pub use ports::{BlobSink, CallbackTransport, Delivery, DocumentSink, QueueSource, TokenProvider};
pub use settings::{AuthenticationScope, CallbackUrl, Settings};
pub use template::{PathTemplate, TemplateToken, TemplateValues, DEFAULT_BLOB_PATH_TEMPLATE};
pub use token_cache::{CachedTokenProvider, DEFAULT_REFRESH_SKEW};
pub use types::{
    CredentialToken, Event, HttpResponse, MessageMetadata, RawMessage, ResponseSummary, Timestamp,
};

#[cfg(any(test, feature = "testing"))]
pub use ports::{
    MockBlobSink, MockCallbackTransport, MockDocumentSink, MockQueueSource, MockTokenProvider,
};
