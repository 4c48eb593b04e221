//! Newtype domain identifiers.
//!
//! Every concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a broker [`MessageId`] with a [`DocumentId`] even though both are strings
//! under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single pipeline invocation (one execution for one message).
///
/// Generated fresh for every delivery; propagated through spans so all
/// activity from a single invocation can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Generates a new random invocation identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers — String-backed (broker / sink names)
// ---------------------------------------------------------------------------

string_id! {
    /// Broker-assigned message identifier.
    ///
    /// Stable across redeliveries of the same message.
    MessageId
}

string_id! {
    /// Names an output slot in the envelope and the sink bound to it
    /// (e.g. `"archive-blob"`, `"archive-document"`).
    SinkName
}

string_id! {
    /// Relative object key within the blob sink
    /// (e.g. `"archive/abc123-20240101-120000-output.json"`).
    BlobKey
}

string_id! {
    /// Logical partition of a document within the document sink.
    PartitionKey
}

string_id! {
    /// Identity of a document within its partition. Writes with an existing
    /// id overwrite (upsert).
    DocumentId
}

string_id! {
    /// Opaque handle the queue source uses to settle a delivery.
    ReceiptHandle
}

impl SinkName {
    /// Slot name of the default blob archive output.
    pub fn archive_blob() -> Self {
        Self("archive-blob".to_string())
    }

    /// Slot name of the default document archive output.
    pub fn archive_document() -> Self {
        Self("archive-document".to_string())
    }
}
