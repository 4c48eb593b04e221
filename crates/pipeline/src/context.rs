//! Per-invocation metadata.

use tokio_util::sync::CancellationToken;

use crate::{InvocationId, Timestamp};

/// Pipeline stage at which a progress checkpoint was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Message decoded, nothing external done yet.
    Received,
    /// About to call the callback endpoint.
    Callback,
    /// About to populate the output envelope.
    Archive,
}

impl Stage {
    /// Returns a stable lowercase label for logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Callback => "callback",
            Stage::Archive => "archive",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far an invocation had got when cancellation was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Stage reached.
    pub stage: Stage,
    /// When the checkpoint was recorded.
    pub recorded_at: Timestamp,
}

/// Metadata for exactly one invocation. Discarded on completion.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    invocation_id: InvocationId,
    cancel: CancellationToken,
    received_at: Timestamp,
    checkpoint: Option<Checkpoint>,
}

impl InvocationContext {
    /// Creates a context with a fresh invocation id, stamped now.
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_timestamp(InvocationId::new_random(), cancel, Timestamp::now())
    }

    /// Creates a context with explicit identity and timestamp.
    pub fn with_timestamp(
        invocation_id: InvocationId,
        cancel: CancellationToken,
        received_at: Timestamp,
    ) -> Self {
        Self {
            invocation_id,
            cancel,
            received_at,
            checkpoint: None,
        }
    }

    /// Returns the invocation id.
    pub fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    /// Returns the cancellation signal for this invocation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the time captured when the invocation started.
    ///
    /// Archive keys use this rather than the write time so they stay stable if
    /// the runtime retries a write.
    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }

    /// Returns the progress checkpoint, if cancellation has been observed.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint
    }

    pub(crate) fn record_checkpoint(&mut self, stage: Stage) -> Checkpoint {
        let checkpoint = Checkpoint {
            stage,
            recorded_at: Timestamp::now(),
        };
        self.checkpoint = Some(checkpoint);
        checkpoint
    }
}
