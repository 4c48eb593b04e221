//! The message handler: trigger adapter, cancellation guard, callback
//! invoker, and archive fan-out composed for one invocation.
//!
//! ```text
//! RawMessage ──decode──▶ Event ──guard──▶ callback (advisory) ──guard──▶ fan-out ──▶ OutputEnvelope
//! ```
//!
//! Only decode failures, an aborting cancellation, and an unbuildable envelope
//! fail the invocation. The callback outcome is reported alongside the
//! envelope and never decides whether archival happens.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::{
    trigger, ArchiveFanout, ArchiveTargets, CallError, CallbackInvoker, CancellationGuard,
    CancellationPolicy, GuardDecision, InvocationContext, InvocationError, OutputEnvelope,
    RawMessage, ResponseSummary, Settings, Stage,
};

/// Static behaviour of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Whether the callback step runs at all.
    pub callback_enabled: bool,
    /// What to do once cancellation is requested.
    pub cancellation_policy: CancellationPolicy,
    /// Which sinks receive the event.
    pub archive: ArchiveTargets,
}

/// Why the callback did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The deployment has the callback turned off.
    Disabled,
    /// Cancellation was requested under the best-effort policy.
    Cancelled,
}

/// Classification of the advisory callback for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The endpoint answered 2xx.
    Succeeded(ResponseSummary),
    /// Credential acquisition or the call failed.
    Failed(CallError),
    /// The callback was not attempted.
    Skipped(SkipReason),
}

impl CallbackOutcome {
    /// Returns `true` for [`CallbackOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, CallbackOutcome::Succeeded(_))
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HandledMessage {
    /// Writes for the runtime to perform.
    pub envelope: OutputEnvelope,
    /// What happened to the callback.
    pub callback: CallbackOutcome,
}

/// Runs the pipeline for one message at a time. Cheap to share across
/// concurrent invocations.
pub struct MessageHandler {
    invoker: Arc<CallbackInvoker>,
    guard: CancellationGuard,
    fanout: ArchiveFanout,
    callback_enabled: bool,
}

impl MessageHandler {
    /// Creates a handler.
    pub fn new(invoker: Arc<CallbackInvoker>, options: HandlerOptions) -> Self {
        Self {
            invoker,
            guard: CancellationGuard::new(options.cancellation_policy),
            fanout: ArchiveFanout::new(options.archive),
            callback_enabled: options.callback_enabled,
        }
    }

    /// Processes one delivered message.
    ///
    /// # Errors
    ///
    /// - [`InvocationError::Decode`] for malformed messages.
    /// - [`InvocationError::Cancelled`] when cancellation is observed under
    ///   [`CancellationPolicy::Abort`].
    /// - [`InvocationError::Fanout`] if the envelope cannot be built.
    #[instrument(
        name = "invocation",
        skip_all,
        fields(invocation_id = %ctx.invocation_id(), message_id = %raw.message_id)
    )]
    pub async fn handle(
        &self,
        raw: &RawMessage,
        mut ctx: InvocationContext,
        settings: &Settings,
    ) -> Result<HandledMessage, InvocationError> {
        let event = trigger::receive(raw, &ctx)?;

        self.check(&mut ctx, Stage::Received)?;

        let callback = if !self.callback_enabled {
            CallbackOutcome::Skipped(SkipReason::Disabled)
        } else if self.check(&mut ctx, Stage::Callback)?.is_cancelled() {
            debug!("callback skipped after cancellation");
            CallbackOutcome::Skipped(SkipReason::Cancelled)
        } else {
            self.run_callback(settings, &ctx).await
        };

        match serde_json::to_string(event.payload()) {
            Ok(body) => debug!(body = %body, "message body"),
            Err(e) => warn!(error = %e, "message body could not be rendered for logging"),
        }

        self.check(&mut ctx, Stage::Archive)?;
        let envelope = self.fanout.fan_out(&event, &ctx).inspect_err(|e| {
            error!(error = %e, "archive fan-out failed");
        })?;

        info!(
            outputs = envelope.len(),
            callback_succeeded = callback.is_success(),
            "message processed"
        );
        Ok(HandledMessage { envelope, callback })
    }

    fn check(&self, ctx: &mut InvocationContext, stage: Stage) -> Result<GuardDecision, InvocationError> {
        match self.guard.check(ctx, stage) {
            GuardDecision::Abort => Err(InvocationError::Cancelled {
                stage: stage.as_str(),
            }),
            decision => Ok(decision),
        }
    }

    async fn run_callback(&self, settings: &Settings, ctx: &InvocationContext) -> CallbackOutcome {
        match self.invoker.invoke(settings, ctx.cancellation()).await {
            Ok(summary) => {
                info!(
                    status = summary.status,
                    attempts = summary.attempts,
                    response = %summary.body,
                    "callback classified as success"
                );
                CallbackOutcome::Succeeded(summary)
            }
            Err(CallError::Cancelled) => {
                warn!("callback interrupted by cancellation, result discarded");
                CallbackOutcome::Failed(CallError::Cancelled)
            }
            Err(CallError::Auth(e)) => {
                error!(
                    error = %e,
                    transient = e.retry_policy().is_retryable(),
                    "credential acquisition failed, callback not sent"
                );
                CallbackOutcome::Failed(CallError::Auth(e))
            }
            Err(e) => {
                let status = match &e {
                    CallError::Rejected { status, .. } => Some(*status),
                    _ => None,
                };
                error!(error = %e, status = ?status, "callback failed");
                CallbackOutcome::Failed(e)
            }
        }
    }
}
