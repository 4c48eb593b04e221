//! Cancellation guard.
//!
//! Checked at the start of processing and again before each suspension point
//! (the callback and the archive step). The first time a set signal is
//! observed the guard runs its precaution step: a warning, a progress
//! checkpoint recorded on the context, and a completion diagnostic. What
//! happens next depends on the deployment's [`CancellationPolicy`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{InvocationContext, Stage};

/// What an invocation does once cancellation has been requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Stop at the next check; the message is abandoned and redelivered.
    #[default]
    Abort,
    /// Skip the callback but still produce the envelope so the message can be
    /// archived and acknowledged.
    BestEffort,
}

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// No cancellation requested.
    Continue,
    /// Cancellation requested; the best-effort policy lets the invocation go on.
    ContinueCancelled,
    /// Cancellation requested; the invocation must stop now.
    Abort,
}

impl GuardDecision {
    /// Returns `true` if cancellation has been observed.
    pub fn is_cancelled(self) -> bool {
        !matches!(self, GuardDecision::Continue)
    }
}

/// Applies a [`CancellationPolicy`] to an invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancellationGuard {
    policy: CancellationPolicy,
}

impl CancellationGuard {
    /// Creates a guard for `policy`.
    pub fn new(policy: CancellationPolicy) -> Self {
        Self { policy }
    }

    /// Checks the signal before `stage`.
    pub fn check(&self, ctx: &mut InvocationContext, stage: Stage) -> GuardDecision {
        if !ctx.is_cancelled() {
            return GuardDecision::Continue;
        }

        if ctx.checkpoint().is_none() {
            warn!(
                invocation_id = %ctx.invocation_id(),
                stage = %stage,
                policy = ?self.policy,
                "cancellation requested, taking precautionary actions"
            );
            let checkpoint = ctx.record_checkpoint(stage);
            debug!(
                invocation_id = %ctx.invocation_id(),
                stage = %checkpoint.stage,
                recorded_at = %checkpoint.recorded_at,
                "precautionary activities complete"
            );
        }

        match self.policy {
            CancellationPolicy::Abort => GuardDecision::Abort,
            CancellationPolicy::BestEffort => GuardDecision::ContinueCancelled,
        }
    }
}
