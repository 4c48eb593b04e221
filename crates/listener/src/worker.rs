//! Receive loop: one invocation per delivery, bounded concurrency, settlement.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{Delivery, InvocationContext, MessageHandler, QueueSource, Settings};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::EnvelopeDispatcher;

/// Pause after a failed receive before polling the source again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Concurrency and time limits for the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Invocations allowed in flight at once.
    pub max_concurrent_invocations: usize,
    /// Time after which an invocation's cancellation signal fires.
    pub invocation_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: 16,
            invocation_timeout: Duration::from_secs(300),
        }
    }
}

/// How a delivery was settled with its queue source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Processed and archived; removed from the queue.
    Completed,
    /// Handed back for redelivery (or dead-lettered by the source).
    Abandoned {
        /// Why the invocation did not complete.
        reason: String,
    },
    /// Settlement itself failed; the source will redeliver on its own terms.
    Unsettled,
}

/// Drives a [`QueueSource`] through the [`MessageHandler`].
#[derive(Clone)]
pub struct Worker {
    source: Arc<dyn QueueSource>,
    handler: Arc<MessageHandler>,
    dispatcher: Arc<EnvelopeDispatcher>,
    settings: Arc<Settings>,
    options: WorkerOptions,
}

impl Worker {
    /// Creates a worker.
    pub fn new(
        source: Arc<dyn QueueSource>,
        handler: Arc<MessageHandler>,
        dispatcher: Arc<EnvelopeDispatcher>,
        settings: Arc<Settings>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            source,
            handler,
            dispatcher,
            settings,
            options,
        }
    }

    /// Runs until `shutdown` fires, then waits for in-flight invocations.
    ///
    /// Shutdown also cancels every in-flight invocation; each one settles
    /// according to the configured cancellation policy before this returns.
    pub async fn run(&self, shutdown: CancellationToken) {
        let concurrency = self.options.max_concurrent_invocations.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        info!(
            max_concurrent_invocations = concurrency,
            invocation_timeout_secs = self.options.invocation_timeout.as_secs(),
            "worker started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let delivery = match self.source.receive(&shutdown).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                    }
                }
            };

            let worker = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let settlement = worker.process(delivery, &shutdown).await;
                drop(permit);
                settlement
            });
        }

        info!(in_flight = tasks.len(), "worker stopping, draining in-flight invocations");
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        info!("worker stopped");
    }

    /// Runs one invocation for `delivery` and settles it.
    ///
    /// | Outcome | Settlement |
    /// |---------|------------|
    /// | envelope produced and written | complete |
    /// | decode failure | abandon (the source dead-letters at its limit) |
    /// | cancelled under the abort policy | abandon |
    /// | archive write failure | abandon |
    ///
    /// The callback outcome never affects settlement.
    #[instrument(
        name = "delivery",
        skip_all,
        fields(message_id = %delivery.message.message_id, delivery_count = delivery.message.delivery_count)
    )]
    pub async fn process(&self, delivery: Delivery, shutdown: &CancellationToken) -> Settlement {
        let cancel = shutdown.child_token();
        let timer = tokio::spawn(
            invocation_timer(cancel.clone(), self.options.invocation_timeout).in_current_span(),
        );

        let ctx = InvocationContext::new(cancel);
        let outcome = match self.handler.handle(&delivery.message, ctx, &self.settings).await {
            Ok(handled) => self
                .dispatcher
                .dispatch(&handled.envelope)
                .await
                .map(|_| ())
                .map_err(|e| format!("archive write failed: {e}")),
            Err(e) => Err(e.to_string()),
        };
        timer.abort();

        match outcome {
            Ok(()) => match self.source.complete(&delivery).await {
                Ok(()) => {
                    debug!("delivery completed");
                    Settlement::Completed
                }
                Err(e) => {
                    error!(error = %e, "failed to complete delivery");
                    Settlement::Unsettled
                }
            },
            Err(reason) => match self.source.abandon(&delivery, &reason).await {
                Ok(()) => {
                    warn!(reason = %reason, "delivery abandoned");
                    Settlement::Abandoned { reason }
                }
                Err(e) => {
                    error!(error = %e, reason = %reason, "failed to abandon delivery");
                    Settlement::Unsettled
                }
            },
        }
    }
}

/// Fires `cancel` once `timeout` elapses.
async fn invocation_timer(cancel: CancellationToken, timeout: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(timeout) => {
            warn!(timeout_secs = timeout.as_secs_f64(), "invocation timeout reached, requesting cancellation");
            cancel.cancel();
        }
    }
}

fn log_join(joined: Result<Settlement, tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "invocation task failed");
    }
}
