//! Courier queue-source runtime.
//!
//! Everything between a queue and the pipeline:
//!
//! - [`SpoolQueueSource`]: a directory-backed [`pipeline::QueueSource`] with
//!   claim-by-rename, redelivery counting, dead-lettering, and crash recovery.
//! - [`EnvelopeDispatcher`]: performs the writes an
//!   [`pipeline::OutputEnvelope`] declares, one per populated slot.
//! - [`Worker`]: the receive loop. Runs one [`pipeline::MessageHandler`]
//!   invocation per delivery with bounded concurrency and a per-invocation
//!   timeout, then settles the delivery.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Queue storage, settlement, and task scheduling live
//! here. The [`pipeline`] crate sees only [`pipeline::QueueSource`] and the
//! sink traits.

mod dispatch;
mod spool;
mod worker;

pub use dispatch::EnvelopeDispatcher;
pub use spool::{SpoolOptions, SpoolQueueSource, DEFAULT_MAX_DELIVERY_COUNT, DEFAULT_POLL_INTERVAL};
pub use worker::{Settlement, Worker, WorkerOptions};
