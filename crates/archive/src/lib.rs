//! Courier archive sink adapters.
//!
//! Implements [`pipeline::BlobSink`] and [`pipeline::DocumentSink`] on a local
//! filesystem root. Both stores overwrite on repeat, so redelivered messages
//! upsert rather than duplicate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Path validation, escaping, and atomic writes live
//! here. The [`pipeline`] crate sees only the sink traits.

mod blob;
mod document;
mod fs;

pub use blob::FsBlobStore;
pub use document::FsDocumentStore;
