//! Performs the writes an [`OutputEnvelope`] declares.

use std::collections::HashMap;
use std::sync::Arc;

use pipeline::{ArchiveEntry, BlobSink, DocumentSink, OutputEnvelope, SinkName, SinkWriteError};
use tracing::{debug, error, instrument};

/// Routes envelope slots to the sinks registered under the same name.
#[derive(Default, Clone)]
pub struct EnvelopeDispatcher {
    blobs: HashMap<SinkName, Arc<dyn BlobSink>>,
    documents: HashMap<SinkName, Arc<dyn DocumentSink>>,
}

impl EnvelopeDispatcher {
    /// Creates a dispatcher with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a blob sink for `slot`.
    pub fn with_blob_sink(mut self, slot: SinkName, sink: Arc<dyn BlobSink>) -> Self {
        self.blobs.insert(slot, sink);
        self
    }

    /// Registers a document sink for `slot`.
    pub fn with_document_sink(mut self, slot: SinkName, sink: Arc<dyn DocumentSink>) -> Self {
        self.documents.insert(slot, sink);
        self
    }

    /// Returns `true` if any sink is registered for `slot`.
    pub fn has_sink(&self, slot: &SinkName) -> bool {
        self.blobs.contains_key(slot) || self.documents.contains_key(slot)
    }

    /// Writes every entry of `envelope`, returning how many were written.
    ///
    /// Stops at the first failure; the caller abandons the message and the
    /// redelivery rewrites the entries.
    ///
    /// # Errors
    ///
    /// - [`SinkWriteError::UnknownSink`] if a populated slot has no sink of the
    ///   entry's kind.
    /// - Any error the sink reports.
    #[instrument(skip_all, fields(entries = envelope.len()))]
    pub async fn dispatch(&self, envelope: &OutputEnvelope) -> Result<usize, SinkWriteError> {
        let mut written = 0;
        for (slot, entry) in envelope.iter() {
            let content = entry.content().to_archive_bytes()?;
            let result = match entry {
                ArchiveEntry::Blob { key, .. } => match self.blobs.get(slot) {
                    Some(sink) => sink.put(key, &content).await,
                    None => Err(SinkWriteError::UnknownSink { slot: slot.clone() }),
                },
                ArchiveEntry::Document {
                    partition_key,
                    document_id,
                    ..
                } => match self.documents.get(slot) {
                    Some(sink) => sink.upsert(partition_key, document_id, &content).await,
                    None => Err(SinkWriteError::UnknownSink { slot: slot.clone() }),
                },
            };

            if let Err(e) = result {
                error!(slot = %slot, destination = %entry.destination(), error = %e, "archive write failed");
                return Err(e);
            }
            debug!(slot = %slot, destination = %entry.destination(), "archive entry written");
            written += 1;
        }
        Ok(written)
    }
}
