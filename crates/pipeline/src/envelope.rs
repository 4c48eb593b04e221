//! Output envelope: the pipeline's declaration of what to archive where.
//!
//! The pipeline never writes to storage itself. It returns an
//! [`OutputEnvelope`] and the queue-source runtime performs one write per
//! populated slot after the pipeline returns.

use std::collections::BTreeMap;

use crate::{BlobKey, DocumentId, Event, FanoutError, PartitionKey, SinkName};

/// One pending write.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveEntry {
    /// Object write keyed by path.
    Blob {
        /// Object key.
        key: BlobKey,
        /// Event to archive.
        content: Event,
    },
    /// Document upsert keyed by partition and id.
    Document {
        /// Partition key.
        partition_key: PartitionKey,
        /// Document id within the partition.
        document_id: DocumentId,
        /// Event to archive.
        content: Event,
    },
}

impl ArchiveEntry {
    /// Returns the event carried by this entry.
    pub fn content(&self) -> &Event {
        match self {
            ArchiveEntry::Blob { content, .. } | ArchiveEntry::Document { content, .. } => content,
        }
    }

    /// Returns a short human-readable destination for logs.
    pub fn destination(&self) -> String {
        match self {
            ArchiveEntry::Blob { key, .. } => key.to_string(),
            ArchiveEntry::Document {
                partition_key,
                document_id,
                ..
            } => format!("{partition_key}/{document_id}"),
        }
    }
}

/// Named output slots, each holding at most one [`ArchiveEntry`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputEnvelope {
    slots: BTreeMap<SinkName, ArchiveEntry>,
}

impl OutputEnvelope {
    /// Creates an empty envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::SlotOccupied`] if the slot already holds an
    /// entry; a sink never receives two copies in one invocation.
    pub fn insert(&mut self, slot: SinkName, entry: ArchiveEntry) -> Result<(), FanoutError> {
        if self.slots.contains_key(&slot) {
            return Err(FanoutError::SlotOccupied { slot });
        }
        self.slots.insert(slot, entry);
        Ok(())
    }

    /// Returns the entry in `slot`, if any.
    pub fn get(&self, slot: &SinkName) -> Option<&ArchiveEntry> {
        self.slots.get(slot)
    }

    /// Iterates populated slots in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&SinkName, &ArchiveEntry)> {
        self.slots.iter()
    }

    /// Returns the number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no slot is populated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl IntoIterator for OutputEnvelope {
    type Item = (SinkName, ArchiveEntry);
    type IntoIter = std::collections::btree_map::IntoIter<SinkName, ArchiveEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}
