//! Document store: `<root>/<partition>/<id>.json`.

use std::path::PathBuf;

use async_trait::async_trait;
use pipeline::{DocumentId, DocumentSink, PartitionKey, SinkWriteError};
use tracing::{debug, instrument};

use crate::fs::{escape_component, write_atomic};

/// Filesystem-backed [`DocumentSink`].
///
/// Partition keys and document ids are escaped, so any value maps to exactly
/// one file inside its partition directory.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the file holding `document_id` in `partition_key`.
    pub fn path_for(&self, partition_key: &PartitionKey, document_id: &DocumentId) -> PathBuf {
        self.root
            .join(escape_component(partition_key.as_str()))
            .join(format!("{}.json", escape_component(document_id.as_str())))
    }
}

#[async_trait]
impl DocumentSink for FsDocumentStore {
    #[instrument(skip_all, fields(partition_key = %partition_key, document_id = %document_id))]
    async fn upsert(
        &self,
        partition_key: &PartitionKey,
        document_id: &DocumentId,
        content: &[u8],
    ) -> Result<(), SinkWriteError> {
        let path = self.path_for(partition_key, document_id);
        write_atomic(&path, content).await?;
        debug!(path = %path.display(), "document upserted");
        Ok(())
    }
}
